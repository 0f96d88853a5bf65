/*
 * mecho - readiness-multiplexed TCP echo engine
 * This is free and unencumbered software released into the public domain.
 */
use std::net::{IpAddr, SocketAddr};
use std::str;
use std::thread;
use std::time::Duration;

use mecho_rs::{ClientConfig, ConnectPolicy, Connector, EchoError, ResponseSize, DEFAULT_PORT, REQUEST};

use clap::Parser;
use dns_lookup::lookup_host;
use log::{info, warn, error};

const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Readiness-multiplexed TCP echo client
#[derive(Parser, Debug)]
#[command(name = "echo_client", version, about, long_about = None)]
struct Args {
    /// Host name or address of the echo server
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Port of the echo server
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Request to send (defaults to the demonstration request)
    #[arg(short, long)]
    message: Option<String>,

    /// Give up connecting after this many milliseconds
    #[arg(long, default_value_t = 10_000)]
    connect_timeout: u64,

    /// Number of clients to run side by side
    #[arg(short, long, default_value_t = 1)]
    clients: usize,

    /// Accept any response instead of expecting an echo
    #[arg(long)]
    any_response: bool,
}

fn main() {
    /* Parse the command-line */
    let args = Args::parse();

    /* Initialize the log output */
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    /* Print logo */
    info!("mecho - Echo Client [Version {}]", PKG_VERSION);

    /* Lookup ip address */
    info!("Looking up IP address for server: {:?}", args.host);
    let ip_addr = match lookup_host(&args.host) {
        Ok(result) => match pick_address(result) {
            Some(ip_addr) => ip_addr,
            None => return error!("No address found for {:?}", args.host),
        },
        Err(error) => return error!("Address lookup failed: {:?}", error),
    };
    let addr = SocketAddr::new(ip_addr, args.port);

    let config = ClientConfig {
        connect: ConnectPolicy { timeout: Some(Duration::from_millis(args.connect_timeout)), max_attempts: None },
        response: match args.any_response {
            true => ResponseSize::AnyBytes,
            false => ResponseSize::MatchRequest,
        },
        ..ClientConfig::default()
    };
    let request = args.message.map(String::into_bytes).unwrap_or_else(|| REQUEST.to_vec());

    /* Run the clients, each in its own thread */
    let threads: Vec<_> = (0..args.clients.max(1))
        .map(|n| {
            let (config, request) = (config.clone(), request.clone());
            thread::spawn(move || exchange(n, addr, config, request))
        })
        .collect();
    for thread in threads {
        if thread.join().is_err() {
            error!("A client thread has panicked!");
        }
    }

    /* Bye! */
    info!("That's it, goodbye!");
}

fn exchange(n: usize, addr: SocketAddr, config: ClientConfig, request: Vec<u8>) {
    info!("[{}] Connecting to server: {}", n, addr);
    match Connector::new(config).exchange(addr, &request) {
        Ok(report) => {
            info!("[{}] From server: {:?}", n, str::from_utf8(&report.response).unwrap_or("<binary data>"));
            if report.response != request {
                warn!("[{}] The response differs from the request", n);
            }
            info!("[{}] Client is {:?}", n, report.state);
        },
        Err(error) => match error {
            EchoError::ConnectTimedOut => error!("[{}] Connect operation timed out!", n),
            EchoError::TimedOut => error!("[{}] The connection was idle for too long!", n),
            EchoError::TooBig => error!("[{}] The request does not fit into the buffer!", n),
            EchoError::Failed(inner) => error!("[{}] The exchange has failed: {:?}", n, inner),
        },
    }
}

fn pick_address(candidates: Vec<IpAddr>) -> Option<IpAddr> {
    candidates.iter().find(|ip_addr| ip_addr.is_ipv4()).or_else(|| candidates.first()).copied()
}
