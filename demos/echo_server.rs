/*
 * mecho - readiness-multiplexed TCP echo engine
 * This is free and unencumbered software released into the public domain.
 */
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use mecho_rs::{Acceptor, Dispatch, Reply, ServerConfig, DEFAULT_BUFFER_SIZE, DEFAULT_LINGER, DEFAULT_PORT, SERVER_MESSAGE};

use clap::Parser;
use log::{info, warn, error};

const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Readiness-multiplexed TCP echo server
#[derive(Parser, Debug)]
#[command(name = "echo_server", version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    address: IpAddr,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Capacity of each connection's read and write buffer
    #[arg(short, long, default_value_t = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,

    /// Keep echoing until the client closes the connection
    #[arg(short, long)]
    keep_alive: bool,

    /// Keep reading this many milliseconds after an answer before closing (0 = close right away)
    #[arg(long, default_value_t = DEFAULT_LINGER.as_millis() as u64)]
    linger_ms: u64,

    /// Answer with a canned message instead of echoing the request
    #[arg(long)]
    fixed_reply: bool,

    /// Close connections that stay idle for this many seconds
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Serve connections from a pool of this many threads (0 = one per CPU)
    /// instead of one thread per connection
    #[arg(long)]
    pool: Option<usize>,
}

fn main() {
    /* Parse the command-line */
    let args = Args::parse();

    /* Initialize the log output */
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    /* Print logo */
    info!("mecho - Echo Server [Version {}]", PKG_VERSION);

    let config = ServerConfig {
        buffer_size: args.buffer_size,
        reply: match args.fixed_reply {
            true => Reply::Fixed(SERVER_MESSAGE.to_vec()),
            false => Reply::Echo,
        },
        keep_alive: args.keep_alive,
        linger: match args.linger_ms {
            0 => None,
            millis => Some(Duration::from_millis(millis)),
        },
        idle_timeout: args.idle_timeout.map(Duration::from_secs),
        dispatch: match args.pool {
            Some(0) => Dispatch::pool(),
            Some(workers) => Dispatch::Pool { workers },
            None => Dispatch::ThreadPerConnection,
        },
        ..ServerConfig::default()
    };

    /* Bind Acceptor to local socket */
    let mut acceptor = match Acceptor::bind(SocketAddr::new(args.address, args.port), config) {
        Ok(value) => value,
        Err(error) => return error!("Failed to bind Acceptor: {:?}", error),
    };

    /* Register Canceller with Ctrl+C handler */
    let canceller = acceptor.canceller();
    ctrlc::set_handler(move || {
        warn!("Shutdown has been requested!");
        if let Err(error) = canceller.cancel() {
            error!("Failed to cancel the acceptor: {:?}", error);
        }
    })
    .expect("Failed to register CTRL+C handler!");

    /* Accept all incoming connections */
    match acceptor.run() {
        Ok(count) => info!("Served {} connection(s)", count),
        Err(error) => error!("Accept loop has failed: {}", error),
    }

    /* Bye! */
    info!("That's it, goodbye!");
}
