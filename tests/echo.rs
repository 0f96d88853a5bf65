/*
 * mecho - readiness-multiplexed TCP echo engine
 * This is free and unencumbered software released into the public domain.
 */
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::net::TcpStream as MioTcpStream;

use mecho_rs::{Acceptor, Canceller, ClientConfig, Connection, ConnectionState, Connector, Dispatch, EchoError, Reply, ResponseSize, ServerConfig, REQUEST, SERVER_MESSAGE};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Server {
    addr: SocketAddr,
    canceller: Canceller,
    thread: JoinHandle<Result<usize, EchoError>>,
}

impl Server {
    fn start(config: ServerConfig) -> Self {
        init_logger();
        let mut acceptor = Acceptor::bind("127.0.0.1:0".parse().unwrap(), config).unwrap();
        let addr = acceptor.local_addr().unwrap();
        let canceller = acceptor.canceller();
        let thread = thread::spawn(move || acceptor.run());
        Self { addr, canceller, thread }
    }

    fn stop(self) -> usize {
        self.canceller.cancel().unwrap();
        self.thread.join().unwrap().unwrap()
    }
}

fn accepted_pair() -> (TcpStream, MioTcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server, _) = listener.accept().unwrap();
    server.set_nonblocking(true).unwrap();
    (client, MioTcpStream::from_std(server))
}

fn pattern(length: usize, seed: u8) -> Vec<u8> {
    (0..length).map(|n| (n % 251) as u8 ^ seed).collect()
}

#[test]
fn request_is_echoed_back() {
    let server = Server::start(ServerConfig::default());

    let report = Connector::default().exchange(server.addr, REQUEST).unwrap();
    assert_eq!(report.state, ConnectionState::Finished);
    assert_eq!(report.response, REQUEST);
    assert_eq!(report.stats.bytes_written, REQUEST.len());

    assert_eq!(server.stop(), 1);
}

#[test]
fn payloads_up_to_buffer_capacity_are_echoed() {
    let server = Server::start(ServerConfig { buffer_size: 256, ..ServerConfig::default() });
    let connector = Connector::new(ClientConfig { buffer_size: 256, ..ClientConfig::default() });

    for length in [1, 17, 255, 256] {
        let payload = pattern(length, length as u8);
        let report = connector.exchange(server.addr, &payload).unwrap();
        assert_eq!(report.response, payload, "payload of {} byte(s)", length);
    }

    assert_eq!(server.stop(), 4);
}

#[test]
fn payload_larger_than_server_buffer_is_reassembled() {
    let server = Server::start(ServerConfig { buffer_size: 1024, ..ServerConfig::default() });
    let payload = pattern(48 * 1024, 0x5a);
    let connector = Connector::new(ClientConfig { buffer_size: payload.len(), ..ClientConfig::default() });

    let report = connector.exchange(server.addr, &payload).unwrap();
    assert_eq!(report.response.len(), payload.len());
    assert!(report.response == payload, "echoed bytes differ from the request");
    assert!(report.stats.read_cycles >= 1);

    server.stop();
}

#[test]
fn request_split_across_pauses_is_echoed_in_full() {
    let server = Server::start(ServerConfig::default());
    let payload = pattern(1500, 0x33);

    let mut client = TcpStream::connect(server.addr).unwrap();
    client.write_all(&payload[..1200]).unwrap();
    thread::sleep(Duration::from_millis(200));
    client.write_all(&payload[1200..]).unwrap();

    let mut echoed = Vec::new();
    client.read_to_end(&mut echoed).unwrap();
    assert_eq!(echoed.len(), payload.len());
    assert!(echoed == payload, "echoed bytes differ from the request");

    assert_eq!(server.stop(), 1);
}

#[test]
fn fixed_reply_is_sent_for_the_request() {
    let server = Server::start(ServerConfig { reply: Reply::Fixed(SERVER_MESSAGE.to_vec()), ..ServerConfig::default() });
    let connector = Connector::new(ClientConfig { response: ResponseSize::AnyBytes, ..ClientConfig::default() });

    let report = connector.exchange(server.addr, REQUEST).unwrap();
    assert_eq!(report.response, SERVER_MESSAGE);

    server.stop();
}

#[test]
fn peer_closing_before_sending_finishes_without_write() {
    init_logger();
    let (client, server) = accepted_pair();
    let mut connection = Connection::accepted(0, server, &ServerConfig::default()).unwrap();
    drop(client);

    let report = connection.run().unwrap();
    assert_eq!(report.state, ConnectionState::Finished);
    assert!(report.stats.peer_closed);
    assert_eq!(report.stats.bytes_read, 0);
    assert_eq!(report.stats.write_cycles, 0);
    assert!(connection.is_closed());
}

#[test]
fn end_of_stream_wins_over_buffered_request() {
    init_logger();
    let (mut client, server) = accepted_pair();
    client.write_all(b"half a request").unwrap();
    client.shutdown(Shutdown::Write).unwrap();
    thread::sleep(Duration::from_millis(50));

    let mut connection = Connection::accepted(0, server, &ServerConfig::default()).unwrap();
    let report = connection.run().unwrap();
    assert_eq!(report.state, ConnectionState::Finished);
    assert!(report.stats.peer_closed);
    assert_eq!(report.stats.bytes_read, 14);
    assert_eq!(report.stats.bytes_written, 0);

    let mut answer = Vec::new();
    client.read_to_end(&mut answer).unwrap();
    assert!(answer.is_empty());
}

#[test]
fn large_write_spans_several_write_cycles() {
    init_logger();
    const SIZE: usize = 16 * 1024 * 1024;
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let receiver = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        thread::sleep(Duration::from_millis(200));
        let mut received = vec![0u8; SIZE];
        stream.read_exact(&mut received).unwrap();
        stream.write_all(b"done").unwrap();
        (received, stream)
    });

    let payload = pattern(SIZE, 0x21);
    let connector = Connector::new(ClientConfig { buffer_size: SIZE, response: ResponseSize::Exactly(4), ..ClientConfig::default() });
    let report = connector.exchange(addr, &payload).unwrap();
    assert_eq!(report.state, ConnectionState::Finished);
    assert_eq!(report.stats.bytes_written, SIZE);
    assert!(report.stats.write_cycles >= 2, "only {} write cycle(s)", report.stats.write_cycles);
    assert_eq!(report.response, b"done");

    let (received, _stream) = receiver.join().unwrap();
    assert!(received == payload, "received bytes differ from the payload");
}

#[test]
fn simultaneous_clients_are_isolated() {
    let server = Server::start(ServerConfig::default());
    let addr = server.addr;

    let clients: Vec<_> = (0..2u8)
        .map(|n| thread::spawn(move || {
            let payload = format!("client #{} says hello", n).into_bytes();
            let report = Connector::default().exchange(addr, &payload).unwrap();
            (payload, report.response)
        }))
        .collect();

    for client in clients {
        let (payload, response) = client.join().unwrap();
        assert_eq!(response, payload);
    }

    assert_eq!(server.stop(), 2);
}

#[test]
fn failed_connection_does_not_affect_others() {
    let server = Server::start(ServerConfig { idle_timeout: Some(Duration::from_millis(100)), ..ServerConfig::default() });

    let mut silent = TcpStream::connect(server.addr).unwrap();
    let aborted = TcpStream::connect(server.addr).unwrap();
    drop(aborted);

    let report = Connector::default().exchange(server.addr, REQUEST).unwrap();
    assert_eq!(report.response, REQUEST);

    let mut rest = Vec::new();
    silent.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());

    assert_eq!(server.stop(), 3);
}

#[test]
fn pooled_workers_serve_connections() {
    let server = Server::start(ServerConfig { dispatch: Dispatch::Pool { workers: 2 }, ..ServerConfig::default() });
    let connector = Connector::default();

    for _ in 0..3 {
        let report = connector.exchange(server.addr, REQUEST).unwrap();
        assert_eq!(report.response, REQUEST);
    }

    assert_eq!(server.stop(), 3);
}

#[test]
fn stuck_connection_does_not_hold_up_its_pool_worker() {
    let server = Server::start(ServerConfig { dispatch: Dispatch::Pool { workers: 1 }, ..ServerConfig::default() });

    let silent = TcpStream::connect(server.addr).unwrap();
    thread::sleep(Duration::from_millis(50));

    let connector = Connector::new(ClientConfig { idle_timeout: Some(Duration::from_secs(2)), ..ClientConfig::default() });
    let report = connector.exchange(server.addr, REQUEST).unwrap();
    assert_eq!(report.response, REQUEST);

    drop(silent);
    assert_eq!(server.stop(), 2);
}
