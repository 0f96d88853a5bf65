/*
 * mecho - readiness-multiplexed TCP echo engine
 * This is free and unencumbered software released into the public domain.
 */
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use mio::net::TcpStream as MioTcpStream;

use log::{debug, info};

use crate::{ClientConfig, Connection, ConnectionReport, EchoError};

/// The client side of the echo engine
///
/// A `mecho_rs::Connector` initiates non-blocking connections and drives
/// them with the very same [`Connection`] worker the server uses, only
/// starting out in `Connecting`: it waits for the connect to complete
/// (bounded by [`ClientConfig::connect`]), writes the request, reads one
/// response and finishes.
#[derive(Debug)]
pub struct Connector {
    config: ClientConfig,
    next: AtomicUsize,
}

impl Connector {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            next: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Starts connecting to `addr`. If the OS completes the connect right
    /// away, the returned connection is already in `Writing`.
    pub fn connect(&self, addr: SocketAddr, request: &[u8]) -> Result<Connection, EchoError> {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        let stream = MioTcpStream::connect(addr)?;
        let mut connection = Connection::connecting(id, stream, request, &self.config)?;
        if connection.connected_now()? {
            debug!("[{}] Connected to {} synchronously", id, addr);
        }
        Ok(connection)
    }

    /// Connects, sends `request` and returns once the response is complete
    /// or the server closed the connection.
    pub fn exchange(&self, addr: SocketAddr, request: &[u8]) -> Result<ConnectionReport, EchoError> {
        let mut connection = self.connect(addr, request)?;
        let report = connection.run()?;
        info!("[{}] Exchange with {} finished: {} byte(s) sent, {} byte(s) received", report.id, addr, report.stats.bytes_written, report.stats.bytes_read);
        Ok(report)
    }
}

impl Default for Connector {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{ErrorKind, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use crate::{ConnectionState, ResponseSize, REQUEST};

    #[test]
    fn connection_ids_increase() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let connector = Connector::default();
        let first = connector.connect(addr, REQUEST).unwrap();
        let second = connector.connect(addr, REQUEST).unwrap();
        assert_eq!(first.id(), 0);
        assert_eq!(second.id(), 1);
    }

    #[test]
    fn refused_connect_fails() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let connector = Connector::default();
        match connector.exchange(addr, REQUEST) {
            Err(EchoError::Failed(error)) => assert_eq!(error.kind(), ErrorKind::ConnectionRefused),
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    #[test]
    fn client_reads_a_single_response() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = vec![0u8; REQUEST.len()];
            stream.read_exact(&mut request).unwrap();
            stream.write_all(b"ack").unwrap();
            (request, stream)
        });

        let config = ClientConfig { response: ResponseSize::Exactly(3), ..ClientConfig::default() };
        let report = Connector::new(config).exchange(addr, REQUEST).unwrap();
        assert_eq!(report.state, ConnectionState::Finished);
        assert_eq!(report.response, b"ack");
        assert!(!report.stats.peer_closed);
        let (request, _stream) = server.join().unwrap();
        assert_eq!(request, REQUEST);
    }
}
