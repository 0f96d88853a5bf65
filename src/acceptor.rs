/*
 * mecho - readiness-multiplexed TCP echo engine
 * This is free and unencumbered software released into the public domain.
 */
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use mio::Token;
use mio::net::{TcpListener as MioTcpListener, TcpStream as MioTcpStream};

use log::{debug, error, info, warn};

use crate::pool::Pool;
use crate::utilities::Flag;
use crate::{Canceller, Connection, Dispatch, EchoError, Multiplexer, Readiness, ServerConfig};

const LISTENER: Token = Token(0);

/// A TCP echo server: a listening socket plus the multiplexer waiting for
/// ACCEPT readiness on it
///
/// [`run()`](Acceptor::run) accepts incoming connections until it is
/// stopped through a [`mecho_rs::Canceller`](crate::Canceller) or the
/// multiplexer fails. Each accepted connection gets an increasing id and is
/// handed to a [`Connection`] worker that runs in its own thread, or to a
/// pool thread that multiplexes it together with other connections (see
/// [`Dispatch`]). Either way a slow or stuck peer never holds up the acceptor
/// or any other connection.
#[derive(Debug)]
pub struct Acceptor {
    listener: Option<MioTcpListener>,
    multiplexer: Multiplexer,
    shutdown: Arc<Flag>,
    config: ServerConfig,
    next: usize,
}

impl Acceptor {
    pub fn bind(addr: SocketAddr, config: ServerConfig) -> IoResult<Self> {
        let mut listener = MioTcpListener::bind(addr)?;
        let mut multiplexer = Multiplexer::with_capacity(config.events_capacity)?;
        multiplexer.register(&mut listener, LISTENER, Readiness::ACCEPT)?;
        let shutdown = Arc::new(Flag::new(multiplexer.waker()?));
        info!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            listener: Some(listener),
            multiplexer,
            shutdown,
            config,
            next: 0,
        })
    }

    pub fn local_addr(&self) -> IoResult<SocketAddr> {
        self.listener.as_ref().ok_or_else(closed)?.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn canceller(&self) -> Canceller {
        Canceller::from(self.shutdown.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.listener.is_none() && self.multiplexer.is_closed()
    }

    /// Runs the accept loop and returns the number of accepted connections
    /// once it has been cancelled.
    ///
    /// The listening socket is closed whenever this function returns. With
    /// [`Dispatch::Pool`], the pool threads are joined before returning, i.e.
    /// connections already handed out are still served to the end (set an
    /// `idle_timeout` to bound silent peers); thread-per-connection workers
    /// are left running on their own.
    pub fn run(&mut self) -> Result<usize, EchoError> {
        if self.listener.is_none() {
            return Err(closed().into());
        }
        let mut dispatcher = Dispatcher::start(&self.config)?;
        let result = self.accept_loop(&mut dispatcher);
        self.close();
        dispatcher.finish();
        result
    }

    fn accept_loop(&mut self, dispatcher: &mut Dispatcher) -> Result<usize, EchoError> {
        let mut accepted = 0usize;
        info!("Waiting for incoming connections...");

        loop {
            if self.shutdown.is_raised() {
                info!("Shutdown has been requested, {} connection(s) accepted", accepted);
                return Ok(accepted);
            }

            let events = match self.multiplexer.wait(None) {
                Ok(events) => events,
                Err(error) => {
                    error!("Waiting for connections has failed: {:?}", error);
                    return Err(error.into());
                },
            };
            if !events.iter().any(|event| event.token == LISTENER && event.readiness.contains(Readiness::ACCEPT)) {
                continue;
            }

            loop {
                match self.accept_pending() {
                    Ok(Some((stream, peer))) => {
                        let id = self.next;
                        self.next += 1;
                        accepted += 1;
                        info!("[{}] Connection received from {}", id, peer);
                        dispatcher.dispatch(id, stream);
                    },
                    Ok(None) => break,
                    Err(error) => match error.kind() {
                        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset => debug!("Pending connection went away: {:?}", error),
                        _ => {
                            warn!("Failed to accept a connection: {:?}", error);
                            break;
                        },
                    },
                }
            }
        }
    }

    /// Accepts one pending connection, if there is any. Streams returned by
    /// mio are already in non-blocking mode.
    fn accept_pending(&self) -> IoResult<Option<(MioTcpStream, SocketAddr)>> {
        let listener = self.listener.as_ref().ok_or_else(closed)?;
        loop {
            match listener.accept() {
                Ok(pair) => return Ok(Some(pair)),
                Err(error) => match error.kind() {
                    ErrorKind::Interrupted => (),
                    ErrorKind::WouldBlock => return Ok(None),
                    _ => return Err(error),
                },
            }
        }
    }

    /// Closes the listening socket and the multiplexer. Returns `true` if this
    /// call actually closed them.
    pub fn close(&mut self) -> bool {
        match self.listener.take() {
            Some(mut listener) => {
                if let Err(error) = self.multiplexer.deregister(&mut listener, LISTENER) {
                    warn!("Failed to de-register: {:?}", error);
                }
                self.multiplexer.close();
                info!("Listener closed");
                true
            },
            None => false,
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.close();
    }
}

enum Dispatcher {
    Spawn {
        config: Arc<ServerConfig>,
    },
    Pool(Pool),
}

impl Dispatcher {
    fn start(config: &ServerConfig) -> IoResult<Self> {
        let shared = Arc::new(config.clone());
        match config.dispatch {
            Dispatch::ThreadPerConnection => Ok(Self::Spawn { config: shared }),
            Dispatch::Pool { workers } => Ok(Self::Pool(Pool::start(workers, shared)?)),
        }
    }

    fn dispatch(&mut self, id: usize, stream: MioTcpStream) {
        match self {
            Self::Spawn { config } => {
                let config = config.clone();
                let spawned = thread::Builder::new()
                    .name(format!("echo-worker-{}", id))
                    .spawn(move || serve(id, stream, &config));
                if let Err(error) = spawned {
                    warn!("[{}] Failed to spawn worker thread: {:?}", id, error);
                }
            },
            Self::Pool(pool) => pool.dispatch(id, stream),
        }
    }

    fn finish(self) {
        if let Self::Pool(pool) = self {
            pool.finish();
        }
    }
}

fn serve(id: usize, stream: MioTcpStream, config: &ServerConfig) {
    let mut connection = match Connection::accepted(id, stream, config) {
        Ok(connection) => connection,
        Err(error) => return warn!("[{}] Failed to set up the connection: {:?}", id, error),
    };
    match connection.run() {
        Ok(report) => debug!("[{}] Finished after {} byte(s) in, {} byte(s) out", id, report.stats.bytes_read, report.stats.bytes_written),
        Err(error) => warn!("[{}] The connection has failed: {}", id, error),
    }
}

fn closed() -> IoError {
    IoError::new(ErrorKind::NotConnected, "The listener is closed!")
}
