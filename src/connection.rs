/*
 * mecho - readiness-multiplexed TCP echo engine
 * This is free and unencumbered software released into the public domain.
 */
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;

use mio::Token;
use mio::net::TcpStream as MioTcpStream;

use log::{debug, trace};

use crate::state::{Action, Outcome, StateMachine};
use crate::transfer::{drain_into, flush_from, DrainEnd};
use crate::utilities::{earliest, Timeout};
use crate::{ClientConfig, ConnectionState, EchoError, FixedBuffer, Multiplexer, Readiness, Reply, ResponseSize, ServerConfig};

const STREAM: Token = Token(0);

/// Counters collected while a connection is driven
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub bytes_read: usize,
    pub bytes_written: usize,
    /// READ readiness events that were acted upon.
    pub read_cycles: usize,
    /// WRITE readiness events that were acted upon.
    pub write_cycles: usize,
    /// The peer closed its sending side (end-of-stream was observed).
    pub peer_closed: bool,
}

/// What a connection looked like when it was torn down
#[derive(Debug, Clone)]
pub struct ConnectionReport {
    pub id: usize,
    pub state: ConnectionState,
    pub stats: ConnectionStats,
    /// The bytes a client received; always empty on the server side.
    pub response: Vec<u8>,
}

#[derive(Debug)]
enum Exchange {
    Serve {
        reply: Reply,
        keep_alive: bool,
        linger: Option<Duration>,
        saturated: bool,
    },
    Request {
        expected: Option<usize>,
        response: Vec<u8>,
    },
}

/// One connection's socket, buffers and state machine, without the
/// multiplexer it is registered on
///
/// A [`Connection`] hosts exactly one session on a private multiplexer,
/// while a pool worker hosts many sessions on a shared one; each session
/// registers its socket under its own token.
#[derive(Debug)]
pub(crate) struct Session {
    id: usize,
    token: Token,
    stream: Option<MioTcpStream>,
    read_buffer: FixedBuffer,
    write_buffer: FixedBuffer,
    machine: StateMachine,
    exchange: Exchange,
    idle_timeout: Option<Duration>,
    idle: Timeout,
    quiet: Option<Timeout>,
    stats: ConnectionStats,
}

impl Session {
    pub(crate) fn server(id: usize, token: Token, stream: MioTcpStream, config: &ServerConfig) -> IoResult<Self> {
        let exchange = Exchange::Serve {
            reply: config.reply.clone(),
            keep_alive: config.keep_alive,
            linger: config.linger,
            saturated: false,
        };
        Self::new(id, token, stream, StateMachine::server(), exchange, config.buffer_size, config.idle_timeout)
    }

    pub(crate) fn client(id: usize, token: Token, stream: MioTcpStream, request: &[u8], config: &ClientConfig) -> Result<Self, EchoError> {
        if !config.connect.is_bounded() {
            return Err(IoError::new(ErrorKind::InvalidInput, "Connect policy needs a timeout or an attempt limit!").into());
        }
        let expected = match config.response {
            ResponseSize::MatchRequest => Some(request.len()),
            ResponseSize::Exactly(length) => Some(length),
            ResponseSize::AnyBytes => None,
        };
        let exchange = Exchange::Request {
            expected,
            response: Vec::new(),
        };
        let mut session = Self::new(id, token, stream, StateMachine::client(config.connect), exchange, config.buffer_size, config.idle_timeout)?;
        session.write_buffer.fill(request)?;
        Ok(session)
    }

    fn new(id: usize, token: Token, stream: MioTcpStream, machine: StateMachine, exchange: Exchange, buffer_size: usize, idle_timeout: Option<Duration>) -> IoResult<Self> {
        if buffer_size == 0 {
            return Err(IoError::new(ErrorKind::InvalidInput, "Buffer size must not be zero!"));
        }
        Ok(Self {
            id,
            token,
            stream: Some(stream),
            read_buffer: FixedBuffer::with_capacity(buffer_size),
            write_buffer: FixedBuffer::with_capacity(buffer_size),
            machine,
            exchange,
            idle_timeout,
            idle: Timeout::start(idle_timeout),
            quiet: None,
            stats: ConnectionStats::default(),
        })
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.machine.state().is_finished()
    }

    /// Registers the socket for the interest of the current state.
    pub(crate) fn arm(&mut self, multiplexer: &mut Multiplexer) -> IoResult<()> {
        let interest = self.machine.state().interest();
        match (self.stream.as_mut(), interest) {
            (Some(stream), Some(interest)) => multiplexer.register(stream, self.token, interest),
            _ => Ok(()),
        }
    }

    /// Handles one readiness event of this session's token.
    pub(crate) fn ready(&mut self, multiplexer: &mut Multiplexer, readiness: Readiness) -> Result<(), EchoError> {
        self.idle = Timeout::start(self.idle_timeout);
        let action = self.machine.action(readiness);
        self.advance(multiplexer, action)
    }

    /// Time until the next deadline of this session, if any is running.
    pub(crate) fn remaining(&self) -> Option<Duration> {
        let quiet = self.quiet.and_then(|quiet| quiet.remaining_time());
        earliest(earliest(self.machine.connect_remaining(), self.idle.remaining_time()), quiet)
    }

    /// Acts on expired deadlines. A lingering server finishes normally once
    /// it has been quiet long enough; an expired idle timeout otherwise
    /// fails the session.
    pub(crate) fn check_timers(&mut self) -> Result<(), EchoError> {
        if self.is_finished() {
            return Ok(());
        }
        self.machine.check_connect_deadline()?;
        if let Some(quiet) = self.quiet {
            if quiet.expired() || self.idle.expired() {
                self.quiet = None;
                trace!("[{}] No further request bytes arrived", self.id);
                self.machine.apply(Outcome::Quiet)?;
            }
            return Ok(());
        }
        match self.idle.expired() {
            true => Err(EchoError::TimedOut),
            false => Ok(()),
        }
    }

    fn connected_now(&mut self, multiplexer: &mut Multiplexer) -> Result<bool, EchoError> {
        if self.machine.state() != ConnectionState::Connecting {
            return Ok(false);
        }
        match self.finish_connect()? {
            Outcome::Connected => {
                self.advance_with(multiplexer, Outcome::Connected)?;
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    fn advance(&mut self, multiplexer: &mut Multiplexer, action: Action) -> Result<(), EchoError> {
        let outcome = match action {
            Action::Skip => return Ok(()),
            Action::FinishConnect => self.finish_connect()?,
            Action::Drain => self.drain()?,
            Action::Flush => self.flush()?,
        };
        self.advance_with(multiplexer, outcome)
    }

    fn advance_with(&mut self, multiplexer: &mut Multiplexer, outcome: Outcome) -> Result<(), EchoError> {
        let previous = self.machine.state();
        let transition = self.machine.apply(outcome)?;
        if previous != transition.next {
            trace!("[{}] {:?} -> {:?}", self.id, previous, transition.next);
        }
        if let (Some(stream), Some(interest)) = (self.stream.as_mut(), transition.reregister) {
            multiplexer.register(stream, self.token, interest)?;
        }
        Ok(())
    }

    fn finish_connect(&mut self) -> IoResult<Outcome> {
        let stream = self.stream.as_mut().ok_or_else(closed)?;
        loop {
            if let Some(error) = stream.take_error()? {
                return Err(error);
            }
            match stream.peer_addr() {
                Ok(_addr) => return Ok(Outcome::Connected),
                Err(error) => match error.kind() {
                    ErrorKind::Interrupted => (),
                    ErrorKind::NotConnected => return Ok(Outcome::ConnectPending),
                    _ => return Err(error),
                },
            }
        }
    }

    fn drain(&mut self) -> Result<Outcome, EchoError> {
        self.stats.read_cycles += 1;
        let stream = self.stream.as_mut().ok_or_else(closed)?;

        match &mut self.exchange {
            Exchange::Serve { reply, saturated, .. } => {
                self.read_buffer.clear();
                let drained = drain_into(stream, &mut self.read_buffer)?;
                self.stats.bytes_read += drained.bytes;
                match drained.end {
                    DrainEnd::EndOfStream => {
                        self.quiet = None;
                        self.stats.peer_closed = true;
                        debug!("[{}] Peer closed the connection ({} unanswered byte(s))", self.id, self.read_buffer.len());
                        Ok(Outcome::EndOfStream)
                    },
                    _ if drained.bytes == 0 => Ok(Outcome::Nothing),
                    end => {
                        self.quiet = None;
                        *saturated = end == DrainEnd::BufferFull;
                        match reply {
                            Reply::Echo => self.write_buffer.fill(self.read_buffer.pending())?,
                            Reply::Fixed(payload) => self.write_buffer.fill(payload)?,
                        }
                        trace!("[{}] Received {} byte(s)", self.id, drained.bytes);
                        Ok(Outcome::Received { complete: true })
                    },
                }
            },
            Exchange::Request { expected, response } => {
                let limit = expected.unwrap_or(self.read_buffer.capacity());
                let mut bytes = 0usize;
                let mut peer_closed = false;
                loop {
                    self.read_buffer.clear();
                    let drained = drain_into(&mut *stream, &mut self.read_buffer)?;
                    bytes += drained.bytes;
                    let pending = self.read_buffer.pending();
                    let room = limit.saturating_sub(response.len()).min(pending.len());
                    if room < pending.len() {
                        debug!("[{}] Discarding {} byte(s) beyond the expected response", self.id, pending.len() - room);
                    }
                    response.extend_from_slice(&pending[..room]);
                    match drained.end {
                        DrainEnd::BufferFull if response.len() < limit => continue,
                        DrainEnd::BufferFull | DrainEnd::WouldBlock => break,
                        DrainEnd::EndOfStream => {
                            peer_closed = true;
                            break;
                        },
                    }
                }
                self.stats.bytes_read += bytes;
                if peer_closed {
                    self.stats.peer_closed = true;
                    debug!("[{}] Peer closed the connection", self.id);
                    return Ok(Outcome::EndOfStream);
                }
                let complete = match expected {
                    Some(length) => response.len() >= *length,
                    None => !response.is_empty(),
                };
                match (complete, bytes) {
                    (true, _) => Ok(Outcome::Received { complete: true }),
                    (false, 0) => Ok(Outcome::Nothing),
                    (false, _) => Ok(Outcome::Received { complete: false }),
                }
            },
        }
    }

    fn flush(&mut self) -> Result<Outcome, EchoError> {
        self.stats.write_cycles += 1;
        let stream = self.stream.as_mut().ok_or_else(closed)?;
        let flushed = flush_from(stream, &mut self.write_buffer)?;
        self.stats.bytes_written += flushed.bytes;
        if !flushed.complete {
            trace!("[{}] Write blocked with {} byte(s) left", self.id, self.write_buffer.len());
            return Ok(Outcome::WriteBlocked);
        }
        let round_complete = match &self.exchange {
            Exchange::Serve { keep_alive: true, .. } | Exchange::Serve { saturated: true, .. } => false,
            Exchange::Serve { linger: Some(linger), .. } => {
                self.quiet = Some(Timeout::start(Some(*linger)));
                false
            },
            Exchange::Serve { linger: None, .. } => true,
            Exchange::Request { .. } => true,
        };
        Ok(Outcome::Flushed { round_complete })
    }

    /// De-registers and shuts down the socket and forces `Finished`. Returns
    /// `true` if the socket was still open.
    pub(crate) fn release(&mut self, multiplexer: &mut Multiplexer) -> bool {
        self.machine.finish();
        self.quiet = None;
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => return false,
        };
        if let Err(error) = multiplexer.deregister(&mut stream, self.token) {
            trace!("[{}] Failed to de-register: {:?}", self.id, error);
        }
        if let Err(error) = stream.shutdown(Shutdown::Both) {
            if error.kind() != ErrorKind::NotConnected {
                trace!("[{}] Failed to shut down: {:?}", self.id, error);
            }
        }
        debug!("[{}] Connection closed: {} byte(s) in, {} byte(s) out", self.id, self.stats.bytes_read, self.stats.bytes_written);
        true
    }

    fn is_released(&self) -> bool {
        self.stream.is_none()
    }

    pub(crate) fn report(&mut self) -> ConnectionReport {
        let response = match &mut self.exchange {
            Exchange::Request { response, .. } => std::mem::take(response),
            Exchange::Serve { .. } => Vec::new(),
        };
        ConnectionReport {
            id: self.id,
            state: self.machine.state(),
            stats: self.stats.clone(),
            response,
        }
    }
}

/// A single non-blocking TCP connection together with its private
/// [`Multiplexer`], its read and write buffers and its state machine
///
/// A `Connection` is driven by exactly one thread through
/// [`run()`](Connection::run), which pumps readiness events into the state
/// machine until it reaches [`ConnectionState::Finished`] or an I/O fault
/// occurs. Either way the connection is torn down: the socket and the
/// multiplexer are released exactly once, no matter how often
/// [`teardown()`](Connection::teardown) is invoked (it also runs on `Drop`).
#[derive(Debug)]
pub struct Connection {
    session: Session,
    multiplexer: Multiplexer,
    terminated: bool,
}

impl Connection {
    /// Wraps an accepted, non-blocking stream for the server side. The
    /// connection starts out in `Reading`.
    pub fn accepted(id: usize, stream: MioTcpStream, config: &ServerConfig) -> IoResult<Self> {
        let session = Session::server(id, STREAM, stream, config)?;
        let connection = Self::host(session, config.events_capacity)?;
        debug!("[{}] Serving connection from {:?}", id, connection.peer_addr());
        Ok(connection)
    }

    /// Wraps a stream whose non-blocking connect is in progress. `request`
    /// is loaded into the write buffer right away; the connection starts out
    /// in `Connecting`. A [`ConnectPolicy`](crate::ConnectPolicy) without
    /// any bound is rejected.
    pub fn connecting(id: usize, stream: MioTcpStream, request: &[u8], config: &ClientConfig) -> Result<Self, EchoError> {
        let session = Session::client(id, STREAM, stream, request, config)?;
        Ok(Self::host(session, config.events_capacity)?)
    }

    fn host(mut session: Session, events_capacity: usize) -> IoResult<Self> {
        let mut multiplexer = Multiplexer::with_capacity(events_capacity)?;
        session.arm(&mut multiplexer)?;
        Ok(Self {
            session,
            multiplexer,
            terminated: false,
        })
    }

    pub fn id(&self) -> usize {
        self.session.id
    }

    pub fn state(&self) -> ConnectionState {
        self.session.machine.state()
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.session.stats
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.session.stream.as_ref().and_then(|stream| stream.peer_addr().ok())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.session.stream.as_ref().and_then(|stream| stream.local_addr().ok())
    }

    /// `true` once both the socket and the multiplexer have been released.
    pub fn is_closed(&self) -> bool {
        self.terminated && self.session.is_released() && self.multiplexer.is_closed()
    }

    /// Drives the connection until it is finished, then tears it down.
    ///
    /// The peer closing the connection is a regular way to finish. Any I/O
    /// fault, an expired connect deadline or an idle timeout ends the loop
    /// with an error; the connection is torn down in that case as well.
    pub fn run(&mut self) -> Result<ConnectionReport, EchoError> {
        let result = self.drive();
        self.teardown();
        result.map(|_| self.session.report())
    }

    fn drive(&mut self) -> Result<(), EchoError> {
        while !self.session.is_finished() {
            let events = self.multiplexer.wait(self.session.remaining())?;
            for event in events.iter().filter(|event| event.token == STREAM) {
                self.session.ready(&mut self.multiplexer, event.readiness)?;
                if self.session.is_finished() {
                    break;
                }
            }
            self.session.check_timers()?;
        }
        Ok(())
    }

    /// Completes a connect that the OS finished synchronously, moving
    /// straight on to `Writing`. Returns `false` if it is still pending.
    pub fn connected_now(&mut self) -> Result<bool, EchoError> {
        self.session.connected_now(&mut self.multiplexer)
    }

    /// Releases the socket and the multiplexer. Only the first call has an
    /// effect; it returns `true`.
    pub fn teardown(&mut self) -> bool {
        if self.terminated {
            return false;
        }
        self.terminated = true;
        self.session.release(&mut self.multiplexer);
        self.multiplexer.close();
        true
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn closed() -> IoError {
    IoError::new(ErrorKind::NotConnected, "The connection is closed!")
}
