/*
 * mecho - readiness-multiplexed TCP echo engine
 * This is free and unencumbered software released into the public domain.
 */
use std::time::Duration;

/// Port used by the demonstration server and client.
pub const DEFAULT_PORT: u16 = 12306;

/// Capacity of each connection's read and write buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// The request the demonstration client sends.
pub const REQUEST: &[u8] = b"hello server, from client.";

/// The canned answer of a server configured with [`Reply::Fixed`].
pub const SERVER_MESSAGE: &[u8] = b"this is server's message";

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a server keeps reading after an answered request before it
/// considers the request complete.
pub const DEFAULT_LINGER: Duration = Duration::from_millis(500);

const DEFAULT_EVENTS_CAPACITY: usize = 128;

/// What a server worker sends back for the bytes of one read cycle
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Reply {
    /// Echo the bytes back unchanged.
    #[default]
    Echo,
    /// Answer every read cycle with the same payload.
    Fixed(Vec<u8>),
}

/// How the [`Acceptor`](crate::Acceptor) hosts the connection workers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Dispatch {
    /// A dedicated thread per accepted connection.
    #[default]
    ThreadPerConnection,
    /// A fixed set of worker threads, each multiplexing many connections.
    Pool { workers: usize },
}

impl Dispatch {
    /// A pool with one worker per available CPU.
    pub fn pool() -> Self {
        Self::Pool { workers: num_cpus::get().max(1) }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub buffer_size: usize,
    pub reply: Reply,
    /// Keep echoing until the peer closes instead of finishing after the
    /// first complete round.
    pub keep_alive: bool,
    /// Bytes arriving within this period after an answered read cycle still
    /// belong to the same request. `None` finishes right after the first
    /// answered cycle that did not fill the read buffer.
    pub linger: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub dispatch: Dispatch,
    pub events_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            reply: Reply::Echo,
            keep_alive: false,
            linger: Some(DEFAULT_LINGER),
            idle_timeout: None,
            dispatch: Dispatch::ThreadPerConnection,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
        }
    }
}

/// Bounds for a client connection that is still being established
///
/// Either limit may be left open, but not both: a policy with neither a
/// `timeout` nor `max_attempts` is rejected with `ErrorKind::InvalidInput`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPolicy {
    pub timeout: Option<Duration>,
    /// Number of CONNECT readiness events that may report "still pending";
    /// the next one fails the connect.
    pub max_attempts: Option<u32>,
}

impl ConnectPolicy {
    pub fn is_bounded(&self) -> bool {
        self.timeout.is_some() || self.max_attempts.is_some()
    }
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            max_attempts: None,
        }
    }
}

/// When the client considers its single response complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseSize {
    /// As many bytes as the request had (echo servers).
    #[default]
    MatchRequest,
    Exactly(usize),
    /// Whatever the first read cycle with data delivers, up to the capacity
    /// of the read buffer.
    AnyBytes,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub buffer_size: usize,
    pub connect: ConnectPolicy,
    pub response: ResponseSize,
    pub idle_timeout: Option<Duration>,
    pub events_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            connect: ConnectPolicy::default(),
            response: ResponseSize::MatchRequest,
            idle_timeout: None,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
        }
    }
}
