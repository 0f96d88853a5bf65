/*
 * mecho - readiness-multiplexed TCP echo engine
 * This is free and unencumbered software released into the public domain.
 */

//! **mecho** is a non-blocking, readiness-multiplexed TCP echo engine.
//!
//! An [`mecho_rs::Acceptor`](Acceptor) owns a listening socket and waits for
//! ACCEPT readiness on its own [`mecho_rs::Multiplexer`](Multiplexer). Every
//! accepted socket is handed to a [`mecho_rs::Connection`](Connection)
//! worker running in a thread of its own: the worker owns the socket, a
//! *private* multiplexer and two fixed-size buffers, and pumps readiness
//! events into an explicit state machine (`Reading` → `Writing` →
//! `Finished`) until the request has been echoed back. Alternatively, a
//! fixed pool of threads can host the same state machines, each thread
//! multiplexing many connections on one multiplexer. The
//! [`mecho_rs::Connector`](Connector) is the symmetric client side: it
//! starts out in `Connecting`, writes one request, reads one response and
//! finishes.
//!
//! All socket I/O is non-blocking, via the [**`mio`**](mio) library, so the
//! only place a thread ever suspends is inside
//! [`Multiplexer::wait()`](Multiplexer::wait). Reads and writes always move
//! as many bytes as the socket allows *right now* and simply wait for the
//! next readiness event when a transfer is incomplete. The
//! [`transfer`] module exposes this byte-stream contract to protocol layers
//! that want to build on top of it.
//!
//! Whatever way a connection ends (echo complete, peer closed, I/O fault,
//! timeout), its socket and multiplexer are released exactly once.
//!
//! # Examples
//!
//! Demo programs can be found in the `demos` sub-directory; run them with
//! `cargo run --example echo_server` and `cargo run --example echo_client`.

mod acceptor;
mod buffer;
mod canceller;
mod config;
mod connection;
mod connector;
mod error;
mod multiplexer;
mod pool;
mod state;
mod utilities;

pub mod transfer;

pub use acceptor::Acceptor;
pub use buffer::FixedBuffer;
pub use canceller::Canceller;
pub use config::{ClientConfig, ConnectPolicy, Dispatch, Reply, ResponseSize, ServerConfig};
pub use config::{DEFAULT_BUFFER_SIZE, DEFAULT_CONNECT_TIMEOUT, DEFAULT_LINGER, DEFAULT_PORT, REQUEST, SERVER_MESSAGE};
pub use connection::{Connection, ConnectionReport, ConnectionStats};
pub use connector::Connector;
pub use error::EchoError;
pub use multiplexer::{Multiplexer, Readiness, ReadyEvent};
pub use state::{action, transition, Action, ConnectionState, Outcome, Role, StateMachine, Transition};
