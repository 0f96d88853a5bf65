/*
 * mecho - readiness-multiplexed TCP echo engine
 * This is free and unencumbered software released into the public domain.
 */
use std::io::Result;
use std::sync::Arc;

use crate::utilities::Flag;

/// A handle that stops a running [`mecho_rs::Acceptor`](crate::Acceptor)
///
/// Each `mecho_rs::Canceller` is tied to the acceptor it was obtained from.
/// Calling [`cancel()`](Canceller::cancel()) wakes up the acceptor's
/// multiplexer; the accept loop then returns, and the listening socket and
/// its multiplexer are closed. Unlike the acceptor itself, the canceller
/// *can* be cloned and moved across the thread boundary, e.g. into a
/// Ctrl+C (SIGINT) handler.
///
/// Connections that have already been dispatched to a worker are **not**
/// affected; they keep running until they finish on their own.
#[derive(Debug, Clone)]
pub struct Canceller {
    flag: Arc<Flag>,
}

impl Canceller {
    pub(crate) fn from(flag: Arc<Flag>) -> Self {
        Self {
            flag,
        }
    }

    /// Returns `true` if this call requested the shutdown, `false` if it had
    /// been requested before.
    pub fn cancel(&self) -> Result<bool> {
        self.flag.raise()
    }

    pub fn cancelled(&self) -> bool {
        self.flag.is_raised()
    }
}
