/*
 * mecho - readiness-multiplexed TCP echo engine
 * This is free and unencumbered software released into the public domain.
 */
use std::io::Result;
use std::sync::atomic::{AtomicBool, Ordering};

use mio::Waker;

/// A one-way switch that wakes up the multiplexer it belongs to when raised.
#[derive(Debug)]
pub(crate) struct Flag {
    waker: Waker,
    raised: AtomicBool,
}

impl Flag {
    pub fn new(waker: Waker) -> Self {
        Self {
            waker,
            raised: AtomicBool::new(false),
        }
    }

    /// Returns `true` if this call raised the flag, `false` if it was up already.
    pub fn raise(&self) -> Result<bool> {
        match self.raised.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => self.waker.wake().map(|_| true),
            Err(_) => Ok(false),
        }
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}
