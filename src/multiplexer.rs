/*
 * mecho - readiness-multiplexed TCP echo engine
 * This is free and unencumbered software released into the public domain.
 */
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::io::{Error as IoError, ErrorKind, Result};
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::time::Duration;

use mio::event::{Event, Source};
use mio::{Events, Interest, Poll, Token, Waker};

use log::trace;

use crate::utilities::Timeout;

pub(crate) const WAKER: Token = Token(usize::MAX);

/// A set of readiness interests: accept, connect-complete, read, write
///
/// `ACCEPT` and `READ` are served by the "readable" side of the OS facility,
/// `CONNECT` and `WRITE` by the "writable" side.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Readiness(u8);

impl Readiness {
    pub const ACCEPT: Self = Self(0b0001);
    pub const CONNECT: Self = Self(0b0010);
    pub const READ: Self = Self(0b0100);
    pub const WRITE: Self = Self(0b1000);

    const READABLE: Self = Self(Self::ACCEPT.0 | Self::READ.0);
    const WRITABLE: Self = Self(Self::CONNECT.0 | Self::WRITE.0);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    fn to_interest(self) -> Option<Interest> {
        let readable = self.intersects(Self::READABLE).then_some(Interest::READABLE);
        let writable = self.intersects(Self::WRITABLE).then_some(Interest::WRITABLE);
        match (readable, writable) {
            (Some(r), Some(w)) => Some(r | w),
            (r, None) => r,
            (None, w) => w,
        }
    }

    /// Translates a mio event into the registered bits it fired. Errors and
    /// hang-ups fire every bit registered on the affected side, so that the
    /// following I/O call gets to observe the fault or the end-of-stream.
    fn fired(event: &Event, registered: Self) -> Self {
        let mut fired = Self::empty();
        if event.is_readable() || event.is_read_closed() || event.is_error() {
            fired |= registered & Self::READABLE;
        }
        if event.is_writable() || event.is_write_closed() || event.is_error() {
            fired |= registered & Self::WRITABLE;
        }
        fired
    }
}

impl BitOr for Readiness {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Readiness {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Readiness {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Debug for Readiness {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let names = [(Self::ACCEPT, "ACCEPT"), (Self::CONNECT, "CONNECT"), (Self::READ, "READ"), (Self::WRITE, "WRITE")];
        let mut set = f.debug_set();
        for (_, name) in names.iter().filter(|(bit, _)| self.contains(*bit)) {
            set.entry(&format_args!("{}", name));
        }
        set.finish()
    }
}

/// One entry of the ready set returned by [`Multiplexer::wait()`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEvent {
    pub token: Token,
    pub readiness: Readiness,
}

impl ReadyEvent {
    /// `true` if this event was produced by the multiplexer's [`Waker`].
    pub fn is_wakeup(&self) -> bool {
        self.token == WAKER
    }
}

/// A readiness multiplexer, wrapping one OS-level event notification
/// facility (epoll, kqueue or IOCP, via [**`mio`**](mio))
///
/// A `Multiplexer` is owned by exactly one thread: a connection worker with
/// its single connection, a pool worker with many, or the acceptor. Once [`close()`](Multiplexer::close)d, all
/// registrations are gone and every further operation fails with
/// `ErrorKind::NotConnected`.
#[derive(Debug)]
pub struct Multiplexer {
    context: Option<PollContext>,
}

#[derive(Debug)]
struct PollContext {
    poll: Poll,
    events: Events,
    registrations: HashMap<Token, Readiness>,
}

impl Multiplexer {
    pub fn new() -> Result<Self> {
        Self::with_capacity(128)
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Ok(Self {
            context: Some(PollContext {
                poll: Poll::new()?,
                events: Events::with_capacity(capacity.max(1)),
                registrations: HashMap::new(),
            }),
        })
    }

    /// Registers `source` for `interest`, or replaces the interest set of an
    /// existing registration under the same `token`.
    pub fn register<S>(&mut self, source: &mut S, token: Token, interest: Readiness) -> Result<()>
    where
        S: Source + ?Sized,
    {
        if token == WAKER {
            return Err(IoError::new(ErrorKind::InvalidInput, "Token is reserved for the waker!"));
        }
        let mio_interest = interest.to_interest()
            .ok_or_else(|| IoError::new(ErrorKind::InvalidInput, "Interest set must not be empty!"))?;
        let context = self.context_mut()?;
        match context.registrations.contains_key(&token) {
            true => context.poll.registry().reregister(source, token, mio_interest)?,
            false => context.poll.registry().register(source, token, mio_interest)?,
        }
        context.registrations.insert(token, interest);
        trace!("Registered {:?} for {:?}", token, interest);
        Ok(())
    }

    pub fn deregister<S>(&mut self, source: &mut S, token: Token) -> Result<()>
    where
        S: Source + ?Sized,
    {
        let context = self.context_mut()?;
        if context.registrations.remove(&token).is_some() {
            context.poll.registry().deregister(source)?;
        }
        Ok(())
    }

    /// The interest set currently registered under `token`, if any.
    pub fn interest(&self, token: Token) -> Option<Readiness> {
        self.context.as_ref().and_then(|context| context.registrations.get(&token).copied())
    }

    /// Creates a [`Waker`] whose wake-ups show up as [`ReadyEvent::is_wakeup()`]
    /// events. Only one waker per multiplexer is supported.
    pub fn waker(&mut self) -> Result<Waker> {
        let context = self.context_mut()?;
        let waker = Waker::new(context.poll.registry(), WAKER)?;
        context.registrations.insert(WAKER, Readiness::READ);
        Ok(waker)
    }

    /// Blocks until at least one registration is ready.
    ///
    /// With `timeout` set to `None`, the returned set is never empty. With
    /// `Some(duration)`, an empty set means that the period has elapsed.
    /// Events of registrations that have been cancelled in the meantime are
    /// skipped.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<Vec<ReadyEvent>> {
        let timeout = Timeout::start(timeout);
        loop {
            let remaining = timeout.remaining_time();
            let context = self.context_mut()?;
            if let Err(error) = context.poll.poll(&mut context.events, remaining) {
                match error.kind() {
                    ErrorKind::Interrupted => continue,
                    _ => return Err(error),
                }
            }

            let ready: Vec<ReadyEvent> = context.events.iter()
                .filter_map(|event| {
                    let registered = match context.registrations.get(&event.token()) {
                        Some(registered) => *registered,
                        None => {
                            trace!("Skipping event of cancelled registration {:?}", event.token());
                            return None;
                        },
                    };
                    let readiness = Readiness::fired(event, registered);
                    (!readiness.is_empty()).then_some(ReadyEvent { token: event.token(), readiness })
                })
                .collect();

            if !ready.is_empty() {
                return Ok(ready);
            }
            if remaining.map(|time| time.is_zero()).unwrap_or(false) {
                return Ok(ready);
            }
        }
    }

    /// Releases the facility and all registrations. Returns `true` if this
    /// call actually closed the multiplexer.
    pub fn close(&mut self) -> bool {
        match self.context.take() {
            Some(context) => {
                trace!("Closing multiplexer with {} registration(s)", context.registrations.len());
                true
            },
            None => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.context.is_none()
    }

    fn context_mut(&mut self) -> Result<&mut PollContext> {
        self.context.as_mut().ok_or_else(|| IoError::new(ErrorKind::NotConnected, "The multiplexer is closed!"))
    }
}
