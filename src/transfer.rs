/*
 * mecho - readiness-multiplexed TCP echo engine
 * This is free and unencumbered software released into the public domain.
 */

//! The byte-stream contract every connection is built on: move whatever
//! bytes are available *right now* and report whether the stream would
//! block or has been closed by the peer.
//!
//! These functions are generic over [`Read`] and [`Write`], so protocol
//! layers can drive them against any non-blocking source, not just a
//! [`mio::net::TcpStream`].

use std::io::{Read, Write, Result as IoResult, ErrorKind};

use crate::FixedBuffer;

/// Result of a single non-blocking transfer attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// This many bytes were moved (always non-zero for a non-empty buffer).
    Bytes(usize),
    /// Nothing can be moved right now; wait for the next readiness event.
    WouldBlock,
    /// The peer has closed its sending side (end-of-stream).
    Closed,
}

/// Why a [`drain_into()`] cycle stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainEnd {
    WouldBlock,
    BufferFull,
    EndOfStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Drained {
    pub bytes: usize,
    pub end: DrainEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flushed {
    pub bytes: usize,
    pub complete: bool,
}

pub fn read_available<R: Read + ?Sized>(source: &mut R, buffer: &mut [u8]) -> IoResult<Transfer> {
    loop {
        match source.read(buffer) {
            Ok(0) if !buffer.is_empty() => return Ok(Transfer::Closed),
            Ok(count) => return Ok(Transfer::Bytes(count)),
            Err(error) => match error.kind() {
                ErrorKind::Interrupted => (),
                ErrorKind::WouldBlock => return Ok(Transfer::WouldBlock),
                _ => return Err(error),
            },
        }
    }
}

/// A write that accepts zero bytes is reported as [`Transfer::WouldBlock`];
/// a peer that went away surfaces as an error (e.g. `BrokenPipe`).
pub fn write_available<W: Write + ?Sized>(sink: &mut W, buffer: &[u8]) -> IoResult<Transfer> {
    loop {
        match sink.write(buffer) {
            Ok(0) if !buffer.is_empty() => return Ok(Transfer::WouldBlock),
            Ok(count) => return Ok(Transfer::Bytes(count)),
            Err(error) => match error.kind() {
                ErrorKind::Interrupted => (),
                ErrorKind::WouldBlock => return Ok(Transfer::WouldBlock),
                _ => return Err(error),
            },
        }
    }
}

/// Reads into the spare capacity of `buffer` for as long as reads return a
/// positive count.
///
/// End-of-stream is reported as such even if bytes were read earlier in the
/// same cycle; those bytes stay in the buffer.
pub fn drain_into<R: Read + ?Sized>(source: &mut R, buffer: &mut FixedBuffer) -> IoResult<Drained> {
    let mut bytes = 0usize;
    loop {
        if buffer.is_full() {
            return Ok(Drained { bytes, end: DrainEnd::BufferFull });
        }
        match read_available(source, buffer.spare_mut())? {
            Transfer::Bytes(count) => {
                buffer.commit(count);
                bytes += count;
            },
            Transfer::WouldBlock => return Ok(Drained { bytes, end: DrainEnd::WouldBlock }),
            Transfer::Closed => return Ok(Drained { bytes, end: DrainEnd::EndOfStream }),
        }
    }
}

/// Writes the pending bytes of `buffer` until it is exhausted or the sink
/// stops accepting data.
pub fn flush_from<W: Write + ?Sized>(sink: &mut W, buffer: &mut FixedBuffer) -> IoResult<Flushed> {
    let mut bytes = 0usize;
    while !buffer.is_empty() {
        match write_available(sink, buffer.pending())? {
            Transfer::Bytes(count) => {
                buffer.consume(count);
                bytes += count;
            },
            Transfer::WouldBlock | Transfer::Closed => return Ok(Flushed { bytes, complete: false }),
        }
    }
    Ok(Flushed { bytes, complete: true })
}
