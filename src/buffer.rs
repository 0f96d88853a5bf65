/*
 * mecho - readiness-multiplexed TCP echo engine
 * This is free and unencumbered software released into the public domain.
 */
use crate::EchoError;

/// A byte buffer with a fixed capacity and a `[start, end)` window of valid
/// data
///
/// The same buffer type is used on both sides of a connection: reads append
/// at the end of the window ([`spare_mut()`](FixedBuffer::spare_mut) +
/// [`commit()`](FixedBuffer::commit)), writes drain from the start of the
/// window ([`pending()`](FixedBuffer::pending) +
/// [`consume()`](FixedBuffer::consume)). The capacity never changes after
/// construction.
#[derive(Debug)]
pub struct FixedBuffer {
    data: Box<[u8]>,
    start: usize,
    end: usize,
}

impl FixedBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of valid bytes that have not been consumed yet.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// `true` once no more bytes can be appended without a [`clear()`](FixedBuffer::clear).
    pub fn is_full(&self) -> bool {
        self.end == self.data.len()
    }

    /// Resets both positions, discarding any content.
    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    /// Replaces the content with `payload`, ready to be drained.
    pub fn fill(&mut self, payload: &[u8]) -> Result<(), EchoError> {
        if payload.len() > self.data.len() {
            return Err(EchoError::TooBig);
        }
        self.data[..payload.len()].copy_from_slice(payload);
        self.start = 0;
        self.end = payload.len();
        Ok(())
    }

    pub fn pending(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    pub fn consume(&mut self, count: usize) {
        assert!(count <= self.len(), "Consumed more bytes than available!");
        self.start += count;
    }

    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.end..]
    }

    pub fn commit(&mut self, count: usize) {
        assert!(count <= self.data.len() - self.end, "Committed more bytes than spare capacity!");
        self.end += count;
    }
}
