//! Byte FIFO backing both the raw intake queue and the consumer buffer.

use std::collections::VecDeque;

use crate::error::{Error, Result};

/// A growable first-in first-out queue of bytes.
///
/// `ByteQueue` is not synchronized on its own; the engine wraps each queue
/// in its own lock. Removal from the front is O(1) per byte, so draining
/// `k` bytes costs O(k) regardless of how much is queued behind them.
///
/// # Example
///
/// ```
/// use giztoy_serialsim::ByteQueue;
///
/// let mut q = ByteQueue::new();
/// q.append_slice(b"AB\nC");
/// assert_eq!(q.find(b'\n'), Some(2));
/// assert_eq!(q.take_front(3).unwrap(), b"AB\n".to_vec());
/// assert_eq!(q.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteQueue {
    buf: VecDeque<u8>,
}

impl ByteQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty queue with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        ByteQueue {
            buf: VecDeque::with_capacity(capacity),
        }
    }

    /// Pushes one byte to the back.
    pub fn append(&mut self, byte: u8) {
        self.buf.push_back(byte);
    }

    /// Pushes all bytes to the back, in order.
    pub fn append_slice(&mut self, bytes: &[u8]) {
        self.buf.extend(bytes);
    }

    /// Returns the number of queued bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the oldest byte without removing it.
    pub fn peek_front(&self) -> Option<u8> {
        self.buf.front().copied()
    }

    /// Returns the most recently appended byte without removing it.
    pub fn peek_back(&self) -> Option<u8> {
        self.buf.back().copied()
    }

    /// Removes and returns the oldest byte.
    pub fn pop_front(&mut self) -> Option<u8> {
        self.buf.pop_front()
    }

    /// Removes and returns the first `n` bytes.
    ///
    /// Fails with [`Error::InsufficientData`] when fewer than `n` bytes are
    /// queued; the queue is left untouched in that case.
    pub fn take_front(&mut self, n: usize) -> Result<Vec<u8>> {
        self.ensure(n)?;
        Ok(self.buf.drain(..n).collect())
    }

    /// Removes the first `dest.len()` bytes into `dest`.
    ///
    /// Same failure contract as [`take_front`](Self::take_front).
    pub fn take_front_into(&mut self, dest: &mut [u8]) -> Result<()> {
        self.ensure(dest.len())?;
        self.move_front(dest);
        Ok(())
    }

    /// Removes up to `dest.len()` bytes into the front of `dest` and
    /// returns how many were moved. Never fails; an empty queue moves 0.
    pub fn drain_into(&mut self, dest: &mut [u8]) -> usize {
        let n = dest.len().min(self.buf.len());
        self.move_front(&mut dest[..n]);
        n
    }

    /// Removes and returns every queued byte.
    pub fn take_all(&mut self) -> Vec<u8> {
        Vec::from(std::mem::take(&mut self.buf))
    }

    /// Returns the index of the first occurrence of `byte`, counted from the
    /// front.
    pub fn find(&self, byte: u8) -> Option<usize> {
        self.buf.iter().position(|&b| b == byte)
    }

    /// Drops all contents, keeping the allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Drops all contents and releases the allocation.
    pub fn release(&mut self) {
        self.buf = VecDeque::new();
    }

    /// Returns a copy of all queued bytes, oldest first.
    pub fn to_vec(&self) -> Vec<u8> {
        self.buf.iter().copied().collect()
    }

    // Caller guarantees dest.len() <= self.len().
    fn move_front(&mut self, dest: &mut [u8]) {
        let n = dest.len();
        let (head, tail) = self.buf.as_slices();
        if head.len() >= n {
            dest.copy_from_slice(&head[..n]);
        } else {
            let split = head.len();
            dest[..split].copy_from_slice(head);
            dest[split..].copy_from_slice(&tail[..n - split]);
        }
        self.buf.drain(..n);
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if n > self.buf.len() {
            return Err(Error::InsufficientData {
                requested: n,
                available: self.buf.len(),
            });
        }
        Ok(())
    }
}

impl Extend<u8> for ByteQueue {
    fn extend<I: IntoIterator<Item = u8>>(&mut self, iter: I) {
        self.buf.extend(iter);
    }
}

impl From<&[u8]> for ByteQueue {
    fn from(bytes: &[u8]) -> Self {
        let mut q = ByteQueue::with_capacity(bytes.len());
        q.append_slice(bytes);
        q
    }
}
