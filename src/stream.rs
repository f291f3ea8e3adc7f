//! Stream - Bounded single-threaded FIFO connecting data-path stages.
//!
//! Every arrow between two engines is one of these: a fixed-capacity
//! ring with backpressure. A full stream rejects the push and the
//! producer retries on a later step; nothing is ever silently dropped
//! by the channel itself.

use std::fmt;

/// Error returned when pushing into a full stream.
///
/// Carries the rejected element back to the producer so it can be
/// re-attempted on the next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Full<T>(pub T);

/// Fixed-capacity FIFO for point-to-point stage wiring.
///
/// Storage is allocated once at construction; push and pop are O(1)
/// index arithmetic with no further allocation.
pub struct Stream<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    len: usize,
}

impl<T> Stream<T> {
    /// Create a stream holding at most `capacity` elements.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "stream capacity must be non-zero");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots: slots.into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    /// Append an element, or hand it back if the stream is full.
    #[inline]
    pub fn push(&mut self, value: T) -> Result<(), Full<T>> {
        if self.len == self.slots.len() {
            return Err(Full(value));
        }
        let tail = (self.head + self.len) % self.slots.len();
        self.slots[tail] = Some(value);
        self.len += 1;
        Ok(())
    }

    /// Remove and return the oldest element.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let value = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        value
    }

    /// Peek at the oldest element without removing it.
    #[inline]
    pub fn front(&self) -> Option<&T> {
        if self.len == 0 {
            None
        } else {
            self.slots[self.head].as_ref()
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Drain every element into a Vec (test/diagnostic helper).
    pub fn drain_all(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        while let Some(v) = self.pop() {
            out.push(v);
        }
        out
    }
}

impl<T> fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("len", &self.len)
            .field("capacity", &self.slots.len())
            .finish()
    }
}
