//! Circular buffer of previously computed iterands.

use super::{Real, Vector};

/// Fixed-capacity ring of `(time, iterand)` pairs.
///
/// Index 0 is the most recently pushed entry, index `k` the k-th most recent.
/// Pushing at capacity evicts the oldest entry. Reading past the number of
/// stored entries is a programmer error and asserts in debug builds.
#[derive(Debug, Clone)]
pub struct History {
    data: Vec<(Real, Vector)>,
    capacity: usize,
    tail: usize,
}

impl History {
    /// Creates a buffer that keeps track of the last `lookback` iterands.
    pub fn new(lookback: usize) -> Self {
        assert!(lookback > 0, "lookback must be positive");
        Self {
            data: Vec::with_capacity(lookback),
            capacity: lookback,
            tail: 0,
        }
    }

    /// The maximum number of iterands this buffer can store.
    #[inline]
    pub fn lookback(&self) -> usize {
        self.capacity
    }

    /// The number of currently stored entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Removes everything from the buffer.
    pub fn clear(&mut self) {
        self.data.clear();
        self.tail = 0;
    }

    /// Pushes an entry, evicting the oldest one when at capacity.
    pub fn push(&mut self, time: Real, iterand: Vector) {
        if self.data.len() < self.capacity {
            self.data.push((time, iterand));
        } else {
            self.data[self.tail] = (time, iterand);
        }
        self.tail = (self.tail + 1) % self.capacity;
    }

    /// Previously encountered time, in order of most-to-least recent.
    #[inline]
    pub fn time(&self, index: usize) -> Real {
        self.entry(index).0
    }

    /// Previously encountered iterand, in order of most-to-least recent.
    #[inline]
    pub fn iterand(&self, index: usize) -> &Vector {
        &self.entry(index).1
    }

    fn entry(&self, index: usize) -> &(Real, Vector) {
        debug_assert!(
            index < self.capacity,
            "history index {index} exceeds lookback {}",
            self.capacity
        );
        debug_assert!(
            index < self.data.len(),
            "history index {index} exceeds stored depth {}",
            self.data.len()
        );
        let position = (self.tail + self.capacity - 1 - index) % self.capacity;
        &self.data[position]
    }
}
