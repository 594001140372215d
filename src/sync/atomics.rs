//! Atomic helpers for statistics and counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// An atomic counter for statistics.
#[derive(Debug)]
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    /// Create a new counter.
    pub const fn new(initial: u64) -> Self {
        Self(AtomicU64::new(initial))
    }

    /// Increment the counter and return the previous value.
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// Raise the counter to `value` if it is currently lower.
    pub fn max(&self, value: u64) {
        self.0.fetch_max(value, Ordering::Relaxed);
    }

    /// Get the current value.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for AtomicCounter {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_ops() {
        let c = AtomicCounter::new(5);
        assert_eq!(c.increment(), 5);
        assert_eq!(c.get(), 6);
        c.max(9);
        c.max(3);
        assert_eq!(c.get(), 9);
    }
}
