//! Backend selection.
//!
//! Plain round robin over the current backend snapshot of a service. The
//! counter is shared by all requests of the service, so `k` consecutive
//! selections over `k` backends visit every backend exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Round-robin selector.
#[derive(Debug, Default)]
pub struct RoundRobin {
    /// Number of selections made so far.
    current: AtomicUsize,
}

impl RoundRobin {
    /// Create a selector whose first pick is index 0.
    pub const fn new() -> Self {
        Self {
            current: AtomicUsize::new(0),
        }
    }

    /// Pick the next index among `len` backends, or `None` if there are none.
    pub fn select(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some(self.current.fetch_add(1, Ordering::Relaxed) % len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_basic() {
        let rr = RoundRobin::new();

        let selections: Vec<usize> = (0..6).map(|_| rr.select(3).unwrap()).collect();
        assert_eq!(selections, [0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_round_robin_empty() {
        let rr = RoundRobin::new();
        assert!(rr.select(0).is_none());
        // An empty pick does not advance the rotation.
        assert_eq!(rr.select(2), Some(0));
    }

    #[test]
    fn test_round_robin_single() {
        let rr = RoundRobin::new();
        for _ in 0..5 {
            assert_eq!(rr.select(1), Some(0));
        }
    }

    #[test]
    fn test_round_robin_concurrent_is_even() {
        let rr = std::sync::Arc::new(RoundRobin::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let rr = rr.clone();
                std::thread::spawn(move || (0..300).map(|_| rr.select(3).unwrap()).collect::<Vec<_>>())
            })
            .collect();

        let mut counts = [0usize; 3];
        for handle in handles {
            for idx in handle.join().unwrap() {
                counts[idx] += 1;
            }
        }
        assert_eq!(counts, [400, 400, 400]);
    }
}
