//! Sequence archive for inbound duplicate detection.
//!
//! Remembers the most recent reliable sequence numbers received on one
//! circuit. A bounded FIFO with a companion set gives O(1) membership checks
//! and O(1) eviction of the oldest entry.

use std::collections::{HashSet, VecDeque};
use tracing::trace;

/// Bounded FIFO of recently seen sequence numbers
#[derive(Debug)]
pub struct SequenceArchive {
    /// Membership index
    seen: HashSet<u32>,
    /// Arrival order for eviction
    order: VecDeque<u32>,
    capacity: usize,
}

impl SequenceArchive {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `sequence`. Returns `false` if it was already archived.
    pub fn insert(&mut self, sequence: u32) -> bool {
        if !self.seen.insert(sequence) {
            return false;
        }
        self.order.push_back(sequence);

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
                trace!(sequence = oldest, "Evicted archived sequence");
            }
        }
        true
    }

    pub fn contains(&self, sequence: u32) -> bool {
        self.seen.contains(&sequence)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Release all archived sequences
    pub fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
        self.seen.shrink_to_fit();
        self.order.shrink_to_fit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_detection() {
        let mut archive = SequenceArchive::new(10);
        assert!(archive.insert(77));
        assert!(!archive.insert(77));
        assert!(archive.contains(77));
    }

    #[test]
    fn test_oldest_evicted_one_at_a_time() {
        let mut archive = SequenceArchive::new(3);
        for seq in 1..=4 {
            assert!(archive.insert(seq));
        }
        assert_eq!(archive.len(), 3);
        assert!(!archive.contains(1));
        assert!(archive.contains(2));
        assert!(archive.contains(4));

        // an evicted sequence is no longer a duplicate
        assert!(archive.insert(1));
        assert!(!archive.contains(2));
    }

    #[test]
    fn test_clear_releases_entries() {
        let mut archive = SequenceArchive::new(5);
        archive.insert(1);
        archive.insert(2);
        archive.clear();
        assert!(archive.is_empty());
        assert!(!archive.contains(1));
    }
}
