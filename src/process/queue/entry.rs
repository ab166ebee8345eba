/*!
 * Queue Entry Types
 * Pending jobs ordered by priority, then insertion order
 */

use crate::core::types::Priority;
use crate::process::handle::ProcessHandle;
use std::cmp::Ordering;

/// Ordering key of a pending job
///
/// `BinaryHeap` is a max-heap: higher priorities pop first, and among equal
/// priorities the lower sequence number (earlier insertion) wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct SchedKey {
    pub priority: Priority,
    pub seq: u64,
}

impl Ord for SchedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for SchedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending job
#[derive(Debug, Clone)]
pub(super) struct Entry {
    pub key: SchedKey,
    pub handle: ProcessHandle,
}

impl Entry {
    pub fn new(handle: ProcessHandle, priority: Priority, seq: u64) -> Self {
        Self {
            key: SchedKey { priority, seq },
            handle,
        }
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BinaryHeap;

    fn drain(priorities: &[Priority]) -> Vec<SchedKey> {
        let mut heap: BinaryHeap<SchedKey> = priorities
            .iter()
            .enumerate()
            .map(|(seq, &priority)| SchedKey {
                priority,
                seq: seq as u64,
            })
            .collect();

        let mut order = Vec::with_capacity(priorities.len());
        while let Some(key) = heap.pop() {
            order.push(key);
        }
        order
    }

    #[test]
    fn test_equal_priorities_keep_insertion_order() {
        let order: Vec<(Priority, u64)> = drain(&[5, 1, 5, 2])
            .into_iter()
            .map(|k| (k.priority, k.seq))
            .collect();
        assert_eq!(order, vec![(5, 0), (5, 2), (2, 3), (1, 1)]);
    }

    #[test]
    fn test_entries_order_by_key() {
        let a = Entry::new(ProcessHandle::new(|_| 0).unwrap(), 1, 0);
        let b = Entry::new(ProcessHandle::new(|_| 0).unwrap(), 1, 1);
        let c = Entry::new(ProcessHandle::new(|_| 0).unwrap(), 2, 2);
        assert!(a > b);
        assert!(c > a);
    }

    proptest! {
        #[test]
        fn prop_drain_is_priority_desc_then_fifo(priorities in prop::collection::vec(-5i32..5, 0..64)) {
            let order = drain(&priorities);
            prop_assert_eq!(order.len(), priorities.len());
            for pair in order.windows(2) {
                let (a, b) = (pair[0], pair[1]);
                prop_assert!(
                    a.priority > b.priority || (a.priority == b.priority && a.seq < b.seq)
                );
            }
        }
    }
}
