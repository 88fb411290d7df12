//! Bounded priority queue draining in `(priority, enqueueTs)` order.
//!
//! Backed by a `BinaryHeap`, which pops its *greatest* element first;
//! `QueuedEvent`'s `Ord` ranks `Urgent` (numerically 0) above `Normal` (2),
//! so entries are wrapped in `Reverse` to turn that max-heap into the
//! min-priority-first order the spec wants.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use sense_gate::types::QueuedEvent;

pub struct PriorityQueue {
    max_size: usize,
    heap: BinaryHeap<Reverse<QueuedEvent>>,
    pub dropped: u64,
}

impl PriorityQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            heap: BinaryHeap::new(),
            dropped: 0,
        }
    }

    /// Refuses the event (and counts it dropped) once the queue is full,
    /// rather than blocking the caller or evicting an existing entry.
    pub fn push(&mut self, event: QueuedEvent) -> bool {
        if self.heap.len() >= self.max_size {
            self.dropped += 1;
            return false;
        }
        self.heap.push(Reverse(event));
        true
    }

    pub fn pop(&mut self) -> Option<QueuedEvent> {
        self.heap.pop().map(|Reverse(event)| event)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sense_gate::types::{Priority, SenseEvent, SenseMeta};

    fn event(priority: Priority, ts: i64) -> QueuedEvent {
        QueuedEvent {
            priority,
            ts_ms: ts,
            payload: SenseEvent::context(ts, SenseMeta::default()),
            attempts: 0,
        }
    }

    #[test]
    fn drains_in_priority_then_timestamp_order() {
        let mut q = PriorityQueue::new(10);
        q.push(event(Priority::Normal, 1));
        q.push(event(Priority::Urgent, 5));
        q.push(event(Priority::Urgent, 2));
        q.push(event(Priority::High, 3));

        assert_eq!(q.pop().unwrap().ts_ms, 2);
        assert_eq!(q.pop().unwrap().ts_ms, 5);
        assert_eq!(q.pop().unwrap().priority, Priority::High);
        assert_eq!(q.pop().unwrap().priority, Priority::Normal);
        assert!(q.pop().is_none());
    }

    #[test]
    fn overflow_refuses_new_events_and_counts_them_dropped() {
        let mut q = PriorityQueue::new(2);
        assert!(q.push(event(Priority::Normal, 1)));
        assert!(q.push(event(Priority::Normal, 2)));
        assert!(!q.push(event(Priority::Normal, 3)));
        assert_eq!(q.dropped, 1);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn dropped_events_never_reappear_after_drain() {
        let mut q = PriorityQueue::new(1);
        q.push(event(Priority::Normal, 1));
        q.push(event(Priority::Normal, 2)); // dropped
        let drained: Vec<i64> = std::iter::from_fn(|| q.pop()).map(|e| e.ts_ms).collect();
        assert_eq!(drained, vec![1]);
    }
}
