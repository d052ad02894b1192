//! In-order release of out-of-order synthesis results.
//!
//! Sentences are dispatched to TTS concurrently but must reach the client in
//! dispatch order. The buffer tracks a next-to-emit cursor; completions ahead
//! of the cursor park in a map until the gap fills. A failed sentence is
//! skipped so one bad synthesis never stalls the ones behind it.

use std::collections::BTreeMap;

#[derive(Debug)]
enum Slot<T> {
    Ready(T),
    Skipped,
}

#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next_to_emit: u64,
    pending: BTreeMap<u64, Slot<T>>,
}

impl<T> ReorderBuffer<T> {
    pub fn new(start: u64) -> Self {
        Self {
            next_to_emit: start,
            pending: BTreeMap::new(),
        }
    }

    /// Accept a completed item; returns every item now releasable in order.
    pub fn insert(&mut self, index: u64, item: T) -> Vec<(u64, T)> {
        if index >= self.next_to_emit {
            self.pending.insert(index, Slot::Ready(item));
        }
        self.drain_ready()
    }

    /// Give up on an index; may unblock items queued behind it.
    pub fn skip(&mut self, index: u64) -> Vec<(u64, T)> {
        if index >= self.next_to_emit {
            self.pending.insert(index, Slot::Skipped);
        }
        self.drain_ready()
    }

    fn drain_ready(&mut self) -> Vec<(u64, T)> {
        let mut ready = Vec::new();
        while let Some(slot) = self.pending.remove(&self.next_to_emit) {
            let index = self.next_to_emit;
            self.next_to_emit += 1;
            if let Slot::Ready(item) = slot {
                ready.push((index, item));
            }
        }
        ready
    }

    pub fn next_to_emit(&self) -> u64 {
        self.next_to_emit
    }

    /// True once every index below `end` has been emitted or skipped.
    pub fn is_drained_up_to(&self, end: u64) -> bool {
        self.next_to_emit >= end && self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_completions_pass_straight_through() {
        let mut buffer = ReorderBuffer::new(0);
        assert_eq!(buffer.insert(0, "a"), vec![(0, "a")]);
        assert_eq!(buffer.insert(1, "b"), vec![(1, "b")]);
        assert_eq!(buffer.insert(2, "c"), vec![(2, "c")]);
        assert!(buffer.is_drained_up_to(3));
    }

    #[test]
    fn test_out_of_order_completions_emit_in_dispatch_order() {
        // Dispatch 0,1,2; complete 2,0,1
        let mut buffer = ReorderBuffer::new(0);
        assert!(buffer.insert(2, "c").is_empty());
        assert_eq!(buffer.insert(0, "a"), vec![(0, "a")]);
        assert_eq!(buffer.insert(1, "b"), vec![(1, "b"), (2, "c")]);
        assert!(buffer.is_drained_up_to(3));
    }

    #[test]
    fn test_skip_unblocks_queued_items() {
        let mut buffer = ReorderBuffer::new(0);
        assert_eq!(buffer.insert(0, "a"), vec![(0, "a")]);
        assert!(buffer.insert(2, "c").is_empty());
        // Index 1 failed synthesis
        assert_eq!(buffer.skip(1), vec![(2, "c")]);
        assert!(buffer.is_drained_up_to(3));
    }

    #[test]
    fn test_cursor_can_start_mid_session() {
        // A second turn picks up where the first turn's indices left off
        let mut buffer = ReorderBuffer::new(5);
        assert!(buffer.insert(6, "b").is_empty());
        assert_eq!(buffer.insert(5, "a"), vec![(5, "a"), (6, "b")]);
        assert_eq!(buffer.next_to_emit(), 7);
    }

    const ORDERS: [[u64; 3]; 6] = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];

    #[test]
    fn test_every_completion_order_emits_in_index_order() {
        for order in ORDERS {
            let mut buffer = ReorderBuffer::new(0);
            let mut emitted = Vec::new();
            for index in order {
                emitted.extend(buffer.insert(index, index));
            }
            assert_eq!(emitted, vec![(0, 0), (1, 1), (2, 2)], "order {order:?}");
            assert!(buffer.is_drained_up_to(3));
        }
    }

    #[test]
    fn test_every_completion_order_with_a_failed_index() {
        for order in ORDERS {
            let mut buffer = ReorderBuffer::new(0);
            let mut emitted = Vec::new();
            for index in order {
                emitted.extend(if index == 1 {
                    buffer.skip(index)
                } else {
                    buffer.insert(index, index)
                });
            }
            assert_eq!(emitted, vec![(0, 0), (2, 2)], "order {order:?}");
            assert!(buffer.is_drained_up_to(3));
        }
    }

    #[test]
    fn test_stale_index_is_ignored() {
        let mut buffer = ReorderBuffer::new(0);
        buffer.insert(0, "a");
        assert!(buffer.insert(0, "dup").is_empty());
        assert_eq!(buffer.next_to_emit(), 1);
    }
}
