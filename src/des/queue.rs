//! Min-ordered event queue with lazy cancellation.
//!
//! Events are ordered by fire time, ties broken by insertion identifier, so a
//! run over identical inputs always replays in the same order. Cancellation
//! is logical: the identifier goes into a tombstone set and the entry is
//! discarded when it surfaces during a pop.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

/// Monotonic event identifier, unique within one queue. Never reused.
pub type EventId = u64;

/// A scheduled event. `index` addresses an entity (a tag, a node) and is -1
/// when unused; `att` carries an optional payload such as a frame.
#[derive(Debug)]
pub struct Event<K, A> {
    pub id: EventId,
    pub kind: K,
    pub time: f64,
    pub index: i64,
    pub att: Option<A>,
}

impl<K, A> PartialEq for Event<K, A> {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl<K, A> Eq for Event<K, A> {}

impl<K, A> PartialOrd for Event<K, A> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K, A> Ord for Event<K, A> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the std max-heap pops the smallest (time, id) first.
        // Fire times are finite by construction.
        other
            .time
            .partial_cmp(&self.time)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Priority queue of timed events keyed by (time ascending, id ascending).
pub struct EventQueue<K, A> {
    heap: BinaryHeap<Event<K, A>>,
    cancelled: HashSet<EventId>,
    next_id: EventId,
}

impl<K, A> EventQueue<K, A> {
    pub fn new() -> Self {
        EventQueue {
            heap: BinaryHeap::new(),
            cancelled: HashSet::new(),
            next_id: 1,
        }
    }

    /// Insert an event and return its freshly allocated identifier.
    pub fn push(&mut self, time: f64, kind: K, index: i64, att: Option<A>) -> EventId {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Event { id, kind, time, index, att });
        id
    }

    /// Pop the earliest non-cancelled event. Tombstones of cancelled events
    /// encountered along the way are dropped.
    pub fn pop(&mut self) -> Option<Event<K, A>> {
        while let Some(event) = self.heap.pop() {
            if self.cancelled.remove(&event.id) {
                continue;
            }
            return Some(event);
        }
        None
    }

    /// Mark an event as cancelled. Idempotent; unknown identifiers are a no-op
    /// for the delivery order (the tombstone simply never matches).
    pub fn remove(&mut self, id: EventId) {
        self.cancelled.insert(id);
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

impl<K, A> Default for EventQueue<K, A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Probe {
        A,
        B,
    }

    #[test]
    fn pops_in_time_order_with_id_tie_break() {
        let mut q: EventQueue<Probe, ()> = EventQueue::new();
        let e1 = q.push(1.0, Probe::A, -1, None);
        let e2 = q.push(1.0, Probe::B, -1, None);
        let e3 = q.push(0.5, Probe::A, -1, None);
        let e4 = q.push(1.0, Probe::B, -1, None);

        let order: Vec<EventId> = std::iter::from_fn(|| q.pop().map(|e| e.id)).collect();
        assert_eq!(order, vec![e3, e1, e2, e4]);
    }

    #[test]
    fn cancelled_event_never_pops() {
        let mut q: EventQueue<Probe, ()> = EventQueue::new();
        let keep = q.push(1.0, Probe::A, -1, None);
        let drop = q.push(0.5, Probe::B, -1, None);
        q.remove(drop);
        q.remove(drop); // twice is a no-op

        let first = q.pop().expect("one event left");
        assert_eq!(first.id, keep);
        assert!(q.pop().is_none());
    }

    #[test]
    fn drains_to_zero_after_trailing_cancellations() {
        let mut q: EventQueue<Probe, ()> = EventQueue::new();
        let a = q.push(1.0, Probe::A, -1, None);
        let b = q.push(2.0, Probe::A, -1, None);
        q.remove(a);
        q.remove(b);
        assert_eq!(q.len(), 2);
        assert!(q.pop().is_none());
        assert_eq!(q.len(), 0);
        assert!(q.is_empty());
    }

    #[test]
    fn index_and_attachment_round_trip() {
        let mut q: EventQueue<Probe, &'static str> = EventQueue::new();
        q.push(0.25, Probe::B, 3, Some("payload"));
        let e = q.pop().expect("event");
        assert_eq!(e.kind, Probe::B);
        assert_eq!(e.index, 3);
        assert_eq!(e.att, Some("payload"));
    }
}
