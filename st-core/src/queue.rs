use chrono::{DateTime, Utc};
use st_domain::ShipSymbol;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// One entry in the event queue: a ship paired with the instant it becomes
/// ready to be reconsidered by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    priority: DateTime<Utc>,
    sequence: u64,
    ship_symbol: ShipSymbol,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest priority (and, on
        // ties, the lowest sequence number) comes out first.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap priority queue of ships waiting for their turn, ordered by
/// readiness timestamp. Ties broken by insertion order, so ships queued at
/// the same instant are served FIFO.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Entry>,
    sequence: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        EventQueue::default()
    }

    pub fn push(&mut self, ship_symbol: ShipSymbol, priority: DateTime<Utc>) {
        self.sequence += 1;
        self.heap.push(Entry {
            priority,
            sequence: self.sequence,
            ship_symbol,
        });
    }

    pub fn peek_next_priority(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|e| e.priority)
    }

    pub fn extract_min(&mut self) -> Option<ShipSymbol> {
        self.heap.pop().map(|e| e.ship_symbol)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Duration;

    #[test]
    fn extracts_in_priority_order() {
        let mut q = EventQueue::new();
        let now = Utc::now();
        q.push(ShipSymbol("A-1".into()), now + Duration::seconds(10));
        q.push(ShipSymbol("B-1".into()), now);
        q.push(ShipSymbol("C-1".into()), now + Duration::seconds(5));

        assert_eq!(q.extract_min(), Some(ShipSymbol("B-1".into())));
        assert_eq!(q.extract_min(), Some(ShipSymbol("C-1".into())));
        assert_eq!(q.extract_min(), Some(ShipSymbol("A-1".into())));
        assert_eq!(q.extract_min(), None);
    }

    #[test]
    fn ties_broken_fifo() {
        let mut q = EventQueue::new();
        let now = Utc::now();
        q.push(ShipSymbol("FIRST".into()), now);
        q.push(ShipSymbol("SECOND".into()), now);

        assert_eq!(q.extract_min(), Some(ShipSymbol("FIRST".into())));
        assert_eq!(q.extract_min(), Some(ShipSymbol("SECOND".into())));
    }

    #[test]
    fn peek_does_not_remove() {
        let mut q = EventQueue::new();
        let now = Utc::now();
        q.push(ShipSymbol("A-1".into()), now);
        assert_eq!(q.peek_next_priority(), Some(now));
        assert_eq!(q.len(), 1);
    }
}
