use crate::driver::WatcherId;

use std::cmp::Ordering;
use std::time::Instant;

/// An entry in the driver's timer queue.
///
/// Entries are ordered by expiration; `sequence` is the insertion counter and
/// breaks ties so that timers sharing an expiration fire in the order they
/// were scheduled.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TimerEntry {
    pub(crate) watcher: WatcherId,
    pub(crate) expiration: Instant,
    sequence: u64,
}

impl TimerEntry {
    fn key(&self) -> (Instant, u64) {
        (self.expiration, self.sequence)
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Binary min-heap of timer watchers ordered by expiration.
///
/// `std::collections::BinaryHeap` cannot remove an arbitrary element, which
/// the driver needs whenever a timer is disabled or cancelled, so the heap is
/// kept by hand in a dense array.
#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    entries: Vec<TimerEntry>,
    sequence: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts a watcher with the given absolute expiration. O(log n).
    pub(crate) fn insert(&mut self, watcher: WatcherId, expiration: Instant) {
        let entry = TimerEntry {
            watcher,
            expiration,
            sequence: self.sequence,
        };
        self.sequence = self.sequence.wrapping_add(1);

        self.entries.push(entry);
        self.sift_up(self.entries.len() - 1);
    }

    /// Expiration of the earliest timer, if any.
    pub(crate) fn peek(&self) -> Option<Instant> {
        self.entries.first().map(|entry| entry.expiration)
    }

    /// Removes and returns the earliest timer if it expired at or before `now`.
    pub(crate) fn extract(&mut self, now: Instant) -> Option<TimerEntry> {
        match self.entries.first() {
            Some(entry) if entry.expiration <= now => self.remove_at(0),
            _ => None,
        }
    }

    /// Removes the timer belonging to `watcher`. O(n) scan.
    pub(crate) fn remove(&mut self, watcher: WatcherId) -> bool {
        match self.entries.iter().position(|entry| entry.watcher == watcher) {
            Some(index) => self.remove_at(index).is_some(),
            None => false,
        }
    }

    fn remove_at(&mut self, index: usize) -> Option<TimerEntry> {
        if index >= self.entries.len() {
            return None;
        }

        let removed = self.entries.swap_remove(index);

        if index < self.entries.len() {
            // The former last element now sits at `index` and may violate
            // heap order in either direction.
            self.sift_down(index);
            self.sift_up(index);
        }

        Some(removed)
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;

            if self.entries[index] >= self.entries[parent] {
                break;
            }

            self.entries.swap(index, parent);
            index = parent;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.entries.len();

        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut smallest = index;

            if left < len && self.entries[left] < self.entries[smallest] {
                smallest = left;
            }
            if right < len && self.entries[right] < self.entries[smallest] {
                smallest = right;
            }
            if smallest == index {
                break;
            }

            self.entries.swap(index, smallest);
            index = smallest;
        }
    }
}
