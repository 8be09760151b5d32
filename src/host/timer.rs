//! One-shot timer queue shared by the host implementations.

use super::TimerCallback;
use crate::types::Time;
use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;

/// A pending one-shot timer.
struct TimerEntry {
    at: Time,
    seq: u64,
    callback: TimerCallback,
    cancelled: Rc<Cell<bool>>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse for a min-heap: earliest deadline first, then insertion
        // order among equal deadlines.
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of pending timers with per-entry cancellation flags.
///
/// Cancelled entries stay in the heap until they reach the top and are
/// discarded lazily.
pub(crate) struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Inserts a timer firing at `at`. Returns the cancellation flag; the
    /// caller wraps it in a [`Disposal`](super::Disposal).
    pub(crate) fn insert(&mut self, at: Time, callback: TimerCallback) -> Rc<Cell<bool>> {
        let cancelled = Rc::new(Cell::new(false));
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(TimerEntry {
            at,
            seq,
            callback,
            cancelled: Rc::clone(&cancelled),
        });
        cancelled
    }

    /// Pops the earliest live timer with `at <= limit`, discarding any
    /// cancelled entries encountered on the way.
    pub(crate) fn pop_earliest_until(&mut self, limit: Time) -> Option<(Time, TimerCallback)> {
        loop {
            let (cancelled, due) = match self.heap.peek() {
                Some(entry) => (entry.cancelled.get(), entry.at <= limit),
                None => return None,
            };
            if cancelled {
                self.heap.pop();
                continue;
            }
            if !due {
                return None;
            }
            let entry = self.heap.pop()?;
            return Some((entry.at, entry.callback));
        }
    }

    /// Returns the deadline of the earliest live timer, if any.
    pub(crate) fn next_deadline(&mut self) -> Option<Time> {
        loop {
            let (cancelled, at) = match self.heap.peek() {
                Some(entry) => (entry.cancelled.get(), entry.at),
                None => return None,
            };
            if cancelled {
                self.heap.pop();
                continue;
            }
            return Some(at);
        }
    }

    pub(crate) fn has_pending(&mut self) -> bool {
        self.next_deadline().is_some()
    }
}
