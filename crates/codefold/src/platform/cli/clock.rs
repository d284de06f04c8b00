//! Virtual time clock for deterministic testing.
//!
//! TestClock tracks virtual time and the re-scan timers the engine asked
//! for. Time only moves when the caller advances it, so debounce tests run
//! instantly and always fire in the same order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::engine::TimerRequest;

/// A timer that came due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredTimer {
    pub fire_at_ms: u64,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TimerEntry {
    fire_at_ms: u64,
    /// Registration order, so equal deadlines fire first-in first-out
    sequence: u64,
    generation: u64,
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: smaller fire_at_ms comes first
        other
            .fire_at_ms
            .cmp(&self.fire_at_ms)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

pub struct TestClock {
    current_time_ms: u64,
    next_sequence: u64,
    pending_timers: BinaryHeap<TimerEntry>,
}

impl TestClock {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(time_ms: u64) -> Self {
        Self {
            current_time_ms: time_ms,
            next_sequence: 0,
            pending_timers: BinaryHeap::new(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.current_time_ms
    }

    /// Arm a one-shot timer. A deadline in the past fires on the next advance.
    pub fn register(&mut self, request: TimerRequest) {
        self.next_sequence += 1;
        self.pending_timers.push(TimerEntry {
            fire_at_ms: request.due_ms.max(self.current_time_ms),
            sequence: self.next_sequence,
            generation: request.generation,
        });
    }

    /// Pop the earliest timer due at or before `until_ms`, moving the clock
    /// to its deadline.
    pub fn next_due(&mut self, until_ms: u64) -> Option<FiredTimer> {
        if self.pending_timers.peek()?.fire_at_ms > until_ms {
            return None;
        }
        let entry = self.pending_timers.pop()?;
        self.current_time_ms = self.current_time_ms.max(entry.fire_at_ms);
        Some(FiredTimer {
            fire_at_ms: entry.fire_at_ms,
            generation: entry.generation,
        })
    }

    /// Advance virtual time, returning every timer that came due in order.
    pub fn advance_by(&mut self, ms: u64) -> Vec<FiredTimer> {
        let target_time = self.current_time_ms + ms;
        let mut fired = Vec::new();
        while let Some(timer) = self.next_due(target_time) {
            fired.push(timer);
        }
        self.current_time_ms = target_time;
        fired
    }

    /// Move to `time_ms` without firing anything. Never goes backwards.
    pub fn set_time(&mut self, time_ms: u64) {
        self.current_time_ms = self.current_time_ms.max(time_ms);
    }

    pub fn has_pending_timers(&self) -> bool {
        !self.pending_timers.is_empty()
    }

    pub fn time_to_next_timer(&self) -> Option<u64> {
        self.pending_timers
            .peek()
            .map(|entry| entry.fire_at_ms.saturating_sub(self.current_time_ms))
    }

    pub fn clear_timers(&mut self) {
        self.pending_timers.clear();
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}
