//! Mutation-driven re-scan scheduling.
//!
//! The scheduler never owns a timer. `on_mutation` hands back a
//! [`TimerRequest`] for the host to arm; when it fires the host feeds the
//! generation back through `on_timer`. At most one run is pending: batches
//! that arrive meanwhile are folded into it and the delay is not restarted.
//! A timer whose generation is no longer current is ignored.

use tracing::trace;

/// Ask the host to deliver `RescanDue { generation }` after `delay_ms`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerRequest {
    pub generation: u64,
    pub due_ms: u64,
    pub delay_ms: u64,
}

/// A fired re-scan: the subtrees that triggered it and how many batches
/// it absorbed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanPlan<N> {
    /// Added subtree roots, deduplicated, in arrival order.
    pub roots: Vec<N>,
    /// Mutation batches coalesced into this run.
    pub batches: usize,
}

#[derive(Debug)]
struct PendingRun<N> {
    generation: u64,
    roots: Vec<N>,
    batches: usize,
}

#[derive(Debug)]
pub struct ChangeScheduler<N> {
    delay_ms: u64,
    root: Option<N>,
    stopped: bool,
    generation: u64,
    pending: Option<PendingRun<N>>,
}

impl<N: Clone + PartialEq> ChangeScheduler<N> {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            root: None,
            stopped: false,
            generation: 0,
            pending: None,
        }
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    /// Start watching `root`. Also re-arms a stopped scheduler.
    pub fn observe(&mut self, root: N) {
        self.root = Some(root);
        self.stopped = false;
    }

    pub fn observed(&self) -> Option<&N> {
        self.root.as_ref()
    }

    /// Stop for good (until the next `observe`); a pending run is dropped.
    pub fn stop(&mut self) {
        self.stopped = true;
        self.pending = None;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop the pending run; its timer will find a stale generation.
    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            trace!(generation = pending.generation, "pending re-scan cancelled");
        }
    }

    /// Record one mutation batch. Returns a timer request only when this
    /// batch starts a new pending run.
    pub fn on_mutation(&mut self, added: Vec<N>, now_ms: u64) -> Option<TimerRequest> {
        if self.stopped || self.root.is_none() || added.is_empty() {
            return None;
        }
        if let Some(pending) = &mut self.pending {
            for node in added {
                if !pending.roots.contains(&node) {
                    pending.roots.push(node);
                }
            }
            pending.batches += 1;
            trace!(generation = pending.generation, batches = pending.batches, "batch absorbed");
            return None;
        }

        self.generation += 1;
        let mut roots: Vec<N> = Vec::with_capacity(added.len());
        for node in added {
            if !roots.contains(&node) {
                roots.push(node);
            }
        }
        self.pending = Some(PendingRun {
            generation: self.generation,
            roots,
            batches: 1,
        });
        trace!(generation = self.generation, delay_ms = self.delay_ms, "re-scan scheduled");
        Some(TimerRequest {
            generation: self.generation,
            due_ms: now_ms + self.delay_ms,
            delay_ms: self.delay_ms,
        })
    }

    /// A timer fired. Returns the plan when it belongs to the pending run.
    pub fn on_timer(&mut self, generation: u64) -> Option<ScanPlan<N>> {
        if self.stopped {
            return None;
        }
        let current = self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.generation == generation);
        if !current {
            trace!(generation, "stale re-scan timer ignored");
            return None;
        }
        let pending = self.pending.take()?;
        Some(ScanPlan {
            roots: pending.roots,
            batches: pending.batches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observed() -> ChangeScheduler<u32> {
        let mut scheduler = ChangeScheduler::new(300);
        scheduler.observe(0);
        scheduler
    }

    #[test]
    fn batches_within_window_share_one_run() {
        let mut scheduler = observed();
        let request = scheduler.on_mutation(vec![1], 1_000).unwrap();
        assert_eq!(request.due_ms, 1_300);
        assert!(scheduler.on_mutation(vec![2, 1], 1_100).is_none());
        assert!(scheduler.on_mutation(vec![3], 1_250).is_none());

        let plan = scheduler.on_timer(request.generation).unwrap();
        assert_eq!(plan.roots, vec![1, 2, 3]);
        assert_eq!(plan.batches, 3);
        assert!(!scheduler.is_pending());
    }

    #[test]
    fn empty_batches_do_not_schedule() {
        let mut scheduler = observed();
        assert!(scheduler.on_mutation(Vec::new(), 0).is_none());
        assert!(!scheduler.is_pending());
    }

    #[test]
    fn stale_and_cancelled_timers_are_ignored() {
        let mut scheduler = observed();
        let first = scheduler.on_mutation(vec![1], 0).unwrap();
        scheduler.cancel();
        assert!(scheduler.on_timer(first.generation).is_none());

        let second = scheduler.on_mutation(vec![2], 10).unwrap();
        assert_ne!(first.generation, second.generation);
        assert!(scheduler.on_timer(first.generation).is_none());
        assert!(scheduler.on_timer(second.generation).is_some());
        assert!(scheduler.on_timer(second.generation).is_none());
    }

    #[test]
    fn stopped_scheduler_is_inert() {
        let mut scheduler = observed();
        let request = scheduler.on_mutation(vec![1], 0).unwrap();
        scheduler.stop();
        assert!(scheduler.on_timer(request.generation).is_none());
        assert!(scheduler.on_mutation(vec![2], 0).is_none());

        scheduler.observe(9);
        assert!(scheduler.on_mutation(vec![2], 0).is_some());
    }

    #[test]
    fn unobserved_scheduler_ignores_mutations() {
        let mut scheduler: ChangeScheduler<u32> = ChangeScheduler::new(300);
        assert!(scheduler.on_mutation(vec![1], 0).is_none());
    }
}
