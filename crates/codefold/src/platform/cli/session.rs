//! An engine driven by the virtual clock.

use crate::dom::{Document, Dom, ElementSpec, NodeId};
use crate::engine::{Engine, EngineEvent, EngineOptions, StateStore};

use super::clock::TestClock;

/// Feeds events to an [`Engine`] and arms its timers on a [`TestClock`],
/// the single-threaded loop a browser would otherwise provide.
pub struct Session<D: Dom> {
    engine: Engine<D>,
    clock: TestClock,
    rescans_fired: usize,
}

impl<D: Dom> Session<D> {
    pub fn new(dom: D, store: StateStore, options: EngineOptions) -> Self {
        Self {
            engine: Engine::new(dom, store, options),
            clock: TestClock::new(),
            rescans_fired: 0,
        }
    }

    pub fn start(&mut self) -> usize {
        let now = self.clock.now_ms();
        self.engine.start(now)
    }

    pub fn dispatch(&mut self, event: EngineEvent<D::Node>) {
        let now = self.clock.now_ms();
        for request in self.engine.dispatch(event, now) {
            self.clock.register(request);
        }
    }

    /// Report one mutation batch.
    pub fn notify_added(&mut self, nodes: Vec<D::Node>) {
        self.dispatch(EngineEvent::NodesAdded(nodes));
    }

    /// Advance virtual time, delivering every timer that comes due at its
    /// own deadline. Returns how many fired.
    pub fn advance_by(&mut self, ms: u64) -> usize {
        let target = self.clock.now_ms() + ms;
        let mut fired = 0;
        while let Some(timer) = self.clock.next_due(target) {
            fired += 1;
            let requests = self.engine.dispatch(
                EngineEvent::RescanDue {
                    generation: timer.generation,
                },
                timer.fire_at_ms,
            );
            for request in requests {
                self.clock.register(request);
            }
        }
        self.clock.set_time(target);
        self.rescans_fired += fired;
        fired
    }

    /// Advance until no timer is pending.
    pub fn run_until_idle(&mut self) -> usize {
        let mut fired = 0;
        while let Some(wait) = self.clock.time_to_next_timer() {
            fired += self.advance_by(wait);
        }
        fired
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Timers delivered so far (stale ones included).
    pub fn timers_fired(&self) -> usize {
        self.rescans_fired
    }

    pub fn has_pending_timers(&self) -> bool {
        self.clock.has_pending_timers()
    }

    pub fn time_to_next_timer(&self) -> Option<u64> {
        self.clock.time_to_next_timer()
    }

    pub fn engine(&self) -> &Engine<D> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine<D> {
        &mut self.engine
    }

    pub fn into_engine(self) -> Engine<D> {
        self.engine
    }
}

impl Session<Document> {
    /// Build `spec` under `parent` and report it as one mutation batch.
    pub fn insert(&mut self, parent: NodeId, spec: &ElementSpec) -> NodeId {
        let node = self.engine.dom_mut().append_spec(parent, spec);
        self.notify_added(vec![node]);
        node
    }

    /// Insert under `<body>`.
    pub fn append(&mut self, spec: &ElementSpec) -> NodeId {
        let body = self.engine.dom().body();
        self.insert(body, spec)
    }
}
