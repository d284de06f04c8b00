//! The annotation engine.
//!
//! [`Engine`] owns the tree it decorates and one [`EngineContext`] with all
//! session state. Hosts feed it [`EngineEvent`]s through
//! [`Engine::dispatch`], one at a time, and arm whatever [`TimerRequest`]s
//! come back. Nothing in here fails outward: every error is logged and the
//! engine carries on.

pub mod decorate;
pub mod event;
pub mod fold;
pub mod identity;
pub mod matcher;
pub mod scheduler;
pub mod store;

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::config::{Config, ConfigPatch};
use crate::dom::Dom;
use crate::error::EngineError;

pub use decorate::{
    ACTION_ATTR, COLLAPSED_CLASS, CONTAINER_CLASS, Decoration, FRAME_ATTR, STATE_ATTR, TARGET_ATTR,
};
pub use event::{EngineEvent, KeyChord, Shortcut};
pub use fold::FoldState;
pub use identity::{ID_ATTR, IdentityAssigner};
pub use matcher::{ItemKind, MatchProfile, UI_ATTR};
pub use scheduler::{ChangeScheduler, ScanPlan, TimerRequest};
pub use store::{KeyValueStore, MemoryStore, StateStore, UnavailableStore};

use decorate::ItemInfo;
use matcher::{Candidate, CompiledProfile};

pub const DEFAULT_RESCAN_DELAY_MS: u64 = 300;

/// Per-session engine settings. Unlike [`Config`] these are not persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineOptions {
    pub rescan_delay_ms: u64,
    pub profiles: Vec<MatchProfile>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            rescan_delay_ms: DEFAULT_RESCAN_DELAY_MS,
            profiles: vec![MatchProfile::code_blocks(), MatchProfile::messages()],
        }
    }
}

impl EngineOptions {
    /// Replace the code-block patterns.
    pub fn with_code_selectors(mut self, selectors: Vec<String>) -> Self {
        for profile in &mut self.profiles {
            if profile.kind == ItemKind::Code {
                profile.selectors = selectors.clone();
            }
        }
        self
    }

    pub fn with_rescan_delay(mut self, delay_ms: u64) -> Self {
        self.rescan_delay_ms = delay_ms;
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub full_scans: u64,
    pub rescans: u64,
    pub coalesced_batches: u64,
    pub items_processed: u64,
    pub transitions: u64,
    pub orphans_dropped: u64,
    pub reprocess_passes: u64,
}

/// One foldable unit found in the tree.
#[derive(Clone, Debug)]
pub struct ContentItem<N> {
    pub identity: String,
    pub kind: ItemKind,
    pub line_count: usize,
    pub language: Option<String>,
    /// Non-owning; checked with `Dom::is_attached` before every use.
    pub node: N,
    pub decoration: Decoration<N>,
    pub state: FoldState,
}

/// Session state shared by every pipeline stage.
///
/// Created once by [`Engine::new`] (configuration loaded from the store);
/// `clear` drops the processed set and the registry for a full reprocessing
/// pass. Dropped with the engine.
#[derive(Debug)]
pub struct EngineContext<N> {
    pub config: Config,
    pub store: StateStore,
    pub registry: IndexMap<String, ContentItem<N>>,
    pub processed: IndexSet<N>,
    pub stats: EngineStats,
}

impl<N: Clone + Eq + std::hash::Hash> EngineContext<N> {
    pub fn new(mut store: StateStore) -> Self {
        let config = store.load_config();
        Self {
            config,
            store,
            registry: IndexMap::new(),
            processed: IndexSet::new(),
            stats: EngineStats::default(),
        }
    }

    pub fn clear(&mut self) {
        self.registry.clear();
        self.processed.clear();
    }
}

pub struct Engine<D: Dom> {
    dom: D,
    context: EngineContext<D::Node>,
    identities: IdentityAssigner,
    profiles: Vec<CompiledProfile>,
    selector_errors: Vec<EngineError>,
    scheduler: ChangeScheduler<D::Node>,
}

impl<D: Dom> Engine<D> {
    pub fn new(dom: D, store: StateStore, options: EngineOptions) -> Self {
        let (profiles, selector_errors) = matcher::compile(&options.profiles);
        Self {
            dom,
            context: EngineContext::new(store),
            identities: IdentityAssigner::new(),
            profiles,
            selector_errors,
            scheduler: ChangeScheduler::new(options.rescan_delay_ms),
        }
    }

    pub fn dom(&self) -> &D {
        &self.dom
    }

    /// Direct access for hosts that mutate the tree themselves. Report
    /// insertions afterwards with [`EngineEvent::NodesAdded`].
    pub fn dom_mut(&mut self) -> &mut D {
        &mut self.dom
    }

    pub fn into_dom(self) -> D {
        self.dom
    }

    pub fn context(&self) -> &EngineContext<D::Node> {
        &self.context
    }

    /// Patterns that failed to parse and are being skipped.
    pub fn selector_errors(&self) -> &[EngineError] {
        &self.selector_errors
    }

    /// Observe the root and run the first full scan.
    pub fn start(&mut self, now_ms: u64) -> usize {
        let Some(root) = self.dom.root() else {
            warn!("document has no root, nothing to observe");
            return 0;
        };
        self.scheduler.observe(root);
        let processed = self.scan_full(now_ms);
        info!(
            items = processed,
            profiles = self.profiles.len(),
            skipped_selectors = self.selector_errors.len(),
            store = if self.context.store.is_durable() { "durable" } else { "session" },
            "codefold loaded"
        );
        processed
    }

    /// Handle one event. Errors are logged, never returned; the result is
    /// the timers the host must arm.
    pub fn dispatch(&mut self, event: EngineEvent<D::Node>, now_ms: u64) -> Vec<TimerRequest> {
        let result = match event {
            EngineEvent::NodesAdded(nodes) => {
                if !self.root_is_current() {
                    return Vec::new();
                }
                let request = self.scheduler.on_mutation(nodes, now_ms);
                if request.is_none() && self.scheduler.is_pending() {
                    self.context.stats.coalesced_batches += 1;
                }
                return request.into_iter().collect();
            }
            EngineEvent::RescanDue { generation } => {
                if let Some(plan) = self.scheduler.on_timer(generation) {
                    if self.root_is_current() {
                        self.rescan(plan, now_ms);
                    }
                }
                Ok(())
            }
            EngineEvent::Click(node) => self.handle_click(&node).map(drop),
            EngineEvent::Key { chord, focused } => {
                self.handle_key(&chord, focused.as_ref()).map(drop)
            }
            EngineEvent::Toggle(identity) => self.toggle(&identity).map(drop),
            EngineEvent::SetState { identity, state } => self.set_state(&identity, state).map(drop),
            EngineEvent::CollapseAll => {
                self.collapse_all();
                Ok(())
            }
            EngineEvent::ExpandAll => {
                self.expand_all();
                Ok(())
            }
            EngineEvent::ApplySettings(patch) => {
                self.set_config(&patch, now_ms);
                Ok(())
            }
        };
        if let Err(error) = result {
            report(&error);
        }
        Vec::new()
    }

    /// Scan the whole document. Returns the number of newly processed items.
    pub fn scan_full(&mut self, now_ms: u64) -> usize {
        let Some(root) = self.dom.root() else {
            return 0;
        };
        self.context.stats.full_scans += 1;
        self.prune_orphans();
        self.scan(&root, now_ms)
    }

    fn rescan(&mut self, plan: ScanPlan<D::Node>, now_ms: u64) {
        self.context.stats.rescans += 1;
        self.prune_orphans();
        // Nodes added inside a short block can make the block itself match,
        // so the whole root is matched again. Processed nodes are skipped.
        let processed = match self.dom.root() {
            Some(root) => self.scan(&root, now_ms),
            None => 0,
        };
        debug!(
            roots = plan.roots.len(),
            batches = plan.batches,
            processed,
            "re-scan finished"
        );
    }

    /// Match below `root` (inclusive) and process every new candidate.
    pub fn scan(&mut self, root: &D::Node, now_ms: u64) -> usize {
        let candidates = matcher::find_candidates(&self.dom, root, &self.profiles);
        trace!(candidates = candidates.len(), "matched");
        candidates
            .into_iter()
            .filter(|candidate| self.process(candidate, now_ms))
            .count()
    }

    /// Wrap one candidate and give it its initial state. Returns `false`
    /// for nodes that are already processed or wrapped.
    fn process(&mut self, candidate: &Candidate<D::Node>, now_ms: u64) -> bool {
        let Self {
            dom,
            context,
            identities,
            profiles,
            ..
        } = self;
        let node = &candidate.node;
        if context.processed.contains(node) {
            return false;
        }
        let Some(compiled) = profiles.get(candidate.profile) else {
            return false;
        };
        let kind = compiled.profile.kind;
        if decorate::already_wrapped(&*dom, node, kind) {
            trace!(?node, "already wrapped");
            return false;
        }

        // Controls of items nested inside this one do not count as lines
        let line_count = decorate::line_count(&dom.text_content_excluding(node, UI_ATTR));
        let language = match kind {
            ItemKind::Code => Some(decorate::language_tag(&*dom, node)),
            ItemKind::Message => None,
        };
        let host_key = compiled
            .profile
            .key_attribute
            .as_deref()
            .and_then(|attribute| dom.attribute(node, attribute));
        let mut identity = identities.ensure_identity(dom, node, kind, host_key.as_deref(), now_ms);
        // A cloned subtree can carry the marker of a live item
        let clash = context
            .registry
            .get(&identity)
            .is_some_and(|existing| existing.node != *node && dom.is_attached(&existing.node));
        if clash {
            identity = identities.synthesize(kind, now_ms);
            dom.set_attribute(node, ID_ATTR, &identity);
            debug!(%identity, "duplicate identity marker replaced");
        }

        let info = ItemInfo {
            identity: &identity,
            kind,
            line_count,
            language: language.as_deref(),
        };
        let Some(decoration) =
            decorate::decorate(dom, node, &info, compiled.anchor.as_ref(), &context.config)
        else {
            return false;
        };

        let persisted = if context.config.remember_state {
            context.store.fold_state(&identity)
        } else {
            None
        };
        let state = fold::initial_state(persisted, &context.config, line_count);
        fold::render(dom, &decoration, state);

        debug!(%identity, ?kind, line_count, %state, "item processed");
        context.processed.insert(node.clone());
        context.registry.insert(
            identity.clone(),
            ContentItem {
                identity,
                kind,
                line_count,
                language,
                node: node.clone(),
                decoration,
                state,
            },
        );
        context.stats.items_processed += 1;
        true
    }

    pub fn toggle(&mut self, identity: &str) -> Result<FoldState, EngineError> {
        let current = self.live_item(identity)?.state;
        self.set_state(identity, current.flipped())
    }

    /// Render `target` and write it through to the store. Calling it with
    /// the current state is harmless.
    pub fn set_state(&mut self, identity: &str, target: FoldState) -> Result<FoldState, EngineError> {
        self.live_item(identity)?;
        let Self { dom, context, .. } = self;
        let item = context
            .registry
            .get_mut(identity)
            .ok_or_else(|| EngineError::UnknownItem {
                identity: identity.to_string(),
            })?;
        fold::render(dom, &item.decoration, target);
        if context.config.remember_state {
            context.store.save_fold_state(identity, target);
        }
        item.state = target;
        context.stats.transitions += 1;
        trace!(identity, state = %target, "transition");
        Ok(target)
    }

    pub fn collapse_all(&mut self) -> usize {
        self.set_all(FoldState::Collapsed)
    }

    pub fn expand_all(&mut self) -> usize {
        self.set_all(FoldState::Expanded)
    }

    fn set_all(&mut self, target: FoldState) -> usize {
        let identities: Vec<String> = self.context.registry.keys().cloned().collect();
        let mut applied = 0;
        for identity in identities {
            match self.set_state(&identity, target) {
                Ok(_) => applied += 1,
                Err(error) => report(&error),
            }
        }
        debug!(applied, state = %target, "bulk transition");
        applied
    }

    /// Toggle the item whose frame contains `focused`. `Ok(None)` when the
    /// node is not inside any item.
    pub fn toggle_focused(&mut self, focused: &D::Node) -> Result<Option<FoldState>, EngineError> {
        let identity = self
            .dom
            .closest(focused, |dom, node| dom.has_attribute(node, FRAME_ATTR))
            .and_then(|frame| self.dom.attribute(&frame, FRAME_ATTR));
        match identity {
            Some(identity) => self.toggle(&identity).map(Some),
            None => Ok(None),
        }
    }

    /// Run the control action of the closest `data-codefold-action`
    /// element. Returns `false` when the click hit no control.
    pub fn handle_click(&mut self, target: &D::Node) -> Result<bool, EngineError> {
        let Some(control) = self
            .dom
            .closest(target, |dom, node| dom.has_attribute(node, ACTION_ATTR))
        else {
            return Ok(false);
        };
        let action = self.dom.attribute(&control, ACTION_ATTR).unwrap_or_default();
        let item = self.dom.attribute(&control, TARGET_ATTR);
        match (action.as_str(), item) {
            ("toggle", Some(identity)) => {
                self.toggle(&identity)?;
            }
            ("expand", Some(identity)) => {
                self.set_state(&identity, FoldState::Expanded)?;
            }
            ("collapse-all", _) => {
                self.collapse_all();
            }
            ("expand-all", _) => {
                self.expand_all();
            }
            (other, _) => {
                debug!(action = other, "unhandled control action");
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn handle_key(
        &mut self,
        chord: &KeyChord,
        focused: Option<&D::Node>,
    ) -> Result<bool, EngineError> {
        match chord.shortcut() {
            Some(Shortcut::ToggleFocused) => match focused {
                Some(node) => Ok(self.toggle_focused(node)?.is_some()),
                None => Ok(false),
            },
            Some(Shortcut::CollapseAll) => {
                self.collapse_all();
                Ok(true)
            }
            Some(Shortcut::ExpandAll) => {
                self.expand_all();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn config(&self) -> &Config {
        &self.context.config
    }

    /// Apply settings: persist them, then reprocess everything so the new
    /// policy and presentation take effect. Returns whether anything changed.
    pub fn set_config(&mut self, patch: &ConfigPatch, now_ms: u64) -> bool {
        let changed = self.context.config.apply(patch);
        let config = self.context.config.clone();
        self.context.store.save_config(&config);
        info!(changed, "settings applied");
        self.reprocess_all(now_ms);
        changed
    }

    /// Remove every decoration, forget every item and scan from scratch.
    /// Identity markers stay on the elements, so items keep their identity.
    pub fn reprocess_all(&mut self, now_ms: u64) -> usize {
        self.scheduler.cancel();
        self.context.stats.reprocess_passes += 1;
        if let Some(root) = self.dom.root() {
            decorate::strip_all(&mut self.dom, &root);
        }
        self.context.clear();
        let processed = self.scan_full(now_ms);
        info!(items = processed, "reprocessed");
        processed
    }

    /// Drop every tracked item whose element has left the tree.
    pub fn prune_orphans(&mut self) -> usize {
        let orphaned: Vec<String> = self
            .context
            .registry
            .values()
            .filter(|item| !self.item_attached(item))
            .map(|item| item.identity.clone())
            .collect();
        for identity in &orphaned {
            self.drop_item(identity);
        }
        orphaned.len()
    }

    pub fn items(&self) -> impl Iterator<Item = &ContentItem<D::Node>> {
        self.context.registry.values()
    }

    pub fn item(&self, identity: &str) -> Option<&ContentItem<D::Node>> {
        self.context.registry.get(identity)
    }

    pub fn state_of(&self, identity: &str) -> Option<FoldState> {
        self.item(identity).map(|item| item.state)
    }

    pub fn processed_count(&self) -> usize {
        self.context.processed.len()
    }

    pub fn stats(&self) -> EngineStats {
        self.context.stats
    }

    pub fn store(&mut self) -> &mut StateStore {
        &mut self.context.store
    }

    pub fn rescan_pending(&self) -> bool {
        self.scheduler.is_pending()
    }

    /// `false` once the observed root went away.
    pub fn is_observing(&self) -> bool {
        self.scheduler.observed().is_some() && !self.scheduler.is_stopped()
    }

    fn item_attached(&self, item: &ContentItem<D::Node>) -> bool {
        self.dom.is_attached(&item.node) && self.dom.is_attached(&item.decoration.frame)
    }

    /// The tracked item, after a liveness check. A dead item is dropped.
    fn live_item(&mut self, identity: &str) -> Result<&ContentItem<D::Node>, EngineError> {
        let attached = match self.context.registry.get(identity) {
            Some(item) => self.item_attached(item),
            None => {
                return Err(EngineError::UnknownItem {
                    identity: identity.to_string(),
                });
            }
        };
        if !attached {
            self.drop_item(identity);
            return Err(EngineError::OrphanedReference {
                identity: identity.to_string(),
            });
        }
        self.context
            .registry
            .get(identity)
            .ok_or_else(|| EngineError::UnknownItem {
                identity: identity.to_string(),
            })
    }

    fn drop_item(&mut self, identity: &str) {
        if self.context.registry.shift_remove(identity).is_some() {
            self.context.stats.orphans_dropped += 1;
            debug!(identity, "orphaned item dropped");
        }
    }

    /// Stops the scheduler when the observed root was replaced or removed.
    fn root_is_current(&mut self) -> bool {
        if self.scheduler.is_stopped() {
            return false;
        }
        let Some(observed) = self.scheduler.observed().cloned() else {
            return false;
        };
        if self.dom.root().as_ref() == Some(&observed) && self.dom.is_attached(&observed) {
            return true;
        }
        debug!("observed root is gone, change scheduler stopped");
        self.scheduler.stop();
        false
    }
}

fn report(error: &EngineError) {
    match error {
        EngineError::OrphanedReference { .. } | EngineError::UnknownItem { .. } => {
            debug!(%error, "event ignored");
        }
        _ => warn!(%error, "event failed"),
    }
}
