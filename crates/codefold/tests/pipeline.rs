#![cfg(feature = "cli")]

use codefold::config::{CONFIG_KEY, ConfigPatch, DefaultCollapse};
use codefold::dom::{Document, Dom, ElementSpec, Selector};
use codefold::engine::store::fold_key;
use codefold::engine::{
    CONTAINER_CLASS, Engine, EngineEvent, EngineOptions, FoldState, ID_ATTR, MemoryStore,
    StateStore, UI_ATTR, UnavailableStore,
};
use codefold::error::EngineError;
use codefold::platform::cli::{FileStorage, Session};
use proptest::prelude::*;

fn page(blocks: &[usize]) -> ElementSpec {
    blocks.iter().fold(
        ElementSpec::new("div").with_class("prose"),
        |page, lines| page.with_child(ElementSpec::code_block(Some("rust"), *lines)),
    )
}

fn started(spec: &ElementSpec, backend: &MemoryStore) -> Engine<Document> {
    let mut engine = Engine::new(
        Document::from_spec(spec),
        StateStore::new(backend.clone()),
        EngineOptions::default(),
    );
    engine.start(0);
    engine
}

fn count(engine: &Engine<Document>, selector: &Selector) -> usize {
    selector.select_all(engine.dom(), &engine.dom().body()).len()
}

fn containers(engine: &Engine<Document>) -> usize {
    count(engine, &Selector::class(CONTAINER_CLASS))
}

fn first_identity(engine: &Engine<Document>) -> String {
    engine.items().next().unwrap().identity.clone()
}

#[test]
fn rescanning_an_unchanged_tree_changes_nothing() {
    let mut engine = started(&page(&[3, 20, 8]), &MemoryStore::new());
    let processed: Vec<_> = engine.context().processed.iter().copied().collect();
    let controls = count(&engine, &Selector::has_attribute(UI_ATTR));

    assert_eq!(engine.scan_full(5), 0);
    assert_eq!(engine.scan_full(6), 0);

    let again: Vec<_> = engine.context().processed.iter().copied().collect();
    assert_eq!(processed, again);
    assert_eq!(containers(&engine), 3);
    assert_eq!(count(&engine, &Selector::has_attribute(UI_ATTR)), controls);
}

#[test]
fn identity_marker_is_reused() {
    let mut engine = started(&page(&[3]), &MemoryStore::new());
    let item = engine.items().next().unwrap().clone();
    assert_eq!(
        engine.dom().attribute(&item.node, ID_ATTR).as_deref(),
        Some(item.identity.as_str())
    );
    engine.reprocess_all(100);
    assert_eq!(first_identity(&engine), item.identity);
}

#[test]
fn persisted_state_wins_over_default_policy() {
    let backend = MemoryStore::new();
    backend.insert(CONFIG_KEY, r#"{"defaultCollapse":"none","rememberState":true}"#);
    backend.insert(&fold_key("code-kept"), "true");
    let spec = ElementSpec::new("div")
        .with_child(ElementSpec::code_block(None, 2).with_attr(ID_ATTR, "code-kept"))
        .with_child(ElementSpec::code_block(None, 2));

    let engine = started(&spec, &backend);
    assert_eq!(engine.state_of("code-kept"), Some(FoldState::Collapsed));
    let other = engine
        .items()
        .find(|item| item.identity != "code-kept")
        .unwrap();
    assert_eq!(other.state, FoldState::Expanded);
}

#[test]
fn persisted_state_ignored_without_remember_state() {
    let backend = MemoryStore::new();
    backend.insert(CONFIG_KEY, r#"{"defaultCollapse":"none","rememberState":false}"#);
    backend.insert(&fold_key("code-kept"), "true");
    let spec = ElementSpec::code_block(None, 2).with_attr(ID_ATTR, "code-kept");

    let engine = started(&spec, &backend);
    assert_eq!(engine.state_of("code-kept"), Some(FoldState::Expanded));
}

#[test]
fn long_policy_collapses_only_long_blocks() {
    let engine = started(&page(&[20, 10]), &MemoryStore::new());
    let states: Vec<_> = engine
        .items()
        .map(|item| (item.line_count, item.state))
        .collect();
    assert_eq!(
        states,
        vec![(20, FoldState::Collapsed), (10, FoldState::Expanded)]
    );
}

#[test]
fn toggle_round_trip_persists_each_transition() {
    let backend = MemoryStore::new();
    let mut engine = started(&page(&[5]), &backend);
    let identity = first_identity(&engine);

    engine.dispatch(EngineEvent::Toggle(identity.clone()), 1);
    assert_eq!(engine.state_of(&identity), Some(FoldState::Collapsed));
    assert_eq!(backend.get(&fold_key(&identity)).as_deref(), Some("true"));

    engine.dispatch(EngineEvent::Toggle(identity.clone()), 2);
    assert_eq!(engine.state_of(&identity), Some(FoldState::Expanded));
    assert_eq!(backend.get(&fold_key(&identity)).as_deref(), Some("false"));
}

#[test]
fn collapse_all_covers_every_item() {
    for n in [0, 1, 50] {
        let mut engine = started(&page(&vec![3; n]), &MemoryStore::new());
        assert_eq!(engine.items().count(), n);
        assert_eq!(engine.collapse_all(), n);
        assert!(engine.items().all(|item| item.state == FoldState::Collapsed));
        assert_eq!(engine.expand_all(), n);
        assert!(engine.items().all(|item| item.state == FoldState::Expanded));
    }
}

#[test]
fn reprocessing_reproduces_the_same_items() {
    let mut engine = started(&page(&[3, 20, 40]), &MemoryStore::new());
    let before: Vec<_> = engine.items().map(|item| item.identity.clone()).collect();

    engine.dispatch(
        EngineEvent::ApplySettings(ConfigPatch {
            long_code_lines: Some(30),
            ..ConfigPatch::default()
        }),
        50,
    );

    let after: Vec<_> = engine.items().map(|item| item.identity.clone()).collect();
    assert_eq!(before, after);
    assert_eq!(engine.processed_count(), 3);
    assert_eq!(containers(&engine), 3);
    let states: Vec<_> = engine.items().map(|item| item.state).collect();
    assert_eq!(
        states,
        vec![FoldState::Expanded, FoldState::Expanded, FoldState::Collapsed]
    );
}

#[test]
fn three_batches_within_the_window_trigger_one_rescan() {
    let mut session = Session::new(
        Document::new(),
        StateStore::new(MemoryStore::new()),
        EngineOptions::default(),
    );
    session.start();

    session.append(&ElementSpec::code_block(None, 3));
    session.advance_by(100);
    session.append(&ElementSpec::code_block(None, 4));
    session.advance_by(100);
    session.append(&ElementSpec::code_block(None, 5));
    assert_eq!(session.engine().items().count(), 0);

    assert_eq!(session.run_until_idle(), 1);
    assert_eq!(session.now_ms(), 300);
    assert_eq!(session.engine().stats().rescans, 1);
    assert_eq!(session.engine().items().count(), 3);

    session.append(&ElementSpec::code_block(None, 6));
    assert_eq!(session.run_until_idle(), 1);
    assert_eq!(session.engine().stats().rescans, 2);
    assert_eq!(session.engine().items().count(), 4);
}

#[test]
fn block_that_grows_in_place_is_found_by_the_next_rescan() {
    let mut session = Session::new(
        Document::new(),
        StateStore::new(MemoryStore::new()),
        EngineOptions::default(),
    );
    session.start();

    let pre = session.append(&ElementSpec::new("pre").with_text("fn"));
    session.run_until_idle();
    assert_eq!(session.engine().items().count(), 0);

    // Highlighted tokens stream into the block after it was inserted
    session.insert(pre, &ElementSpec::new("span").with_text(" main() {\n    run();\n}\n"));
    session.run_until_idle();
    assert_eq!(session.engine().items().count(), 1);
    let item = session.engine().items().next().unwrap();
    assert_eq!(item.node, pre);
    assert_eq!(item.line_count, 4);
}

#[test]
fn engine_inserted_nodes_do_not_cause_new_items() {
    let mut session = Session::new(
        Document::from_spec(&page(&[3])),
        StateStore::new(MemoryStore::new()),
        EngineOptions::default(),
    );
    session.start();
    let frame = session.engine().items().next().unwrap().decoration.frame;

    // A browser observer reports the frame the engine inserted
    session.notify_added(vec![frame]);
    session.run_until_idle();
    assert_eq!(session.engine().items().count(), 1);
    assert_eq!(session.engine().processed_count(), 1);
}

#[test]
fn removed_item_is_dropped_not_touched() {
    let mut engine = started(&page(&[3, 4]), &MemoryStore::new());
    let item = engine.items().next().unwrap().clone();
    engine.dom_mut().remove(&item.decoration.frame);

    assert!(matches!(
        engine.toggle(&item.identity),
        Err(EngineError::OrphanedReference { .. })
    ));
    assert!(engine.item(&item.identity).is_none());
    assert_eq!(engine.collapse_all(), 1);
}

#[test]
fn replaced_root_stops_the_scheduler() {
    let mut session = Session::new(
        Document::from_spec(&page(&[3])),
        StateStore::new(MemoryStore::new()),
        EngineOptions::default(),
    );
    session.start();
    assert!(session.engine().is_observing());

    let new_body = session.engine_mut().dom_mut().replace_body();
    let block = session
        .engine_mut()
        .dom_mut()
        .append_spec(new_body, &ElementSpec::code_block(None, 3));
    session.notify_added(vec![block]);

    assert!(!session.has_pending_timers());
    assert!(!session.engine().is_observing());
    assert_eq!(session.engine_mut().prune_orphans(), 1);
    assert_eq!(session.engine().items().count(), 0);
}

#[test]
fn unavailable_store_degrades_to_session_state() {
    let mut engine = Engine::new(
        Document::from_spec(&page(&[20, 3])),
        StateStore::new(UnavailableStore),
        EngineOptions::default(),
    );
    assert_eq!(engine.start(0), 2);
    let identity = first_identity(&engine);
    assert_eq!(engine.state_of(&identity), Some(FoldState::Collapsed));

    engine.toggle(&identity).unwrap();
    assert_eq!(engine.state_of(&identity), Some(FoldState::Expanded));
    assert!(engine.store().is_degraded());
    assert_eq!(engine.store().fold_state(&identity), Some(FoldState::Expanded));
}

#[test]
fn invalid_selector_is_skipped() {
    let options =
        EngineOptions::default().with_code_selectors(vec!["pre:hover".into(), "pre".into()]);
    let mut engine = Engine::new(
        Document::from_spec(&page(&[3])),
        StateStore::session_only(),
        options,
    );
    assert_eq!(engine.start(0), 1);
    assert!(matches!(
        &engine.selector_errors()[0],
        EngineError::SelectorInvalid { selector, .. } if selector == "pre:hover"
    ));
}

#[test]
fn keyed_messages_keep_state_across_reload() {
    let backend = MemoryStore::new();
    let spec = ElementSpec::new("div")
        .with_class("ds-message")
        .with_attr("data-um-id", "m-17")
        .with_child(ElementSpec::new("p").with_text("Explain this code"))
        .with_child(ElementSpec::new("span").with_class("ds-icon-button"));

    let mut engine = started(&spec, &backend);
    assert_eq!(engine.state_of("msg-m-17"), Some(FoldState::Expanded));
    engine.toggle("msg-m-17").unwrap();

    let reloaded = started(&spec, &backend);
    assert_eq!(reloaded.state_of("msg-m-17"), Some(FoldState::Collapsed));
}

#[test]
fn code_inside_a_message_is_tracked_separately() {
    let spec = ElementSpec::new("div")
        .with_class("ds-message")
        .with_attr("data-um-id", "7")
        .with_child(ElementSpec::code_block(Some("sql"), 4));
    let mut engine = started(&spec, &MemoryStore::new());
    assert_eq!(engine.items().count(), 2);

    let code = engine
        .items()
        .find(|item| item.identity.starts_with("code-"))
        .unwrap()
        .clone();
    assert_eq!(code.language.as_deref(), Some("sql"));
    engine.toggle_focused(&code.node).unwrap();
    assert_eq!(engine.state_of(&code.identity), Some(FoldState::Collapsed));
    assert_eq!(engine.state_of("msg-7"), Some(FoldState::Expanded));
}

#[test]
fn message_line_count_ignores_controls_of_nested_code() {
    let spec = ElementSpec::new("div")
        .with_class("ds-message")
        .with_child(ElementSpec::new("p").with_text("Here is the query:"))
        .with_child(ElementSpec::code_block(Some("sql"), 10));
    let engine = started(&spec, &MemoryStore::new());
    assert_eq!(engine.config().long_code_lines, 15);

    let message = engine
        .items()
        .find(|item| item.identity.starts_with("msg-"))
        .unwrap();
    assert_eq!(message.line_count, 10);
    assert_eq!(message.state, FoldState::Expanded);
}

#[test]
fn file_storage_survives_a_new_engine() {
    let dir = tempfile::tempdir().unwrap();
    let spec = ElementSpec::code_block(None, 3).with_attr(ID_ATTR, "code-disk");

    let mut engine = Engine::new(
        Document::from_spec(&spec),
        StateStore::new(FileStorage::new(dir.path())),
        EngineOptions::default(),
    );
    engine.start(0);
    engine.set_config(
        &ConfigPatch {
            default_collapse: Some(DefaultCollapse::None),
            ..ConfigPatch::default()
        },
        1,
    );
    engine.toggle("code-disk").unwrap();

    let mut reopened = Engine::new(
        Document::from_spec(&spec),
        StateStore::new(FileStorage::new(dir.path())),
        EngineOptions::default(),
    );
    reopened.start(0);
    assert_eq!(reopened.config().default_collapse, DefaultCollapse::None);
    assert_eq!(reopened.state_of("code-disk"), Some(FoldState::Collapsed));
}

proptest! {
    #[test]
    fn pipeline_is_idempotent(blocks in prop::collection::vec(0usize..40, 0..12)) {
        let mut engine = started(&page(&blocks), &MemoryStore::new());
        let tracked = engine.items().count();
        let wrapped = containers(&engine);

        prop_assert_eq!(engine.scan_full(1), 0);
        prop_assert_eq!(engine.items().count(), tracked);
        prop_assert_eq!(containers(&engine), wrapped);

        engine.reprocess_all(2);
        prop_assert_eq!(engine.items().count(), tracked);
        prop_assert_eq!(containers(&engine), wrapped);
    }
}
