//! Run with `wasm-pack test --headless --firefox -- --features browser`.
#![cfg(all(target_arch = "wasm32", feature = "browser"))]

use codefold::dom::Dom;
use codefold::engine::{Engine, EngineOptions, FoldState, KeyValueStore, StateStore};
use codefold::platform::browser::{BrowserDom, LocalStorage};
use wasm_bindgen_test::*;
use web_sys::{KeyboardEvent, KeyboardEventInit};

wasm_bindgen_test_configure!(run_in_browser);

fn page_with_block(lines: usize) -> BrowserDom {
    let dom = BrowserDom::from_window().unwrap();
    let document = dom.document();
    let body = document.body().unwrap();
    body.set_inner_html("");
    let pre = document.create_element("pre").unwrap();
    let text: Vec<String> = (1..=lines).map(|line| format!("line {line}")).collect();
    pre.set_text_content(Some(&text.join("\n")));
    body.append_child(&pre).unwrap();
    dom
}

#[wasm_bindgen_test]
fn handles_are_stable_per_element() {
    let dom = page_with_block(3);
    let root = dom.root().unwrap();
    let first = dom.children(&root);
    let second = dom.children(&root);
    assert_eq!(first, second);
}

#[wasm_bindgen_test]
fn long_block_is_wrapped_and_collapsed() {
    let dom = page_with_block(30);
    let mut engine = Engine::new(dom, StateStore::session_only(), EngineOptions::default());
    assert_eq!(engine.start(0), 1);
    let item = engine.items().next().unwrap().clone();
    assert_eq!(item.state, FoldState::Collapsed);
    assert!(engine.dom().has_class(&item.decoration.frame, "codefold-container"));

    engine.toggle(&item.identity).unwrap();
    assert_eq!(engine.state_of(&item.identity), Some(FoldState::Expanded));
}

#[wasm_bindgen_test]
fn local_storage_round_trip() {
    let mut storage = LocalStorage::new();
    storage.save("codefold-test", "true").unwrap();
    assert_eq!(storage.load("codefold-test").unwrap().as_deref(), Some("true"));
    assert!(storage.keys().unwrap().contains(&"codefold-test".to_string()));
    storage.remove("codefold-test").unwrap();
    assert_eq!(storage.load("codefold-test").unwrap(), None);
}

#[wasm_bindgen_test]
fn shortcuts_leave_the_browser_default_alone() {
    let dom = page_with_block(3);
    codefold::platform::browser::start();

    let init = KeyboardEventInit::new();
    init.set_key("C");
    init.set_ctrl_key(true);
    init.set_shift_key(true);
    init.set_cancelable(true);
    let event = KeyboardEvent::new_with_keyboard_event_init_dict("keydown", &init).unwrap();
    assert!(dom.document().dispatch_event(&event).unwrap());
    assert!(!event.default_prevented());
}
