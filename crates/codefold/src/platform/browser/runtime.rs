//! Browser event loop.
//!
//! Mutation observer batches, clicks, key presses and fired timers are all
//! turned into [`EngineEvent`]s and pushed into one channel. A single zoon
//! task owns the engine and handles them strictly in arrival order.

use futures_channel::mpsc;
use wasm_bindgen::JsCast;
use wasm_bindgen::closure::Closure;
use web_sys::{Element, KeyboardEvent, MouseEvent, MutationObserver, MutationObserverInit, MutationRecord};
use zoon::futures_util::StreamExt;
use zoon::{Task, Timer};

use super::dom::{BrowserDom, BrowserNode};
use super::storage::LocalStorage;
use crate::dom::Dom;
use crate::engine::{Engine, EngineEvent, EngineOptions, KeyChord, StateStore};

type EventSender = mpsc::UnboundedSender<EngineEvent<BrowserNode>>;

fn now_ms() -> u64 {
    js_sys::Date::now() as u64
}

/// Start the engine on the current page with the default profiles.
pub fn start() {
    start_with(EngineOptions::default());
}

pub fn start_with(options: EngineOptions) {
    let Some(dom) = BrowserDom::from_window() else {
        zoon::eprintln!("codefold: no document, not starting");
        return;
    };
    let (sender, mut receiver) = mpsc::unbounded::<EngineEvent<BrowserNode>>();

    let observed = dom.root();
    if let Some(body) = &observed {
        observe_mutations(&dom, body, sender.clone());
    }
    listen_for_clicks(&dom, sender.clone());
    listen_for_keys(&dom, sender.clone());

    Task::start(async move {
        let mut engine = Engine::new(dom, StateStore::new(LocalStorage::new()), options);
        let items = engine.start(now_ms());
        zoon::println!("codefold loaded: {items} item(s)");

        while let Some(event) = receiver.next().await {
            for request in engine.dispatch(event, now_ms()) {
                let sender = sender.clone();
                Task::start(async move {
                    Timer::sleep(request.delay_ms.min(u64::from(u32::MAX)) as u32).await;
                    let _ = sender.unbounded_send(EngineEvent::RescanDue {
                        generation: request.generation,
                    });
                });
            }
        }
    });
}

fn observe_mutations(dom: &BrowserDom, body: &BrowserNode, sender: EventSender) {
    let handles = dom.clone();
    let callback = Closure::<dyn FnMut(js_sys::Array, MutationObserver)>::new(
        move |records: js_sys::Array, _observer: MutationObserver| {
            let mut added = Vec::new();
            for record in records.iter() {
                let Ok(record) = record.dyn_into::<MutationRecord>() else {
                    continue;
                };
                let nodes = record.added_nodes();
                for index in 0..nodes.length() {
                    if let Some(element) = nodes.item(index).and_then(|node| node.dyn_into::<Element>().ok()) {
                        added.push(handles.node(element));
                    }
                }
            }
            if !added.is_empty() {
                let _ = sender.unbounded_send(EngineEvent::NodesAdded(added));
            }
        },
    );

    let observer = match MutationObserver::new(callback.as_ref().unchecked_ref()) {
        Ok(observer) => observer,
        Err(error) => {
            zoon::eprintln!("codefold: MutationObserver unavailable: {error:?}");
            return;
        }
    };
    let init = MutationObserverInit::new();
    init.set_child_list(true);
    init.set_subtree(true);
    if let Err(error) = observer.observe_with_options(body.element(), &init) {
        zoon::eprintln!("codefold: cannot observe the document: {error:?}");
    }
    // Observer and callback live as long as the page
    callback.forget();
}

fn listen_for_clicks(dom: &BrowserDom, sender: EventSender) {
    let handles = dom.clone();
    let callback = Closure::<dyn FnMut(MouseEvent)>::new(move |event: MouseEvent| {
        if let Some(target) = handles.node_from_target(event.target()) {
            let _ = sender.unbounded_send(EngineEvent::Click(target));
        }
    });
    if let Err(error) = dom
        .document()
        .add_event_listener_with_callback("click", callback.as_ref().unchecked_ref())
    {
        zoon::eprintln!("codefold: cannot listen for clicks: {error:?}");
    }
    callback.forget();
}

fn listen_for_keys(dom: &BrowserDom, sender: EventSender) {
    let handles = dom.clone();
    let callback = Closure::<dyn FnMut(KeyboardEvent)>::new(move |event: KeyboardEvent| {
        let chord = KeyChord {
            ctrl: event.ctrl_key(),
            shift: event.shift_key(),
            alt: event.alt_key(),
            ..KeyChord::new(&event.key())
        };
        // The browser keeps its own bindings for these chords
        if chord.shortcut().is_none() {
            return;
        }
        let focused = handles
            .document()
            .active_element()
            .map(|element| handles.node(element));
        let _ = sender.unbounded_send(EngineEvent::Key { chord, focused });
    });
    if let Err(error) = dom
        .document()
        .add_event_listener_with_callback("keydown", callback.as_ref().unchecked_ref())
    {
        zoon::eprintln!("codefold: cannot listen for keys: {error:?}");
    }
    callback.forget();
}
