use std::cell::Cell;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use js_sys::Reflect;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{Document, Element};

use crate::dom::Dom;

/// Expando property holding an element's handle key.
const KEY_PROPERTY: &str = "__codefoldKey";

/// A live element plus a key that is stable for the element's lifetime.
#[derive(Clone, Debug)]
pub struct BrowserNode {
    key: u32,
    element: Element,
}

impl BrowserNode {
    pub fn element(&self) -> &Element {
        &self.element
    }

    pub fn key(&self) -> u32 {
        self.key
    }
}

impl PartialEq for BrowserNode {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for BrowserNode {}

impl Hash for BrowserNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

/// [`Dom`] over the page's `document`. Clones share the key counter, so
/// handles made by event listeners match the engine's.
#[derive(Clone, Debug)]
pub struct BrowserDom {
    document: Document,
    next_key: Rc<Cell<u32>>,
}

impl BrowserDom {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            next_key: Rc::new(Cell::new(1)),
        }
    }

    /// The current window's document.
    pub fn from_window() -> Option<Self> {
        web_sys::window()?.document().map(Self::new)
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Handle for `element`, stamping a key on first sight.
    pub fn node(&self, element: Element) -> BrowserNode {
        let property = JsValue::from_str(KEY_PROPERTY);
        let key = Reflect::get(&element, &property)
            .ok()
            .and_then(|value| value.as_f64())
            .map(|value| value as u32);
        let key = match key {
            Some(key) => key,
            None => {
                let key = self.next_key.get();
                self.next_key.set(key.wrapping_add(1));
                // A frozen host object just keeps receiving fresh keys
                let _ = Reflect::set(&element, &property, &JsValue::from(key));
                key
            }
        };
        BrowserNode { key, element }
    }

    /// Handle for an event target, if it is an element.
    pub fn node_from_target(&self, target: Option<web_sys::EventTarget>) -> Option<BrowserNode> {
        target
            .and_then(|target| target.dyn_into::<Element>().ok())
            .map(|element| self.node(element))
    }
}

impl Dom for BrowserDom {
    type Node = BrowserNode;

    fn root(&self) -> Option<BrowserNode> {
        self.document
            .body()
            .map(|body| self.node(body.unchecked_into::<Element>()))
    }

    fn is_attached(&self, node: &BrowserNode) -> bool {
        node.element.is_connected()
    }

    fn parent(&self, node: &BrowserNode) -> Option<BrowserNode> {
        node.element
            .parent_element()
            .map(|element| self.node(element))
    }

    fn children(&self, node: &BrowserNode) -> Vec<BrowserNode> {
        let collection = node.element.children();
        (0..collection.length())
            .filter_map(|index| collection.item(index))
            .map(|element| self.node(element))
            .collect()
    }

    fn next_sibling(&self, node: &BrowserNode) -> Option<BrowserNode> {
        node.element
            .next_element_sibling()
            .map(|element| self.node(element))
    }

    fn tag_name(&self, node: &BrowserNode) -> String {
        node.element.tag_name().to_ascii_lowercase()
    }

    fn attribute(&self, node: &BrowserNode, name: &str) -> Option<String> {
        node.element.get_attribute(name)
    }

    fn text_content(&self, node: &BrowserNode) -> String {
        node.element.text_content().unwrap_or_default()
    }

    fn text_content_excluding(&self, node: &BrowserNode, attribute: &str) -> String {
        let mut out = String::new();
        let mut stack: Vec<web_sys::Node> = vec![node.element.clone().into()];
        while let Some(current) = stack.pop() {
            if let Some(element) = current.dyn_ref::<Element>() {
                if element.has_attribute(attribute) {
                    continue;
                }
            } else if current.node_type() == web_sys::Node::TEXT_NODE {
                out.push_str(&current.node_value().unwrap_or_default());
                continue;
            }
            let children = current.child_nodes();
            for index in (0..children.length()).rev() {
                if let Some(child) = children.item(index) {
                    stack.push(child);
                }
            }
        }
        out
    }

    fn create_element(&mut self, tag: &str) -> Option<BrowserNode> {
        match self.document.create_element(tag) {
            Ok(element) => Some(self.node(element)),
            Err(error) => {
                tracing::warn!(tag, ?error, "create_element rejected");
                None
            }
        }
    }

    fn set_attribute(&mut self, node: &BrowserNode, name: &str, value: &str) {
        if let Err(error) = node.element.set_attribute(name, value) {
            tracing::debug!(name, ?error, "set_attribute rejected");
        }
    }

    fn remove_attribute(&mut self, node: &BrowserNode, name: &str) {
        let _ = node.element.remove_attribute(name);
    }

    fn set_text(&mut self, node: &BrowserNode, text: &str) {
        node.element.set_text_content(Some(text));
    }

    fn insert_before(
        &mut self,
        parent: &BrowserNode,
        child: &BrowserNode,
        reference: Option<&BrowserNode>,
    ) {
        let reference: Option<&web_sys::Node> = reference.map(|reference| reference.element.as_ref());
        if let Err(error) = parent.element.insert_before(&child.element, reference) {
            tracing::debug!(?error, "insert_before rejected");
        }
    }

    fn remove(&mut self, node: &BrowserNode) {
        node.element.remove();
    }
}
