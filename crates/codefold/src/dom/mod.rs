//! Host tree abstraction.
//!
//! The engine never touches a concrete DOM. It talks to a [`Dom`]: the
//! in-memory [`Document`] arena used by the CLI and the tests, or the
//! web-sys backed `BrowserDom` (`browser` feature).

pub mod arena;
pub mod selector;
pub mod spec;

use std::fmt;
use std::hash::Hash;

pub use arena::{Document, NodeId};
pub use selector::Selector;
pub use spec::ElementSpec;

/// Element-level view of a live, mutable tree.
///
/// Handles are non-owning. A handle whose node has been removed must keep
/// answering reads (with empty values) and report `is_attached == false`.
pub trait Dom {
    type Node: Clone + Eq + Hash + fmt::Debug;

    /// The observed root (`<body>`), if the tree still has one.
    fn root(&self) -> Option<Self::Node>;

    /// `true` while the node is reachable from the current root.
    fn is_attached(&self, node: &Self::Node) -> bool;

    fn parent(&self, node: &Self::Node) -> Option<Self::Node>;

    /// Element children in document order.
    fn children(&self, node: &Self::Node) -> Vec<Self::Node>;

    /// Next element sibling.
    fn next_sibling(&self, node: &Self::Node) -> Option<Self::Node>;

    /// Lowercase tag name.
    fn tag_name(&self, node: &Self::Node) -> String;

    fn attribute(&self, node: &Self::Node, name: &str) -> Option<String>;

    /// Concatenated text of the node and all its descendants.
    fn text_content(&self, node: &Self::Node) -> String;

    /// Like `text_content`, leaving out every element carrying `attribute`
    /// together with its subtree.
    fn text_content_excluding(&self, node: &Self::Node, attribute: &str) -> String;

    /// A new detached element, or `None` when the host refuses to create it.
    fn create_element(&mut self, tag: &str) -> Option<Self::Node>;

    fn set_attribute(&mut self, node: &Self::Node, name: &str, value: &str);

    fn remove_attribute(&mut self, node: &Self::Node, name: &str);

    /// Replace all children of `node` with a single text run.
    fn set_text(&mut self, node: &Self::Node, text: &str);

    /// Insert `child` into `parent` before `reference` (append when `None`).
    /// A child that is already in the tree is moved.
    fn insert_before(
        &mut self,
        parent: &Self::Node,
        child: &Self::Node,
        reference: Option<&Self::Node>,
    );

    /// Detach `node` (and its subtree) from the tree.
    fn remove(&mut self, node: &Self::Node);

    fn append_child(&mut self, parent: &Self::Node, child: &Self::Node) {
        self.insert_before(parent, child, None);
    }

    fn has_attribute(&self, node: &Self::Node, name: &str) -> bool {
        self.attribute(node, name).is_some()
    }

    fn classes(&self, node: &Self::Node) -> Vec<String> {
        self.attribute(node, "class")
            .map(|class| class.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn has_class(&self, node: &Self::Node, class: &str) -> bool {
        self.attribute(node, "class")
            .is_some_and(|value| value.split_whitespace().any(|name| name == class))
    }

    fn add_class(&mut self, node: &Self::Node, class: &str) {
        let mut classes = self.classes(node);
        if !classes.iter().any(|name| name == class) {
            classes.push(class.to_string());
            self.set_attribute(node, "class", &classes.join(" "));
        }
    }

    fn remove_class(&mut self, node: &Self::Node, class: &str) {
        let classes = self.classes(node);
        if classes.iter().any(|name| name == class) {
            let kept: Vec<_> = classes.into_iter().filter(|name| name != class).collect();
            self.set_attribute(node, "class", &kept.join(" "));
        }
    }

    /// First node among `node` and its ancestors accepted by `predicate`.
    fn closest<F>(&self, node: &Self::Node, mut predicate: F) -> Option<Self::Node>
    where
        F: FnMut(&Self, &Self::Node) -> bool,
    {
        let mut current = Some(node.clone());
        while let Some(candidate) = current {
            if predicate(self, &candidate) {
                return Some(candidate);
            }
            current = self.parent(&candidate);
        }
        None
    }

    /// `root` and every element below it, in document (pre-)order.
    fn descendants(&self, root: &Self::Node) -> Vec<Self::Node> {
        let mut result = Vec::new();
        let mut stack = vec![root.clone()];
        while let Some(node) = stack.pop() {
            let children = self.children(&node);
            result.push(node);
            stack.extend(children.into_iter().rev());
        }
        result
    }

    /// Elements in the subtree of `root` (inclusive) matching `selector`.
    fn query_all(&self, root: &Self::Node, selector: &Selector) -> Vec<Self::Node>
    where
        Self: Sized,
    {
        selector.select_all(self, root)
    }
}
