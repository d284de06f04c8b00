use indexmap::IndexMap;

use super::Dom;
use super::spec::ElementSpec;

/// Generational index into the document arena.
/// A freed slot bumps its generation, so stale handles are detected instead
/// of silently aliasing a reused slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId {
    pub index: u32,
    pub generation: u32,
}

impl NodeId {
    pub const INVALID: Self = Self { index: u32::MAX, generation: 0 };
}

#[derive(Debug, Clone)]
enum NodeData {
    Element {
        tag: String,
        attributes: IndexMap<String, String>,
    },
    Text(String),
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    live: bool,
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Slot {
    fn new(data: NodeData) -> Self {
        Self {
            generation: 0,
            live: true,
            data,
            parent: None,
            children: Vec::new(),
        }
    }
}

/// In-memory element tree with a single `<body>` root.
#[derive(Debug)]
pub struct Document {
    nodes: Vec<Slot>,
    free_list: Vec<u32>,
    body: NodeId,
}

impl Document {
    pub fn new() -> Self {
        let mut document = Self {
            nodes: Vec::with_capacity(64),
            free_list: Vec::new(),
            body: NodeId::INVALID,
        };
        document.body = document.alloc(element_data("body"));
        document
    }

    /// Build a document whose body contains `spec` (or is `spec` when it is a
    /// `body` element).
    pub fn from_spec(spec: &ElementSpec) -> Self {
        let mut document = Self::new();
        let body = document.body;
        if spec.tag.eq_ignore_ascii_case("body") {
            document.fill(body, spec);
        } else {
            document.append_spec(body, spec);
        }
        document
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    /// Drop the whole tree and start over with a fresh body.
    /// Handles into the old tree become detached.
    pub fn replace_body(&mut self) -> NodeId {
        let old = self.body;
        self.free_subtree(old);
        self.body = self.alloc(element_data("body"));
        self.body
    }

    /// Create an element tree from `spec` and append it to `parent`.
    pub fn append_spec(&mut self, parent: NodeId, spec: &ElementSpec) -> NodeId {
        let node = self.build(spec);
        self.insert_before(&parent, &node, None);
        node
    }

    /// Create a detached element tree from `spec`.
    pub fn build(&mut self, spec: &ElementSpec) -> NodeId {
        let node = self.alloc(element_data(&spec.tag));
        self.fill(node, spec);
        node
    }

    fn fill(&mut self, node: NodeId, spec: &ElementSpec) {
        if let Some(class) = &spec.class {
            self.set_attribute(&node, "class", class);
        }
        for (name, value) in &spec.attrs {
            self.set_attribute(&node, name, value);
        }
        if let Some(text) = &spec.text {
            let text_node = self.alloc(NodeData::Text(text.clone()));
            self.link(node, text_node, None);
        }
        for child in &spec.children {
            let child = self.build(child);
            self.link(node, child, None);
        }
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeData::Text(text.to_string()))
    }

    /// Number of live (allocated) nodes, detached ones included.
    pub fn live_count(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.live).count()
    }

    /// Check if a NodeId is valid (correct generation, not freed).
    pub fn is_valid(&self, node: NodeId) -> bool {
        self.slot(node).is_some()
    }

    /// Serialize a subtree as HTML, for inspection and snapshots.
    pub fn render_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.render_into(node, &mut out);
        out
    }

    fn render_into(&self, node: NodeId, out: &mut String) {
        let Some(slot) = self.slot(node) else {
            return;
        };
        match &slot.data {
            NodeData::Text(text) => out.push_str(&escape(text, false)),
            NodeData::Element { tag, attributes } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attributes {
                    out.push_str(&format!(" {}=\"{}\"", name, escape(value, true)));
                }
                out.push('>');
                for child in &slot.children {
                    self.render_into(*child, out);
                }
                out.push_str(&format!("</{}>", tag));
            }
        }
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        if let Some(index) = self.free_list.pop() {
            // Generation was already bumped on free
            let slot = &mut self.nodes[index as usize];
            slot.live = true;
            slot.data = data;
            slot.parent = None;
            slot.children.clear();
            NodeId { index, generation: slot.generation }
        } else {
            let index = self.nodes.len() as u32;
            self.nodes.push(Slot::new(data));
            NodeId { index, generation: 0 }
        }
    }

    fn collect_text(&self, node: NodeId, excluded: Option<&str>) -> String {
        let mut out = String::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            let Some(slot) = self.slot(current) else {
                continue;
            };
            match &slot.data {
                NodeData::Text(text) => out.push_str(text),
                NodeData::Element { attributes, .. } => {
                    if excluded.is_some_and(|name| attributes.contains_key(name)) {
                        continue;
                    }
                    stack.extend(slot.children.iter().rev().copied());
                }
            }
        }
        out
    }

    fn free_subtree(&mut self, node: NodeId) {
        self.unlink(node);
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            let Some(slot) = self.slot_mut(current) else {
                continue;
            };
            stack.extend(slot.children.drain(..));
            slot.live = false;
            slot.generation = slot.generation.wrapping_add(1);
            slot.parent = None;
            slot.data = NodeData::Text(String::new());
            self.free_list.push(current.index);
        }
    }

    fn slot(&self, node: NodeId) -> Option<&Slot> {
        self.nodes
            .get(node.index as usize)
            .filter(|slot| slot.live && slot.generation == node.generation)
    }

    fn slot_mut(&mut self, node: NodeId) -> Option<&mut Slot> {
        self.nodes
            .get_mut(node.index as usize)
            .filter(|slot| slot.live && slot.generation == node.generation)
    }

    fn unlink(&mut self, node: NodeId) {
        let Some(parent) = self.slot(node).and_then(|slot| slot.parent) else {
            return;
        };
        if let Some(parent_slot) = self.slot_mut(parent) {
            parent_slot.children.retain(|child| *child != node);
        }
        if let Some(slot) = self.slot_mut(node) {
            slot.parent = None;
        }
    }

    fn link(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        self.unlink(child);
        let Some(parent_slot) = self.slot_mut(parent) else {
            return;
        };
        let position = reference
            .and_then(|reference| parent_slot.children.iter().position(|c| *c == reference))
            .unwrap_or(parent_slot.children.len());
        parent_slot.children.insert(position, child);
        if let Some(slot) = self.slot_mut(child) {
            slot.parent = Some(parent);
        }
    }

    fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        let mut steps = 0;
        while let Some(candidate) = current {
            if candidate == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.nodes.len() {
                return false;
            }
            current = self.slot(candidate).and_then(|slot| slot.parent);
        }
        false
    }

    fn element_siblings(&self, node: NodeId) -> Option<&[NodeId]> {
        let parent = self.slot(node)?.parent?;
        Some(self.slot(parent)?.children.as_slice())
    }

    fn is_element(&self, node: NodeId) -> bool {
        matches!(self.slot(node).map(|slot| &slot.data), Some(NodeData::Element { .. }))
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

fn element_data(tag: &str) -> NodeData {
    NodeData::Element {
        tag: tag.to_ascii_lowercase(),
        attributes: IndexMap::new(),
    }
}

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for character in text.chars() {
        match character {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

impl Dom for Document {
    type Node = NodeId;

    fn root(&self) -> Option<NodeId> {
        self.is_valid(self.body).then_some(self.body)
    }

    fn is_attached(&self, node: &NodeId) -> bool {
        self.is_valid(*node) && self.is_ancestor_or_self(self.body, *node)
    }

    fn parent(&self, node: &NodeId) -> Option<NodeId> {
        self.slot(*node)?.parent
    }

    fn children(&self, node: &NodeId) -> Vec<NodeId> {
        self.slot(*node)
            .map(|slot| {
                slot.children
                    .iter()
                    .copied()
                    .filter(|child| self.is_element(*child))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn next_sibling(&self, node: &NodeId) -> Option<NodeId> {
        let siblings = self.element_siblings(*node)?;
        let position = siblings.iter().position(|sibling| sibling == node)?;
        siblings[position + 1..]
            .iter()
            .copied()
            .find(|sibling| self.is_element(*sibling))
    }

    fn tag_name(&self, node: &NodeId) -> String {
        match self.slot(*node).map(|slot| &slot.data) {
            Some(NodeData::Element { tag, .. }) => tag.clone(),
            _ => String::new(),
        }
    }

    fn attribute(&self, node: &NodeId, name: &str) -> Option<String> {
        match &self.slot(*node)?.data {
            NodeData::Element { attributes, .. } => attributes.get(name).cloned(),
            NodeData::Text(_) => None,
        }
    }

    fn text_content(&self, node: &NodeId) -> String {
        self.collect_text(*node, None)
    }

    fn text_content_excluding(&self, node: &NodeId, attribute: &str) -> String {
        self.collect_text(*node, Some(attribute))
    }

    fn create_element(&mut self, tag: &str) -> Option<NodeId> {
        Some(self.alloc(element_data(tag)))
    }

    fn set_attribute(&mut self, node: &NodeId, name: &str, value: &str) {
        if let Some(NodeData::Element { attributes, .. }) =
            self.slot_mut(*node).map(|slot| &mut slot.data)
        {
            attributes.insert(name.to_string(), value.to_string());
        }
    }

    fn remove_attribute(&mut self, node: &NodeId, name: &str) {
        if let Some(NodeData::Element { attributes, .. }) =
            self.slot_mut(*node).map(|slot| &mut slot.data)
        {
            attributes.shift_remove(name);
        }
    }

    fn set_text(&mut self, node: &NodeId, text: &str) {
        let Some(slot) = self.slot(*node) else {
            return;
        };
        let is_text = matches!(slot.data, NodeData::Text(_));
        let children = slot.children.clone();
        if is_text {
            if let Some(slot) = self.slot_mut(*node) {
                slot.data = NodeData::Text(text.to_string());
            }
            return;
        }
        for child in children {
            self.free_subtree(child);
        }
        if !text.is_empty() {
            let text_node = self.alloc(NodeData::Text(text.to_string()));
            self.link(*node, text_node, None);
        }
    }

    fn insert_before(&mut self, parent: &NodeId, child: &NodeId, reference: Option<&NodeId>) {
        if !self.is_valid(*parent) || !self.is_valid(*child) {
            return;
        }
        // A node cannot become its own descendant
        if self.is_ancestor_or_self(*child, *parent) {
            return;
        }
        self.link(*parent, *child, reference.copied());
    }

    fn remove(&mut self, node: &NodeId) {
        if *node == self.body {
            return;
        }
        self.free_subtree(*node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_block(text: &str) -> ElementSpec {
        ElementSpec::new("pre").with_class("language-rust").with_text(text)
    }

    #[test]
    fn document_build_and_text_content() {
        let spec = ElementSpec::new("div")
            .with_class("prose")
            .with_child(code_block("fn main() {\n}"))
            .with_child(ElementSpec::new("p").with_text("tail"));
        let document = Document::from_spec(&spec);

        let body = document.root().unwrap();
        let prose = document.children(&body)[0];
        assert_eq!(document.tag_name(&prose), "div");
        assert_eq!(document.children(&prose).len(), 2);
        assert_eq!(document.text_content(&prose), "fn main() {\n}tail");
    }

    #[test]
    fn removed_handles_are_detached_and_harmless() {
        let mut document = Document::new();
        let body = document.body();
        let pre = document.append_spec(body, &code_block("a\nb"));
        assert!(document.is_attached(&pre));

        document.remove(&pre);
        assert!(!document.is_attached(&pre));
        assert!(!document.is_valid(pre));
        assert_eq!(document.text_content(&pre), "");
        assert_eq!(document.attribute(&pre, "class"), None);

        // The element and its text node both freed their slots
        let first = document.create_element("div").unwrap();
        let second = document.create_element("div").unwrap();
        let reused = [first, second]
            .into_iter()
            .find(|node| node.index == pre.index)
            .unwrap();
        assert_ne!(reused.generation, pre.generation);
        assert!(!document.is_valid(pre));
        assert!(!document.is_attached(&pre));
        assert_eq!(document.tag_name(&pre), "");
    }

    #[test]
    fn text_content_can_leave_out_marked_subtrees() {
        let spec = ElementSpec::new("div")
            .with_child(ElementSpec::new("p").with_text("keep\n"))
            .with_child(
                ElementSpec::new("div")
                    .with_attr("data-skip", "")
                    .with_child(ElementSpec::new("span").with_text("1\n2\n3")),
            )
            .with_child(ElementSpec::new("p").with_text("tail"));
        let document = Document::from_spec(&spec);
        let host = document.children(&document.body())[0];

        assert_eq!(document.text_content(&host), "keep\n1\n2\n3tail");
        assert_eq!(document.text_content_excluding(&host, "data-skip"), "keep\ntail");
        assert_eq!(document.text_content_excluding(&host, "data-other"), document.text_content(&host));
    }

    #[test]
    fn detached_but_allocated_nodes_are_not_attached() {
        let mut document = Document::new();
        let orphan = document.create_element("pre").unwrap();
        assert!(document.is_valid(orphan));
        assert!(!document.is_attached(&orphan));
    }

    #[test]
    fn insert_before_moves_existing_nodes() {
        let mut document = Document::new();
        let body = document.body();
        let first = document.append_spec(body, &ElementSpec::new("p"));
        let second = document.append_spec(body, &ElementSpec::new("pre"));

        let wrapper = document.create_element("div").unwrap();
        document.insert_before(&body, &wrapper, Some(&second));
        document.append_child(&wrapper, &second);

        assert_eq!(document.children(&body), vec![first, wrapper]);
        assert_eq!(document.children(&wrapper), vec![second]);
        assert_eq!(document.parent(&second), Some(wrapper));
        assert_eq!(document.next_sibling(&first), Some(wrapper));
    }

    #[test]
    fn insert_refuses_cycles() {
        let mut document = Document::new();
        let body = document.body();
        let outer = document.append_spec(body, &ElementSpec::new("div"));
        let inner = document.append_spec(outer, &ElementSpec::new("div"));

        document.append_child(&inner, &outer);
        assert_eq!(document.parent(&outer), Some(body));
        assert_eq!(document.parent(&inner), Some(outer));
    }

    #[test]
    fn replace_body_orphans_old_tree() {
        let mut document = Document::new();
        let old_body = document.body();
        let pre = document.append_spec(old_body, &code_block("x\ny"));

        let new_body = document.replace_body();
        assert_ne!(old_body, new_body);
        assert!(!document.is_attached(&pre));
        assert_eq!(document.root(), Some(new_body));
    }

    #[test]
    fn class_helpers() {
        let mut document = Document::new();
        let body = document.body();
        let node = document.append_spec(body, &ElementSpec::new("div").with_class("a b"));

        document.add_class(&node, "c");
        document.add_class(&node, "a");
        assert_eq!(document.classes(&node), vec!["a", "b", "c"]);

        document.remove_class(&node, "b");
        assert!(!document.has_class(&node, "b"));
        assert!(document.has_class(&node, "c"));
    }

    #[test]
    fn set_text_replaces_children() {
        let mut document = Document::new();
        let body = document.body();
        let node = document.append_spec(
            body,
            &ElementSpec::new("span").with_child(ElementSpec::new("b").with_text("bold")),
        );
        let before = document.live_count();

        document.set_text(&node, "plain");
        assert_eq!(document.text_content(&node), "plain");
        assert!(document.children(&node).is_empty());
        assert_eq!(document.live_count(), before - 1);
    }

    #[test]
    fn render_html_escapes() {
        let mut document = Document::new();
        let body = document.body();
        let node = document.append_spec(
            body,
            &ElementSpec::new("code")
                .with_attr("title", "a \"b\"")
                .with_text("x < y && z"),
        );
        assert_eq!(
            document.render_html(node),
            "<code title=\"a &quot;b&quot;\">x &lt; y &amp;&amp; z</code>"
        );
    }
}
