//! Fold controls around matched items.
//!
//! A code block is moved into a frame:
//!
//! ```text
//! div.codefold-container [data-codefold-frame=<identity>]
//! ├── div.codefold-toolbar          label, toggle, collapse-all
//! ├── div.codefold-gutter           line numbers (optional)
//! ├── <original element>
//! └── div.codefold-overlay          expand button, visible while collapsed
//! ```
//!
//! A message is decorated in place: it becomes its own frame and gets one
//! toggle button next to its anchor. Everything inserted carries
//! [`UI_ATTR`] so the matcher ignores it and [`strip_all`] can find it.

use tracing::debug;

use super::matcher::{ItemKind, UI_ATTR};
use crate::config::Config;
use crate::dom::{Dom, Selector};

pub const FRAME_ATTR: &str = "data-codefold-frame";
pub const ACTION_ATTR: &str = "data-codefold-action";
pub const TARGET_ATTR: &str = "data-codefold-target";
pub const STATE_ATTR: &str = "data-codefold-state";

pub const CONTAINER_CLASS: &str = "codefold-container";
pub const COLLAPSED_CLASS: &str = "collapsed";
const ANIMATED_CLASS: &str = "codefold-animated";

/// Handles of the controls the fold state machine updates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decoration<N> {
    /// Carries the collapsed class and the state attribute.
    pub frame: N,
    pub toggle: N,
    pub indicator: N,
    pub toggle_text: N,
    /// Language and line-count badge (code only).
    pub label: Option<N>,
    pub overlay: Option<N>,
}

/// Whether `node` already sits inside fold controls of its kind.
pub fn already_wrapped<D: Dom>(dom: &D, node: &D::Node, kind: ItemKind) -> bool {
    match kind {
        ItemKind::Code => dom
            .closest(node, |dom, candidate| dom.has_class(candidate, CONTAINER_CLASS))
            .is_some(),
        ItemKind::Message => dom.has_attribute(node, FRAME_ATTR),
    }
}

pub fn line_count(text: &str) -> usize {
    text.split('\n').count()
}

/// Language from a `language-*` / `lang-*` class on the element or one of
/// its children; `"code"` when there is none.
pub fn language_tag<D: Dom>(dom: &D, node: &D::Node) -> String {
    std::iter::once(node.clone())
        .chain(dom.children(node))
        .flat_map(|candidate| dom.classes(&candidate))
        .find_map(|class| {
            class
                .strip_prefix("language-")
                .or_else(|| class.strip_prefix("lang-"))
                .filter(|language| !language.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "code".to_string())
}

pub struct ItemInfo<'a> {
    pub identity: &'a str,
    pub kind: ItemKind,
    pub line_count: usize,
    pub language: Option<&'a str>,
}

/// Insert the controls for one item. Returns `None` when the item cannot
/// be framed (a detached node, the root itself, or a host that refused to
/// create an element). Nothing is inserted in that case.
pub fn decorate<D: Dom>(
    dom: &mut D,
    node: &D::Node,
    info: &ItemInfo<'_>,
    anchor: Option<&Selector>,
    config: &Config,
) -> Option<Decoration<D::Node>> {
    match info.kind {
        ItemKind::Code => decorate_code(dom, node, info, config),
        ItemKind::Message => decorate_message(dom, node, info, anchor),
    }
}

fn ui_element<D: Dom>(dom: &mut D, tag: &str, class: &str) -> Option<D::Node> {
    let element = dom.create_element(tag)?;
    dom.set_attribute(&element, "class", class);
    dom.set_attribute(&element, UI_ATTR, "");
    Some(element)
}

fn action_button<D: Dom>(
    dom: &mut D,
    class: &str,
    action: &str,
    identity: Option<&str>,
    text: &str,
) -> Option<D::Node> {
    let button = ui_element(dom, "button", class)?;
    dom.set_attribute(&button, "type", "button");
    dom.set_attribute(&button, ACTION_ATTR, action);
    if let Some(identity) = identity {
        dom.set_attribute(&button, TARGET_ATTR, identity);
    }
    if !text.is_empty() {
        dom.set_text(&button, text);
    }
    Some(button)
}

/// Toggle button with its indicator and label spans.
fn toggle_button<D: Dom>(
    dom: &mut D,
    class: &str,
    identity: &str,
) -> Option<(D::Node, D::Node, D::Node)> {
    let toggle = action_button(dom, class, "toggle", Some(identity), "")?;
    let indicator = ui_element(dom, "span", "codefold-indicator")?;
    let toggle_text = ui_element(dom, "span", "codefold-toggle-text")?;
    dom.append_child(&toggle, &indicator);
    dom.append_child(&toggle, &toggle_text);
    Some((toggle, indicator, toggle_text))
}

fn decorate_code<D: Dom>(
    dom: &mut D,
    node: &D::Node,
    info: &ItemInfo<'_>,
    config: &Config,
) -> Option<Decoration<D::Node>> {
    let parent = dom.parent(node)?;

    let mut container_class = format!("{CONTAINER_CLASS} {}", config.button_position.class_name());
    if config.use_animation {
        container_class.push(' ');
        container_class.push_str(ANIMATED_CLASS);
    }
    let container = dom.create_element("div")?;
    dom.set_attribute(&container, "class", &container_class);
    dom.set_attribute(&container, FRAME_ATTR, info.identity);

    let toolbar = ui_element(dom, "div", "codefold-toolbar")?;
    let label = ui_element(dom, "span", "codefold-label")?;
    dom.set_attribute(&label, "data-lines", &info.line_count.to_string());
    dom.set_text(
        &label,
        &format!(
            "{} ({} lines)",
            info.language.unwrap_or("code"),
            info.line_count
        ),
    );
    let (toggle, indicator, toggle_text) = toggle_button(dom, "codefold-toggle", info.identity)?;
    let collapse_all =
        action_button(dom, "codefold-collapse-all", "collapse-all", None, "Collapse all")?;
    dom.append_child(&toolbar, &label);
    dom.append_child(&toolbar, &toggle);
    dom.append_child(&toolbar, &collapse_all);

    let gutter = if config.show_line_numbers && info.line_count > 1 {
        let gutter = ui_element(dom, "div", "codefold-gutter")?;
        let numbers: Vec<String> = (1..=info.line_count).map(|line| line.to_string()).collect();
        dom.set_text(&gutter, &numbers.join("\n"));
        Some(gutter)
    } else {
        None
    };

    let overlay = ui_element(dom, "div", "codefold-overlay")?;
    let expand = action_button(
        dom,
        "codefold-expand",
        "expand",
        Some(info.identity),
        &format!("Show all {} lines", info.line_count),
    )?;
    dom.append_child(&overlay, &expand);

    // The container takes the original element's place, then adopts it
    dom.insert_before(&parent, &container, Some(node));
    dom.append_child(&container, &toolbar);
    if let Some(gutter) = &gutter {
        dom.append_child(&container, gutter);
    }
    dom.append_child(&container, node);
    dom.append_child(&container, &overlay);

    Some(Decoration {
        frame: container,
        toggle,
        indicator,
        toggle_text,
        label: Some(label),
        overlay: Some(overlay),
    })
}

fn decorate_message<D: Dom>(
    dom: &mut D,
    node: &D::Node,
    info: &ItemInfo<'_>,
    anchor: Option<&Selector>,
) -> Option<Decoration<D::Node>> {
    let (toggle, indicator, toggle_text) =
        toggle_button(dom, "codefold-msg-toggle", info.identity)?;
    dom.set_attribute(node, FRAME_ATTR, info.identity);

    let found = anchor
        .and_then(|selector| selector.select_first(&*dom, node))
        .filter(|found| found != node);
    let placement = found.and_then(|found| {
        let parent = dom.parent(&found)?;
        Some((parent, dom.next_sibling(&found)))
    });
    match placement {
        Some((parent, next)) => dom.insert_before(&parent, &toggle, next.as_ref()),
        None => dom.append_child(node, &toggle),
    }

    Some(Decoration {
        frame: node.clone(),
        toggle,
        indicator,
        toggle_text,
        label: None,
        overlay: None,
    })
}

/// Undo every decoration below `root`: original elements go back to where
/// their frames were, inserted controls are removed. Identity attributes
/// stay. Returns the number of frames removed.
pub fn strip_all<D: Dom>(dom: &mut D, root: &D::Node) -> usize {
    let frames = Selector::has_attribute(FRAME_ATTR).select_all(&*dom, root);
    let mut stripped = 0;
    for frame in &frames {
        if !dom.is_attached(frame) {
            continue;
        }
        if dom.has_class(frame, CONTAINER_CLASS) {
            if let Some(parent) = dom.parent(frame) {
                for child in dom.children(frame) {
                    if !dom.has_attribute(&child, UI_ATTR) {
                        dom.insert_before(&parent, &child, Some(frame));
                    }
                }
            }
            dom.remove(frame);
        } else {
            dom.remove_attribute(frame, FRAME_ATTR);
            dom.remove_attribute(frame, STATE_ATTR);
            dom.remove_class(frame, COLLAPSED_CLASS);
        }
        stripped += 1;
    }

    for control in Selector::has_attribute(UI_ATTR).select_all(&*dom, root) {
        if dom.is_attached(&control) {
            dom.remove(&control);
        }
    }
    debug!(frames = stripped, "stripped decorations");
    stripped
}
