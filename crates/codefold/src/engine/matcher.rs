//! Candidate discovery: selector patterns plus a content heuristic.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dom::{Dom, Selector};
use crate::error::EngineError;

/// Marks every element the engine inserts; such elements are never candidates.
pub const UI_ATTR: &str = "data-codefold-ui";

/// Trimmed text must be longer than this to count as code.
pub const MIN_TEXT_LEN: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Code,
    Message,
}

impl ItemKind {
    /// Identity prefix.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Message => "msg",
        }
    }
}

/// How one kind of item is found on a host page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchProfile {
    pub kind: ItemKind,
    /// Priority-ordered selector sources.
    pub selectors: Vec<String>,
    /// Apply the code heuristic (length + block/newline/language marker).
    pub code_heuristic: bool,
    /// Host attribute carrying a durable per-item key.
    pub key_attribute: Option<String>,
    /// Where a message toggle is placed: right after the first match.
    pub anchor: Option<String>,
}

impl MatchProfile {
    pub fn code_blocks() -> Self {
        Self {
            kind: ItemKind::Code,
            selectors: [
                "pre",
                "code",
                ".code-block",
                ".language-*",
                "[class*=\"language-\"]",
                ".prose pre",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            code_heuristic: true,
            key_attribute: None,
            anchor: None,
        }
    }

    pub fn messages() -> Self {
        Self {
            kind: ItemKind::Message,
            selectors: vec![".ds-message".to_string()],
            code_heuristic: false,
            key_attribute: Some("data-um-id".to_string()),
            anchor: Some(".ds-icon-button".to_string()),
        }
    }
}

/// A profile with its patterns parsed. Invalid patterns are dropped here.
#[derive(Clone, Debug)]
pub struct CompiledProfile {
    pub profile: MatchProfile,
    pub selectors: Vec<Selector>,
    pub anchor: Option<Selector>,
}

/// Parse every pattern once. Each invalid pattern is reported and skipped;
/// the remaining patterns of the profile still apply.
pub fn compile(profiles: &[MatchProfile]) -> (Vec<CompiledProfile>, Vec<EngineError>) {
    let mut errors = Vec::new();
    let mut parse = |source: &str| match Selector::parse(source) {
        Ok(selector) => Some(selector),
        Err(source_error) => {
            warn!(selector = source, error = %source_error, "skipping invalid selector");
            errors.push(EngineError::SelectorInvalid {
                selector: source.to_string(),
                source: source_error,
            });
            None
        }
    };

    let compiled = profiles
        .iter()
        .map(|profile| CompiledProfile {
            selectors: profile.selectors.iter().filter_map(|s| parse(s.as_str())).collect(),
            anchor: profile.anchor.as_deref().and_then(&mut parse),
            profile: profile.clone(),
        })
        .collect();
    (compiled, errors)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate<N> {
    pub node: N,
    /// Index into the compiled profile list.
    pub profile: usize,
}

/// Interesting elements in the subtree of `root`, `root` included.
///
/// Profiles and their selectors are applied in priority order; a node
/// matched more than once is reported once, at its first match.
pub fn find_candidates<D: Dom>(
    dom: &D,
    root: &D::Node,
    profiles: &[CompiledProfile],
) -> Vec<Candidate<D::Node>> {
    let mut found: IndexMap<D::Node, usize> = IndexMap::new();
    for (index, compiled) in profiles.iter().enumerate() {
        for selector in &compiled.selectors {
            for node in dom.query_all(root, selector) {
                if found.contains_key(&node) || is_engine_ui(dom, &node) {
                    continue;
                }
                if compiled.profile.code_heuristic && !looks_like_code(dom, &node) {
                    continue;
                }
                found.insert(node, index);
            }
        }
    }
    found
        .into_iter()
        .map(|(node, profile)| Candidate { node, profile })
        .collect()
}

/// Long enough, and a block container, multi-line, or language-marked.
pub fn looks_like_code<D: Dom>(dom: &D, node: &D::Node) -> bool {
    let text = dom.text_content(node);
    if text.trim().chars().count() <= MIN_TEXT_LEN {
        return false;
    }
    dom.tag_name(node) == "pre"
        || text.contains('\n')
        || dom.classes(node).iter().any(|class| class.contains("language"))
}

fn is_engine_ui<D: Dom>(dom: &D, node: &D::Node) -> bool {
    dom.closest(node, |dom, candidate| dom.has_attribute(candidate, UI_ATTR))
        .is_some()
}
