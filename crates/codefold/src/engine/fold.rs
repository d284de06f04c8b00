use serde::{Deserialize, Serialize};

use super::decorate::{COLLAPSED_CLASS, Decoration, STATE_ATTR};
use crate::config::{Config, DefaultCollapse};
use crate::dom::Dom;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FoldState {
    #[default]
    Expanded,
    Collapsed,
}

impl FoldState {
    pub fn from_collapsed(collapsed: bool) -> Self {
        if collapsed { Self::Collapsed } else { Self::Expanded }
    }

    pub fn is_collapsed(self) -> bool {
        self == Self::Collapsed
    }

    pub fn flipped(self) -> Self {
        match self {
            Self::Expanded => Self::Collapsed,
            Self::Collapsed => Self::Expanded,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Expanded => "expanded",
            Self::Collapsed => "collapsed",
        }
    }
}

impl std::fmt::Display for FoldState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of an item at its first processing.
///
/// A remembered value wins while `rememberState` is on; otherwise the
/// default policy decides.
pub fn initial_state(persisted: Option<FoldState>, config: &Config, line_count: usize) -> FoldState {
    if config.remember_state {
        if let Some(state) = persisted {
            return state;
        }
    }
    match config.default_collapse {
        DefaultCollapse::All => FoldState::Collapsed,
        DefaultCollapse::None => FoldState::Expanded,
        DefaultCollapse::Long => {
            FoldState::from_collapsed(line_count > config.long_code_lines as usize)
        }
    }
}

/// Bring the item's presentation in line with `state`.
pub fn render<D: Dom>(dom: &mut D, decoration: &Decoration<D::Node>, state: FoldState) {
    if state.is_collapsed() {
        dom.add_class(&decoration.frame, COLLAPSED_CLASS);
    } else {
        dom.remove_class(&decoration.frame, COLLAPSED_CLASS);
    }
    dom.set_attribute(&decoration.frame, STATE_ATTR, state.as_str());

    let (indicator, label) = match state {
        FoldState::Expanded => ("\u{25be}", "Collapse"),
        FoldState::Collapsed => ("\u{25b8}", "Expand"),
    };
    dom.set_text(&decoration.indicator, indicator);
    dom.set_text(&decoration.toggle_text, label);
    dom.set_attribute(
        &decoration.toggle,
        "aria-expanded",
        if state.is_collapsed() { "false" } else { "true" },
    );

    if let Some(overlay) = &decoration.overlay {
        if state.is_collapsed() {
            dom.remove_attribute(overlay, "hidden");
        } else {
            dom.set_attribute(overlay, "hidden", "");
        }
    }
}
