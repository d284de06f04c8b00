//! Persisted engine configuration.
//!
//! Stored as one JSON blob under [`CONFIG_KEY`]. Every field has its own
//! default so a blob written by an older version (or edited by hand) merges
//! over the defaults instead of failing to load.

use serde::{Deserialize, Serialize};

/// Reserved store key holding the configuration blob.
pub const CONFIG_KEY: &str = "foldConfig";

/// Policy applied to items without a remembered state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultCollapse {
    /// Never collapse.
    None,
    /// Collapse every item.
    All,
    /// Collapse items longer than `longCodeLines`.
    #[default]
    Long,
}

impl DefaultCollapse {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::All => "all",
            Self::Long => "long",
        }
    }
}

impl std::str::FromStr for DefaultCollapse {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "none" => Ok(Self::None),
            "all" => Ok(Self::All),
            "long" => Ok(Self::Long),
            other => Err(format!("expected one of none|all|long, got '{other}'")),
        }
    }
}

/// Corner the toggle button is pinned to inside a code frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ButtonPosition {
    TopLeft,
    #[default]
    TopRight,
    BottomLeft,
    BottomRight,
}

impl ButtonPosition {
    /// Class name added to the toggle control.
    pub fn class_name(self) -> &'static str {
        match self {
            Self::TopLeft => "top-left",
            Self::TopRight => "top-right",
            Self::BottomLeft => "bottom-left",
            Self::BottomRight => "bottom-right",
        }
    }
}

impl std::str::FromStr for ButtonPosition {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "top-left" => Ok(Self::TopLeft),
            "top-right" => Ok(Self::TopRight),
            "bottom-left" => Ok(Self::BottomLeft),
            "bottom-right" => Ok(Self::BottomRight),
            other => Err(format!(
                "expected one of top-left|top-right|bottom-left|bottom-right, got '{other}'"
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub default_collapse: DefaultCollapse,
    pub long_code_lines: u32,
    pub remember_state: bool,
    pub button_position: ButtonPosition,
    pub show_line_numbers: bool,
    pub use_animation: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_collapse: DefaultCollapse::Long,
            long_code_lines: 15,
            remember_state: true,
            button_position: ButtonPosition::TopRight,
            show_line_numbers: true,
            use_animation: true,
        }
    }
}

impl Config {
    /// Parse a stored blob, falling back to defaults for missing fields.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let config: Config = serde_json::from_value(value)?;
        Ok(config.normalized())
    }

    /// `longCodeLines` must stay positive.
    pub fn normalized(mut self) -> Self {
        self.long_code_lines = self.long_code_lines.max(1);
        self
    }

    /// Apply a partial update. Returns `true` when anything changed.
    pub fn apply(&mut self, patch: &ConfigPatch) -> bool {
        let before = self.clone();
        if let Some(default_collapse) = patch.default_collapse {
            self.default_collapse = default_collapse;
        }
        if let Some(long_code_lines) = patch.long_code_lines {
            self.long_code_lines = long_code_lines.max(1);
        }
        if let Some(remember_state) = patch.remember_state {
            self.remember_state = remember_state;
        }
        if let Some(button_position) = patch.button_position {
            self.button_position = button_position;
        }
        if let Some(show_line_numbers) = patch.show_line_numbers {
            self.show_line_numbers = show_line_numbers;
        }
        if let Some(use_animation) = patch.use_animation {
            self.use_animation = use_animation;
        }
        *self != before
    }
}

/// Partial configuration update, the payload of "apply settings".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigPatch {
    pub default_collapse: Option<DefaultCollapse>,
    pub long_code_lines: Option<u32>,
    pub remember_state: Option<bool>,
    pub button_position: Option<ButtonPosition>,
    pub show_line_numbers: Option<bool>,
    pub use_animation: Option<bool>,
}
