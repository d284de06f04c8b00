use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::fold::FoldState;
use crate::config::ConfigPatch;

/// Everything that can happen to the engine. Hosts translate their
/// callbacks into these and feed them to `Engine::dispatch` one at a time.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent<N> {
    /// One mutation batch: the subtree roots it inserted.
    NodesAdded(Vec<N>),
    /// A timer armed from a `TimerRequest` fired.
    RescanDue { generation: u64 },
    /// Click on (or inside) `N`.
    Click(N),
    Key { chord: KeyChord, focused: Option<N> },
    Toggle(String),
    SetState { identity: String, state: FoldState },
    CollapseAll,
    ExpandAll,
    ApplySettings(ConfigPatch),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shortcut {
    ToggleFocused,
    CollapseAll,
    ExpandAll,
}

/// A key press with its modifiers. Single-character keys are kept
/// uppercase, the way browsers report them while Shift is held.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyChord {
    pub key: String,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub alt: bool,
}

impl KeyChord {
    pub fn new(key: &str) -> Self {
        Self {
            key: normalize_key(key),
            ..Self::default()
        }
    }

    pub fn ctrl_shift(key: &str) -> Self {
        Self {
            ctrl: true,
            shift: true,
            ..Self::new(key)
        }
    }

    /// Ctrl+Shift+C (or Alt+C) toggles, Ctrl+Shift+Left/Right fold or
    /// unfold everything.
    pub fn shortcut(&self) -> Option<Shortcut> {
        match (self.ctrl, self.shift, self.alt, self.key.as_str()) {
            (true, true, false, "C") | (false, _, true, "C") => Some(Shortcut::ToggleFocused),
            (true, true, false, "ArrowLeft") => Some(Shortcut::CollapseAll),
            (true, true, false, "ArrowRight") => Some(Shortcut::ExpandAll),
            _ => None,
        }
    }
}

fn normalize_key(key: &str) -> String {
    let mut characters = key.chars();
    match (characters.next(), characters.next()) {
        (Some(character), None) => character.to_uppercase().collect(),
        _ => key.to_string(),
    }
}

impl FromStr for KeyChord {
    type Err = String;

    /// `Ctrl+Shift+ArrowLeft`, `alt+c`, `Escape`.
    fn from_str(source: &str) -> Result<Self, Self::Err> {
        let mut parts: Vec<&str> = source.split('+').map(str::trim).collect();
        let key = match parts.pop() {
            Some(key) if !key.is_empty() => key,
            _ => return Err(format!("missing key in chord '{source}'")),
        };
        let mut chord = KeyChord::new(key);
        for modifier in parts {
            match modifier.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => chord.ctrl = true,
                "shift" => chord.shift = true,
                "alt" | "option" => chord.alt = true,
                other => return Err(format!("unknown modifier '{other}' in chord '{source}'")),
            }
        }
        Ok(chord)
    }
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ctrl {
            f.write_str("Ctrl+")?;
        }
        if self.shift {
            f.write_str("Shift+")?;
        }
        if self.alt {
            f.write_str("Alt+")?;
        }
        f.write_str(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_chords() {
        let chord: KeyChord = "Ctrl+Shift+ArrowLeft".parse().unwrap();
        assert_eq!(chord, KeyChord::ctrl_shift("ArrowLeft"));
        assert_eq!(chord.to_string(), "Ctrl+Shift+ArrowLeft");

        let chord: KeyChord = "alt+c".parse().unwrap();
        assert!(chord.alt && !chord.ctrl);
        assert_eq!(chord.key, "C");

        assert!("Ctrl+".parse::<KeyChord>().is_err());
        assert!("Meta+K".parse::<KeyChord>().is_err());
    }

    #[test]
    fn shortcuts() {
        assert_eq!(
            KeyChord::ctrl_shift("c").shortcut(),
            Some(Shortcut::ToggleFocused)
        );
        assert_eq!(
            KeyChord::ctrl_shift("ArrowLeft").shortcut(),
            Some(Shortcut::CollapseAll)
        );
        assert_eq!(
            KeyChord::ctrl_shift("ArrowRight").shortcut(),
            Some(Shortcut::ExpandAll)
        );
        assert_eq!("Alt+C".parse::<KeyChord>().unwrap().shortcut(), Some(Shortcut::ToggleFocused));
        assert_eq!(KeyChord::new("ArrowLeft").shortcut(), None);
        assert_eq!(KeyChord::new("C").shortcut(), None);
    }
}
