//! Fold/unfold annotation engine for dynamically rendered documents.
//!
//! The engine discovers code blocks and message bubbles in a live tree,
//! decorates them with fold controls and remembers each item's state
//! through a durable key-value store.

pub mod config;
pub mod dom;
pub mod engine;
pub mod error;
pub mod platform;

pub use config::{ButtonPosition, Config, ConfigPatch, DefaultCollapse};
pub use dom::{Document, Dom, ElementSpec, NodeId, Selector};
pub use engine::{
    Engine, EngineEvent, EngineOptions, FoldState, ItemKind, KeyChord, MatchProfile, Shortcut,
    TimerRequest,
};
pub use error::{EngineError, SelectorError, StoreError};

#[cfg(feature = "browser")]
pub use zoon;
