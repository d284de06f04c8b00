use thiserror::Error;

/// Failures inside the engine. None of them are fatal: `Engine::dispatch`
/// logs and swallows every one of them.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The durable store is missing or rejected an operation.
    #[error("state store unavailable for key '{key}': {source}")]
    StoreUnavailable {
        key: String,
        #[source]
        source: StoreError,
    },

    /// A selector pattern could not be parsed; the pattern is skipped.
    #[error("invalid selector '{selector}': {source}")]
    SelectorInvalid {
        selector: String,
        #[source]
        source: SelectorError,
    },

    /// The item's node left the tree; the item has been dropped.
    #[error("item '{identity}' is no longer attached to the document")]
    OrphanedReference { identity: String },

    /// No tracked item carries this identity.
    #[error("unknown item '{identity}'")]
    UnknownItem { identity: String },
}

/// Errors raised by `KeyValueStore` backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Selector parse failure with the byte span of the first problem.
#[derive(Debug, Clone, Error)]
#[error("{message} at {start}..{end}")]
pub struct SelectorError {
    pub message: String,
    pub start: usize,
    pub end: usize,
}
