//! Durable per-item state with a session mirror.
//!
//! `StateStore` answers every read from its in-memory mirror, loading a key
//! from the backend on first touch. Writes go to the mirror first, then to
//! the backend. The first backend failure is logged and the store carries
//! on in session-only mode.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde_json::Value;
use tracing::{debug, warn};

use super::fold::FoldState;
use crate::config::{CONFIG_KEY, Config};
use crate::error::{EngineError, StoreError};

/// Key prefix of per-item fold flags.
pub const FOLD_KEY_PREFIX: &str = "foldState-";

pub fn fold_key(identity: &str) -> String {
    format!("{FOLD_KEY_PREFIX}{identity}")
}

/// Durable string-to-string storage. Values are JSON documents.
pub trait KeyValueStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn save(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// In-process store. Clones share the same map, which is how tests look at
/// what the engine persisted.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: Rc<RefCell<BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.get(key))
    }

    fn save(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.insert(key, value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.borrow().keys().cloned().collect())
    }
}

/// A backend that refuses everything, like storage blocked by the browser.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableStore;

impl UnavailableStore {
    fn error() -> StoreError {
        StoreError::Unavailable("storage is disabled".to_string())
    }
}

impl KeyValueStore for UnavailableStore {
    fn load(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(Self::error())
    }

    fn save(&mut self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Err(Self::error())
    }

    fn remove(&mut self, _key: &str) -> Result<(), StoreError> {
        Err(Self::error())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Err(Self::error())
    }
}

pub struct StateStore {
    backend: Option<Box<dyn KeyValueStore>>,
    /// `None` caches a confirmed miss.
    mirror: BTreeMap<String, Option<Value>>,
    degraded: bool,
}

impl StateStore {
    pub fn new(backend: impl KeyValueStore + 'static) -> Self {
        Self {
            backend: Some(Box::new(backend)),
            mirror: BTreeMap::new(),
            degraded: false,
        }
    }

    /// No durable backend at all.
    pub fn session_only() -> Self {
        Self {
            backend: None,
            mirror: BTreeMap::new(),
            degraded: false,
        }
    }

    /// `true` once a backend failure has switched the store to session-only.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn is_durable(&self) -> bool {
        self.backend.is_some() && !self.degraded
    }

    pub fn get(&mut self, key: &str) -> Option<Value> {
        if let Some(cached) = self.mirror.get(key) {
            return cached.clone();
        }
        let loaded = match self.try_load(key) {
            Ok(value) => value,
            Err(error) => {
                self.degrade(&error);
                None
            }
        };
        self.mirror.insert(key.to_string(), loaded.clone());
        loaded
    }

    /// Never fails from the caller's point of view; a backend failure only
    /// costs durability.
    pub fn set(&mut self, key: &str, value: Value) {
        self.mirror.insert(key.to_string(), Some(value.clone()));
        if let Err(error) = self.try_save(key, &value) {
            self.degrade(&error);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.mirror.insert(key.to_string(), None);
        let removed = match self.durable_backend() {
            Some(backend) => backend.remove(key),
            None => Ok(()),
        };
        if let Err(source) = removed {
            let error = EngineError::StoreUnavailable {
                key: key.to_string(),
                source,
            };
            self.degrade(&error);
        }
    }

    /// Stored configuration merged over the defaults.
    pub fn load_config(&mut self) -> Config {
        match self.get(CONFIG_KEY) {
            Some(value) => Config::from_json(value).unwrap_or_else(|error| {
                warn!(%error, "stored configuration is malformed, using defaults");
                Config::default()
            }),
            None => Config::default(),
        }
    }

    pub fn save_config(&mut self, config: &Config) {
        match serde_json::to_value(config) {
            Ok(value) => self.set(CONFIG_KEY, value),
            Err(error) => warn!(%error, "configuration could not be serialized"),
        }
    }

    /// Persisted collapsed flag of one item.
    pub fn fold_state(&mut self, identity: &str) -> Option<FoldState> {
        self.get(&fold_key(identity))
            .and_then(|value| value.as_bool())
            .map(FoldState::from_collapsed)
    }

    pub fn save_fold_state(&mut self, identity: &str, state: FoldState) {
        self.set(&fold_key(identity), Value::Bool(state.is_collapsed()));
    }

    /// Every persisted fold flag, durable entries and session writes merged.
    pub fn fold_entries(&mut self) -> BTreeMap<String, FoldState> {
        let listed = self.durable_backend().map(|backend| backend.keys());
        let mut keys: Vec<String> = match listed {
            Some(Ok(keys)) => keys,
            Some(Err(source)) => {
                let error = EngineError::StoreUnavailable {
                    key: "*".to_string(),
                    source,
                };
                self.degrade(&error);
                Vec::new()
            }
            None => Vec::new(),
        };
        keys.extend(self.mirror.keys().cloned());

        let mut entries = BTreeMap::new();
        for key in keys {
            let Some(identity) = key.strip_prefix(FOLD_KEY_PREFIX) else {
                continue;
            };
            if entries.contains_key(identity) {
                continue;
            }
            if let Some(state) = self.fold_state(identity) {
                entries.insert(identity.to_string(), state);
            }
        }
        entries
    }

    fn durable_backend(&mut self) -> Option<&mut Box<dyn KeyValueStore>> {
        if self.degraded {
            return None;
        }
        self.backend.as_mut()
    }

    fn try_load(&mut self, key: &str) -> Result<Option<Value>, EngineError> {
        let Some(backend) = self.durable_backend() else {
            return Ok(None);
        };
        let wrap = |source: StoreError| EngineError::StoreUnavailable {
            key: key.to_string(),
            source,
        };
        let Some(text) = backend.load(key).map_err(wrap)? else {
            return Ok(None);
        };
        match serde_json::from_str(&text) {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                warn!(key, %error, "ignoring malformed stored value");
                Ok(None)
            }
        }
    }

    fn try_save(&mut self, key: &str, value: &Value) -> Result<(), EngineError> {
        let Some(backend) = self.durable_backend() else {
            return Ok(());
        };
        let wrap = |source: StoreError| EngineError::StoreUnavailable {
            key: key.to_string(),
            source,
        };
        let text = serde_json::to_string(value).map_err(|error| wrap(error.into()))?;
        backend.save(key, &text).map_err(wrap)
    }

    fn degrade(&mut self, error: &EngineError) {
        if self.degraded {
            debug!(%error, "store still unavailable");
            return;
        }
        warn!(%error, "durable storage unavailable, continuing with session-only state");
        self.degraded = true;
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("durable", &self.backend.is_some())
            .field("degraded", &self.degraded)
            .field("cached_keys", &self.mirror.len())
            .finish()
    }
}
