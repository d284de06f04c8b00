//! `localStorage` persistence, one entry per key.

use wasm_bindgen::JsValue;
use web_sys::Storage;

use crate::engine::KeyValueStore;
use crate::error::StoreError;

#[derive(Clone, Debug, Default)]
pub struct LocalStorage;

impl LocalStorage {
    pub fn new() -> Self {
        Self
    }

    fn storage() -> Result<Storage, StoreError> {
        web_sys::window()
            .ok_or_else(|| StoreError::Unavailable("no window".to_string()))?
            .local_storage()
            .map_err(js_error)?
            .ok_or_else(|| StoreError::Unavailable("localStorage is disabled".to_string()))
    }
}

fn js_error(error: JsValue) -> StoreError {
    StoreError::Unavailable(
        error
            .as_string()
            .unwrap_or_else(|| format!("{error:?}")),
    )
}

impl KeyValueStore for LocalStorage {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Self::storage()?.get_item(key).map_err(js_error)
    }

    fn save(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        Self::storage()?.set_item(key, value).map_err(js_error)
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        Self::storage()?.remove_item(key).map_err(js_error)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let storage = Self::storage()?;
        let length = storage.length().map_err(js_error)?;
        let mut keys = Vec::with_capacity(length as usize);
        for index in 0..length {
            if let Some(key) = storage.key(index).map_err(js_error)? {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}
