use crate::errors::{AppError, AppResult};
use std::collections::HashMap;
use std::sync::Mutex;

/// Persistent key-value collaborator behind the settings bridge.
///
/// `set(key, None)` removes the entry so a later `get` reports it as absent.
pub trait SettingsRepository: Send + Sync {
    fn get(&self, key: &str) -> AppResult<Option<serde_json::Value>>;
    fn set(&self, key: &str, value: Option<serde_json::Value>) -> AppResult<()>;
}

#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, serde_json::Value)>,
        K: Into<String>,
    {
        Self {
            values: Mutex::new(
                values
                    .into_iter()
                    .map(|(key, value)| (key.into(), value))
                    .collect(),
            ),
        }
    }
}

impl SettingsRepository for MemorySettingsStore {
    fn get(&self, key: &str) -> AppResult<Option<serde_json::Value>> {
        let values = self
            .values
            .lock()
            .map_err(|_| AppError::Internal("settings store mutex poisoned".to_string()))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Option<serde_json::Value>) -> AppResult<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| AppError::Internal("settings store mutex poisoned".to_string()))?;
        match value {
            Some(value) => {
                values.insert(key.to_string(), value);
            }
            None => {
                values.remove(key);
            }
        }
        Ok(())
    }
}
