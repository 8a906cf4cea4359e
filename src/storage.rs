//! Durable key-value storage for application state.
//!
//! Holds the connection list, the selected default model, per-provider API
//! keys and saved queries. The store is read at startup and written on every
//! mutation.
//!
//! # Default location
//!
//! `<data dir>/tablite/settings.json`, e.g. `~/.local/share/tablite/settings.json`
//! on Linux.

use crate::error::{AppError, AppResult};
use crate::llm::{Credentials, DEFAULT_MODEL, ProviderKind};
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

pub const CONNECTIONS_KEY: &str = "connections";
pub const MODEL_KEY: &str = "model";

/// Key under which saved queries of one connection are stored.
pub fn queries_key(connection_id: &str) -> String {
    format!("queries:{}", connection_id)
}

/// Default path of the settings file.
pub fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("tablite"))
        .unwrap_or_else(|| PathBuf::from("./tablite_data"))
        .join("settings.json")
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<JsonValue>>;

    async fn set(&self, key: &str, value: JsonValue) -> AppResult<()>;

    async fn delete(&self, key: &str) -> AppResult<()>;
}

/// Typed access on top of any [`KeyValueStore`].
pub async fn get_typed<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> AppResult<Option<T>> {
    match store.get(key).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| AppError::storage(format!("Malformed value for '{}': {}", key, e))),
        None => Ok(None),
    }
}

pub async fn set_typed<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> AppResult<()> {
    store.set(key, serde_json::to_value(value)?).await
}

/// A single JSON document on disk. Loaded lazily on first access.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    cache: RwLock<Option<Map<String, JsonValue>>>,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: RwLock::new(None),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> AppResult<Map<String, JsonValue>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(Map::new()),
            Ok(text) => match serde_json::from_str::<JsonValue>(&text) {
                Ok(JsonValue::Object(map)) => Ok(map),
                Ok(_) => Err(AppError::storage(format!(
                    "Settings file '{}' is not a JSON object",
                    self.path.display()
                ))),
                Err(e) => Err(AppError::storage(format!(
                    "Failed to parse '{}': {}",
                    self.path.display(),
                    e
                ))),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn document(&self) -> AppResult<Map<String, JsonValue>> {
        {
            let cache = self.cache.read().await;
            if let Some(doc) = cache.as_ref() {
                return Ok(doc.clone());
            }
        }
        let mut cache = self.cache.write().await;
        if cache.is_none() {
            *cache = Some(self.read_document().await?);
        }
        Ok(cache.clone().unwrap_or_default())
    }

    async fn mutate(&self, apply: impl FnOnce(&mut Map<String, JsonValue>)) -> AppResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.document().await?;
        apply(&mut doc);

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let text = serde_json::to_string_pretty(&JsonValue::Object(doc.clone()))?;
        tokio::fs::write(&self.path, text).await?;
        debug!(path = %self.path.display(), "Settings written");

        *self.cache.write().await = Some(doc);
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> AppResult<Option<JsonValue>> {
        Ok(self.document().await?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: JsonValue) -> AppResult<()> {
        self.mutate(|doc| {
            doc.insert(key.to_string(), value);
        })
        .await
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.mutate(|doc| {
            doc.remove(key);
        })
        .await
    }
}

/// Volatile store, for tests and one-off sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, JsonValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> AppResult<Option<JsonValue>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: JsonValue) -> AppResult<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

// =============================================================================
// Typed settings
// =============================================================================

/// Model selection and provider keys as persisted in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub model: Option<String>,
    pub credentials: Credentials,
}

impl Settings {
    pub async fn load(store: &dyn KeyValueStore) -> AppResult<Self> {
        let model: Option<String> = get_typed(store, MODEL_KEY).await?;
        let mut credentials = Credentials::default();
        for provider in ProviderKind::ALL {
            if let Some(key) = get_typed::<String>(store, provider.settings_key()).await? {
                credentials.set(provider, key);
            }
        }
        Ok(Self {
            model: model.filter(|m| !m.is_empty()),
            credentials,
        })
    }

    /// Selected model, or the built-in default.
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub async fn save_model(store: &dyn KeyValueStore, model: &str) -> AppResult<()> {
        set_typed(store, MODEL_KEY, model).await
    }

    pub async fn save_api_key(
        store: &dyn KeyValueStore,
        provider: ProviderKind,
        key: &str,
    ) -> AppResult<()> {
        if key.is_empty() {
            store.delete(provider.settings_key()).await
        } else {
            set_typed(store, provider.settings_key(), key).await
        }
    }
}
