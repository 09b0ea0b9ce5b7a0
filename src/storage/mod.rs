// Persistent key-value storage for settings, bookmarks and reader state
// Every record is a JSON blob under a fixed key; keys are written independently

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::library::{Bookmark, LibrarySettings};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub const SETTINGS_KEY: &str = "library_settings_v1";
pub const BOOKMARK_KEY: &str = "library_bookmarks_v1";
pub const READER_STATE_PREFIX: &str = "reader_state_v1:";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("corrupt record under '{key}': {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Durable string-to-string mapping. Each `set` is atomic on its own key.
pub trait KeyValueStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, StorageError>>;
    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<(), StorageError>>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, StorageError>> {
        (**self).get(key)
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<(), StorageError>> {
        (**self).set(key, value)
    }
}

pub type SharedStore = Arc<dyn KeyValueStore>;

/// Typed records on top of a [`KeyValueStore`].
#[derive(Clone)]
pub struct PersistentStore<S> {
    kv: S,
}

impl<S: KeyValueStore> PersistentStore<S> {
    pub fn new(kv: S) -> Self {
        Self { kv }
    }

    pub fn inner(&self) -> &S {
        &self.kv
    }

    pub async fn get_settings(&self) -> Result<Option<LibrarySettings>, StorageError> {
        self.read_json(SETTINGS_KEY).await
    }

    pub async fn persist_settings(&self, settings: &LibrarySettings) -> Result<(), StorageError> {
        self.write_json(SETTINGS_KEY, settings).await
    }

    pub async fn get_bookmarks(&self) -> Result<Vec<Bookmark>, StorageError> {
        Ok(self.read_json(BOOKMARK_KEY).await?.unwrap_or_default())
    }

    pub async fn put_bookmarks(&self, bookmarks: &[Bookmark]) -> Result<(), StorageError> {
        self.write_json(BOOKMARK_KEY, bookmarks).await
    }

    pub async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.kv.get(key).await? {
            Some(raw) => {
                let value = serde_json::from_str(&raw).map_err(|source| StorageError::Corrupt {
                    key: key.to_string(),
                    source,
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value)?;
        debug!(key, bytes = raw.len(), "Writing record");
        self.kv.set(key, raw).await
    }
}
