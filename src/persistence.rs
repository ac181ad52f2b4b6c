//! Client-side key-value storage for session resumption.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    PlayerId,
    /// Local games only.
    Game,
    /// Local games only.
    Players,
    NewGameForm,
}

impl StorageKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlayerId => "playerId",
            Self::Game => "game",
            Self::Players => "players",
            Self::NewGameForm => "newGameForm",
        }
    }
}

/// JSON get/set. A stored `null` reads back as absent.
pub trait PersistenceAdapter: Send + Sync {
    fn get_item(&self, key: StorageKey) -> Option<Value>;
    fn set_item(&self, key: StorageKey, value: Value);
}

pub fn load<T: DeserializeOwned>(storage: &dyn PersistenceAdapter, key: StorageKey) -> Option<T> {
    let value = storage.get_item(key)?;
    match serde_json::from_value(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::warn!(key = key.as_str(), error = %e, "discarding unreadable storage item");
            None
        }
    }
}

pub fn save<T: Serialize>(storage: &dyn PersistenceAdapter, key: StorageKey, value: &T) {
    match serde_json::to_value(value) {
        Ok(json) => storage.set_item(key, json),
        Err(e) => tracing::error!(key = key.as_str(), error = %e, "failed to serialize storage item"),
    }
}

/// Storage scoped to one session, like a browser tab's session storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: DashMap<StorageKey, Value>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceAdapter for MemoryStorage {
    fn get_item(&self, key: StorageKey) -> Option<Value> {
        self.items
            .get(&key)
            .map(|v| v.value().clone())
            .filter(|v| !v.is_null())
    }

    fn set_item(&self, key: StorageKey, value: Value) {
        self.items.insert(key, value);
    }
}

/// Storage backed by a JSON file, shared by every session on the machine.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    items: Mutex<Map<String, Value>>,
}

impl JsonFileStorage {
    /// Opens `path`, starting empty if it is missing or unreadable.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let items = match fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt storage file");
                Map::new()
            }),
            Err(_) => Map::new(),
        };
        Self {
            path,
            items: Mutex::new(items),
        }
    }

    fn flush(&self, items: &Map<String, Value>) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                tracing::error!(path = %parent.display(), error = %e, "failed to create storage directory");
                return;
            }
        }
        let result = serde_json::to_string_pretty(items)
            .map_err(std::io::Error::from)
            .and_then(|data| fs::write(&self.path, data));
        if let Err(e) = result {
            tracing::error!(path = %self.path.display(), error = %e, "failed to write storage file");
        }
    }
}

impl PersistenceAdapter for JsonFileStorage {
    fn get_item(&self, key: StorageKey) -> Option<Value> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.get(key.as_str()).cloned().filter(|v| !v.is_null())
    }

    fn set_item(&self, key: StorageKey, value: Value) {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.insert(key.as_str().to_string(), value);
        self.flush(&items);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_reads_back_as_absent() {
        let storage = MemoryStorage::new();
        save(&storage, StorageKey::PlayerId, &"p1");
        assert_eq!(load::<String>(&storage, StorageKey::PlayerId).as_deref(), Some("p1"));

        save(&storage, StorageKey::PlayerId, &Option::<String>::None);
        assert_eq!(load::<String>(&storage, StorageKey::PlayerId), None);
    }

    #[test]
    fn mistyped_values_are_discarded() {
        let storage = MemoryStorage::new();
        storage.set_item(StorageKey::Players, serde_json::json!("not a list"));
        assert_eq!(load::<Vec<u32>>(&storage, StorageKey::Players), None);
    }

    #[test]
    fn file_storage_survives_reopen() {
        let path = std::env::temp_dir()
            .join(format!("timerush-storage-{}", uuid::Uuid::new_v4()))
            .join("storage.json");

        let storage = JsonFileStorage::open(&path);
        save(&storage, StorageKey::NewGameForm, &serde_json::json!({"name": "Catan"}));
        drop(storage);

        let reopened = JsonFileStorage::open(&path);
        assert_eq!(
            reopened.get_item(StorageKey::NewGameForm),
            Some(serde_json::json!({"name": "Catan"}))
        );
        assert_eq!(reopened.get_item(StorageKey::Game), None);

        fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }
}
