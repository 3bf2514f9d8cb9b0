use crate::infrastructure::error::InfraError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::broadcast;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");
const CHANGE_FEED_CAPACITY: usize = 16;

pub const CONNECTIVITY_KEY: &str = "connectivity";
pub const CONNECTIVITY_ONLINE: &[u8] = b"online";

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = Connection::open(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

pub trait DurableStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, InfraError>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), InfraError>;
    fn on_external_change(&self, key: &str) -> broadcast::Receiver<Vec<u8>>;
}

pub fn load_json<S, T>(store: &S, key: &str) -> Result<Option<T>, InfraError>
where
    S: DurableStore + ?Sized,
    T: DeserializeOwned,
{
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_slice(&raw)?))
}

pub fn save_json<S, T>(store: &S, key: &str, value: &T) -> Result<(), InfraError>
where
    S: DurableStore + ?Sized,
    T: Serialize + ?Sized,
{
    let raw = serde_json::to_vec(value)?;
    store.set(key, &raw)
}

#[derive(Debug, Default)]
struct ChangeFeed {
    senders: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl ChangeFeed {
    fn subscribe(&self, key: &str) -> broadcast::Receiver<Vec<u8>> {
        let mut senders = self
            .senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        senders
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(CHANGE_FEED_CAPACITY).0)
            .subscribe()
    }

    fn publish(&self, key: &str, value: &[u8]) {
        let senders = self
            .senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(sender) = senders.get(key) {
            // No live subscribers is fine.
            let _ = sender.send(value.to_vec());
        }
    }
}

#[derive(Debug)]
pub struct SqliteStore {
    db_path: PathBuf,
    feed: ChangeFeed,
}

impl SqliteStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            feed: ChangeFeed::default(),
        }
    }

    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, InfraError> {
        let store = Self::new(db_path);
        initialize_database(&store.db_path)?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }

    pub fn publish_external_change(&self, key: &str, value: &[u8]) -> Result<(), InfraError> {
        self.set(key, value)?;
        self.feed.publish(key, value);
        Ok(())
    }
}

impl DurableStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, InfraError> {
        let connection = self.connect()?;
        let value = connection
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO kv_store (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn on_external_change(&self, key: &str) -> broadcast::Receiver<Vec<u8>> {
        self.feed.subscribe(key)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    values: Mutex<HashMap<String, Vec<u8>>>,
    writes: Mutex<HashMap<String, usize>>,
    feed: ChangeFeed,
}

impl InMemoryStore {
    pub fn publish_external_change(&self, key: &str, value: &[u8]) -> Result<(), InfraError> {
        self.set(key, value)?;
        self.feed.publish(key, value);
        Ok(())
    }

    pub fn write_count(&self, key: &str) -> usize {
        self.writes
            .lock()
            .map(|writes| writes.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

impl DurableStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, InfraError> {
        let values = self
            .values
            .lock()
            .map_err(|error| InfraError::Store(format!("in-memory store lock poisoned: {error}")))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), InfraError> {
        let mut values = self
            .values
            .lock()
            .map_err(|error| InfraError::Store(format!("in-memory store lock poisoned: {error}")))?;
        values.insert(key.to_string(), value.to_vec());
        drop(values);

        let mut writes = self
            .writes
            .lock()
            .map_err(|error| InfraError::Store(format!("in-memory store lock poisoned: {error}")))?;
        *writes.entry(key.to_string()).or_insert(0) += 1;
        Ok(())
    }

    fn on_external_change(&self, key: &str) -> broadcast::Receiver<Vec<u8>> {
        self.feed.subscribe(key)
    }
}
