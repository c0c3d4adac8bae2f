use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{internal, ApiError};

/// A record that lives in one of the JSON document tables.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Root key of the on-disk document, e.g. `{"users": [...]}`.
    const ROOT_KEY: &'static str;
    fn id(&self) -> &str;
}

/// Mutation applied to a row inside the table's critical section. Returning
/// an error aborts the update without writing anything.
pub type CasFn<T> = Box<dyn FnOnce(&mut T) -> Result<(), ApiError> + Send>;

/// Precondition checked before a removal inside the critical section.
pub type GuardFn<T> = Box<dyn FnOnce(&T) -> Result<(), ApiError> + Send>;

/// Repository interface over one entity table. `cas_update` and `remove` run
/// their caller-supplied checks atomically with the write, so state-machine
/// transitions cannot race each other.
#[async_trait]
pub trait Table<T: Entity>: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<T>, ApiError>;
    async fn list(&self) -> Result<Vec<T>, ApiError>;
    async fn upsert(&self, row: T) -> Result<(), ApiError>;
    async fn cas_update(&self, id: &str, apply: CasFn<T>) -> Result<T, ApiError>;
    async fn remove(&self, id: &str, guard: GuardFn<T>) -> Result<T, ApiError>;
}

/// File-backed table: one pretty-printed JSON document read and rewritten
/// wholesale, serialized through a per-table mutex.
pub struct JsonTable<T> {
    path: PathBuf,
    lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> JsonTable<T> {
    /// Opens the table, creating an empty document on first run.
    pub fn open(dir: impl AsRef<Path>, file_name: &str) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create data dir {}", dir.display()))?;
        let path = dir.join(file_name);
        if !path.exists() {
            let empty = serde_json::json!({ T::ROOT_KEY: [] });
            std::fs::write(&path, serde_json::to_string_pretty(&empty)?)
                .with_context(|| format!("initialize {}", path.display()))?;
            debug!(path = %path.display(), "created empty table");
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
            _marker: PhantomData,
        })
    }

    fn load(&self) -> Result<Vec<T>, ApiError> {
        let raw = std::fs::read_to_string(&self.path).map_err(internal)?;
        let doc: serde_json::Value = serde_json::from_str(&raw).map_err(internal)?;
        match doc.get(T::ROOT_KEY) {
            Some(rows) => serde_json::from_value(rows.clone()).map_err(internal),
            None => Ok(Vec::new()),
        }
    }

    fn persist(&self, rows: &[T]) -> Result<(), ApiError> {
        let mut doc = serde_json::Map::new();
        doc.insert(
            T::ROOT_KEY.to_string(),
            serde_json::to_value(rows).map_err(internal)?,
        );
        let pretty =
            serde_json::to_string_pretty(&serde_json::Value::Object(doc)).map_err(internal)?;
        std::fs::write(&self.path, pretty).map_err(internal)
    }
}

#[async_trait]
impl<T: Entity> Table<T> for JsonTable<T> {
    async fn get(&self, id: &str) -> Result<Option<T>, ApiError> {
        let _guard = self.lock.lock().await;
        Ok(self.load()?.into_iter().find(|row| row.id() == id))
    }

    async fn list(&self) -> Result<Vec<T>, ApiError> {
        let _guard = self.lock.lock().await;
        self.load()
    }

    async fn upsert(&self, row: T) -> Result<(), ApiError> {
        let _guard = self.lock.lock().await;
        let mut rows = self.load()?;
        match rows.iter_mut().find(|r| r.id() == row.id()) {
            Some(existing) => *existing = row,
            None => rows.push(row),
        }
        self.persist(&rows)
    }

    async fn cas_update(&self, id: &str, apply: CasFn<T>) -> Result<T, ApiError> {
        let _guard = self.lock.lock().await;
        let mut rows = self.load()?;
        let row = rows
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or_else(|| ApiError::NotFound("Not found", "Record not found".into()))?;
        apply(row)?;
        let updated = row.clone();
        self.persist(&rows)?;
        Ok(updated)
    }

    async fn remove(&self, id: &str, guard: GuardFn<T>) -> Result<T, ApiError> {
        let _guard = self.lock.lock().await;
        let mut rows = self.load()?;
        let idx = rows
            .iter()
            .position(|r| r.id() == id)
            .ok_or_else(|| ApiError::NotFound("Not found", "Record not found".into()))?;
        guard(&rows[idx])?;
        let removed = rows.remove(idx);
        self.persist(&rows)?;
        Ok(removed)
    }
}
