//! In-memory storage backend
//!
//! Suitable for tests and single-instance tools. Data is lost on restart.

use async_trait::async_trait;
use std::collections::{hash_map::Entry, HashMap};
use std::sync::RwLock;
use tracing::info;

use super::{BindingRecord, BindingStore, StorageError};

/// In-memory binding store
#[derive(Debug, Default)]
pub struct MemoryStore {
    bindings: RwLock<HashMap<String, BindingRecord>>,
}

impl MemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(err: std::sync::PoisonError<T>) -> StorageError {
    StorageError::Database(err.to_string())
}

#[async_trait]
impl BindingStore for MemoryStore {
    async fn create(&self, record: &BindingRecord) -> Result<(), StorageError> {
        let mut bindings = self.bindings.write().map_err(poisoned)?;
        match bindings.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(StorageError::AlreadyExists(record.id.clone())),
            Entry::Vacant(slot) => {
                info!(id = %record.id, "Creating binding record");
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<BindingRecord>, StorageError> {
        let bindings = self.bindings.read().map_err(poisoned)?;
        Ok(bindings.get(id).cloned())
    }

    async fn save(&self, record: &BindingRecord) -> Result<(), StorageError> {
        let mut bindings = self.bindings.write().map_err(poisoned)?;
        match bindings.get_mut(&record.id) {
            Some(existing) => {
                *existing = BindingRecord {
                    secret: existing.secret.clone(),
                    created_at: existing.created_at,
                    ..record.clone()
                };
                Ok(())
            }
            None => Err(StorageError::NotFound(record.id.clone())),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let mut bindings = self.bindings.write().map_err(poisoned)?;
        let removed = bindings.remove(id).is_some();
        if removed {
            info!(id = %id, "Deleted binding record");
        }
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let bindings = self.bindings.read().map_err(poisoned)?;
        let mut ids: Vec<String> = bindings.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
