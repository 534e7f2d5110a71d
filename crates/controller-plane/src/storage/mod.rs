//! Storage abstraction for bindings
//!
//! Bindings are persisted through the `BindingStore` trait so the lifecycle
//! logic is written once and runs against any backend:
//!
//! - `MemoryStore`: in-process maps, for tests and single-shot tools
//! - `SqliteStore`: durable SQLite database (also a `KeyVault`)
//!
//! Each mutating call maps to a single statement or a single locked map
//! write, so a concurrent reader never observes half of an update.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use controller_core::{ControllerBinding, ControllerDescriptor, PublicKey};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Binding not found: {0}")]
    NotFound(String),

    #[error("Binding already exists: {0}")]
    AlreadyExists(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Persisted state of one binding
///
/// The bound state lives in `controller_binding` as a single value, so the
/// certificate, mandates, admin roles and realm are always present or absent
/// together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingRecord {
    pub id: String,
    pub secret: String,
    pub public_key: Option<PublicKey>,
    pub descriptor: ControllerDescriptor,
    pub controller_binding: Option<ControllerBinding>,
    pub status: String,
    pub bind_endpoint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BindingRecord {
    /// A fresh, unbound record
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            secret: secret.into(),
            public_key: None,
            descriptor: ControllerDescriptor::default(),
            controller_binding: None,
            status: String::new(),
            bind_endpoint: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Storage backend trait for binding records
///
/// Implementations must be thread-safe and support concurrent access.
/// "Not found" is reported as `Ok(None)`/`Ok(false)` by lookups and as
/// `StorageError::NotFound` by `save`, never folded into other failures.
#[async_trait]
pub trait BindingStore: Send + Sync + Debug {
    /// Insert a new record; `AlreadyExists` if the id is taken
    async fn create(&self, record: &BindingRecord) -> Result<(), StorageError>;

    /// Point lookup by id
    async fn get(&self, id: &str) -> Result<Option<BindingRecord>, StorageError>;

    /// Overwrite an existing record in one write; `NotFound` if it is gone
    async fn save(&self, record: &BindingRecord) -> Result<(), StorageError>;

    /// Remove a record, returning whether it existed
    async fn delete(&self, id: &str) -> Result<bool, StorageError>;

    /// All binding ids, sorted
    async fn list(&self) -> Result<Vec<String>, StorageError>;
}
