//! SQLite storage backend
//!
//! Persistent storage for binding records and sealed binding keys. The same
//! database backs both the `BindingStore` and the `KeyVault` traits.
//!
//! # Environment Variables
//!
//! - `CONTROLLER_PLANE_DATABASE_URL`: SQLite connection string
//!   e.g., `sqlite://controller.db` or `sqlite::memory:`

use async_trait::async_trait;
use controller_core::{KeyVault, PublicKey, StoredKey, VaultError};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Row, SqlitePool,
};
use std::str::FromStr;
use tracing::{error, info};

use super::{BindingRecord, BindingStore, StorageError};

/// SQLite binding store and key vault
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `database_url` and run migrations
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .create_if_missing(true);

        // Every connection to an in-memory database sees its own empty
        // database, so keep exactly one alive for the life of the pool.
        let in_memory = database_url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        info!(in_memory = in_memory, "Connected to SQLite database");

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Fresh private in-memory database
    pub async fn in_memory() -> Result<Self, StorageError> {
        Self::new("sqlite::memory:").await
    }

    /// Create from an existing pool
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the connection pool for direct access if needed
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bindings (
                id TEXT PRIMARY KEY NOT NULL,
                secret TEXT NOT NULL,
                public_key TEXT,
                descriptor TEXT NOT NULL,
                controller_binding TEXT,
                status TEXT NOT NULL DEFAULT '',
                bind_endpoint TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS binding_keys (
                id TEXT PRIMARY KEY NOT NULL,
                sealed BLOB NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        info!("Database migrations complete");
        Ok(())
    }
}

/// JSON columns of a record, encoded once for binding into a statement
struct EncodedColumns {
    public_key: Option<String>,
    descriptor: String,
    controller_binding: Option<String>,
}

impl EncodedColumns {
    fn encode(record: &BindingRecord) -> Result<Self, StorageError> {
        Ok(Self {
            public_key: record
                .public_key
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            descriptor: serde_json::to_string(&record.descriptor)?,
            controller_binding: record
                .controller_binding
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        })
    }
}

fn record_from_row(row: &SqliteRow) -> Result<BindingRecord, StorageError> {
    let column = |e: sqlx::Error| StorageError::Database(e.to_string());

    let public_key: Option<String> = row.try_get("public_key").map_err(column)?;
    let descriptor: String = row.try_get("descriptor").map_err(column)?;
    let controller_binding: Option<String> = row.try_get("controller_binding").map_err(column)?;

    Ok(BindingRecord {
        id: row.try_get("id").map_err(column)?,
        secret: row.try_get("secret").map_err(column)?,
        public_key: public_key
            .as_deref()
            .map(serde_json::from_str::<PublicKey>)
            .transpose()?,
        descriptor: serde_json::from_str(&descriptor)?,
        controller_binding: controller_binding
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        status: row.try_get("status").map_err(column)?,
        bind_endpoint: row.try_get("bind_endpoint").map_err(column)?,
        created_at: row.try_get("created_at").map_err(column)?,
        updated_at: row.try_get("updated_at").map_err(column)?,
    })
}

#[async_trait]
impl BindingStore for SqliteStore {
    async fn create(&self, record: &BindingRecord) -> Result<(), StorageError> {
        let columns = EncodedColumns::encode(record)?;

        let result = sqlx::query(
            r#"
            INSERT INTO bindings (id, secret, public_key, descriptor, controller_binding,
                                  status, bind_endpoint, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(&record.secret)
        .bind(&columns.public_key)
        .bind(&columns.descriptor)
        .bind(&columns.controller_binding)
        .bind(&record.status)
        .bind(&record.bind_endpoint)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(id = %record.id, error = %e, "Failed to create binding");
            StorageError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return Err(StorageError::AlreadyExists(record.id.clone()));
        }

        info!(id = %record.id, "Created binding in database");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<BindingRecord>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT id, secret, public_key, descriptor, controller_binding,
                   status, bind_endpoint, created_at, updated_at
            FROM bindings
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn save(&self, record: &BindingRecord) -> Result<(), StorageError> {
        let columns = EncodedColumns::encode(record)?;

        let result = sqlx::query(
            r#"
            UPDATE bindings SET
                public_key = ?2,
                descriptor = ?3,
                controller_binding = ?4,
                status = ?5,
                bind_endpoint = ?6,
                updated_at = ?7
            WHERE id = ?1
            "#,
        )
        .bind(&record.id)
        .bind(&columns.public_key)
        .bind(&columns.descriptor)
        .bind(&columns.controller_binding)
        .bind(&record.status)
        .bind(&record.bind_endpoint)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(id = %record.id, error = %e, "Failed to save binding");
            StorageError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(record.id.clone()));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM bindings WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let removed = result.rows_affected() > 0;
        if removed {
            info!(id = %id, "Deleted binding from database");
        }
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query("SELECT id FROM bindings ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        rows.iter()
            .map(|r| {
                r.try_get::<String, _>("id")
                    .map_err(|e| StorageError::Database(e.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl KeyVault for SqliteStore {
    async fn save(&self, key: StoredKey) -> Result<(), VaultError> {
        sqlx::query(
            r#"
            INSERT INTO binding_keys (id, sealed, created_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (id) DO UPDATE SET
                sealed = excluded.sealed,
                created_at = excluded.created_at
            "#,
        )
        .bind(&key.id)
        .bind(&key.sealed)
        .bind(key.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(id = %key.id, error = %e, "Failed to store sealed key");
            VaultError::Storage(e.to_string())
        })?;

        info!(id = %key.id, "Stored sealed key in database");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<StoredKey>, VaultError> {
        let row = sqlx::query("SELECT id, sealed, created_at FROM binding_keys WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VaultError::Storage(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let column = |e: sqlx::Error| VaultError::Storage(e.to_string());

        Ok(Some(StoredKey {
            id: row.try_get("id").map_err(column)?,
            sealed: row.try_get("sealed").map_err(column)?,
            created_at: row.try_get("created_at").map_err(column)?,
        }))
    }

    async fn delete(&self, id: &str) -> Result<bool, VaultError> {
        let result = sqlx::query("DELETE FROM binding_keys WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| VaultError::Storage(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use controller_core::{generate_kek, ControllerBinding, KeyPair, RealmDescriptor};

    #[tokio::test]
    async fn test_record_survives_roundtrip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let realm_key = KeyPair::generate("realm").public_key();

        let mut record = BindingRecord::new("b1", "secret");
        record.public_key = Some(KeyPair::generate("b1").public_key());
        record.descriptor.label = "Front door".into();
        record.controller_binding = Some(
            ControllerBinding::new(RealmDescriptor::new("example.com").with_public_key(realm_key))
                .with_admin_roles(vec!["admin".into()]),
        );
        record.status = "ready".into();

        BindingStore::save(&store, &record).await.unwrap_err();
        store.create(&record).await.unwrap();

        let fetched = BindingStore::get(&store, "b1").await.unwrap().unwrap();
        assert_eq!(fetched, record);
    }

    #[tokio::test]
    async fn test_create_conflict() {
        let store = SqliteStore::in_memory().await.unwrap();
        let record = BindingRecord::new("b1", "secret");

        store.create(&record).await.unwrap();
        assert!(matches!(
            store.create(&record).await,
            Err(StorageError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_save_after_delete() {
        let store = SqliteStore::in_memory().await.unwrap();
        let record = BindingRecord::new("b1", "secret");

        store.create(&record).await.unwrap();
        assert!(BindingStore::delete(&store, "b1").await.unwrap());

        assert!(matches!(
            BindingStore::save(&store, &record).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sealed_keys() {
        let store = SqliteStore::in_memory().await.unwrap();
        let kek = generate_kek();
        let key = KeyPair::generate("b1");

        assert!(KeyVault::get(&store, "b1").await.unwrap().is_none());

        KeyVault::save(&store, StoredKey::encrypt("b1", &key, &kek).unwrap())
            .await
            .unwrap();
        // Replacing an existing key is allowed
        let replacement = KeyPair::generate("b1");
        KeyVault::save(&store, StoredKey::encrypt("b1", &replacement, &kek).unwrap())
            .await
            .unwrap();

        let stored = KeyVault::get(&store, "b1").await.unwrap().unwrap();
        assert_eq!(
            stored.decrypt(&kek).unwrap().public_key(),
            replacement.public_key()
        );
        assert!(KeyVault::delete(&store, "b1").await.unwrap());
    }
}
