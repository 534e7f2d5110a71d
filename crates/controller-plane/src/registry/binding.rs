//! A single controller binding and its lifecycle
//!
//! ```text
//!   create ──► Unbound ──bind──► Bound ──unbind──► Unbound ──delete──► gone
//!                 ▲                │
//!                 └────── bind ────┘ (re-bind replaces the realm)
//! ```
//!
//! Every mutator builds the next record, writes it with a single store call
//! and only then replaces the in-memory copy. A failed write leaves the
//! binding exactly as it was.

use chrono::{DateTime, Utc};
use controller_core::{
    ControllerBinding, ControllerDescriptor, KeyPair, KeyVault, PublicKey, RealmDescriptor,
    StoredKey, VaultError,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::hooks::HookTable;
use crate::error::BindingError;
use crate::storage::{BindingRecord, BindingStore, StorageError};

/// Handle on one persisted binding
pub struct Binding {
    record: BindingRecord,
    store: Arc<dyn BindingStore>,
    hooks: Arc<HookTable>,
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("id", &self.record.id)
            .field("bound", &self.is_bound())
            .field("status", &self.record.status)
            .field("public_key", &self.record.public_key)
            .finish_non_exhaustive()
    }
}

impl Binding {
    pub(crate) fn new(
        record: BindingRecord,
        store: Arc<dyn BindingStore>,
        hooks: Arc<HookTable>,
    ) -> Self {
        Self {
            record,
            store,
            hooks,
        }
    }

    async fn commit(&mut self, mut next: BindingRecord) -> Result<(), BindingError> {
        next.updated_at = Utc::now();
        self.store.save(&next).await.map_err(|e| {
            warn!(id = %next.id, error = %e, "Failed to persist binding");
            BindingError::from(e)
        })?;
        self.record = next;
        Ok(())
    }

    /// Re-read the record from the store, picking up concurrent writes
    pub async fn reload(&mut self) -> Result<(), BindingError> {
        self.record = self
            .store
            .get(&self.record.id)
            .await?
            .ok_or_else(|| BindingError::NotFound(self.record.id.clone()))?;
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// Setup secret shared with the party that will bind this controller
    pub fn secret(&self) -> &str {
        &self.record.secret
    }

    pub fn public_key(&self) -> Option<&PublicKey> {
        self.record.public_key.as_ref()
    }

    pub fn descriptor(&self) -> &ControllerDescriptor {
        &self.record.descriptor
    }

    pub fn status(&self) -> &str {
        &self.record.status
    }

    pub fn bind_endpoint(&self) -> &str {
        &self.record.bind_endpoint
    }

    pub fn controller_binding(&self) -> Option<&ControllerBinding> {
        self.record.controller_binding.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.record.controller_binding.is_some()
    }

    /// Realm this controller is bound to
    pub fn realm(&self) -> Option<&RealmDescriptor> {
        self.controller_binding()
            .and_then(|b| b.realm_descriptor.as_ref())
    }

    /// Certificate issued by the realm, empty when unbound
    pub fn certificate(&self) -> &str {
        self.controller_binding()
            .map(|b| b.controller_certificate.as_str())
            .unwrap_or_default()
    }

    /// Mandates granted by the realm, empty when unbound
    pub fn mandates(&self) -> &[String] {
        self.controller_binding()
            .map(|b| b.mandates.as_slice())
            .unwrap_or_default()
    }

    /// Roles allowed to administer the controller, empty when unbound
    pub fn admin_roles(&self) -> &[String] {
        self.controller_binding()
            .map(|b| b.admin_roles.as_slice())
            .unwrap_or_default()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.record.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.record.updated_at
    }

    /// Snapshot of the persisted state
    pub fn record(&self) -> &BindingRecord {
        &self.record
    }

    // =========================================================================
    // Keys
    // =========================================================================

    /// Generate a fresh signing key, seal it into `vault` and record its
    /// public half
    ///
    /// Calling this again replaces the key. If the record cannot be written
    /// the vault is put back the way it was.
    pub async fn generate_key(
        &mut self,
        vault: &dyn KeyVault,
        kek: &[u8],
    ) -> Result<(), BindingError> {
        let key = KeyPair::generate(self.id());

        let sealed = StoredKey::encrypt(self.id(), &key, kek).map_err(|e| match e {
            VaultError::EncryptionFailed(reason) => BindingError::EncryptionFailed(reason),
            other => BindingError::KeyGenerationFailed(other.to_string()),
        })?;
        let previous = vault
            .get(self.id())
            .await
            .map_err(|e| BindingError::KeyGenerationFailed(e.to_string()))?;
        vault
            .save(sealed)
            .await
            .map_err(|e| BindingError::KeyGenerationFailed(e.to_string()))?;

        let public_key = key.public_key();
        let mut next = self.record.clone();
        next.public_key = Some(public_key.clone());
        if let Err(e) = self.commit(next).await {
            self.restore_key(vault, previous).await;
            return Err(e);
        }

        info!(id = %self.id(), thumbprint = %public_key.thumbprint(), "Generated binding key");
        Ok(())
    }

    async fn restore_key(&self, vault: &dyn KeyVault, previous: Option<StoredKey>) {
        let restored = match previous {
            Some(stored) => vault.save(stored).await,
            None => vault.delete(self.id()).await.map(|_| ()),
        };
        if let Err(e) = restored {
            error!(id = %self.id(), error = %e, "Failed to restore binding key");
        }
    }

    /// Open the binding's private key
    ///
    /// Fails with `NotFound` unless the vault holds the key whose public half
    /// is recorded on this binding.
    pub async fn private_key(
        &self,
        vault: &dyn KeyVault,
        kek: &[u8],
    ) -> Result<KeyPair, BindingError> {
        let not_found = || BindingError::NotFound(format!("private key for {}", self.id()));

        let Some(expected) = self.record.public_key.as_ref() else {
            return Err(not_found());
        };

        let stored = vault
            .get(self.id())
            .await
            .map_err(|e| BindingError::Storage(StorageError::Database(e.to_string())))?
            .ok_or_else(not_found)?;

        let key = stored.decrypt(kek).map_err(|_| {
            warn!(id = %self.id(), "Failed to open binding key");
            BindingError::DecryptionFailed
        })?;

        if key.public_key() != *expected {
            warn!(id = %self.id(), "Vault key does not match the recorded public key");
            return Err(not_found());
        }
        Ok(key)
    }

    // =========================================================================
    // Mutators
    // =========================================================================

    pub async fn set_descriptor(
        &mut self,
        descriptor: ControllerDescriptor,
    ) -> Result<(), BindingError> {
        let mut next = self.record.clone();
        next.descriptor = descriptor;
        self.commit(next).await
    }

    pub async fn set_status(&mut self, status: impl Into<String>) -> Result<(), BindingError> {
        let mut next = self.record.clone();
        next.status = status.into();
        self.commit(next).await
    }

    pub async fn set_bind_endpoint(
        &mut self,
        endpoint: impl Into<String>,
    ) -> Result<(), BindingError> {
        let mut next = self.record.clone();
        next.bind_endpoint = endpoint.into();
        self.commit(next).await
    }

    /// Record the binding document sent by a realm and run the post-bind hook
    ///
    /// Binding an already bound controller replaces the previous realm. The
    /// document is persisted before the hook runs; a hook failure is returned
    /// but does not undo the bind.
    pub async fn bind(&mut self, binding: ControllerBinding) -> Result<(), BindingError> {
        let realm = binding
            .realm_descriptor
            .as_ref()
            .map(|r| r.name.clone())
            .unwrap_or_default();

        let mut next = self.record.clone();
        next.controller_binding = Some(binding);
        self.commit(next).await?;

        info!(id = %self.id(), realm = %realm, "Controller bound");

        if let Some(hook) = self.hooks.post_bind() {
            hook.call(self).await?;
        }
        Ok(())
    }

    /// Clear the realm binding and run the post-unbind hook
    ///
    /// Unbinding an unbound controller is a no-op write that still runs the
    /// hook.
    pub async fn unbind(&mut self) -> Result<(), BindingError> {
        let mut next = self.record.clone();
        next.controller_binding = None;
        self.commit(next).await?;

        info!(id = %self.id(), "Controller unbound");

        if let Some(hook) = self.hooks.post_unbind() {
            hook.call(self).await?;
        }
        Ok(())
    }
}
