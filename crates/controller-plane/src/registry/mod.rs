//! Binding registry
//!
//! Creates, loads and deletes bindings over a `BindingStore`, and owns the
//! post-bind/post-unbind hooks that every binding it hands out will run.

mod binding;
mod hooks;

pub use binding::Binding;
pub use hooks::{BindingHook, SetStatusHook};

use rand::{distributions::Alphanumeric, Rng};
use std::sync::Arc;
use tracing::info;

use crate::error::BindingError;
use crate::storage::{BindingRecord, BindingStore};
use hooks::HookTable;

/// Length of generated setup secrets
pub const SECRET_LENGTH: usize = 42;

/// Longest accepted binding id
pub const MAX_ID_LENGTH: usize = 256;

/// Entry point for binding lifecycle operations
///
/// Cloning is cheap; clones share the store and the hook table.
#[derive(Clone)]
pub struct BindingRegistry {
    store: Arc<dyn BindingStore>,
    hooks: Arc<HookTable>,
}

impl std::fmt::Debug for BindingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingRegistry")
            .field("store", &self.store)
            .field("hooks", &self.hooks)
            .finish()
    }
}

fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LENGTH)
        .map(char::from)
        .collect()
}

impl BindingRegistry {
    pub fn new(store: Arc<dyn BindingStore>) -> Self {
        Self {
            store,
            hooks: Arc::new(HookTable::default()),
        }
    }

    /// Install a post-bind hook while building the registry
    pub fn with_post_bind(self, hook: Arc<dyn BindingHook>) -> Self {
        self.hooks.replace_post_bind(Some(hook));
        self
    }

    /// Install a post-unbind hook while building the registry
    pub fn with_post_unbind(self, hook: Arc<dyn BindingHook>) -> Self {
        self.hooks.replace_post_unbind(Some(hook));
        self
    }

    /// Replace the post-bind hook, returning the previous one so callers can
    /// chain to it
    pub fn set_post_bind(&self, hook: Arc<dyn BindingHook>) -> Option<Arc<dyn BindingHook>> {
        self.hooks.replace_post_bind(Some(hook))
    }

    /// Replace the post-unbind hook, returning the previous one
    pub fn set_post_unbind(&self, hook: Arc<dyn BindingHook>) -> Option<Arc<dyn BindingHook>> {
        self.hooks.replace_post_unbind(Some(hook))
    }

    /// Remove the post-bind hook
    pub fn clear_post_bind(&self) -> Option<Arc<dyn BindingHook>> {
        self.hooks.replace_post_bind(None)
    }

    /// Remove the post-unbind hook
    pub fn clear_post_unbind(&self) -> Option<Arc<dyn BindingHook>> {
        self.hooks.replace_post_unbind(None)
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn BindingStore> {
        &self.store
    }

    /// Create a new unbound binding with a fresh setup secret
    pub async fn create(&self, id: &str) -> Result<Binding, BindingError> {
        if id.is_empty() || id.len() > MAX_ID_LENGTH {
            return Err(BindingError::InvalidId(format!(
                "id must be 1 to {} bytes",
                MAX_ID_LENGTH
            )));
        }

        let record = BindingRecord::new(id, generate_secret());
        self.store.create(&record).await?;

        info!(id = %id, "Created binding");
        Ok(self.wrap(record))
    }

    /// Load an existing binding
    pub async fn get(&self, id: &str) -> Result<Binding, BindingError> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| BindingError::NotFound(id.to_string()))?;
        Ok(self.wrap(record))
    }

    /// Delete a binding
    pub async fn delete(&self, id: &str) -> Result<(), BindingError> {
        if !self.store.delete(id).await? {
            return Err(BindingError::NotFound(id.to_string()));
        }
        info!(id = %id, "Deleted binding");
        Ok(())
    }

    /// All binding ids, sorted
    pub async fn list(&self) -> Result<Vec<String>, BindingError> {
        Ok(self.store.list().await?)
    }

    fn wrap(&self, record: BindingRecord) -> Binding {
        Binding::new(record, self.store.clone(), self.hooks.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn registry() -> BindingRegistry {
        BindingRegistry::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_secret_shape() {
        let a = generate_secret();
        let b = generate_secret();

        assert_eq!(a.len(), SECRET_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_invalid_ids() {
        let registry = registry();

        assert!(matches!(
            registry.create("").await,
            Err(BindingError::InvalidId(_))
        ));
        assert!(matches!(
            registry.create(&"x".repeat(MAX_ID_LENGTH + 1)).await,
            Err(BindingError::InvalidId(_))
        ));
    }

    #[tokio::test]
    async fn test_set_returns_previous_hook() {
        let registry = registry();
        let first: Arc<dyn BindingHook> = Arc::new(SetStatusHook::new("first"));

        assert!(registry.set_post_bind(first.clone()).is_none());
        let previous = registry
            .set_post_bind(Arc::new(SetStatusHook::new("second")))
            .unwrap();
        assert!(Arc::ptr_eq(&previous, &first));

        assert!(registry.clear_post_bind().is_some());
        assert!(registry.clear_post_bind().is_none());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_binding_untouched() {
        let registry = registry();
        let mut binding = registry.create("b1").await.unwrap();
        registry.delete("b1").await.unwrap();

        let result = binding.set_status("ready").await;

        assert!(matches!(result, Err(BindingError::NotFound(_))));
        assert_eq!(binding.status(), "");
    }

    #[tokio::test]
    async fn test_debug_hides_secret() {
        let registry = registry();
        let binding = registry.create("b1").await.unwrap();

        let rendered = format!("{:?}", binding);
        assert!(rendered.contains("b1"));
        assert!(!rendered.contains(binding.secret()));
    }
}
