//! Post-bind and post-unbind hooks
//!
//! A registry holds at most one hook per event. Hooks run after the new state
//! is persisted and receive the binding mutably, so they can record further
//! state (a status, a descriptor) through the normal setters.

use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};

use super::Binding;
use crate::error::BindingError;

/// Callback invoked after a bind or unbind transition
#[async_trait]
pub trait BindingHook: Send + Sync {
    async fn call(&self, binding: &mut Binding) -> Result<(), BindingError>;
}

/// Hook that records a fixed setup status
#[derive(Debug, Clone)]
pub struct SetStatusHook {
    status: String,
}

impl SetStatusHook {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
        }
    }
}

#[async_trait]
impl BindingHook for SetStatusHook {
    async fn call(&self, binding: &mut Binding) -> Result<(), BindingError> {
        binding.set_status(self.status.clone()).await
    }
}

type HookSlot = RwLock<Option<Arc<dyn BindingHook>>>;

/// Hooks shared by a registry and every binding it hands out
#[derive(Default)]
pub(crate) struct HookTable {
    post_bind: HookSlot,
    post_unbind: HookSlot,
}

// The slots only ever hold an `Arc`, so a poisoned lock still guards a
// consistent value.
fn current(slot: &HookSlot) -> Option<Arc<dyn BindingHook>> {
    slot.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn replace(slot: &HookSlot, hook: Option<Arc<dyn BindingHook>>) -> Option<Arc<dyn BindingHook>> {
    let mut guard = slot.write().unwrap_or_else(PoisonError::into_inner);
    std::mem::replace(&mut *guard, hook)
}

impl HookTable {
    pub(crate) fn post_bind(&self) -> Option<Arc<dyn BindingHook>> {
        current(&self.post_bind)
    }

    pub(crate) fn post_unbind(&self) -> Option<Arc<dyn BindingHook>> {
        current(&self.post_unbind)
    }

    pub(crate) fn replace_post_bind(
        &self,
        hook: Option<Arc<dyn BindingHook>>,
    ) -> Option<Arc<dyn BindingHook>> {
        replace(&self.post_bind, hook)
    }

    pub(crate) fn replace_post_unbind(
        &self,
        hook: Option<Arc<dyn BindingHook>>,
    ) -> Option<Arc<dyn BindingHook>> {
        replace(&self.post_unbind, hook)
    }
}

impl std::fmt::Debug for HookTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookTable")
            .field("post_bind", &self.post_bind().is_some())
            .field("post_unbind", &self.post_unbind().is_some())
            .finish()
    }
}
