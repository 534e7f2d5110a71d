//! Controller Plane
//!
//! Lifecycle and access control for controllers bound to a realm:
//! - Creates bindings, each with a setup secret and an optional signing key
//! - Binds a controller to a realm from a (possibly signed) setup callback
//! - Verifies client mandate tokens, including delegated certificate chains
//! - Authorizes administrative requests from realm-signed mandates
//!
//! ## Binding Lifecycle
//!
//! 1. **create**: a fresh binding gets an id and a setup secret
//! 2. **generate_key**: a signing key is sealed into the key vault
//! 3. **bind**: a realm posts its certificate, mandates and admin roles
//! 4. **unbind**: the realm state is dropped, the binding itself survives
//! 5. **delete**: the binding is removed
//!
//! Hooks registered on the [`BindingRegistry`] run after every bind and
//! unbind.

pub mod config;
pub mod core;
pub mod error;
pub mod registry;
pub mod storage;

pub use crate::core::{
    accept_binding_callback, authorize, authorize_admin_request, check_secret,
    published_descriptor, verify_mandate_token, verify_mandate_token_at, PartialVerification,
    VerificationError, VerifiedMandate, VerifiedToken,
};
pub use config::{ConfigError, PlaneConfig};
pub use error::BindingError;
pub use registry::{Binding, BindingHook, BindingRegistry, SetStatusHook};
pub use storage::{BindingRecord, BindingStore, MemoryStore, SqliteStore, StorageError};
