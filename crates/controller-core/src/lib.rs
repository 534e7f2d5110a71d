//! # Controller Core
//!
//! Documents and cryptographic collaborators for binding controllers to
//! realms.
//!
//! ## Key Concepts
//!
//! - **Realm**: the administrative authority a controller trusts
//! - **Mandate**: a signed, time-bounded grant of a role issued by a realm
//! - **Mandate token**: a client-signed envelope bundling mandates
//! - **Certificate**: a signed delegation from an issuer key to a subject key
//! - **Thumbprint**: canonical fingerprint of a public key
//!
//! Every signed artifact is a COSE_Sign1 envelope carrying its signer's key,
//! see [`crypto::SignedEnvelope`].

pub mod certificate;
pub mod crypto;
pub mod document;
pub mod error;
pub mod vault;

pub use certificate::{verify_certificate_chain, verify_certificate_chain_at, Certificate, VerifiedChain};
pub use crypto::{KeyPair, PublicKey, SerializablePublicKey, SignedEnvelope};
pub use document::{ControllerBinding, ControllerDescriptor, Mandate, MandateToken, RealmDescriptor};
pub use error::{ControllerError, Result, VaultError};
pub use vault::{generate_kek, KeyVault, MemoryKeyVault, StoredKey};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
