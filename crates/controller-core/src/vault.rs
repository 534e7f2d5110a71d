//! Key vault for binding private keys
//!
//! Private keys are sealed with ChaCha20-Poly1305 under a caller-held
//! key-encryption-key (KEK). The key id is bound in as associated data, so a
//! sealed key copied under another id will not open. The KEK itself is never
//! stored.

use async_trait::async_trait;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::RwLock;
use tracing::info;

use crate::crypto::KeyPair;
use crate::error::VaultError;

/// Size of a key-encryption-key in bytes
pub const KEK_SIZE: usize = 32;

/// Size of the nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Generate a random key-encryption-key
pub fn generate_kek() -> [u8; KEK_SIZE] {
    let mut kek = [0u8; KEK_SIZE];
    rand::thread_rng().fill_bytes(&mut kek);
    kek
}

/// A private key sealed under a KEK
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKey {
    /// Key id, the owning binding's id
    pub id: String,

    /// nonce || ciphertext || tag
    pub sealed: Vec<u8>,

    pub created_at: DateTime<Utc>,
}

impl StoredKey {
    /// Seal a key pair under `kek`
    pub fn encrypt(id: impl Into<String>, key: &KeyPair, kek: &[u8]) -> Result<Self, VaultError> {
        let id = id.into();
        let cipher = ChaCha20Poly1305::new_from_slice(kek).map_err(|_| {
            VaultError::EncryptionFailed(format!(
                "key-encryption-key must be {} bytes, got {}",
                KEK_SIZE,
                kek.len()
            ))
        })?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let secret = key.signing_key_bytes();
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &secret,
                    aad: id.as_bytes(),
                },
            )
            .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(Self {
            id,
            sealed,
            created_at: Utc::now(),
        })
    }

    /// Open the key with `kek`
    pub fn decrypt(&self, kek: &[u8]) -> Result<KeyPair, VaultError> {
        if self.sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(VaultError::DecryptionFailed);
        }

        let cipher =
            ChaCha20Poly1305::new_from_slice(kek).map_err(|_| VaultError::DecryptionFailed)?;
        let (nonce, ciphertext) = self.sealed.split_at(NONCE_SIZE);

        let secret = cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: self.id.as_bytes(),
                },
            )
            .map_err(|_| VaultError::DecryptionFailed)?;

        let bytes: [u8; 32] = secret
            .as_slice()
            .try_into()
            .map_err(|_| VaultError::DecryptionFailed)?;

        Ok(KeyPair::from_bytes(self.id.clone(), &bytes))
    }
}

/// Storage for sealed keys
#[async_trait]
pub trait KeyVault: Send + Sync + Debug {
    /// Store a sealed key, replacing any key with the same id
    async fn save(&self, key: StoredKey) -> Result<(), VaultError>;

    /// Fetch a sealed key by id
    async fn get(&self, id: &str) -> Result<Option<StoredKey>, VaultError>;

    /// Remove a sealed key
    async fn delete(&self, id: &str) -> Result<bool, VaultError>;
}

/// In-memory key vault
#[derive(Debug, Default)]
pub struct MemoryKeyVault {
    keys: RwLock<HashMap<String, StoredKey>>,
}

impl MemoryKeyVault {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyVault for MemoryKeyVault {
    async fn save(&self, key: StoredKey) -> Result<(), VaultError> {
        let mut keys = self
            .keys
            .write()
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        info!(id = %key.id, "Storing sealed key");
        keys.insert(key.id.clone(), key);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<StoredKey>, VaultError> {
        let keys = self
            .keys
            .read()
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        Ok(keys.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<bool, VaultError> {
        let mut keys = self
            .keys
            .write()
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        Ok(keys.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_and_open() {
        let kek = generate_kek();
        let key = KeyPair::generate("binding-1");

        let stored = StoredKey::encrypt("binding-1", &key, &kek).unwrap();
        let opened = stored.decrypt(&kek).unwrap();

        assert_eq!(opened.signing_key_bytes(), key.signing_key_bytes());
        assert_eq!(opened.kid(), "binding-1");
    }

    #[test]
    fn test_wrong_kek() {
        let key = KeyPair::generate("binding-1");
        let stored = StoredKey::encrypt("binding-1", &key, &generate_kek()).unwrap();

        assert_eq!(
            stored.decrypt(&generate_kek()).unwrap_err(),
            VaultError::DecryptionFailed
        );
        assert_eq!(
            stored.decrypt(b"short").unwrap_err(),
            VaultError::DecryptionFailed
        );
    }

    #[test]
    fn test_malformed_kek() {
        let key = KeyPair::generate("binding-1");
        let result = StoredKey::encrypt("binding-1", &key, b"broken");

        assert!(matches!(result, Err(VaultError::EncryptionFailed(_))));
    }

    #[test]
    fn test_id_is_authenticated() {
        let kek = generate_kek();
        let key = KeyPair::generate("a");
        let mut stored = StoredKey::encrypt("a", &key, &kek).unwrap();

        stored.id = "b".into();
        assert!(stored.decrypt(&kek).is_err());
    }

    #[tokio::test]
    async fn test_memory_vault() {
        let vault = MemoryKeyVault::new();
        let kek = generate_kek();
        let key = KeyPair::generate("b1");

        assert!(vault.get("b1").await.unwrap().is_none());

        vault
            .save(StoredKey::encrypt("b1", &key, &kek).unwrap())
            .await
            .unwrap();

        let stored = vault.get("b1").await.unwrap().unwrap();
        assert_eq!(stored.decrypt(&kek).unwrap().public_key(), key.public_key());

        assert!(vault.delete("b1").await.unwrap());
        assert!(!vault.delete("b1").await.unwrap());
    }
}
