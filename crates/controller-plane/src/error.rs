//! Errors raised by binding lifecycle operations

use thiserror::Error;

use crate::storage::StorageError;

/// Errors raised by the registry, bindings and the authorization layer
#[derive(Error, Debug)]
pub enum BindingError {
    #[error("Binding already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid binding id: {0}")]
    InvalidId(String),

    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("Key encryption failed: {0}")]
    EncryptionFailed(String),

    /// Wrong KEK or tampered key material; deliberately carries no detail
    #[error("Key decryption failed")]
    DecryptionFailed,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid binding callback: {0}")]
    InvalidCallback(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for BindingError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => BindingError::NotFound(id),
            StorageError::AlreadyExists(id) => BindingError::AlreadyExists(id),
            other => BindingError::Storage(other),
        }
    }
}

impl From<serde_json::Error> for BindingError {
    fn from(err: serde_json::Error) -> Self {
        BindingError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_mapping() {
        assert!(matches!(
            BindingError::from(StorageError::NotFound("b1".into())),
            BindingError::NotFound(id) if id == "b1"
        ));
        assert!(matches!(
            BindingError::from(StorageError::AlreadyExists("b1".into())),
            BindingError::AlreadyExists(_)
        ));
        assert!(matches!(
            BindingError::from(StorageError::Connection("refused".into())),
            BindingError::Storage(_)
        ));
    }
}
