//! Error types for controller documents, envelopes and key storage

use thiserror::Error;

/// Result type alias using ControllerError
pub type Result<T> = std::result::Result<T, ControllerError>;

/// Errors raised by the signature engine and the document codec
#[derive(Error, Debug)]
pub enum ControllerError {
    /// Envelope carries no signer key or no signature
    #[error("Envelope is not signed: {0}")]
    MissingSigner(String),

    /// Envelope signature did not verify
    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    /// Certificate chain rejected
    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    /// COSE encoding/decoding error
    #[error("COSE error: {0}")]
    CoseError(String),

    /// Wire encoding (base64) error
    #[error("Encoding error: {0}")]
    EncodingError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Cryptographic error
    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

impl From<ed25519_dalek::SignatureError> for ControllerError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        ControllerError::CryptoError(err.to_string())
    }
}

impl From<serde_json::Error> for ControllerError {
    fn from(err: serde_json::Error) -> Self {
        ControllerError::SerializationError(err.to_string())
    }
}

impl From<coset::CoseError> for ControllerError {
    fn from(err: coset::CoseError) -> Self {
        ControllerError::CoseError(format!("{:?}", err))
    }
}

impl From<base64::DecodeError> for ControllerError {
    fn from(err: base64::DecodeError) -> Self {
        ControllerError::EncodingError(err.to_string())
    }
}

/// Errors raised by the key vault
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    /// Key could not be sealed, usually a malformed key-encryption-key
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Wrong key-encryption-key or tampered ciphertext
    #[error("Decryption failed: authentication tag mismatch")]
    DecryptionFailed,

    /// No key stored under the id
    #[error("Stored key not found: {0}")]
    NotFound(String),

    /// Backend failure
    #[error("Key storage error: {0}")]
    Storage(String),
}
