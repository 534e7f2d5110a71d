//! Signature engine for controller documents
//!
//! Every signed artifact in the binding protocol (mandate tokens, mandates,
//! certificates, controller-binding callbacks) is a COSE_Sign1 envelope with
//! an Ed25519 signature. The signer's public key travels in the protected
//! header so a receiver can check the signature before deciding whether it
//! trusts the signer.
//!
//! Key types:
//! - `KeyPair`: Ed25519 key pair for signing
//! - `PublicKey`: Ed25519 public key for verification and thumbprints
//! - `SignedEnvelope`: COSE_Sign1 wrapped JSON payload

use crate::error::{ControllerError, Result};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use coset::{
    cbor::value::Value, iana, CborSerializable, CoseSign1, CoseSign1Builder, HeaderBuilder, Label,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// COSE algorithm identifier for EdDSA (Ed25519)
const EDDSA_ALG: iana::Algorithm = iana::Algorithm::EdDSA;

/// Protected header label carrying the raw signer key
const SIGNER_KEY_LABEL: &str = "pk";

/// A signed COSE_Sign1 envelope around a JSON document
#[derive(Debug, Clone)]
pub struct SignedEnvelope {
    cose: CoseSign1,
}

impl SignedEnvelope {
    /// Get the raw COSE_Sign1 structure
    pub fn cose(&self) -> &CoseSign1 {
        &self.cose
    }

    /// Get the key ID from the protected header
    pub fn kid(&self) -> Option<String> {
        let kid = &self.cose.protected.header.key_id;
        if kid.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(kid).to_string())
        }
    }

    /// The signer key embedded in the protected header, if any
    pub fn signer(&self) -> Option<PublicKey> {
        let kid = self.kid().unwrap_or_default();
        self.cose
            .protected
            .header
            .rest
            .iter()
            .find_map(|(label, value)| match (label, value) {
                (Label::Text(name), Value::Bytes(bytes)) if name == SIGNER_KEY_LABEL => {
                    let bytes: [u8; 32] = bytes.as_slice().try_into().ok()?;
                    PublicKey::from_bytes(kid.clone(), &bytes).ok()
                }
                _ => None,
            })
    }

    /// Get the signature bytes
    pub fn signature(&self) -> &[u8] {
        &self.cose.signature
    }

    /// Get the payload bytes
    pub fn payload(&self) -> Option<&[u8]> {
        self.cose.payload.as_deref()
    }

    /// Serialize to CBOR bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.cose.clone().to_vec().map_err(ControllerError::from)
    }

    /// Deserialize from CBOR bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let cose = CoseSign1::from_slice(bytes).map_err(ControllerError::from)?;
        Ok(Self { cose })
    }

    /// Encode as a base64url token string
    pub fn to_token(&self) -> Result<String> {
        Ok(URL_SAFE_NO_PAD.encode(self.to_bytes()?))
    }

    /// Decode from a base64url token string
    pub fn from_token(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(token.trim())?;
        Self::from_bytes(&bytes)
    }

    /// Verify the envelope against its own embedded signer
    ///
    /// Returns the payload together with the signer. This only proves the
    /// payload was signed by the returned key; whether that key is trusted is
    /// up to the caller.
    pub fn verify_embedded(&self) -> Result<(Vec<u8>, PublicKey)> {
        if self.cose.signature.is_empty() {
            return Err(ControllerError::MissingSigner("no signature".into()));
        }
        let signer = self
            .signer()
            .ok_or_else(|| ControllerError::MissingSigner("no signer key in header".into()))?;
        let payload = signer.verify(self)?;
        Ok((payload, signer))
    }

    /// Deserialize the payload without checking the signature
    pub fn decode_unverified<T: DeserializeOwned>(&self) -> Result<T> {
        let payload = self
            .payload()
            .ok_or(ControllerError::MissingField("payload".into()))?;
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Ed25519 key pair for signing controller documents
#[derive(Clone)]
pub struct KeyPair {
    /// Key identifier
    kid: String,
    /// Ed25519 signing key (private)
    signing_key: SigningKey,
    /// Ed25519 verifying key (public)
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("kid", &self.kid)
            .field("signing_key", &"[redacted]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate(kid: impl Into<String>) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(kid, signing_key)
    }

    /// Create a key pair from an existing signing key
    pub fn from_signing_key(kid: impl Into<String>, signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self {
            kid: kid.into(),
            signing_key,
            verifying_key,
        }
    }

    /// Create a key pair from raw signing key bytes
    pub fn from_bytes(kid: impl Into<String>, bytes: &[u8; 32]) -> Self {
        Self::from_signing_key(kid, SigningKey::from_bytes(bytes))
    }

    /// Get the key identifier
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Get the public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            kid: self.kid.clone(),
            verifying_key: self.verifying_key,
        }
    }

    /// Get the raw signing key bytes
    pub fn signing_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Serialize a document to JSON and sign it
    pub fn sign_document<T: Serialize>(&self, document: &T) -> Result<SignedEnvelope> {
        let payload = serde_json::to_vec(document)?;
        self.sign_bytes(&payload)
    }

    /// Sign a document and encode the envelope as a token string
    pub fn sign_token<T: Serialize>(&self, document: &T) -> Result<String> {
        self.sign_document(document)?.to_token()
    }

    /// Sign arbitrary bytes and wrap in COSE_Sign1
    pub fn sign_bytes(&self, payload: &[u8]) -> Result<SignedEnvelope> {
        let protected = HeaderBuilder::new()
            .algorithm(EDDSA_ALG)
            .key_id(self.kid.as_bytes().to_vec())
            .text_value(
                SIGNER_KEY_LABEL.to_string(),
                Value::Bytes(self.verifying_key.to_bytes().to_vec()),
            )
            .build();

        let cose = CoseSign1Builder::new()
            .protected(protected)
            .payload(payload.to_vec())
            .try_create_signature(&[], |data| {
                let signature = self.signing_key.sign(data);
                Ok::<_, ControllerError>(signature.to_bytes().to_vec())
            })?
            .build();

        Ok(SignedEnvelope { cose })
    }
}

/// Ed25519 public key for verification
///
/// Equality compares key material only; the key id is a label.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "SerializablePublicKey", into = "SerializablePublicKey")]
pub struct PublicKey {
    /// Key identifier
    kid: String,
    /// Ed25519 verifying key
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey")
            .field("kid", &self.kid)
            .field("thumbprint", &self.thumbprint())
            .finish()
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.verifying_key == other.verifying_key
    }
}

impl Eq for PublicKey {}

impl PublicKey {
    /// Create a public key from raw bytes
    pub fn from_bytes(kid: impl Into<String>, bytes: &[u8; 32]) -> Result<Self> {
        let verifying_key = VerifyingKey::from_bytes(bytes)
            .map_err(|e| ControllerError::CryptoError(e.to_string()))?;
        Ok(Self {
            kid: kid.into(),
            verifying_key,
        })
    }

    /// Get the key identifier
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Get the raw verifying key bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Canonical fingerprint of the key
    ///
    /// SHA-256 over the RFC 7638 member ordering of the OKP JWK form,
    /// base64url encoded. Independent of the key id.
    pub fn thumbprint(&self) -> String {
        let x = URL_SAFE_NO_PAD.encode(self.to_bytes());
        let canonical = format!(r#"{{"crv":"Ed25519","kty":"OKP","x":"{}"}}"#, x);
        URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
    }

    /// Verify an envelope with this key and return its payload
    pub fn verify(&self, envelope: &SignedEnvelope) -> Result<Vec<u8>> {
        let cose = &envelope.cose;
        let sig_structure = cose.tbs_data(&[]);

        let signature_bytes: [u8; 64] = cose
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| ControllerError::SignatureInvalid("invalid signature length".into()))?;
        let signature = Signature::from_bytes(&signature_bytes);

        self.verifying_key
            .verify(&sig_structure, &signature)
            .map_err(|e| ControllerError::SignatureInvalid(e.to_string()))?;

        cose.payload
            .clone()
            .ok_or(ControllerError::MissingField("payload".into()))
    }

    /// Verify an envelope with this key and decode its JSON payload
    pub fn verify_document<T: DeserializeOwned>(&self, envelope: &SignedEnvelope) -> Result<T> {
        let payload = self.verify(envelope)?;
        Ok(serde_json::from_slice(&payload)?)
    }
}

/// Serializable public key for storage/transmission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializablePublicKey {
    /// Key identifier
    #[serde(default)]
    pub kid: String,
    /// Base64-encoded public key bytes
    pub key: String,
}

impl From<&PublicKey> for SerializablePublicKey {
    fn from(pk: &PublicKey) -> Self {
        Self {
            kid: pk.kid.clone(),
            key: STANDARD.encode(pk.to_bytes()),
        }
    }
}

impl From<PublicKey> for SerializablePublicKey {
    fn from(pk: PublicKey) -> Self {
        (&pk).into()
    }
}

impl TryFrom<SerializablePublicKey> for PublicKey {
    type Error = ControllerError;

    fn try_from(spk: SerializablePublicKey) -> Result<Self> {
        let bytes = STANDARD.decode(&spk.key)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ControllerError::CryptoError("Invalid key length".into()))?;
        PublicKey::from_bytes(spk.kid, &bytes)
    }
}
