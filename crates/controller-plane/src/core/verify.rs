//! Mandate-token verification
//!
//! A client proves delegated authority with a mandate token: an envelope,
//! signed by the client, carrying a list of mandates each signed by a realm.
//! Verification checks, in order:
//!
//! 1. The token envelope is signed by its embedded key
//! 2. The token has not expired
//! 3. An attached certificate chain (if any) is valid, delegates the token
//!    signer, and meets the required key level. The chain's root issuer then
//!    becomes the client key. The leaf subject must be the token signer; this
//!    is an extra check on top of chain validity, not part of the base
//!    mandate-token protocol
//! 4. Each mandate is signed by the expected mandate signer and is inside its
//!    validity window
//!
//! Mandate failures stop at the first bad mandate; the ones accepted before it
//! are handed back alongside the error.

use chrono::{DateTime, Utc};
use controller_core::{
    verify_certificate_chain_at, ControllerError, Mandate, MandateToken, PublicKey,
    SignedEnvelope,
};
use thiserror::Error;
use tracing::{debug, warn};

/// Reasons a mandate token is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Token signature invalid: {0}")]
    InvalidSignature(String),

    #[error("Token expired at {0}")]
    TokenExpired(String),

    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("Mandate {index} is malformed: {reason}")]
    MalformedMandate { index: usize, reason: String },

    #[error("Mandate {index} carries no signer")]
    NoMandateSigner { index: usize },

    #[error("Mandate {index} signed by {actual}, expected {expected}")]
    WrongMandateSigner {
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("Mandate {index} signature invalid")]
    InvalidMandateSignature { index: usize },

    #[error("Mandate {index} not valid before {valid_from}")]
    MandateNotYetValid { index: usize, valid_from: String },

    #[error("Mandate {index} expired at {valid_until}")]
    MandateExpired { index: usize, valid_until: String },
}

/// A mandate whose signature and validity window have been checked
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedMandate {
    /// Key that signed the mandate
    pub signer: PublicKey,
    pub mandate: Mandate,
}

/// Result of a fully successful verification
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub mandates: Vec<VerifiedMandate>,

    /// Client identity: the token signer, or the root issuer of its
    /// certificate chain
    pub client_key: PublicKey,

    pub token: MandateToken,
}

/// A rejected token together with the mandates accepted before the failure
#[derive(Error, Debug, Clone)]
#[error("{source}")]
pub struct PartialVerification {
    pub source: VerificationError,
    pub accepted: Vec<VerifiedMandate>,
}

impl PartialVerification {
    pub fn kind(&self) -> &VerificationError {
        &self.source
    }
}

impl From<VerificationError> for PartialVerification {
    fn from(source: VerificationError) -> Self {
        Self {
            source,
            accepted: Vec::new(),
        }
    }
}

/// Verify a mandate token at the current time
pub fn verify_mandate_token(
    token: &str,
    mandate_signer: &PublicKey,
    key_level: u8,
) -> Result<VerifiedToken, PartialVerification> {
    verify_mandate_token_at(token, mandate_signer, key_level, Utc::now())
}

/// Verify a mandate token against an explicit clock
pub fn verify_mandate_token_at(
    token: &str,
    mandate_signer: &PublicKey,
    key_level: u8,
    now: DateTime<Utc>,
) -> Result<VerifiedToken, PartialVerification> {
    let envelope = SignedEnvelope::from_token(token)
        .map_err(|e| VerificationError::MalformedToken(e.to_string()))?;

    let (payload, mut client_key) = envelope.verify_embedded().map_err(|e| match e {
        ControllerError::MissingSigner(reason) => VerificationError::MalformedToken(reason),
        other => VerificationError::InvalidSignature(other.to_string()),
    })?;

    let token: MandateToken = serde_json::from_slice(&payload)
        .map_err(|e| VerificationError::MalformedToken(e.to_string()))?;

    let expires_at = token
        .expires_at()
        .ok_or_else(|| VerificationError::MalformedToken("timestamp out of range".into()))?;
    if expires_at < now {
        warn!(expired_at = %expires_at, "Mandate token expired");
        return Err(VerificationError::TokenExpired(expires_at.to_rfc3339()).into());
    }

    if let Some(certificate) = token.certificate.as_deref().filter(|c| !c.is_empty()) {
        let chain = verify_certificate_chain_at(certificate, key_level, now)
            .map_err(|e| VerificationError::InvalidCertificate(e.to_string()))?;

        if chain.subject.thumbprint() != client_key.thumbprint() {
            warn!("Certificate does not delegate the token signer");
            return Err(VerificationError::InvalidCertificate(
                "certificate subject is not the token signer".into(),
            )
            .into());
        }

        debug!(depth = chain.depth, "Client key resolved through certificate chain");
        client_key = chain.issuer;
    }

    let expected = mandate_signer.thumbprint();
    let mut accepted = Vec::with_capacity(token.mandates.len());

    for (index, encoded) in token.mandates.iter().enumerate() {
        match verify_mandate(index, encoded, mandate_signer, &expected, now) {
            Ok(mandate) => accepted.push(mandate),
            Err(source) => {
                warn!(error = %source, accepted = accepted.len(), "Mandate rejected");
                return Err(PartialVerification { source, accepted });
            }
        }
    }

    Ok(VerifiedToken {
        mandates: accepted,
        client_key,
        token,
    })
}

fn verify_mandate(
    index: usize,
    encoded: &str,
    mandate_signer: &PublicKey,
    expected: &str,
    now: DateTime<Utc>,
) -> Result<VerifiedMandate, VerificationError> {
    let envelope =
        SignedEnvelope::from_token(encoded).map_err(|e| VerificationError::MalformedMandate {
            index,
            reason: e.to_string(),
        })?;

    if envelope.signature().is_empty() {
        return Err(VerificationError::NoMandateSigner { index });
    }
    let signer = envelope
        .signer()
        .ok_or(VerificationError::NoMandateSigner { index })?;

    let actual = signer.thumbprint();
    if actual != expected {
        return Err(VerificationError::WrongMandateSigner {
            index,
            expected: expected.to_string(),
            actual,
        });
    }

    let mandate: Mandate = mandate_signer
        .verify_document(&envelope)
        .map_err(|e| match e {
            ControllerError::SerializationError(reason) | ControllerError::MissingField(reason) => {
                VerificationError::MalformedMandate { index, reason }
            }
            _ => VerificationError::InvalidMandateSignature { index },
        })?;

    if let Some(valid_from) = mandate.valid_from {
        if valid_from > now {
            return Err(VerificationError::MandateNotYetValid {
                index,
                valid_from: valid_from.to_rfc3339(),
            });
        }
    }

    if let Some(valid_until) = mandate.valid_until {
        if valid_until < now {
            return Err(VerificationError::MandateExpired {
                index,
                valid_until: valid_until.to_rfc3339(),
            });
        }
    }

    Ok(VerifiedMandate {
        signer: mandate_signer.clone(),
        mandate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use controller_core::KeyPair;

    fn mandate(realm: &KeyPair, mandate: &Mandate) -> String {
        realm.sign_token(mandate).unwrap()
    }

    #[test]
    fn test_garbage_token() {
        let realm = KeyPair::generate("realm").public_key();

        let err = verify_mandate_token("not a token!", &realm, 0).unwrap_err();
        assert!(matches!(err.source, VerificationError::MalformedToken(_)));
        assert!(err.accepted.is_empty());
    }

    #[test]
    fn test_token_payload_not_json() {
        let client = KeyPair::generate("client");
        let realm = KeyPair::generate("realm").public_key();
        let token = client.sign_bytes(b"plain text").unwrap().to_token().unwrap();

        let err = verify_mandate_token(&token, &realm, 0).unwrap_err();
        assert!(matches!(err.source, VerificationError::MalformedToken(_)));
    }

    #[test]
    fn test_validity_window_edges() {
        let client = KeyPair::generate("client");
        let realm = KeyPair::generate("realm");
        let now = Utc::now();

        let exact = Mandate::new("admin").valid_between(now, now);
        let token = client
            .sign_token(&MandateToken::new(vec![mandate(&realm, &exact)], 60).issued_at(now))
            .unwrap();

        let verified = verify_mandate_token_at(&token, &realm.public_key(), 0, now).unwrap();
        assert_eq!(verified.mandates.len(), 1);

        let later = now + Duration::seconds(1);
        let err = verify_mandate_token_at(&token, &realm.public_key(), 0, later).unwrap_err();
        assert!(matches!(
            err.source,
            VerificationError::MandateExpired { index: 0, .. }
        ));
    }

    #[test]
    fn test_not_yet_valid() {
        let client = KeyPair::generate("client");
        let realm = KeyPair::generate("realm");
        let now = Utc::now();

        let future = Mandate::new("admin")
            .valid_between(now + Duration::hours(1), now + Duration::hours(2));
        let token = client
            .sign_token(&MandateToken::new(vec![mandate(&realm, &future)], 60))
            .unwrap();

        let err = verify_mandate_token(&token, &realm.public_key(), 0).unwrap_err();
        assert!(matches!(
            err.source,
            VerificationError::MandateNotYetValid { index: 0, .. }
        ));
    }

    #[test]
    fn test_partial_result_keeps_prefix() {
        let client = KeyPair::generate("client");
        let realm = KeyPair::generate("realm");
        let stranger = KeyPair::generate("stranger");

        let mandates = vec![
            mandate(&realm, &Mandate::new("viewer")),
            mandate(&realm, &Mandate::new("editor")),
            mandate(&stranger, &Mandate::new("admin")),
            mandate(&realm, &Mandate::new("owner")),
        ];
        let token = client
            .sign_token(&MandateToken::new(mandates, 60))
            .unwrap();

        let err = verify_mandate_token(&token, &realm.public_key(), 0).unwrap_err();
        assert!(matches!(
            err.kind(),
            VerificationError::WrongMandateSigner { index: 2, .. }
        ));
        let roles: Vec<&str> = err.accepted.iter().map(|m| m.mandate.role.as_str()).collect();
        assert_eq!(roles, vec!["viewer", "editor"]);
    }

    #[test]
    fn test_mandate_payload_not_a_mandate() {
        let client = KeyPair::generate("client");
        let realm = KeyPair::generate("realm");

        let bogus = realm.sign_bytes(b"[1, 2, 3]").unwrap().to_token().unwrap();
        let token = client
            .sign_token(&MandateToken::new(vec![bogus], 60))
            .unwrap();

        let err = verify_mandate_token(&token, &realm.public_key(), 0).unwrap_err();
        assert!(matches!(
            err.source,
            VerificationError::MalformedMandate { index: 0, .. }
        ));
    }

    #[test]
    fn test_empty_token_is_valid() {
        let client = KeyPair::generate("client");
        let realm = KeyPair::generate("realm");
        let token = client.sign_token(&MandateToken::new(vec![], 60)).unwrap();

        let verified = verify_mandate_token(&token, &realm.public_key(), 0).unwrap();
        assert!(verified.mandates.is_empty());
        assert_eq!(verified.client_key, client.public_key());
    }

    #[test]
    fn test_far_future_timestamp_rejected() {
        let client = KeyPair::generate("client");
        let realm = KeyPair::generate("realm");
        let far = DateTime::<Utc>::MAX_UTC - Duration::seconds(10);
        let token = client
            .sign_token(&MandateToken::new(vec![], 1000).issued_at(far))
            .unwrap();

        let err = verify_mandate_token(&token, &realm.public_key(), 0).unwrap_err();
        assert!(matches!(err.source, VerificationError::MalformedToken(_)));
    }

    #[test]
    fn test_far_future_certificate_rejected() {
        let user = KeyPair::generate("user");
        let device = KeyPair::generate("device");
        let realm = KeyPair::generate("realm");
        let far = DateTime::<Utc>::MAX_UTC - Duration::seconds(10);

        let certificate =
            controller_core::Certificate::new(user.public_key(), device.public_key(), 2, 3600)
                .issued_at(far)
                .sign(&user)
                .unwrap();
        let token = device
            .sign_token(&MandateToken::new(vec![], 60).with_certificate(certificate))
            .unwrap();

        let err = verify_mandate_token(&token, &realm.public_key(), 0).unwrap_err();
        assert!(matches!(err.source, VerificationError::InvalidCertificate(_)));
    }
}
