//! Delegation certificates
//!
//! A certificate lets an issuer key vouch for a subject key at a given key
//! level for a limited time. A certificate may embed its issuer's own
//! certificate as `parent`, forming a chain that ends at a root issuer.
//! Verifying a chain yields the root issuer, which becomes the client
//! identity for requests presented by the leaf subject.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::crypto::{KeyPair, PublicKey, SignedEnvelope};
use crate::error::{ControllerError, Result};

/// Longest chain accepted before giving up
pub const MAX_CHAIN_DEPTH: usize = 8;

/// Certificate payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    /// Key vouching for the subject
    pub issuer: PublicKey,

    /// Key being vouched for
    pub subject: PublicKey,

    /// Trust level granted to the subject
    pub key_level: u8,

    /// Issue time
    pub timestamp: DateTime<Utc>,

    /// Lifetime in seconds
    pub ttl: u64,

    /// The issuer's own certificate, if the issuer is itself delegated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl Certificate {
    /// Create a certificate issued now
    pub fn new(issuer: PublicKey, subject: PublicKey, key_level: u8, ttl: u64) -> Self {
        Self {
            issuer,
            subject,
            key_level,
            timestamp: Utc::now(),
            ttl,
            parent: None,
        }
    }

    /// Attach the issuer's own certificate
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Override the issue time
    pub fn issued_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Moment the certificate stops being valid, `None` on overflow
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .checked_add_signed(Duration::seconds(self.ttl.min(u32::MAX as u64) as i64))
    }

    /// Sign the certificate with the issuer key and encode it as a string
    pub fn sign(&self, issuer: &KeyPair) -> Result<String> {
        if issuer.public_key() != self.issuer {
            return Err(ControllerError::InvalidCertificate(
                "signing key is not the certificate issuer".into(),
            ));
        }
        issuer.sign_token(self)
    }
}

/// Outcome of a successful chain verification
#[derive(Debug, Clone)]
pub struct VerifiedChain {
    /// Root issuer of the chain
    pub issuer: PublicKey,
    /// Subject of the leaf certificate
    pub subject: PublicKey,
    /// Key level of the leaf certificate
    pub key_level: u8,
    /// Number of certificates in the chain
    pub depth: usize,
}

/// Verify a certificate chain at the current time
pub fn verify_certificate_chain(certificate: &str, min_level: u8) -> Result<VerifiedChain> {
    verify_certificate_chain_at(certificate, min_level, Utc::now())
}

/// Verify a certificate chain against an explicit clock
///
/// Every certificate must be signed by its stated issuer, unexpired and at
/// or above `min_level`. Each parent must certify the child's issuer at a
/// level no lower than the child's.
pub fn verify_certificate_chain_at(
    certificate: &str,
    min_level: u8,
    now: DateTime<Utc>,
) -> Result<VerifiedChain> {
    let mut current = certificate.to_string();
    let mut child: Option<Certificate> = None;
    let mut leaf: Option<(PublicKey, u8)> = None;

    for depth in 0..MAX_CHAIN_DEPTH {
        let cert = open(&current)?;

        let expires_at = cert
            .expires_at()
            .ok_or_else(|| reject("certificate timestamp out of range".into()))?;
        if expires_at < now {
            return Err(reject(format!("certificate expired at {}", expires_at)));
        }

        if cert.key_level < min_level {
            return Err(reject(format!(
                "key level {} below required {}",
                cert.key_level, min_level
            )));
        }

        if let Some(ref child) = child {
            if cert.subject.thumbprint() != child.issuer.thumbprint() {
                return Err(reject("parent certificate does not certify the issuer".into()));
            }
            if cert.key_level < child.key_level {
                return Err(reject("delegation raises key level".into()));
            }
        }

        let (leaf_subject, leaf_level) = leaf
            .get_or_insert_with(|| (cert.subject.clone(), cert.key_level))
            .clone();

        match cert.parent.clone() {
            Some(parent) => {
                current = parent;
                child = Some(cert);
            }
            None => {
                return Ok(VerifiedChain {
                    issuer: cert.issuer,
                    subject: leaf_subject,
                    key_level: leaf_level,
                    depth: depth + 1,
                });
            }
        }
    }

    Err(reject(format!("chain longer than {}", MAX_CHAIN_DEPTH)))
}

/// Decode one certificate and check it is signed by its stated issuer
fn open(encoded: &str) -> Result<Certificate> {
    let envelope = SignedEnvelope::from_token(encoded)
        .map_err(|e| ControllerError::InvalidCertificate(e.to_string()))?;
    let (payload, signer) = envelope
        .verify_embedded()
        .map_err(|e| ControllerError::InvalidCertificate(e.to_string()))?;
    let cert: Certificate = serde_json::from_slice(&payload)
        .map_err(|e| ControllerError::InvalidCertificate(e.to_string()))?;

    if signer.thumbprint() != cert.issuer.thumbprint() {
        return Err(reject("certificate not signed by its issuer".into()));
    }

    Ok(cert)
}

fn reject(reason: String) -> ControllerError {
    warn!(reason = %reason, "Certificate chain rejected");
    ControllerError::InvalidCertificate(reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_certificate() {
        let issuer = KeyPair::generate("issuer");
        let subject = KeyPair::generate("subject");

        let cert = Certificate::new(issuer.public_key(), subject.public_key(), 2, 3600)
            .sign(&issuer)
            .unwrap();

        let chain = verify_certificate_chain(&cert, 1).unwrap();
        assert_eq!(chain.issuer, issuer.public_key());
        assert_eq!(chain.subject, subject.public_key());
        assert_eq!(chain.key_level, 2);
        assert_eq!(chain.depth, 1);
    }

    #[test]
    fn test_chain_resolves_to_root() {
        let root = KeyPair::generate("root");
        let intermediate = KeyPair::generate("intermediate");
        let leaf = KeyPair::generate("leaf");

        let parent = Certificate::new(root.public_key(), intermediate.public_key(), 3, 3600)
            .sign(&root)
            .unwrap();
        let cert = Certificate::new(intermediate.public_key(), leaf.public_key(), 2, 3600)
            .with_parent(parent)
            .sign(&intermediate)
            .unwrap();

        let chain = verify_certificate_chain(&cert, 2).unwrap();
        assert_eq!(chain.issuer, root.public_key());
        assert_eq!(chain.subject, leaf.public_key());
        assert_eq!(chain.depth, 2);
    }

    #[test]
    fn test_key_level_too_low() {
        let issuer = KeyPair::generate("issuer");
        let subject = KeyPair::generate("subject");

        let cert = Certificate::new(issuer.public_key(), subject.public_key(), 1, 3600)
            .sign(&issuer)
            .unwrap();

        assert!(matches!(
            verify_certificate_chain(&cert, 2),
            Err(ControllerError::InvalidCertificate(_))
        ));
    }

    #[test]
    fn test_expired_certificate() {
        let issuer = KeyPair::generate("issuer");
        let subject = KeyPair::generate("subject");

        let cert = Certificate::new(issuer.public_key(), subject.public_key(), 1, 60)
            .issued_at(Utc::now() - Duration::seconds(120))
            .sign(&issuer)
            .unwrap();

        assert!(verify_certificate_chain(&cert, 0).is_err());
    }

    #[test]
    fn test_escalating_delegation_rejected() {
        let root = KeyPair::generate("root");
        let intermediate = KeyPair::generate("intermediate");
        let leaf = KeyPair::generate("leaf");

        let parent = Certificate::new(root.public_key(), intermediate.public_key(), 1, 3600)
            .sign(&root)
            .unwrap();
        let cert = Certificate::new(intermediate.public_key(), leaf.public_key(), 5, 3600)
            .with_parent(parent)
            .sign(&intermediate)
            .unwrap();

        assert!(verify_certificate_chain(&cert, 1).is_err());
    }

    #[test]
    fn test_broken_link_rejected() {
        let root = KeyPair::generate("root");
        let intermediate = KeyPair::generate("intermediate");
        let stranger = KeyPair::generate("stranger");
        let leaf = KeyPair::generate("leaf");

        // Parent certifies someone other than the leaf's issuer
        let parent = Certificate::new(root.public_key(), stranger.public_key(), 3, 3600)
            .sign(&root)
            .unwrap();
        let cert = Certificate::new(intermediate.public_key(), leaf.public_key(), 2, 3600)
            .with_parent(parent)
            .sign(&intermediate)
            .unwrap();

        assert!(verify_certificate_chain(&cert, 1).is_err());
    }

    #[test]
    fn test_forged_issuer_rejected() {
        let claimed = KeyPair::generate("claimed");
        let forger = KeyPair::generate("forger");
        let subject = KeyPair::generate("subject");

        let cert = Certificate::new(claimed.public_key(), subject.public_key(), 3, 3600);
        assert!(cert.sign(&forger).is_err());

        // Bypass the signing guard
        let forged = forger.sign_token(&cert).unwrap();
        assert!(verify_certificate_chain(&forged, 1).is_err());
    }

    #[test]
    fn test_expiry_overflow_rejected() {
        let issuer = KeyPair::generate("issuer");
        let subject = KeyPair::generate("subject");
        let far = DateTime::<Utc>::MAX_UTC - Duration::seconds(10);

        let cert = Certificate::new(issuer.public_key(), subject.public_key(), 2, 3600)
            .issued_at(far);
        assert!(cert.expires_at().is_none());

        let encoded = cert.sign(&issuer).unwrap();
        assert!(verify_certificate_chain(&encoded, 1).is_err());
    }
}
