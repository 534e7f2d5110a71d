//! Documents exchanged between controllers, realms and clients

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crypto::PublicKey;

/// Identity of the authority a binding trusts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RealmDescriptor {
    /// Realm name, usually a domain
    pub name: String,

    /// Human-readable label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Key the realm signs mandates and callbacks with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<PublicKey>,

    /// Where the realm publishes its services
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services_url: Option<String>,
}

impl RealmDescriptor {
    /// Create a realm descriptor with a name only
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the realm key
    pub fn with_public_key(mut self, key: PublicKey) -> Self {
        self.public_key = Some(key);
        self
    }

    /// Set the label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Capability document published by a controller
///
/// Only `key`, `status` and `admin_ui` are interpreted here. Anything else a
/// controller wants to advertise rides along in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerDescriptor {
    #[serde(default)]
    pub label: String,

    /// Administration UI, receives the binding id as a query parameter
    #[serde(default)]
    pub admin_ui: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// Public key of the binding, filled in when published
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<PublicKey>,

    /// Setup status, filled in when published
    #[serde(default)]
    pub status: String,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ControllerDescriptor {
    /// Create a descriptor with a label
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    /// Set the admin UI location
    pub fn with_admin_ui(mut self, admin_ui: impl Into<String>) -> Self {
        self.admin_ui = admin_ui.into();
        self
    }
}

/// Document a realm posts to a controller to bind it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerBinding {
    /// The binding realm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm_descriptor: Option<RealmDescriptor>,

    /// Certificate the realm issued for the controller
    #[serde(default)]
    pub controller_certificate: String,

    /// Signed mandates granted to the controller
    #[serde(default)]
    pub mandates: Vec<String>,

    /// Roles allowed to administer the controller
    #[serde(default)]
    pub admin_roles: Vec<String>,
}

impl ControllerBinding {
    /// Create a binding document for a realm
    pub fn new(realm: RealmDescriptor) -> Self {
        Self {
            realm_descriptor: Some(realm),
            ..Default::default()
        }
    }

    pub fn with_certificate(mut self, certificate: impl Into<String>) -> Self {
        self.controller_certificate = certificate.into();
        self
    }

    pub fn with_mandates(mut self, mandates: Vec<String>) -> Self {
        self.mandates = mandates;
        self
    }

    pub fn with_admin_roles(mut self, roles: Vec<String>) -> Self {
        self.admin_roles = roles;
        self
    }
}

/// A time-bounded grant of a role, signed by a realm
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mandate {
    /// Role granted, e.g. `admin@example.com`
    pub role: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,

    /// Issuing realm name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm: Option<String>,

    /// Client key the mandate was issued to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<PublicKey>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl Mandate {
    /// Create an unbounded mandate for a role
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            ..Default::default()
        }
    }

    /// Restrict the validity window
    pub fn valid_between(mut self, from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.valid_from = Some(from);
        self.valid_until = Some(until);
        self
    }

    /// Valid from now for the given duration
    pub fn valid_for(self, duration: Duration) -> Self {
        let now = Utc::now();
        self.valid_between(now, now + duration)
    }

    pub fn with_recipient(mut self, recipient: PublicKey) -> Self {
        self.recipient = Some(recipient);
        self
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }
}

/// Envelope payload a client presents to prove delegated authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MandateToken {
    /// Creation time
    pub timestamp: DateTime<Utc>,

    /// Lifetime in seconds
    pub ttl: u64,

    /// Certificate chain delegating the client key, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,

    /// Signed mandates, one envelope token each
    #[serde(default)]
    pub mandates: Vec<String>,

    /// Request URI the token was minted for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl MandateToken {
    /// Create a token timestamped now
    pub fn new(mandates: Vec<String>, ttl: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            ttl,
            certificate: None,
            mandates,
            uri: None,
        }
    }

    /// Override the timestamp
    pub fn issued_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attach a certificate chain
    pub fn with_certificate(mut self, certificate: impl Into<String>) -> Self {
        self.certificate = Some(certificate.into());
        self
    }

    /// Moment the token stops being accepted
    ///
    /// `None` when the timestamp plus ttl is out of the representable range.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .checked_add_signed(Duration::seconds(self.ttl.min(u32::MAX as u64) as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use serde_json::json;

    #[test]
    fn test_controller_binding_defaults() {
        let doc: ControllerBinding = serde_json::from_value(json!({
            "admin_roles": ["admin"],
            "controller_certificate": "abc",
            "mandates": ["m1"],
            "realm_descriptor": { "name": "example.com" }
        }))
        .unwrap();

        assert_eq!(doc.admin_roles, vec!["admin"]);
        assert_eq!(doc.controller_certificate, "abc");
        assert_eq!(doc.realm_descriptor.unwrap().name, "example.com");

        let empty: ControllerBinding = serde_json::from_value(json!({})).unwrap();
        assert!(empty.realm_descriptor.is_none());
        assert!(empty.mandates.is_empty());
    }

    #[test]
    fn test_descriptor_keeps_unknown_fields() {
        let desc: ControllerDescriptor = serde_json::from_value(json!({
            "label": "Door",
            "admin_ui": "https://door.local/admin",
            "require_setup": true
        }))
        .unwrap();

        assert_eq!(desc.extra.get("require_setup"), Some(&json!(true)));

        let back = serde_json::to_value(&desc).unwrap();
        assert_eq!(back["require_setup"], json!(true));
    }

    #[test]
    fn test_mandate_with_recipient() {
        let client = KeyPair::generate("client").public_key();
        let mandate = Mandate::new("admin")
            .with_realm("example.com")
            .with_recipient(client.clone())
            .valid_for(Duration::hours(1));

        let restored: Mandate =
            serde_json::from_str(&serde_json::to_string(&mandate).unwrap()).unwrap();
        assert_eq!(restored.recipient, Some(client));
        assert!(restored.valid_until > restored.valid_from);
    }

    #[test]
    fn test_token_expiry() {
        let now = Utc::now();
        let token = MandateToken::new(vec![], 50).issued_at(now - Duration::seconds(100));

        assert!(token.expires_at().unwrap() < now);
    }
}
