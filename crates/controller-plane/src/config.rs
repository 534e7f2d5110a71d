//! Environment configuration
//!
//! | Variable                        | Default           |
//! |---------------------------------|-------------------|
//! | `CONTROLLER_PLANE_DATABASE_URL` | `sqlite::memory:` |
//! | `CONTROLLER_PLANE_KEK`          | unset (no keys)   |
//! | `CONTROLLER_PLANE_KEY_LEVEL`    | `1`               |
//! | `CONTROLLER_PLANE_LOG_LEVEL`    | `info`            |
//!
//! The KEK is 32 bytes, base64 encoded.

use base64::{engine::general_purpose::STANDARD, Engine};
use controller_core::vault::KEK_SIZE;
use std::env;
use thiserror::Error;
use tracing::Level;

pub const DEFAULT_DATABASE_URL: &str = "sqlite::memory:";
pub const DEFAULT_KEY_LEVEL: u8 = 1;

#[derive(Error, Debug)]
#[error("Invalid {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub reason: String,
}

/// Runtime configuration for the controller plane
#[derive(Clone)]
pub struct PlaneConfig {
    pub database_url: String,

    /// Key-encryption-key for binding keys; key generation is disabled
    /// without one
    pub kek: Option<[u8; KEK_SIZE]>,

    /// Minimum certificate key level accepted in mandate tokens
    pub key_level: u8,

    pub log_level: Level,
}

impl std::fmt::Debug for PlaneConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaneConfig")
            .field("database_url", &self.database_url)
            .field("kek", &self.kek.map(|_| "<redacted>"))
            .field("key_level", &self.key_level)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Default for PlaneConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.into(),
            kek: None,
            key_level: DEFAULT_KEY_LEVEL,
            log_level: Level::INFO,
        }
    }
}

impl PlaneConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Read configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup("CONTROLLER_PLANE_DATABASE_URL") {
            config.database_url = url;
        }

        if let Some(encoded) = lookup("CONTROLLER_PLANE_KEK") {
            config.kek = Some(parse_kek(&encoded)?);
        }

        if let Some(level) = lookup("CONTROLLER_PLANE_KEY_LEVEL") {
            config.key_level = level.trim().parse().map_err(|e| ConfigError {
                var: "CONTROLLER_PLANE_KEY_LEVEL",
                reason: format!("{}", e),
            })?;
        }

        if let Some(level) = lookup("CONTROLLER_PLANE_LOG_LEVEL") {
            config.log_level = level.parse().unwrap_or(Level::INFO);
        }

        Ok(config)
    }
}

fn parse_kek(encoded: &str) -> Result<[u8; KEK_SIZE], ConfigError> {
    let invalid = |reason: String| ConfigError {
        var: "CONTROLLER_PLANE_KEK",
        reason,
    };

    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| invalid(e.to_string()))?;

    bytes
        .as_slice()
        .try_into()
        .map_err(|_| invalid(format!("expected {} bytes, got {}", KEK_SIZE, bytes.len())))
}
