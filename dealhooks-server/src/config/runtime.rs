//! Validated runtime configuration.
//!
//! Only the hot-reloadable sections live here (admin and source secrets,
//! swapped on SIGHUP). Queue sizing and downstream endpoints are wired
//! once at startup; changing them requires a restart.

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use std::collections::BTreeMap;

/// Admin authentication config (argon2 hash of the admin secret).
#[derive(Debug, Clone)]
pub struct AdminConfig {
    secret_hash: String,
}

impl AdminConfig {
    pub fn new(secret_hash: String) -> Self {
        Self { secret_hash }
    }

    /// Verify a plaintext admin secret against the stored hash.
    pub fn verify(&self, plaintext: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(&self.secret_hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }
}

/// One accepted upstream source.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Shared secret webhook senders present; compared in constant time
    /// by the gateway.
    pub secret: String,
}

/// Hot-reloadable configuration shared across request handlers.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub admin: AdminConfig,
    pub sources: BTreeMap<String, SourceConfig>,
}

impl RuntimeConfig {
    pub fn source_secret(&self, source: &str) -> Option<&str> {
        self.sources.get(source).map(|s| s.secret.as_str())
    }
}
