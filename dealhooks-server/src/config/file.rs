//! TOML file configuration structures.
//!
//! These structs directly map to the `dealhooks-config.toml` file format.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub server: ServerConfig,
    pub admin: AdminConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    /// Accepted upstream sources, keyed by the `{source}` path segment.
    pub sources: BTreeMap<String, SourceConfig>,
    pub downstream: DownstreamConfig,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

fn default_listen_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().expect("valid default address")
}

/// Admin configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// The admin secret. If this is plaintext (doesn't start with `$argon2`),
    /// it will be hashed and the config file will be rewritten.
    pub secret: String,
}

/// Dispatch queue and worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
}

fn default_workers() -> usize {
    4
}
fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_retention_secs() -> u64 {
    900
}
fn default_history_cap() -> usize {
    256
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            retention_secs: default_retention_secs(),
            history_cap: default_history_cap(),
        }
    }
}

/// One accepted upstream source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Shared secret the sender presents in `X-Webhook-Token`.
    pub secret: String,
}

/// Downstream integration endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamConfig {
    pub conversion: ConversionConfig,
    pub email: EmailConfig,
}

/// Conversion-tracking destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    pub endpoint: Url,
    pub token: String,
}

/// Transactional-email destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub endpoint: Url,
    pub api_key: String,
    pub sender: String,
}

impl FileConfig {
    /// Check if the admin secret is already hashed (argon2 format).
    pub fn is_admin_secret_hashed(&self) -> bool {
        self.admin.secret.starts_with("$argon2")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config_parsing() {
        let toml_str = r#"
[server]
listen = "127.0.0.1:3000"

[admin]
secret = "test-secret"

[queue]
workers = 2
max_attempts = 3

[sources.crm]
secret = "hook-secret"

[downstream.conversion]
endpoint = "https://tracking.example.com/events"
token = "tk-123"

[downstream.email]
endpoint = "https://mail.example.com/send"
api_key = "mk-456"
sender = "no-reply@example.com"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.port(), 3000);
        assert_eq!(config.queue.workers, 2);
        assert_eq!(config.queue.max_attempts, 3);
        // Unset queue fields fall back to defaults
        assert_eq!(config.queue.history_cap, 256);
        assert_eq!(config.sources["crm"].secret, "hook-secret");
        assert!(!config.is_admin_secret_hashed());
    }

    #[test]
    fn test_hashed_secret_detection() {
        let toml_str = r#"
[server]

[admin]
secret = "$argon2id$v=19$m=19456,t=2,p=1$abc123"

[sources.crm]
secret = "hook-secret"

[downstream.conversion]
endpoint = "https://tracking.example.com/events"
token = "tk-123"

[downstream.email]
endpoint = "https://mail.example.com/send"
api_key = "mk-456"
sender = "no-reply@example.com"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert!(config.is_admin_secret_hashed());
        assert_eq!(config.server.listen.port(), 8080);
    }
}
