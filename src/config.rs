//! Configuration for Gatekeeper
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

use crate::encryption::{EncryptionError, KeyringConfig};
use crate::services::HealthMonitorConfig;

/// Gatekeeper - NATS credential issuance and key custody
#[derive(Parser, Debug, Clone)]
#[command(name = "gatekeeper")]
#[command(about = "Issues and custodies NATS operator, account and user credentials")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory store allowed, fixed session secret)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Store backend
    #[arg(long, env = "STORE", value_enum, default_value = "mongodb")]
    pub store: StoreBackend,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "gatekeeper")]
    pub mongodb_db: String,

    /// Per-call MongoDB deadline in milliseconds
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value = "5000")]
    pub store_timeout_ms: u64,

    /// Seed encryption keys as `<keyID>:<base64 32-byte key>`; repeat or
    /// comma-separate for several
    #[arg(long = "encryption-key", env = "ENCRYPTION_KEYS", value_delimiter = ',')]
    pub encryption_keys: Vec<String>,

    /// Key id used for new encryptions (optional with a single key)
    #[arg(long, env = "ENCRYPTION_CURRENT_KEY")]
    pub encryption_current_key: Option<String>,

    /// Re-encrypt every stored seed under the current key, then exit
    #[arg(long, default_value = "false")]
    pub reencrypt_seeds: bool,

    /// JWT secret for session tokens (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Session token expiry in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "3600")]
    pub jwt_expiry_seconds: u64,

    /// Deadline for each resolver connect and request, in milliseconds
    #[arg(long, env = "RESOLVER_TIMEOUT_MS", default_value = "5000")]
    pub resolver_timeout_ms: u64,

    /// Interval between cluster health cycles, in seconds
    #[arg(long, env = "HEALTH_INTERVAL_SECS", default_value = "60")]
    pub health_interval_secs: u64,

    /// Delay before the first health cycle, in seconds
    #[arg(long, env = "HEALTH_INITIAL_DELAY_SECS", default_value = "10")]
    pub health_initial_delay_secs: u64,

    /// Username of the admin API user created on first start
    #[arg(long, env = "BOOTSTRAP_ADMIN_USERNAME")]
    pub bootstrap_admin_username: Option<String>,

    /// Password of the bootstrap admin
    #[arg(long, env = "BOOTSTRAP_ADMIN_PASSWORD", hide_env_values = true)]
    pub bootstrap_admin_password: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    Memory,
    Mongodb,
}

impl Args {
    pub fn resolver_timeout(&self) -> Duration {
        Duration::from_millis(self.resolver_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn health_config(&self) -> HealthMonitorConfig {
        HealthMonitorConfig {
            interval: Duration::from_secs(self.health_interval_secs),
            initial_delay: Duration::from_secs(self.health_initial_delay_secs),
        }
    }

    /// Keyring configuration from the encoded key entries
    pub fn keyring_config(&self) -> Result<KeyringConfig, EncryptionError> {
        KeyringConfig::from_encoded(&self.encryption_keys, self.encryption_current_key.as_deref())
    }

    /// Bootstrap admin credentials, when both halves are configured
    pub fn bootstrap_admin(&self) -> Option<(&str, &str)> {
        match (&self.bootstrap_admin_username, &self.bootstrap_admin_password) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.encryption_keys.is_empty() {
            return Err("at least one ENCRYPTION_KEYS entry is required".to_string());
        }

        if !self.dev_mode {
            if self.jwt_secret.is_none() {
                return Err("JWT_SECRET is required in production mode".to_string());
            }
            if self.store == StoreBackend::Memory {
                return Err("the memory store is only available in dev mode".to_string());
            }
        }

        if self.jwt_expiry_seconds == 0 || self.jwt_expiry_seconds > i64::MAX as u64 {
            return Err("JWT_EXPIRY_SECONDS must be positive".to_string());
        }
        if self.resolver_timeout_ms == 0 {
            return Err("RESOLVER_TIMEOUT_MS must be positive".to_string());
        }
        if self.health_interval_secs == 0 {
            return Err("HEALTH_INTERVAL_SECS must be positive".to_string());
        }

        if self.bootstrap_admin_username.is_some() != self.bootstrap_admin_password.is_some() {
            return Err(
                "BOOTSTRAP_ADMIN_USERNAME and BOOTSTRAP_ADMIN_PASSWORD must be set together"
                    .to_string(),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "k1:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["gatekeeper", "--encryption-key", KEY];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_production_requires_jwt_secret() {
        let args = parse(&[]);
        assert!(args.validate().unwrap_err().contains("JWT_SECRET"));

        let args = parse(&["--jwt-secret", "0123456789abcdef0123456789abcdef"]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_memory_store_dev_only() {
        let args = parse(&["--jwt-secret", "s", "--store", "memory"]);
        assert!(args.validate().is_err());

        let args = parse(&["--dev-mode", "--store", "memory"]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_keyring_config_single_key_is_current() {
        let config = parse(&["--dev-mode"]).keyring_config().unwrap();
        assert_eq!(config.current_key_id, "k1");
        assert_eq!(config.keys["k1"].len(), 32);
    }

    #[test]
    fn test_bootstrap_admin_needs_both_halves() {
        let args = parse(&["--dev-mode", "--bootstrap-admin-username", "root"]);
        assert!(args.validate().is_err());
    }
}
