//! Server configuration.

use crate::error::{ServerError, ServerResult};
use mealplan_backup::{BackupConfig, SandboxConfig, Version};
use rand::RngCore;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::warn;

/// Environment variable holding the listen address.
pub const ENV_BIND_ADDR: &str = "MEALPLAN_BIND_ADDR";
/// Environment variable holding the token signing secret.
pub const ENV_AUTH_SECRET: &str = "MEALPLAN_AUTH_SECRET";
/// Environment variable naming the deployment (`production` hardens errors).
pub const ENV_MODE: &str = "MEALPLAN_ENV";
/// Environment variable holding the oldest restorable backup version.
pub const ENV_MIN_SUPPORTED_VERSION: &str = "MEALPLAN_MIN_SUPPORTED_VERSION";
/// Environment variable holding the sandbox evaluation step budget.
pub const ENV_SCRIPT_STEP_LIMIT: &str = "MEALPLAN_SCRIPT_STEP_LIMIT";

/// Configuration for the backup server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Secret key for token signing and validation.
    pub auth_secret: Vec<u8>,
    /// How long an issued token stays valid.
    pub token_expiry: Duration,
    /// Whether internal error details are hidden from responses.
    pub production: bool,
    /// Exporter and validator settings.
    pub backup: BackupConfig,
    /// Script sandbox guards.
    pub sandbox: SandboxConfig,
}

impl ServerConfig {
    /// Creates a configuration with a freshly generated secret.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            auth_secret: random_secret(),
            token_expiry: Duration::from_secs(24 * 60 * 60),
            production: false,
            backup: BackupConfig::default(),
            sandbox: SandboxConfig::default(),
        }
    }

    /// Sets the token signing secret.
    pub fn with_auth_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.auth_secret = secret.into();
        self
    }

    /// Sets the token lifetime.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }

    /// Enables or disables production error bodies.
    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    /// Replaces the backup settings.
    pub fn with_backup(mut self, backup: BackupConfig) -> Self {
        self.backup = backup;
        self
    }

    /// Replaces the sandbox guards.
    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Reads the configuration from the process environment.
    pub fn from_env() -> ServerResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, starting from the defaults.
    ///
    /// Unset variables keep their default. A missing secret is replaced by a
    /// random one, which invalidates tokens across restarts.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ServerResult<Self> {
        let mut config = Self::default();

        if let Some(addr) = lookup(ENV_BIND_ADDR) {
            config.bind_addr = addr
                .parse()
                .map_err(|_| ServerError::Config(format!("{ENV_BIND_ADDR}: invalid address {addr}")))?;
        }

        match lookup(ENV_AUTH_SECRET) {
            Some(secret) if !secret.is_empty() => config.auth_secret = secret.into_bytes(),
            _ => warn!("{} not set, using a random token secret", ENV_AUTH_SECRET),
        }

        if let Some(mode) = lookup(ENV_MODE) {
            config.production = mode.eq_ignore_ascii_case("production");
        }

        if let Some(version) = lookup(ENV_MIN_SUPPORTED_VERSION) {
            let version = Version::parse(&version)
                .map_err(|e| ServerError::Config(format!("{ENV_MIN_SUPPORTED_VERSION}: {e}")))?;
            config.backup = config.backup.with_min_supported_version(version);
        }

        if let Some(limit) = lookup(ENV_SCRIPT_STEP_LIMIT) {
            let limit: u64 = limit.parse().map_err(|_| {
                ServerError::Config(format!("{ENV_SCRIPT_STEP_LIMIT}: not a number: {limit}"))
            })?;
            let limit = (limit > 0).then_some(limit);
            config.sandbox = config.sandbox.with_step_limit(limit);
        }

        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 5000)))
    }
}

fn random_secret() -> Vec<u8> {
    let mut secret = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    secret
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 5000);
        assert_eq!(config.auth_secret.len(), 32);
        assert!(!config.production);
        assert_eq!(config.sandbox.step_limit, None);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("0.0.0.0:9000".parse().unwrap())
            .with_auth_secret(b"secret".to_vec())
            .with_token_expiry(Duration::from_secs(60))
            .with_production(true);

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.auth_secret, b"secret".to_vec());
        assert_eq!(config.token_expiry, Duration::from_secs(60));
        assert!(config.production);
    }

    #[test]
    fn reads_environment() {
        let config = ServerConfig::from_lookup(lookup(&[
            (ENV_BIND_ADDR, "0.0.0.0:8081"),
            (ENV_AUTH_SECRET, "from-env"),
            (ENV_MODE, "Production"),
            (ENV_MIN_SUPPORTED_VERSION, "1.2.0"),
            (ENV_SCRIPT_STEP_LIMIT, "5000"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr.port(), 8081);
        assert_eq!(config.auth_secret, b"from-env".to_vec());
        assert!(config.production);
        assert_eq!(config.backup.min_supported_version, Version::new(1, 2, 0));
        assert_eq!(config.sandbox.step_limit, Some(5000));
    }

    #[test]
    fn zero_step_limit_means_unlimited() {
        let config = ServerConfig::from_lookup(lookup(&[(ENV_SCRIPT_STEP_LIMIT, "0")])).unwrap();
        assert_eq!(config.sandbox.step_limit, None);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(ServerConfig::from_lookup(lookup(&[(ENV_BIND_ADDR, "nowhere")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[(ENV_MIN_SUPPORTED_VERSION, "one")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[(ENV_SCRIPT_STEP_LIMIT, "-1")])).is_err());
    }
}
