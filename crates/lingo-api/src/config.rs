//! API server configuration.

use std::time::Duration;

use lingo_core::{Environment, Error, InterfaceOrigin, Redacted, Result};
use lingo_migrate::reconcile::{DEFAULT_LEASE_PATH, DEFAULT_THROTTLE, ReconcileConfig};

/// Default HTTP port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default number of queue workers.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 4;

/// Default alert channel.
pub const DEFAULT_ALERT_CHANNEL: &str = "translations";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP port.
    pub http_port: u16,
    /// Debug mode: pretty logs, in-memory storage and no admin token allowed.
    pub debug: bool,
    /// Environment the process runs in.
    pub environment: Environment,
    /// Bearer token required on migration routes.
    pub admin_token: Option<Redacted<String>>,
    /// Object storage settings.
    pub storage: StorageConfig,
    /// Reconciliation settings.
    pub reconcile: ReconcileSettings,
    /// Alert delivery settings.
    pub alerts: AlertConfig,
    /// Number of queue workers started by `serve`.
    pub worker_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            debug: false,
            environment: Environment::default(),
            admin_token: None,
            storage: StorageConfig::default(),
            reconcile: ReconcileSettings::default(),
            alerts: AlertConfig::default(),
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    /// Bucket holding bundles, backups and the ledger (`s3://name` or `name`).
    pub bucket: Option<String>,
}

/// Reconciliation configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSettings {
    /// Operator switch for automatic reconciliation.
    pub auto_sync_enabled: bool,
    /// Minimum interval between runs, in seconds.
    pub throttle_secs: u64,
    /// Run one reconciliation pass when the server boots.
    pub on_start: bool,
    /// Interfaces to reconcile.
    pub interfaces: Vec<InterfaceOrigin>,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            auto_sync_enabled: true,
            throttle_secs: DEFAULT_THROTTLE.as_secs(),
            on_start: false,
            interfaces: InterfaceOrigin::ALL.to_vec(),
        }
    }
}

/// Alert configuration.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Chat webhook. Alerts are only logged when unset.
    pub webhook_url: Option<Redacted<String>>,
    /// Channel passed with every alert.
    pub channel: String,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            channel: DEFAULT_ALERT_CHANNEL.to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Supported env vars:
    /// - `LINGO_HTTP_PORT`
    /// - `LINGO_DEBUG`
    /// - `LINGO_ENVIRONMENT`
    /// - `LINGO_ADMIN_TOKEN`
    /// - `LINGO_STORAGE_BUCKET`
    /// - `LINGO_AUTO_SYNC_ENABLED`
    /// - `LINGO_RECONCILE_THROTTLE_SECS`
    /// - `LINGO_RECONCILE_ON_START`
    /// - `LINGO_ALERT_WEBHOOK_URL`
    /// - `LINGO_ALERT_CHANNEL`
    /// - `LINGO_WORKER_CONCURRENCY`
    /// - `LINGO_INTERFACES` (comma-separated, or `all`)
    ///
    /// # Errors
    ///
    /// Returns an error if any environment variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|name| std::env::var(name).ok())
    }

    /// Loads configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if any variable is present but cannot be parsed.
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(port) = env_u16(lookup, "LINGO_HTTP_PORT")? {
            config.http_port = port;
        }
        if let Some(debug) = env_bool(lookup, "LINGO_DEBUG")? {
            config.debug = debug;
        }
        if let Some(environment) = env_string(lookup, "LINGO_ENVIRONMENT") {
            config.environment = environment.parse().map_err(|_| {
                Error::InvalidInput(format!(
                    "LINGO_ENVIRONMENT must be one of local/testing/dev/staging/production, \
                     got '{environment}'"
                ))
            })?;
        }
        config.admin_token = env_string(lookup, "LINGO_ADMIN_TOKEN").map(Redacted);
        config.storage.bucket = env_string(lookup, "LINGO_STORAGE_BUCKET");

        if let Some(enabled) = env_bool(lookup, "LINGO_AUTO_SYNC_ENABLED")? {
            config.reconcile.auto_sync_enabled = enabled;
        }
        if let Some(secs) = env_u64(lookup, "LINGO_RECONCILE_THROTTLE_SECS")? {
            config.reconcile.throttle_secs = secs;
        }
        if let Some(on_start) = env_bool(lookup, "LINGO_RECONCILE_ON_START")? {
            config.reconcile.on_start = on_start;
        }
        if let Some(list) = env_string(lookup, "LINGO_INTERFACES") {
            config.reconcile.interfaces = parse_interfaces("LINGO_INTERFACES", &list)?;
        }

        config.alerts.webhook_url = env_string(lookup, "LINGO_ALERT_WEBHOOK_URL").map(Redacted);
        if let Some(channel) = env_string(lookup, "LINGO_ALERT_CHANNEL") {
            config.alerts.channel = channel;
        }
        if let Some(workers) = env_usize(lookup, "LINGO_WORKER_CONCURRENCY")? {
            config.worker_concurrency = workers;
        }

        Ok(config)
    }

    /// Checks the configuration for combinations the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if !self.debug && self.admin_token.is_none() {
            return Err(Error::InvalidInput(
                "LINGO_ADMIN_TOKEN is required when LINGO_DEBUG=false".into(),
            ));
        }
        if !self.debug && self.storage.bucket.is_none() {
            return Err(Error::InvalidInput(
                "LINGO_STORAGE_BUCKET is required when LINGO_DEBUG=false".into(),
            ));
        }
        if self.reconcile.throttle_secs == 0 {
            return Err(Error::InvalidInput(
                "LINGO_RECONCILE_THROTTLE_SECS must be greater than zero".into(),
            ));
        }
        if self.worker_concurrency == 0 {
            return Err(Error::InvalidInput(
                "LINGO_WORKER_CONCURRENCY must be greater than zero".into(),
            ));
        }
        if self.reconcile.interfaces.is_empty() {
            return Err(Error::InvalidInput(
                "LINGO_INTERFACES must name at least one interface".into(),
            ));
        }
        Ok(())
    }

    /// Returns the engine's reconciliation settings.
    #[must_use]
    pub fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            environment: self.environment,
            auto_sync_enabled: self.reconcile.auto_sync_enabled,
            throttle: Duration::from_secs(self.reconcile.throttle_secs),
            interfaces: self.reconcile.interfaces.clone(),
            lease_path: DEFAULT_LEASE_PATH.to_string(),
        }
    }
}

/// Variable source used by [`Config::from_lookup`].
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn env_string(lookup: Lookup<'_>, name: &str) -> Option<String> {
    lookup(name).and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u16(lookup: Lookup<'_>, name: &str) -> Result<Option<u16>> {
    let Some(v) = env_string(lookup, name) else {
        return Ok(None);
    };
    v.parse::<u16>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u16: {e}")))
}

fn env_u64(lookup: Lookup<'_>, name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(lookup, name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}")))
}

fn env_usize(lookup: Lookup<'_>, name: &str) -> Result<Option<usize>> {
    let Some(v) = env_string(lookup, name) else {
        return Ok(None);
    };
    v.parse::<usize>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a usize: {e}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(Error::InvalidInput(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

fn env_bool(lookup: Lookup<'_>, name: &str) -> Result<Option<bool>> {
    let Some(v) = env_string(lookup, name) else {
        return Ok(None);
    };
    parse_bool(name, &v).map(Some)
}

fn parse_interfaces(name: &str, value: &str) -> Result<Vec<InterfaceOrigin>> {
    if value.eq_ignore_ascii_case("all") {
        return Ok(InterfaceOrigin::ALL.to_vec());
    }
    let mut interfaces = Vec::new();
    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let interface: InterfaceOrigin = part
            .parse()
            .map_err(|_| Error::InvalidInput(format!("{name} has unknown interface '{part}'")))?;
        if !interfaces.contains(&interface) {
            interfaces.push(interface);
        }
    }
    Ok(interfaces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(&move |name| map.get(name).cloned())
    }

    #[test]
    fn parse_bool_accepts_true_values() {
        assert!(parse_bool("TEST", "true").unwrap());
        assert!(parse_bool("TEST", "1").unwrap());
        assert!(parse_bool("TEST", "yes").unwrap());
        assert!(parse_bool("TEST", "TRUE").unwrap());
    }

    #[test]
    fn parse_bool_accepts_false_values() {
        assert!(!parse_bool("TEST", "false").unwrap());
        assert!(!parse_bool("TEST", "0").unwrap());
        assert!(!parse_bool("TEST", "no").unwrap());
    }

    #[test]
    fn parse_bool_rejects_invalid_values() {
        assert!(parse_bool("TEST", "maybe").is_err());
        assert!(parse_bool("TEST", "").is_err());
    }

    #[test]
    fn defaults_apply_when_unset() -> Result<()> {
        let config = config_from(&[])?;
        assert_eq!(config.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(config.environment, Environment::Local);
        assert_eq!(config.reconcile.throttle_secs, 300);
        assert!(config.reconcile.auto_sync_enabled);
        assert_eq!(config.reconcile.interfaces, InterfaceOrigin::ALL.to_vec());
        assert_eq!(config.alerts.channel, "translations");
        assert_eq!(config.worker_concurrency, 4);
        Ok(())
    }

    #[test]
    fn reads_every_variable() -> Result<()> {
        let config = config_from(&[
            ("LINGO_HTTP_PORT", "9000"),
            ("LINGO_DEBUG", "true"),
            ("LINGO_ENVIRONMENT", "production"),
            ("LINGO_ADMIN_TOKEN", "s3cret"),
            ("LINGO_STORAGE_BUCKET", "s3://lingo-bundles"),
            ("LINGO_AUTO_SYNC_ENABLED", "false"),
            ("LINGO_RECONCILE_THROTTLE_SECS", "60"),
            ("LINGO_RECONCILE_ON_START", "yes"),
            ("LINGO_ALERT_WEBHOOK_URL", "https://hooks.example.com/x"),
            ("LINGO_ALERT_CHANNEL", "ops"),
            ("LINGO_WORKER_CONCURRENCY", "2"),
            ("LINGO_INTERFACES", "mobile, web_beneficiary"),
        ])?;
        assert_eq!(config.http_port, 9000);
        assert!(config.debug);
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.admin_token.as_ref().map(|t| t.expose().as_str()), Some("s3cret"));
        assert_eq!(config.storage.bucket.as_deref(), Some("s3://lingo-bundles"));
        assert!(!config.reconcile.auto_sync_enabled);
        assert!(config.reconcile.on_start);
        assert_eq!(
            config.reconcile.interfaces,
            vec![InterfaceOrigin::Mobile, InterfaceOrigin::WebBeneficiary]
        );
        assert_eq!(config.alerts.channel, "ops");
        assert_eq!(config.worker_concurrency, 2);

        let reconcile = config.reconcile_config();
        assert_eq!(reconcile.throttle, Duration::from_secs(60));
        assert_eq!(reconcile.environment, Environment::Production);
        Ok(())
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(config_from(&[("LINGO_HTTP_PORT", "http")]).is_err());
        assert!(config_from(&[("LINGO_DEBUG", "sometimes")]).is_err());
        assert!(config_from(&[("LINGO_ENVIRONMENT", "qa")]).is_err());
        assert!(config_from(&[("LINGO_INTERFACES", "mobile,desktop")]).is_err());
    }

    #[test]
    fn validate_requires_token_and_bucket_outside_debug() -> Result<()> {
        let config = config_from(&[])?;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("LINGO_ADMIN_TOKEN"));

        let config = config_from(&[("LINGO_ADMIN_TOKEN", "t")])?;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("LINGO_STORAGE_BUCKET"));

        config_from(&[("LINGO_DEBUG", "1")])?.validate()?;
        Ok(())
    }

    #[test]
    fn validate_rejects_zero_throttle_and_workers() -> Result<()> {
        let config = config_from(&[("LINGO_DEBUG", "1"), ("LINGO_RECONCILE_THROTTLE_SECS", "0")])?;
        assert!(config.validate().is_err());
        let config = config_from(&[("LINGO_DEBUG", "1"), ("LINGO_WORKER_CONCURRENCY", "0")])?;
        assert!(config.validate().is_err());
        Ok(())
    }

    #[test]
    fn debug_output_redacts_secrets() -> Result<()> {
        let config = config_from(&[
            ("LINGO_ADMIN_TOKEN", "super-secret"),
            ("LINGO_ALERT_WEBHOOK_URL", "https://hooks.example.com/private"),
        ])?;
        let dbg = format!("{config:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("super-secret"));
        assert!(!dbg.contains("hooks.example.com"));
        Ok(())
    }
}
