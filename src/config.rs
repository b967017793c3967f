//! Configuration types for skydns-sync.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::record::RecordKind;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application behavior.
    pub app: AppConfig,

    /// etcd registry connection and locking.
    pub etcd: EtcdConfig,

    /// Logging and telemetry.
    #[serde(default)]
    pub log: LogConfig,
}

/// Application behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Per-kind record gates.
    #[serde(default)]
    pub record_types: RecordTypesConfig,

    /// Label prefix containers use to declare records (e.g. "coredns").
    #[serde(default = "default_label_prefix")]
    pub docker_label_prefix: String,

    /// Default value for A records declared without one.
    #[serde(default)]
    pub host_ipv4: Option<Ipv4Addr>,

    /// Default value for AAAA records declared without one.
    #[serde(default)]
    pub host_ipv6: Option<Ipv6Addr>,

    /// This host's identity; owns every record it registers.
    pub hostname: String,

    /// Seconds between reconciliation ticks.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

impl AppConfig {
    /// Whether records of `kind` may be produced by the translator.
    pub fn kind_enabled(&self, kind: RecordKind) -> bool {
        match kind {
            RecordKind::A => self.record_types.a.enabled,
            RecordKind::Aaaa => self.record_types.aaaa.enabled,
            RecordKind::Cname => self.record_types.cname.enabled,
        }
    }
}

/// Per-kind enablement gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordTypesConfig {
    /// A record gate (default on).
    #[serde(default = "toggle_on")]
    pub a: RecordTypeToggle,

    /// AAAA record gate (default off).
    #[serde(default = "toggle_off")]
    pub aaaa: RecordTypeToggle,

    /// CNAME record gate (default on).
    #[serde(default = "toggle_on")]
    pub cname: RecordTypeToggle,
}

/// Gate for one record kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordTypeToggle {
    /// Whether the kind is enabled.
    pub enabled: bool,
}

impl Default for RecordTypesConfig {
    fn default() -> Self {
        Self {
            a: toggle_on(),
            aaaa: toggle_off(),
            cname: toggle_on(),
        }
    }
}

fn toggle_on() -> RecordTypeToggle {
    RecordTypeToggle { enabled: true }
}

fn toggle_off() -> RecordTypeToggle {
    RecordTypeToggle { enabled: false }
}

/// etcd registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtcdConfig {
    /// Cluster endpoints (e.g. "http://127.0.0.1:2379").
    pub endpoints: Vec<String>,

    /// Key prefix of the SkyDNS zone data.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// Lock lease TTL in seconds.
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl: f64,

    /// Lock acquisition deadline in seconds.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout: f64,

    /// Sleep between lock acquisition attempts in seconds.
    #[serde(default = "default_lock_retry_interval")]
    pub lock_retry_interval: f64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level filter (e.g. "info", "skydns_sync=debug,warn").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Prometheus metrics exporter address (requires the `prometheus`
    /// feature).
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_label_prefix() -> String {
    "coredns".to_string()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_path_prefix() -> String {
    "/skydns".to_string()
}

fn default_lock_ttl() -> f64 {
    5.0
}

fn default_lock_timeout() -> f64 {
    2.0
}

fn default_lock_retry_interval() -> f64 {
    0.1
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load from a TOML file (if present) and `SKYDNS_SYNC_*` environment
    /// overrides, then validate.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("SKYDNS_SYNC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|err| SyncError::Config(err.to_string()))?;

        let cfg: Config = settings
            .try_deserialize()
            .map_err(|err| SyncError::Config(err.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check for internal consistency.
    pub fn validate(&self) -> Result<(), SyncError> {
        let fail = |msg: String| Err(SyncError::Config(msg));

        if self.app.docker_label_prefix.trim().is_empty() {
            return fail("app.docker_label_prefix cannot be empty".into());
        }
        if self.app.hostname.trim().is_empty() {
            return fail("app.hostname cannot be empty".into());
        }
        if self.app.poll_interval == 0 {
            return fail("app.poll_interval must be greater than 0".into());
        }
        let types = &self.app.record_types;
        if !types.a.enabled && !types.aaaa.enabled && !types.cname.enabled {
            return fail("app.record_types must have at least one record type enabled".into());
        }

        if self.etcd.endpoints.is_empty() {
            return fail("etcd.endpoints must have at least one endpoint".into());
        }
        for endpoint in &self.etcd.endpoints {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return fail(format!("invalid etcd endpoint: {endpoint}"));
            }
        }
        if self.etcd.path_prefix.trim().is_empty() {
            return fail("etcd.path_prefix cannot be empty".into());
        }
        if self.etcd.lock_ttl <= 0.0 {
            return fail("etcd.lock_ttl must be > 0".into());
        }
        if self.etcd.lock_timeout <= 0.0 {
            return fail("etcd.lock_timeout must be > 0".into());
        }
        if self.etcd.lock_retry_interval <= 0.0 {
            return fail("etcd.lock_retry_interval must be > 0".into());
        }

        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        let level = self.log.level.to_ascii_lowercase();
        // Allow full EnvFilter directives as well as plain levels.
        if !level.contains('=') && !level.contains(',') && !LEVELS.contains(&level.as_str()) {
            return fail(format!("log.level is not a valid log level: {}", self.log.level));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            app: AppConfig {
                record_types: RecordTypesConfig::default(),
                docker_label_prefix: "coredns".to_string(),
                host_ipv4: Some("192.0.2.10".parse().unwrap()),
                host_ipv6: None,
                hostname: "h1".to_string(),
                poll_interval: 5,
            },
            etcd: EtcdConfig {
                endpoints: vec!["http://127.0.0.1:2379".to_string()],
                path_prefix: "/skydns".to_string(),
                lock_ttl: 5.0,
                lock_timeout: 2.0,
                lock_retry_interval: 0.1,
            },
            log: LogConfig::default(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_default_record_types() {
        let types = RecordTypesConfig::default();
        assert!(types.a.enabled);
        assert!(!types.aaaa.enabled);
        assert!(types.cname.enabled);
    }

    #[test]
    fn test_empty_hostname_rejected() {
        let mut cfg = valid_config();
        cfg.app.hostname = "  ".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut cfg = valid_config();
        cfg.app.poll_interval = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_all_kinds_disabled_rejected() {
        let mut cfg = valid_config();
        cfg.app.record_types.a.enabled = false;
        cfg.app.record_types.aaaa.enabled = false;
        cfg.app.record_types.cname.enabled = false;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_no_endpoints_rejected() {
        let mut cfg = valid_config();
        cfg.etcd.endpoints.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_non_http_endpoint_rejected() {
        let mut cfg = valid_config();
        cfg.etcd.endpoints = vec!["127.0.0.1:2379".to_string()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_nonpositive_durations_rejected() {
        let mut cfg = valid_config();
        cfg.etcd.lock_ttl = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = valid_config();
        cfg.etcd.lock_retry_interval = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_bad_log_level_rejected() {
        let mut cfg = valid_config();
        cfg.log.level = "chatty".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_env_filter_directives_accepted() {
        let mut cfg = valid_config();
        cfg.log.level = "skydns_sync=debug,warn".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_kind_enabled() {
        let cfg = valid_config();
        assert!(cfg.app.kind_enabled(RecordKind::A));
        assert!(!cfg.app.kind_enabled(RecordKind::Aaaa));
        assert!(cfg.app.kind_enabled(RecordKind::Cname));
    }
}
