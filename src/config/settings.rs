//! Routing engine configuration settings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::error::Error;
use crate::models::{NodeSpec, Strategy};
use crate::utils::validate_endpoint;

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_PATH: &str = "accel-router.yml";

/// Main configuration for the routing engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Log level configuration
    pub log_level: String,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Service pattern table, in match-priority order
    pub services: Vec<ServiceConfig>,

    /// Static nodes present before any remote list has been fetched
    pub default_nodes: Vec<NodeSpec>,

    /// Health probe settings
    pub probe: ProbeConfig,

    /// Periodic health sweep settings
    pub sweep: SweepConfig,

    /// Periodic remote node-list refresh settings
    pub refresh: RefreshConfig,

    /// Selector scoring weights
    pub scoring: ScoringConfig,

    /// Key-value persistence backend
    pub persistence: PersistenceConfig,

    /// Runtime configuration
    pub runtime: RuntimeConfig,
}

/// One logical service and the hosts it covers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub name: String,
    pub patterns: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for a daily rolling log file; console-only when absent
    pub file_dir: Option<String>,
}

/// Health probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Per-probe timeout in milliseconds
    pub timeout_ms: u64,

    /// Probes answering faster than this are healthy, slower ones degraded
    pub healthy_threshold_ms: u64,

    /// Path probed on nodes that do not declare their own
    pub default_probe_path: String,

    /// HTTP method used for probes
    pub method: String,

    /// User agent sent with probes and list fetches
    pub user_agent: String,
}

/// Health sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Seconds between sweeps
    pub interval_secs: u64,

    /// Maximum probes in flight at once
    pub concurrency: usize,

    /// Upper bound on one sweep's duration in seconds
    pub ceiling_secs: u64,

    /// Extra attempts for a failed probe within the same sweep
    pub retries: u32,
}

/// Remote node-list refresh configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Seconds between refreshes
    pub interval_secs: u64,

    /// Per-source fetch timeout in milliseconds
    pub fetch_timeout_ms: u64,

    /// Upper bound on one refresh cycle's duration in seconds
    pub ceiling_secs: u64,

    /// Remote node-list sources
    pub sources: Vec<SourceConfig>,
}

/// A remote node-list source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    pub url: String,

    /// Services assigned to entries that do not declare any
    #[serde(default)]
    pub services: Vec<String>,

    /// Strategy assigned to entries that do not declare one
    #[serde(default)]
    pub strategy: Strategy,
}

/// Selector scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Weight of the normalized speed term
    pub speed_weight: f64,

    /// Weight of the stability term
    pub stability_weight: f64,

    /// Score component used for nodes that were never probed
    pub neutral_score: f64,
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Storage backend: "memory", "file" or "redis"
    pub backend: String,

    /// JSON file used by the "file" backend
    pub path: String,

    /// Redis server URL used by the "redis" backend
    pub redis_url: String,

    /// Prefix applied to every key
    pub key_prefix: String,
}

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime mode: "single_threaded" or "multi_threaded"
    pub mode: String,

    /// Number of worker threads for multi-threaded mode (0 = auto-detect CPU cores)
    pub worker_threads: Option<usize>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            logging: LoggingConfig::default(),
            services: default_services(),
            default_nodes: default_nodes(),
            probe: ProbeConfig::default(),
            sweep: SweepConfig::default(),
            refresh: RefreshConfig::default(),
            scoring: ScoringConfig::default(),
            persistence: PersistenceConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3000,
            healthy_threshold_ms: 500,
            default_probe_path: "/".to_string(),
            method: "HEAD".to_string(),
            user_agent: format!("accel-router/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300, // 5 minutes
            concurrency: 8,
            ceiling_secs: 60,
            retries: 0,
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600, // hourly
            fetch_timeout_ms: 5000,
            ceiling_secs: 120,
            sources: Vec::new(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            speed_weight: 0.6,
            stability_weight: 0.4,
            neutral_score: 0.5,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: "file".to_string(),
            path: "accel-router-state.json".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "accel:".to_string(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: "multi_threaded".to_string(),
            worker_threads: None, // Auto-detect CPU cores
        }
    }
}

fn service(name: &str, patterns: &[&str]) -> ServiceConfig {
    ServiceConfig {
        name: name.to_string(),
        patterns: patterns.iter().map(|p| p.to_string()).collect(),
    }
}

fn default_services() -> Vec<ServiceConfig> {
    vec![
        service("code-hosting", &["github.com", "raw.githubusercontent.com", "githubusercontent.com"]),
        service("game-platform", &["steamcommunity.com", "store.steampowered.com"]),
        service("registry", &["docker.io", "hub.docker.com"]),
        service("translate", &["translate.googleapis.com", "translate.google.com"]),
    ]
}

fn default_node(id: &str, endpoint: &str, service: &str, strategy: Strategy) -> NodeSpec {
    NodeSpec {
        id: Some(id.to_string()),
        endpoint: endpoint.to_string(),
        services: vec![service.to_string()],
        strategy: Some(strategy),
        ..Default::default()
    }
}

fn default_nodes() -> Vec<NodeSpec> {
    vec![
        default_node("jsdelivr-gh", "https://cdn.jsdelivr.net/gh", "code-hosting", Strategy::CdnRewrite),
        default_node("ghproxy", "https://ghproxy.com", "code-hosting", Strategy::Proxy),
        default_node("gitclone", "https://gitclone.com/github.com", "code-hosting", Strategy::Mirror),
        default_node("steamcdn", "https://steamcdn-a.akamaihd.net", "game-platform", Strategy::Mirror),
        default_node("dockerproxy", "https://dockerproxy.com", "registry", Strategy::Mirror),
    ]
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn ceiling(&self) -> Duration {
        Duration::from_secs(self.ceiling_secs)
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn ceiling(&self) -> Duration {
        Duration::from_secs(self.ceiling_secs)
    }
}

impl RouterConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: RouterConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load configuration from YAML file with environment variable overrides
    pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_path = path.as_ref();

        let mut config = if config_path.exists() {
            Self::from_yaml_file(config_path)?
        } else {
            return Err(anyhow::anyhow!(
                "Config file '{}' not found.",
                config_path.display()
            ));
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Load the file if present, otherwise fall back to built-in defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            return Self::load_config(path);
        }
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Environment variables take precedence over the file
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("ACCEL_LOG_LEVEL") {
            self.log_level = level;
        }

        if let Ok(timeout) = std::env::var("ACCEL_PROBE_TIMEOUT_MS") {
            if let Ok(timeout) = timeout.parse() {
                self.probe.timeout_ms = timeout;
            }
        }

        if let Ok(interval) = std::env::var("ACCEL_SWEEP_INTERVAL_SECS") {
            if let Ok(interval) = interval.parse() {
                self.sweep.interval_secs = interval;
            }
        }

        if let Ok(interval) = std::env::var("ACCEL_REFRESH_INTERVAL_SECS") {
            if let Ok(interval) = interval.parse() {
                self.refresh.interval_secs = interval;
            }
        }

        if let Ok(concurrency) = std::env::var("ACCEL_SWEEP_CONCURRENCY") {
            if let Ok(concurrency) = concurrency.parse() {
                self.sweep.concurrency = concurrency;
            }
        }

        if let Ok(path) = std::env::var("ACCEL_PERSISTENCE_PATH") {
            self.persistence.path = path;
        }
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> crate::error::Result<()> {
        let mut names = HashSet::new();
        for svc in &self.services {
            if svc.name.trim().is_empty() {
                return Err(Error::Config("service name must not be empty".to_string()));
            }
            if !names.insert(svc.name.as_str()) {
                return Err(Error::Config(format!("service '{}' declared twice", svc.name)));
            }
            if svc.patterns.iter().all(|p| p.trim().is_empty()) {
                return Err(Error::Config(format!("service '{}' has no host patterns", svc.name)));
            }
        }

        for spec in &self.default_nodes {
            validate_endpoint(&spec.endpoint)
                .map_err(|e| Error::Config(format!("default node: {}", e)))?;
            if spec.services.is_empty() {
                return Err(Error::Config(format!(
                    "default node '{}' does not declare any service",
                    spec.endpoint
                )));
            }
            if let Some(unknown) = spec.services.iter().find(|s| !names.contains(s.as_str())) {
                return Err(Error::Config(format!(
                    "default node '{}' references unknown service '{}'",
                    spec.endpoint, unknown
                )));
            }
        }

        for source in &self.refresh.sources {
            validate_endpoint(&source.url)
                .map_err(|e| Error::Config(format!("remote source: {}", e)))?;
            if let Some(unknown) = source.services.iter().find(|s| !names.contains(s.as_str())) {
                return Err(Error::Config(format!(
                    "remote source '{}' references unknown service '{}'",
                    source.url, unknown
                )));
            }
        }

        if self.probe.timeout_ms == 0 {
            return Err(Error::Config("probe.timeout_ms must be greater than zero".to_string()));
        }
        if self.refresh.fetch_timeout_ms == 0 {
            return Err(Error::Config("refresh.fetch_timeout_ms must be greater than zero".to_string()));
        }
        if self.sweep.concurrency == 0 {
            return Err(Error::Config("sweep.concurrency must be greater than zero".to_string()));
        }
        if self.sweep.interval_secs == 0 || self.refresh.interval_secs == 0 {
            return Err(Error::Config("sweep and refresh intervals must be greater than zero".to_string()));
        }

        for (label, value) in [
            ("scoring.speed_weight", self.scoring.speed_weight),
            ("scoring.stability_weight", self.scoring.stability_weight),
            ("scoring.neutral_score", self.scoring.neutral_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!("{} must be within [0, 1], got {}", label, value)));
            }
        }

        if !matches!(self.persistence.backend.as_str(), "memory" | "file" | "redis") {
            return Err(Error::Config(format!(
                "Invalid persistence backend '{}'. Must be 'memory', 'file' or 'redis'",
                self.persistence.backend
            )));
        }

        Ok(())
    }
}
