//! Configuration management for Floodgate.

use axum::http::HeaderName;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{FloodgateError, Result};
use crate::ratelimit::{Policy, SweeperConfig};

/// Prefix for environment variable overrides, e.g. `FLOODGATE__RATE_LIMITING__REQUESTS`.
const ENV_PREFIX: &str = "FLOODGATE";

/// Unprefixed variables read by earlier deployments, and the keys they set.
const LEGACY_ENV: [(&str, &str); 2] = [
    ("RATE_LIMIT_REQUESTS", "rate_limiting.requests"),
    ("RATE_LIMIT_WINDOW", "rate_limiting.window_secs"),
];

/// Main configuration for the Floodgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FloodgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Requests allowed per client per window
    #[serde(default = "default_requests")]
    pub requests: u64,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Seconds between eviction sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Header carrying the client address when running behind a trusted proxy.
    /// Left unset, only the peer address is used.
    #[serde(default)]
    pub trusted_proxy_header: Option<String>,

    /// Tracked-key count that triggers a resource pressure warning
    #[serde(default = "default_max_tracked_keys_warning")]
    pub max_tracked_keys_warning: usize,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            window_secs: default_window_secs(),
            sweep_interval_secs: default_sweep_interval(),
            trusted_proxy_header: None,
            max_tracked_keys_warning: default_max_tracked_keys_warning(),
        }
    }
}

fn default_requests() -> u64 {
    100
}

fn default_window_secs() -> u64 {
    3600
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_max_tracked_keys_warning() -> usize {
    100_000
}

impl RateLimitingConfig {
    /// Build the admission policy.
    pub fn policy(&self) -> Result<Policy> {
        Policy::new(self.requests, Duration::from_secs(self.window_secs))
    }

    /// Settings for the background sweeper.
    pub fn sweeper(&self) -> SweeperConfig {
        SweeperConfig {
            interval: Duration::from_secs(self.sweep_interval_secs),
            max_tracked_keys_warning: self.max_tracked_keys_warning,
        }
    }

    /// The trusted forwarded-address header, if one is configured.
    pub fn trusted_header(&self) -> Result<Option<HeaderName>> {
        self.trusted_proxy_header
            .as_deref()
            .map(|name| {
                HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| {
                    FloodgateError::Config(format!("invalid trusted proxy header {:?}: {}", name, e))
                })
            })
            .transpose()
    }
}

impl FloodgateConfig {
    /// Load configuration from defaults, an optional YAML file, and
    /// `FLOODGATE__*` environment variables, in increasing precedence.
    ///
    /// `RATE_LIMIT_REQUESTS` and `RATE_LIMIT_WINDOW` replace the built-in
    /// defaults, so the file and prefixed variables still take priority.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        for (var, key) in LEGACY_ENV {
            if let Ok(value) = std::env::var(var) {
                info!(var, key, "Using legacy environment variable");
                builder = builder.set_default(key, value.trim().to_string())?;
            }
        }

        if let Some(path) = path {
            info!(path = %path, "Loading configuration file");
            builder = builder.add_source(
                ::config::File::with_name(path).format(::config::FileFormat::Yaml),
            );
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: FloodgateConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| FloodgateError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limiting;
        rl.policy()?;
        if rl.sweep_interval_secs == 0 {
            return Err(FloodgateError::Config(
                "sweep interval must be longer than zero".to_string(),
            ));
        }
        rl.trusted_header()?;
        Ok(())
    }
}
