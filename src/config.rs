//! Configuration management for slicelimit.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, SliceLimitError};
use crate::ratelimit::HttpRemoteNamer;

/// Prefix for environment variable overrides, e.g. `SLICELIMIT__LIMITER__MAX_COUNT`.
const ENV_PREFIX: &str = "SLICELIMIT";

/// Main configuration for the slicelimit service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SliceLimitConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Client naming configuration
    #[serde(default)]
    pub naming: NamingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Time slice configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Length of each time slice in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Length of each time slice in milliseconds; takes precedence over
    /// `window_secs` when set
    #[serde(default)]
    pub window_ms: Option<u64>,

    /// Operations allowed per identifier per time slice
    #[serde(default = "default_max_count")]
    pub max_count: i64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            window_ms: None,
            max_count: default_max_count(),
        }
    }
}

fn default_window_secs() -> u64 {
    3600
}

fn default_max_count() -> i64 {
    60
}

impl LimiterConfig {
    /// Get the time slice duration.
    pub fn window_duration(&self) -> Duration {
        match self.window_ms {
            Some(ms) => Duration::from_millis(ms),
            None => Duration::from_secs(self.window_secs),
        }
    }
}

/// Client naming configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamingConfig {
    /// Leading IPv6 bits that identify a client
    #[serde(default = "default_ipv6_bits")]
    pub ipv6_bits: u32,

    /// Number of trusted reverse proxies in front of the server
    #[serde(default)]
    pub num_proxies: usize,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            ipv6_bits: default_ipv6_bits(),
            num_proxies: 0,
        }
    }
}

fn default_ipv6_bits() -> u32 {
    crate::ratelimit::DEFAULT_IPV6_BITS
}

impl NamingConfig {
    /// Build the request namer described by this configuration.
    pub fn namer(&self) -> HttpRemoteNamer {
        HttpRemoteNamer::new(self.ipv6_bits, self.num_proxies)
    }
}

impl SliceLimitConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration file");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SliceLimitConfig = serde_yaml::from_str(yaml)
            .map_err(|e| SliceLimitError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file, overlaid with
    /// `SLICELIMIT__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: SliceLimitConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the limiter cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.limiter.window_duration().is_zero() {
            return Err(SliceLimitError::Config(
                "limiter window must be longer than zero".to_string(),
            ));
        }
        if self.naming.ipv6_bits > 128 {
            return Err(SliceLimitError::Config(format!(
                "ipv6_bits must be at most 128, got {}",
                self.naming.ipv6_bits
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn test_defaults() {
        let config = SliceLimitConfig::default();

        assert_eq!(config.server.http_addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.limiter.window_duration(), Duration::from_secs(3600));
        assert_eq!(config.limiter.max_count, 60);
        assert_eq!(config.naming.namer(), HttpRemoteNamer::new(64, 0));
        assert_ok!(config.validate());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
server:
  http_addr: "0.0.0.0:9000"
limiter:
  window_secs: 60
  max_count: 20
naming:
  ipv6_bits: 48
  num_proxies: 1
"#;

        let config = assert_ok!(SliceLimitConfig::from_yaml(yaml));
        assert_eq!(config.server.http_addr.port(), 9000);
        assert_eq!(config.limiter.window_duration(), Duration::from_secs(60));
        assert_eq!(config.limiter.max_count, 20);
        assert_eq!(config.naming.namer(), HttpRemoteNamer::new(48, 1));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = assert_ok!(SliceLimitConfig::from_yaml("limiter:\n  window_ms: 250\n"));

        assert_eq!(config.limiter.window_duration(), Duration::from_millis(250));
        assert_eq!(config.limiter.max_count, 60);
        assert_eq!(config.naming.ipv6_bits, 64);
    }

    #[test]
    fn test_zero_window_rejected() {
        let result = SliceLimitConfig::from_yaml("limiter:\n  window_secs: 0\n");
        assert!(matches!(result, Err(SliceLimitError::Config(_))));
    }

    #[test]
    fn test_oversized_prefix_rejected() {
        let result = SliceLimitConfig::from_yaml("naming:\n  ipv6_bits: 129\n");
        assert!(matches!(result, Err(SliceLimitError::Config(_))));
    }

    #[test]
    fn test_malformed_yaml_rejected() {
        let result = SliceLimitConfig::from_yaml("limiter: [not, a, map]");
        assert!(matches!(result, Err(SliceLimitError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("slicelimit-{}.yaml", std::process::id()));
        std::fs::write(&path, "limiter:\n  window_secs: 30\n  max_count: 5\n").unwrap();

        let config = SliceLimitConfig::load(Some(&path));
        std::fs::remove_file(&path).unwrap();

        let config = assert_ok!(config);
        assert_eq!(config.limiter.window_duration(), Duration::from_secs(30));
        assert_eq!(config.limiter.max_count, 5);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = SliceLimitConfig::from_file("/nonexistent/slicelimit.yaml");
        assert!(matches!(result, Err(SliceLimitError::Io(_))));
    }
}
