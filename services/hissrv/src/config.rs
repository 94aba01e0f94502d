//! hissrv configuration
//!
//! Layered with figment: built-in defaults, then the YAML file, then
//! `HISSRV_`-prefixed environment variables (`__` separates nesting, e.g.
//! `HISSRV_SERVICE__CACHE_DATA_PERIOD_MS=5000`).

use crate::error::{HissrvError, Result};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use historian_store::{MetricsConfig, WriteBufferConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/hissrv.yaml";

/// Service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    /// Routing key for requests addressed to the service itself
    pub queue: String,
    pub cache_data_period_ms: u64,
    pub max_points_per_tag: usize,
    pub rpc_timeout_ms: u64,
    pub reconnect_interval_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "hissrv".to_string(),
            queue: "hissrv".to_string(),
            cache_data_period_ms: 30_000,
            max_points_per_tag: 10_000,
            rpc_timeout_ms: 5_000,
            reconnect_interval_ms: 5_000,
        }
    }
}

impl ServiceConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

/// Physical store behind a backend id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendSpec {
    Memory,
    Sqlite { path: String },
    Metrics(MetricsConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub id: String,
    #[serde(flatten)]
    pub spec: BackendSpec,
}

/// Where directory metadata is seeded from
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    /// Daily-rolling log files are written here when set
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            dir: None,
        }
    }
}

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub backends: Vec<BackendConfig>,
    pub directory: DirectoryConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load from a YAML file (missing file means defaults) plus environment
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("HISSRV_").split("__"));
        Self::extract(figment)
    }

    /// Load from an in-memory YAML document (no environment layer)
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default())).merge(Yaml::string(yaml));
        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.service.name.is_empty() {
            return Err(HissrvError::config("service.name cannot be empty"));
        }
        if self.service.queue.is_empty() {
            return Err(HissrvError::config("service.queue cannot be empty"));
        }
        for (field, value) in [
            ("cache_data_period_ms", self.service.cache_data_period_ms),
            ("rpc_timeout_ms", self.service.rpc_timeout_ms),
            ("reconnect_interval_ms", self.service.reconnect_interval_ms),
        ] {
            if value == 0 {
                return Err(HissrvError::config(format!("service.{field} must be > 0")));
            }
        }
        if self.service.max_points_per_tag == 0 {
            return Err(HissrvError::config("service.max_points_per_tag must be > 0"));
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.id.is_empty() {
                return Err(HissrvError::config("backend id cannot be empty"));
            }
            if !seen.insert(backend.id.as_str()) {
                return Err(HissrvError::config(format!(
                    "duplicate backend id: {}",
                    backend.id
                )));
            }
            match &backend.spec {
                BackendSpec::Memory => {}
                BackendSpec::Sqlite { path } if path.is_empty() => {
                    return Err(HissrvError::config(format!(
                        "backend {}: sqlite path cannot be empty",
                        backend.id
                    )));
                }
                BackendSpec::Sqlite { .. } => {}
                BackendSpec::Metrics(metrics) => {
                    if metrics.put_url.is_empty() || metrics.get_url.is_empty() {
                        return Err(HissrvError::config(format!(
                            "backend {}: metrics put_url and get_url are required",
                            backend.id
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn write_buffer_config(&self) -> WriteBufferConfig {
        WriteBufferConfig {
            cache_data_period_ms: self.service.cache_data_period_ms,
            max_points_per_tag: self.service.max_points_per_tag,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml_str("{}").unwrap();
        assert_eq!(config.service.cache_data_period_ms, 30_000);
        assert_eq!(config.service.reconnect_interval(), Duration::from_secs(5));
        assert!(config.backends.is_empty());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_backends_parse() {
        let yaml = r#"
service:
  cache_data_period_ms: 1000
backends:
  - id: mem
    kind: memory
  - id: local
    kind: sqlite
    path: data/history.db
  - id: vm
    kind: metrics
    put_url: http://vm:4242/api/put
    get_url: http://vm:8428/api/v1/query_range
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.service.cache_data_period_ms, 1000);
        assert_eq!(config.backends.len(), 3);
        assert_eq!(config.backends[0].spec, BackendSpec::Memory);
        assert_eq!(
            config.backends[1].spec,
            BackendSpec::Sqlite {
                path: "data/history.db".into()
            }
        );
        match &config.backends[2].spec {
            BackendSpec::Metrics(m) => assert_eq!(m.boundary_lookback_ms, 3_600_000),
            other => panic!("unexpected backend: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_backend_rejected() {
        let yaml = "backends:\n  - {id: a, kind: memory}\n  - {id: a, kind: memory}\n";
        assert!(matches!(
            Config::from_yaml_str(yaml),
            Err(HissrvError::Config(msg)) if msg.contains("duplicate")
        ));
    }

    #[test]
    fn test_zero_period_rejected() {
        let yaml = "service:\n  cache_data_period_ms: 0\n";
        assert!(Config::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_unknown_backend_kind_rejected() {
        let yaml = "backends:\n  - {id: a, kind: postgres}\n";
        assert!(Config::from_yaml_str(yaml).is_err());
    }
}
