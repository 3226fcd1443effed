//! Configuration for cachemesh clients.
//!
//! [`ConfigLoader`] merges, lowest precedence first: built-in defaults,
//! `~/.config/cachemesh/config.toml`, `cachemesh.toml` and
//! `cachemesh.local.toml` in the project directory, then `CACHEMESH_*`
//! environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::{Layer, Paths, LOCAL_CONFIG_FILE, PROJECT_CONFIG_FILE};

/// Main cachemesh configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheMeshConfig {
    pub registry: RegistryConfig,
    pub service: ServiceConfig,
    pub pool: PoolConfig,
    pub coordinator: CoordinatorConfig,
    pub smget: SmgetConfig,
}

/// Coordination service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub address: String,
    /// Root of the registry path layout (`{root}/cache_list`, `{root}/client_list`).
    pub root: String,
    pub session_timeout_ms: u64,
    /// How long session establishment waits for the connected signal.
    pub connect_timeout_ms: u64,
    /// Capacity of the bounded channel registry events are published into.
    pub event_buffer: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:2181".to_string(),
            root: "/cachemesh".to_string(),
            session_timeout_ms: 15_000,
            connect_timeout_ms: 15_000,
            event_buffer: 64,
        }
    }
}

impl RegistryConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `{root}/cache_list/{service_code}`
    pub fn cache_list_path(&self, service_code: &str) -> String {
        format!("{}/cache_list/{}", self.root.trim_end_matches('/'), service_code)
    }

    /// `{root}/client_list/{service_code}`
    pub fn client_list_path(&self, service_code: &str) -> String {
        format!("{}/client_list/{}", self.root.trim_end_matches('/'), service_code)
    }
}

/// Which cluster this client attaches to and how it identifies itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub code: String,
    /// Client kind embedded in the self-registration record.
    pub client_tag: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            code: String::new(),
            client_tag: "rust".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub size: usize,
    /// Bootstrap connect-wait budget; 0 means 50ms per node address.
    pub wait_time_for_connect_ms: u64,
    /// Interval at which a pool member retries nodes it failed to reach.
    pub reconnect_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 1,
            wait_time_for_connect_ms: 0,
            reconnect_interval_ms: 1_000,
        }
    }
}

impl PoolConfig {
    /// Per-address share of the bootstrap budget when none is configured.
    pub const CONNECT_WAIT_PER_ADDRESS: Duration = Duration::from_millis(50);

    /// Effective bootstrap connect-wait budget for `address_count` nodes.
    pub fn connect_wait(&self, address_count: usize) -> Duration {
        if self.wait_time_for_connect_ms == 0 {
            Self::CONNECT_WAIT_PER_ADDRESS * address_count as u32
        } else {
            Duration::from_millis(self.wait_time_for_connect_ms)
        }
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Sleep between failed reconnect attempts.
    pub reconnect_backoff_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff_ms: 5_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmgetConfig {
    /// Handle-level deadline after which outstanding sub-requests are
    /// cancelled; 0 disables it.
    pub operation_timeout_ms: u64,
}

impl Default for SmgetConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 700,
        }
    }
}

impl SmgetConfig {
    pub fn operation_timeout(&self) -> Option<Duration> {
        (self.operation_timeout_ms > 0).then(|| Duration::from_millis(self.operation_timeout_ms))
    }
}

impl CacheMeshConfig {
    /// Load configuration from default locations
    pub fn load() -> anyhow::Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        ConfigLoader::new()
            .with_project_dir(project_dir.as_ref())
            .load()
    }

    /// Read one TOML file on top of the defaults, ignoring every other layer
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse a single TOML document on top of the defaults
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::ParseError {
            path: "<inline>".into(),
            source,
        })
    }

    /// Configuration for attaching to `service_code` through `registry_address`
    pub fn for_service(registry_address: impl Into<String>, service_code: impl Into<String>) -> Self {
        Self {
            registry: RegistryConfig {
                address: registry_address.into(),
                ..Default::default()
            },
            service: ServiceConfig {
                code: service_code.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Reject settings the client cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.code.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "service.code must not be empty".to_string(),
            ));
        }
        if self.service.code.contains('/') {
            return Err(ConfigError::ValidationError(format!(
                "service.code must not contain '/': {}",
                self.service.code
            )));
        }
        if self.pool.size == 0 {
            return Err(ConfigError::ValidationError(
                "pool.size must be at least 1".to_string(),
            ));
        }
        if self.pool.reconnect_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "pool.reconnect_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.coordinator.reconnect_backoff_ms == 0 {
            return Err(ConfigError::ValidationError(
                "coordinator.reconnect_backoff_ms must be at least 1".to_string(),
            ));
        }
        if self.registry.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "registry.event_buffer must be at least 1".to_string(),
            ));
        }
        if !self.registry.root.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "registry.root must be absolute: {}",
                self.registry.root
            )));
        }
        Ok(())
    }
}
