//! Error types for cluster membership.

use std::time::Duration;

use cachemesh_config::ConfigError;
use thiserror::Error;

use crate::TransportError;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Cluster membership errors.
#[derive(Error, Debug)]
pub enum ClusterError {
    /// The registry session was not confirmed within the connect timeout.
    #[error("connecting to registry {address} timed out after {timeout:?}")]
    AdminConnectTimeout { address: String, timeout: Duration },

    /// The service code has no node-list path in the registry.
    #[error("service code not found: {0}")]
    ServiceNotFound(String),

    /// Any other setup failure, wrapping its cause.
    #[error("client initialization failed: {reason}")]
    InitializationFailure {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Shutdown was requested while the operation was in progress.
    #[error("coordinator shut down")]
    Shutdown,
}

impl ClusterError {
    pub(crate) fn init_failure(
        reason: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::InitializationFailure {
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    /// Returns true for the startup failures the reconnect loop backs off
    /// and retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AdminConnectTimeout { .. }
                | Self::ServiceNotFound(_)
                | Self::InitializationFailure { .. }
        )
    }
}

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, ClusterError>;
