//! Error types for the cachemesh client.

use thiserror::Error;

use cachemesh_cluster::ClusterError;
use cachemesh_smget::SmgetError;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, CacheMeshError>;

/// Errors surfaced by [`crate::CacheClient`].
#[derive(Debug, Error)]
pub enum CacheMeshError {
    /// Layered configuration could not be merged or deserialized.
    #[error("failed to load configuration: {0:#}")]
    Config(anyhow::Error),

    /// Attaching to the cluster failed.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// A sorted merge get was rejected or could not be dispatched.
    #[error(transparent)]
    Smget(#[from] SmgetError),
}
