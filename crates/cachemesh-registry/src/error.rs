//! Error types for registry access.

use std::time::Duration;

use thiserror::Error;

use crate::SessionId;

/// Registry errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The node (or its parent, on create) does not exist.
    #[error("no node at {0}")]
    NoNode(String),

    /// A node already exists at the path.
    #[error("node already exists at {0}")]
    NodeExists(String),

    /// The session ended; it has to be replaced by a new one.
    #[error("session {0} expired")]
    SessionExpired(SessionId),

    /// The session was closed by its owner.
    #[error("session {0} closed")]
    Closed(SessionId),

    /// The connected signal did not arrive in time.
    #[error("connecting to registry {address} timed out after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    /// The backend could not open a session at all.
    #[error("connection to registry {0} refused")]
    ConnectionRefused(String),
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
