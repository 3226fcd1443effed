//! Contract with the cache node transport.
//!
//! The byte-level protocol and socket handling live behind these traits;
//! pool members only open connections, observe them, and hand sorted merge
//! sub-requests to them.

use std::future::Future;

use cachemesh_types::{NodeAddress, NodeSmgetRequest, SmgetPartial};
use thiserror::Error;

/// Transport errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Per-handle transport resources could not be set up.
    #[error("transport setup failed: {0}")]
    Setup(String),

    /// The node could not be reached.
    #[error("failed to connect to {address}: {reason}")]
    Connect { address: NodeAddress, reason: String },

    /// The node failed a request.
    #[error("request to {address} failed: {reason}")]
    Request { address: NodeAddress, reason: String },

    /// The connection is closed.
    #[error("connection to {0} closed")]
    Closed(NodeAddress),
}

/// Opens connections to cache nodes.
pub trait NodeConnector: Send + Sync + 'static {
    type Connection: NodeConnection;

    /// Prepares the resources of one pool member (its I/O dispatcher).
    fn setup(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn connect(
        &self,
        address: &NodeAddress,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// An established connection to one cache node.
pub trait NodeConnection: Send + Sync + 'static {
    fn address(&self) -> &NodeAddress;

    /// Runs one node's part of a sorted merge get.
    fn smget(
        &self,
        request: NodeSmgetRequest,
    ) -> impl Future<Output = Result<SmgetPartial, TransportError>> + Send;
}

/// Receives connection lifecycle notifications from a pool member.
pub trait ConnectionObserver: Send + Sync {
    /// `reconnect_count` is the number of failed attempts that preceded
    /// this connection.
    fn connection_established(&self, address: &NodeAddress, reconnect_count: u32);

    fn connection_lost(&self, address: &NodeAddress);
}
