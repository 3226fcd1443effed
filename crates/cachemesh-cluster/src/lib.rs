//! # cachemesh-cluster: Cluster membership for cachemesh clients
//!
//! Keeps a pool of cache clients attached to the live set of cache nodes of
//! one service code:
//!
//! - [`MembershipCoordinator`]: registry session lifecycle, self-registration,
//!   node-list watching and reconnect with backoff
//! - [`ClientPool`]: bootstrap with a bounded connect wait and non-blocking
//!   view propagation to its members
//! - [`ClientHandle`]: one pool member and its connections
//! - [`HashRing`]: default key placement

mod coordinator;
mod error;
mod handle;
mod identity;
mod locator;
mod pool;
mod transport;

pub use coordinator::{CoordinatorHandle, CoordinatorState, MembershipCoordinator};
pub use error::{ClusterError, Result};
pub use handle::{ClientHandle, HandleOptions, RoutingTable};
pub use identity::{HostIdentity, HostInfo, SelfRegistration, StaticIdentity, SystemIdentity};
pub use locator::{HashRing, LocatorFactory, NodeLocator};
pub use pool::{BootstrapStatus, ClientPool, PoolContext, ReadyLatch};
pub use transport::{ConnectionObserver, NodeConnection, NodeConnector, TransportError};
