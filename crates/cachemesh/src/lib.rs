//! # cachemesh
//!
//! Client control plane for a partitioned cache cluster.
//!
//! A [`CacheClient`] attaches to one service code: it registers itself with
//! the coordination service, watches the service's cache node list, keeps a
//! pool of clients connected to the live nodes and runs sorted merge gets
//! across the nodes owning the requested keys.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  node list   ┌──────────────────────┐  views   ┌────────────┐
//! │   Registry   │ ───────────> │ MembershipCoordinator │ ───────> │ ClientPool │
//! └──────────────┘  <────────── └──────────────────────┘          └─────┬──────┘
//!                  registration                                          │ handle
//!                                                              ┌─────────▼────────┐
//!                                                              │   SmgetEngine    │
//!                                                              │ partition/merge  │
//!                                                              └──────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use cachemesh::{BKeyRange, CacheClient, ConfigLoader, ElementFlagFilter};
//!
//! // cachemesh.toml and cachemesh.local.toml in the current directory
//! let client = CacheClient::builder_from(&ConfigLoader::new(), registry, connector)?
//!     .connect()
//!     .await?;
//!
//! let handle = client.sorted_merge_get(keys, BKeyRange::new(0, 100), ElementFlagFilter::DO_NOT_FILTER, 0, 10)?;
//! let result = handle.get(Duration::from_millis(500)).await?;
//! ```

mod client;
mod error;

pub use client::{CacheClient, CacheClientBuilder, DEFAULT_READY_TIMEOUT};
pub use error::{CacheMeshError, Result};

pub use cachemesh_cluster::{
    BootstrapStatus, ClientHandle, ClientPool, ClusterError, ConnectionObserver,
    CoordinatorHandle, CoordinatorState, HashRing, HostIdentity, HostInfo, LocatorFactory,
    NodeConnection, NodeConnector, NodeLocator, ReadyLatch, StaticIdentity, SystemIdentity,
    TransportError,
};
pub use cachemesh_config::{CacheMeshConfig, ConfigLoader};
pub use cachemesh_registry::{RegistryBackend, RegistryError};
pub use cachemesh_smget::{MergedResult, SmgetError, SmgetHandle, SmgetStatus};
pub use cachemesh_types::{
    BKey, BKeyRange, ClusterView, CompOp, BitOp, Direction, ElementFlagFilter, NodeAddress,
    SmgetElement,
};
