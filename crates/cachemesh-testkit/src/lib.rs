//! Test support for cachemesh.
//!
//! - [`MemoryCluster`] / [`MemoryConnector`]: in-process cache nodes holding
//!   b+tree collections, with injectable latency, request failures and
//!   unreachable nodes
//! - [`KeyMapLocator`]: fixed key placement
//! - [`RecordingObserver`]: records connection lifecycle callbacks
//! - [`ServiceFixture`]: a [`cachemesh_registry::MemoryRegistry`] laid out
//!   for one service code

mod fixture;
mod locator;
mod node;
mod observer;

pub use fixture::{init_tracing, test_identity, ServiceFixture, SERVICE_CODE};
pub use locator::KeyMapLocator;
pub use node::{MemoryCluster, MemoryConnection, MemoryConnector};
pub use observer::{ConnectionEvent, RecordingObserver};
