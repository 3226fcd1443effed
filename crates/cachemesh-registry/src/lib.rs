//! Coordination service access for cachemesh.
//!
//! The registry is the external source of truth for cluster membership.
//! This crate defines:
//! - the backend contract a coordination service client implements
//!   ([`RegistryBackend`], [`RegistrySession`]),
//! - the [`RegistryWatcher`] that opens sessions, waits for the connected
//!   signal and exposes node-list changes and session state as one bounded
//!   event stream,
//! - [`MemoryRegistry`], an in-process backend with ephemeral nodes,
//!   persistent children watches and fault injection.
//!
//! Backends publish [`WatchEvent`]s from their own execution context into
//! the bounded channel handed to [`RegistryBackend::open`]; the watcher's
//! owner is the only consumer.

mod backend;
mod error;
mod event;
mod memory;
mod watcher;

pub use backend::{RegistryBackend, RegistrySession};
pub use error::{RegistryError, Result};
pub use event::{SessionId, SessionState, WatchEvent};
pub use memory::{MemoryRegistry, MemorySession};
pub use watcher::{PendingSession, RegistryWatcher, WatchedSession};
