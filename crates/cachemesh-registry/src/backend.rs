//! Backend contract implemented by coordination service clients.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::{Result, SessionId, WatchEvent};

/// A coordination service the client can open sessions against.
pub trait RegistryBackend: Send + Sync + 'static {
    type Session: RegistrySession;

    /// Opens a session against `address`.
    ///
    /// Returns as soon as the session exists. The connected signal, and all
    /// later session-state and children-change events, are published into
    /// `events` from the backend's own execution context.
    fn open(
        &self,
        address: &str,
        session_timeout: Duration,
        events: mpsc::Sender<WatchEvent>,
    ) -> impl Future<Output = Result<Self::Session>> + Send;
}

/// An open session.
pub trait RegistrySession: Send + Sync + 'static {
    fn id(&self) -> SessionId;

    fn exists(&self, path: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Creates a node removed automatically when this session ends.
    fn create_ephemeral(&self, path: &str, data: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Lists the children of `path`; with `watch`, later changes are
    /// published as [`WatchEvent::ChildrenChanged`].
    fn children(&self, path: &str, watch: bool) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Ends the session. Idempotent.
    fn close(&self) -> impl Future<Output = ()> + Send;
}
