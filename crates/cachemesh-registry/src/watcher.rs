//! Registry sessions as seen by the membership coordinator.

use std::sync::Arc;
use std::time::Duration;

use cachemesh_config::RegistryConfig;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{RegistryBackend, RegistryError, RegistrySession, Result, SessionId, SessionState, WatchEvent};

/// Opens registry sessions and hands out their event streams.
pub struct RegistryWatcher<B: RegistryBackend> {
    backend: Arc<B>,
    address: String,
    session_timeout: Duration,
    connect_timeout: Duration,
    event_buffer: usize,
}

impl<B: RegistryBackend> RegistryWatcher<B> {
    pub fn new(backend: Arc<B>, config: &RegistryConfig) -> Self {
        Self {
            backend,
            address: config.address.clone(),
            session_timeout: config.session_timeout(),
            connect_timeout: config.connect_timeout(),
            event_buffer: config.event_buffer.max(1),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Opens a session that has not yet confirmed it is connected.
    pub async fn open(&self) -> Result<PendingSession<B::Session>> {
        info!(address = %self.address, "Trying to connect to registry");

        let (tx, events) = mpsc::channel(self.event_buffer);
        let session = self
            .backend
            .open(&self.address, self.session_timeout, tx)
            .await?;

        Ok(PendingSession {
            address: self.address.clone(),
            session,
            events,
        })
    }
}

/// A session waiting for its connected signal.
pub struct PendingSession<S: RegistrySession> {
    address: String,
    session: S,
    events: mpsc::Receiver<WatchEvent>,
}

impl<S: RegistrySession> PendingSession<S> {
    pub fn id(&self) -> SessionId {
        self.session.id()
    }

    /// Waits up to `timeout` for the session to report `Connected`.
    ///
    /// On failure the session is left open; the caller tears it down with
    /// [`PendingSession::close`].
    pub async fn wait_connected(&mut self, timeout: Duration) -> Result<()> {
        let address = self.address.clone();
        let id = self.session.id();

        let wait = async {
            loop {
                match self.events.recv().await {
                    Some(WatchEvent::SessionStateChanged(SessionState::Connected)) => {
                        return Ok(());
                    }
                    Some(WatchEvent::SessionStateChanged(state)) if state.is_terminal() => {
                        return Err(RegistryError::SessionExpired(id));
                    }
                    Some(event) => {
                        debug!(session_id = %id, ?event, "Ignoring event before connected");
                    }
                    None => return Err(RegistryError::SessionExpired(id)),
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => {
                if result.is_ok() {
                    info!(address = %address, session_id = %id, "Connected to registry");
                }
                result
            }
            Err(_) => {
                warn!(address = %address, ?timeout, "Connecting to registry timed out");
                Err(RegistryError::ConnectTimeout { address, timeout })
            }
        }
    }

    /// Promotes a connected session.
    pub fn into_watched(self) -> WatchedSession<S> {
        WatchedSession {
            session: self.session,
            events: self.events,
        }
    }

    pub async fn close(self) {
        close_session(&self.session).await;
    }
}

/// A connected session and its event stream.
pub struct WatchedSession<S: RegistrySession> {
    session: S,
    events: mpsc::Receiver<WatchEvent>,
}

impl<S: RegistrySession> WatchedSession<S> {
    pub fn id(&self) -> SessionId {
        self.session.id()
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        self.session.exists(path).await
    }

    /// Creates an ephemeral node unless one already exists at `path`.
    pub async fn register_ephemeral(&self, path: &str, data: &[u8]) -> Result<()> {
        if self.session.exists(path).await? {
            return Ok(());
        }
        match self.session.create_ephemeral(path, data).await {
            Ok(()) | Err(RegistryError::NodeExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Lists the children of `path` and keeps watching them.
    pub async fn watch(&self, path: &str) -> Result<Vec<String>> {
        self.session.children(path, true).await
    }

    /// Next event on the session's stream; `None` once the backend dropped
    /// the stream.
    pub async fn next_event(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }

    pub async fn close(self) {
        close_session(&self.session).await;
    }
}

async fn close_session<S: RegistrySession>(session: &S) {
    info!(session_id = %session.id(), "Closing registry session");
    session.close().await;
}
