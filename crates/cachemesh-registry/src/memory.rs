//! In-process registry backend.
//!
//! Keeps a path tree in memory with persistent and ephemeral nodes.
//! Children watches are persistent: once a session watched a path, every
//! change to that path's children is published to it until the session
//! ends. Events for each session are queued and forwarded into the
//! session's bounded channel by a delivery task owned by the registry, so
//! mutations never block on a slow consumer.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::{RegistryBackend, RegistryError, RegistrySession, Result, SessionId, SessionState, WatchEvent};

#[derive(Debug)]
struct Node {
    data: Vec<u8>,
    ephemeral_owner: Option<SessionId>,
}

#[derive(Debug)]
struct SessionEntry {
    queue: mpsc::UnboundedSender<WatchEvent>,
    watches: HashSet<String>,
    connected: bool,
}

#[derive(Debug, Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    sessions: HashMap<SessionId, SessionEntry>,
    next_session: u64,
    refuse_connections: bool,
    opened: u64,
}

impl Tree {
    fn children(&self, path: &str) -> Vec<String> {
        let prefix = child_prefix(path);
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .filter_map(|(p, _)| {
                let rest = &p[prefix.len()..];
                (!rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn node_exists(&self, path: &str) -> bool {
        path == "/" || self.nodes.contains_key(path)
    }

    fn create(&mut self, path: &str, data: &[u8], owner: Option<SessionId>) -> Result<()> {
        let parent = parent_of(path).ok_or_else(|| RegistryError::NoNode(path.to_string()))?;
        if !self.node_exists(parent) {
            return Err(RegistryError::NoNode(parent.to_string()));
        }
        if self.nodes.contains_key(path) {
            return Err(RegistryError::NodeExists(path.to_string()));
        }

        self.nodes.insert(
            path.to_string(),
            Node {
                data: data.to_vec(),
                ephemeral_owner: owner,
            },
        );
        self.notify_children_changed(parent);
        Ok(())
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        if self.nodes.remove(path).is_none() {
            return Err(RegistryError::NoNode(path.to_string()));
        }
        if let Some(parent) = parent_of(path) {
            self.notify_children_changed(parent);
        }
        Ok(())
    }

    fn notify_children_changed(&self, path: &str) {
        let children = self.children(path);
        for (id, session) in &self.sessions {
            if session.watches.contains(path) {
                debug!(session_id = %id, path, "Publishing children change");
                let _ = session.queue.send(WatchEvent::ChildrenChanged {
                    path: path.to_string(),
                    children: children.clone(),
                });
            }
        }
    }

    /// Removes a session and its ephemeral nodes, publishing `state` to it last.
    fn end_session(&mut self, id: SessionId, state: SessionState) -> bool {
        let Some(session) = self.sessions.remove(&id) else {
            return false;
        };

        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(id))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            let _ = self.delete(&path);
        }

        let _ = session
            .queue
            .send(WatchEvent::SessionStateChanged(state));
        true
    }

    fn live_session(&mut self, id: SessionId) -> Result<&mut SessionEntry> {
        self.sessions
            .get_mut(&id)
            .ok_or(RegistryError::SessionExpired(id))
    }
}

fn child_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{}/", path.trim_end_matches('/'))
    }
}

fn parent_of(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    if idx == 0 {
        (trimmed.len() > 1).then_some("/")
    } else {
        Some(&trimmed[..idx])
    }
}

/// In-memory registry shared by all sessions opened from it.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    tree: Arc<Mutex<Tree>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a persistent node; the parent must exist.
    pub fn create_persistent(&self, path: &str) -> Result<()> {
        self.lock().create(path, &[], None)
    }

    /// Creates every missing node along `path`.
    pub fn create_all(&self, path: &str) -> Result<()> {
        let mut tree = self.lock();
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            if !tree.node_exists(&current) {
                tree.create(&current, &[], None)?;
            }
        }
        Ok(())
    }

    pub fn delete(&self, path: &str) -> Result<()> {
        self.lock().delete(path)
    }

    pub fn node_exists(&self, path: &str) -> bool {
        self.lock().node_exists(path)
    }

    pub fn children_of(&self, path: &str) -> Vec<String> {
        self.lock().children(path)
    }

    pub fn node_data(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().nodes.get(path).map(|n| n.data.clone())
    }

    /// Session owning the ephemeral node at `path`.
    pub fn ephemeral_owner(&self, path: &str) -> Option<SessionId> {
        self.lock().nodes.get(path).and_then(|n| n.ephemeral_owner)
    }

    /// When set, newly opened sessions never receive the connected signal.
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    /// Expires a session as if the service lost it.
    pub fn expire_session(&self, id: SessionId) -> bool {
        self.lock().end_session(id, SessionState::Expired)
    }

    /// Publishes a transient disconnect to a session.
    pub fn disconnect_session(&self, id: SessionId) {
        if let Some(session) = self.lock().sessions.get_mut(&id) {
            session.connected = false;
            let _ = session
                .queue
                .send(WatchEvent::SessionStateChanged(SessionState::Disconnected));
        }
    }

    /// Restores a transiently disconnected session.
    pub fn reconnect_session(&self, id: SessionId) {
        if let Some(session) = self.lock().sessions.get_mut(&id) {
            session.connected = true;
            let _ = session
                .queue
                .send(WatchEvent::SessionStateChanged(SessionState::Connected));
        }
    }

    /// Returns true if the session exists and is not transiently disconnected.
    pub fn is_connected(&self, id: SessionId) -> bool {
        self.lock().sessions.get(&id).is_some_and(|s| s.connected)
    }

    pub fn is_live(&self, id: SessionId) -> bool {
        self.lock().sessions.contains_key(&id)
    }

    pub fn live_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.lock().sessions.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Number of sessions ever opened.
    pub fn opened_sessions(&self) -> u64 {
        self.lock().opened
    }
}

impl RegistryBackend for MemoryRegistry {
    type Session = MemorySession;

    async fn open(
        &self,
        address: &str,
        _session_timeout: Duration,
        events: mpsc::Sender<WatchEvent>,
    ) -> Result<MemorySession> {
        let (queue, mut pending) = mpsc::unbounded_channel::<WatchEvent>();

        tokio::spawn(async move {
            while let Some(event) = pending.recv().await {
                if events.send(event).await.is_err() {
                    break;
                }
            }
        });

        let mut tree = self.lock();
        tree.next_session += 1;
        tree.opened += 1;
        let id = SessionId::new(0x1000 + tree.next_session);
        let connected = !tree.refuse_connections;
        if connected {
            let _ = queue.send(WatchEvent::SessionStateChanged(SessionState::Connected));
        }
        tree.sessions.insert(
            id,
            SessionEntry {
                queue,
                watches: HashSet::new(),
                connected,
            },
        );
        debug!(address, session_id = %id, connected, "Opened in-memory registry session");

        Ok(MemorySession {
            id,
            registry: self.clone(),
        })
    }
}

/// Session handle returned by [`MemoryRegistry`].
#[derive(Debug, Clone)]
pub struct MemorySession {
    id: SessionId,
    registry: MemoryRegistry,
}

impl RegistrySession for MemorySession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let mut tree = self.registry.lock();
        tree.live_session(self.id)?;
        Ok(tree.node_exists(path))
    }

    async fn create_ephemeral(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut tree = self.registry.lock();
        tree.live_session(self.id)?;
        tree.create(path, data, Some(self.id))
    }

    async fn children(&self, path: &str, watch: bool) -> Result<Vec<String>> {
        let mut tree = self.registry.lock();
        if !tree.node_exists(path) {
            tree.live_session(self.id)?;
            return Err(RegistryError::NoNode(path.to_string()));
        }
        let session = tree.live_session(self.id)?;
        if watch {
            session.watches.insert(path.to_string());
        }
        Ok(tree.children(path))
    }

    async fn close(&self) {
        self.registry.lock().end_session(self.id, SessionState::Closed);
    }
}
