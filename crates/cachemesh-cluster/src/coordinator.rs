//! Membership coordinator.
//!
//! Owns the registry session for one service code. A single background
//! task consumes the session's events, turns node-list changes into
//! cluster views for the client pool, and re-establishes the session after
//! it dies, backing off between failed attempts.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Monitoring
//!                     ^                          |
//!                     |     session dead         v
//!                     +------- Reconnecting <----+
//! any state -> Shutdown
//! ```

use std::fmt::{self, Display};
use std::sync::{Arc, Mutex};

use cachemesh_config::CacheMeshConfig;
use cachemesh_registry::{
    RegistryBackend, RegistryError, RegistrySession, RegistryWatcher, SessionState, WatchEvent,
    WatchedSession,
};
use cachemesh_types::{ClusterView, NodeAddress};
use chrono::Local;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    BootstrapStatus, ClientPool, ClusterError, ConnectionObserver, HashRing, HostIdentity,
    LocatorFactory, NodeConnector, PoolContext, ReadyLatch, Result, SelfRegistration,
    SystemIdentity,
};

/// Lifecycle state of a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Disconnected,
    Connecting,
    Connected,
    Monitoring,
    Reconnecting,
    Shutdown,
}

impl Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Monitoring => "monitoring",
            Self::Reconnecting => "reconnecting",
            Self::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

struct Shared<N: NodeConnector> {
    pool: watch::Sender<Option<Arc<ClientPool<N>>>>,
    state: watch::Sender<CoordinatorState>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Observes and stops a running coordinator.
pub struct CoordinatorHandle<N: NodeConnector> {
    shared: Arc<Shared<N>>,
}

impl<N: NodeConnector> Clone for CoordinatorHandle<N> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<N: NodeConnector> CoordinatorHandle<N> {
    /// The current pool; `None` until the first node list was received.
    pub fn client_pool(&self) -> Option<Arc<ClientPool<N>>> {
        self.shared.pool.borrow().clone()
    }

    /// Waits for the first pool. Returns `None` if the coordinator shuts
    /// down before one exists.
    pub async fn wait_for_pool(&self) -> Option<Arc<ClientPool<N>>> {
        let mut pool = self.shared.pool.subscribe();
        tokio::select! {
            biased;
            result = pool.wait_for(Option::is_some) => result.ok().and_then(|pool| pool.clone()),
            () = self.shared.shutdown.cancelled() => self.client_pool(),
        }
    }

    pub fn state(&self) -> CoordinatorState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CoordinatorState> {
        self.shared.state.subscribe()
    }

    /// Waits until the coordinator reaches `state`.
    pub async fn wait_for_state(&self, state: CoordinatorState) {
        let mut states = self.shared.state.subscribe();
        // The sender is owned by `self.shared`.
        let _ = states.wait_for(|current| *current == state).await;
    }

    /// Requests shutdown. Idempotent.
    pub fn shutdown(&self) {
        if !self.shared.shutdown.is_cancelled() {
            info!("Shutting down membership coordinator");
            self.shared.shutdown.cancel();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Waits for the background task to exit.
    pub async fn join(&self) {
        let task = self.shared.task.lock().ok().and_then(|mut task| task.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Membership coordinator task failed");
            }
        }
    }

    fn set_task(&self, task: JoinHandle<()>) {
        if let Ok(mut slot) = self.shared.task.lock() {
            *slot = Some(task);
        }
    }
}

/// A connected session plus the node list read while setting it up.
struct ActiveSession<S: RegistrySession> {
    session: WatchedSession<S>,
    initial_children: Option<Vec<String>>,
}

enum MonitorExit {
    Shutdown,
    SessionDead,
}

/// Tracks one service code's cache nodes and keeps a client pool on them.
pub struct MembershipCoordinator<B: RegistryBackend, N: NodeConnector> {
    config: CacheMeshConfig,
    watcher: RegistryWatcher<B>,
    pool_context: PoolContext<N>,
    identity: Arc<dyn HostIdentity>,
    ready: ReadyLatch,
    version: String,
    view: Option<Arc<ClusterView>>,
    shared: Arc<Shared<N>>,
}

impl<B: RegistryBackend, N: NodeConnector> MembershipCoordinator<B, N> {
    /// Builds a coordinator. Performs no I/O.
    pub fn create(
        config: CacheMeshConfig,
        backend: Arc<B>,
        connector: Arc<N>,
        ready: ReadyLatch,
    ) -> Result<Self> {
        config.validate()?;

        let watcher = RegistryWatcher::new(backend, &config.registry);
        let shutdown = CancellationToken::new();
        let pool_context = PoolContext {
            service_code: config.service.code.clone(),
            config: config.pool.clone(),
            connector,
            locators: HashRing::factory(),
            observers: Vec::new(),
            shutdown: shutdown.child_token(),
        };
        let (pool, _) = watch::channel(None);
        let (state, _) = watch::channel(CoordinatorState::Disconnected);

        Ok(Self {
            config,
            watcher,
            pool_context,
            identity: Arc::new(SystemIdentity),
            ready,
            version: env!("CARGO_PKG_VERSION").to_string(),
            view: None,
            shared: Arc::new(Shared {
                pool,
                state,
                shutdown,
                task: Mutex::new(None),
            }),
        })
    }

    pub fn with_identity(mut self, identity: impl HostIdentity) -> Self {
        self.identity = Arc::new(identity);
        self
    }

    pub fn with_locators(mut self, locators: LocatorFactory) -> Self {
        self.pool_context.locators = locators;
        self
    }

    /// Adds an observer notified by every pool member.
    pub fn with_observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        self.pool_context.observers.push(observer);
        self
    }

    pub fn handle(&self) -> CoordinatorHandle<N> {
        CoordinatorHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Makes the first connection attempt and starts the background task.
    ///
    /// Startup failures are returned to the caller. Shutdown requested
    /// during the attempt is not a failure: the task starts and exits
    /// straight away.
    pub async fn start(mut self) -> Result<CoordinatorHandle<N>> {
        info!(
            service_code = %self.config.service.code,
            address = %self.watcher.address(),
            "Starting membership coordinator"
        );

        let first = match self.connect_attempt().await {
            Ok(active) => Some(active),
            Err(ClusterError::Shutdown) => {
                warn!(
                    service_code = %self.config.service.code,
                    "Interrupted while connecting to registry"
                );
                None
            }
            Err(e) => {
                error!(
                    service_code = %self.config.service.code,
                    error = %e,
                    "Failed to start membership coordinator"
                );
                self.set_state(CoordinatorState::Disconnected);
                return Err(e);
            }
        };

        let handle = self.handle();
        handle.set_task(tokio::spawn(self.run(first)));
        Ok(handle)
    }

    async fn run(mut self, first: Option<ActiveSession<B::Session>>) {
        let mut active = first;

        while !self.shared.shutdown.is_cancelled() {
            let Some(mut current) = active.take() else {
                self.set_state(CoordinatorState::Reconnecting);
                match self.connect_attempt().await {
                    Ok(session) => active = Some(session),
                    Err(ClusterError::Shutdown) => break,
                    Err(e) => {
                        warn!(
                            error = %e,
                            backoff = ?self.config.coordinator.reconnect_backoff(),
                            "Reconnecting to registry failed; backing off"
                        );
                        if !self.backoff().await {
                            break;
                        }
                    }
                }
                continue;
            };

            if let Some(children) = current.initial_children.take() {
                self.apply_node_list(children).await;
            }
            self.set_state(CoordinatorState::Monitoring);

            match self.monitor(&mut current).await {
                MonitorExit::Shutdown => {
                    current.session.close().await;
                    break;
                }
                MonitorExit::SessionDead => {
                    warn!("Unexpected disconnection from registry; reconnecting");
                    current.session.close().await;
                }
            }
        }

        if let Some(current) = active.take() {
            current.session.close().await;
        }
        let pool = self.shared.pool.borrow().clone();
        if let Some(pool) = pool {
            pool.shutdown();
        }
        self.set_state(CoordinatorState::Shutdown);
        info!(service_code = %self.config.service.code, "Membership coordinator stopped");
    }

    /// Sleeps for the reconnect backoff. Returns `false` if shutdown was
    /// requested meanwhile.
    async fn backoff(&self) -> bool {
        tokio::select! {
            biased;
            () = self.shared.shutdown.cancelled() => false,
            () = tokio::time::sleep(self.config.coordinator.reconnect_backoff()) => true,
        }
    }

    async fn connect_attempt(&mut self) -> Result<ActiveSession<B::Session>> {
        self.set_state(CoordinatorState::Connecting);

        let mut pending = self.watcher.open().await.map_err(|e| {
            ClusterError::init_failure(
                format!("cannot open registry session to {}", self.watcher.address()),
                e,
            )
        })?;

        let timeout = self.watcher.connect_timeout();
        let connected = tokio::select! {
            biased;
            () = self.shared.shutdown.cancelled() => Err(ClusterError::Shutdown),
            result = pending.wait_connected(timeout) => result.map_err(|e| match e {
                RegistryError::ConnectTimeout { address, timeout } => {
                    ClusterError::AdminConnectTimeout { address, timeout }
                }
                other => ClusterError::init_failure("registry session ended before connecting", other),
            }),
        };
        if let Err(e) = connected {
            pending.close().await;
            return Err(e);
        }

        let session = pending.into_watched();
        match self.prepare(&session).await {
            Ok(children) => {
                self.set_state(CoordinatorState::Connected);
                Ok(ActiveSession {
                    session,
                    initial_children: Some(children),
                })
            }
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }

    /// Checks the service exists, registers this client and starts watching
    /// the node list.
    async fn prepare(&self, session: &WatchedSession<B::Session>) -> Result<Vec<String>> {
        let service_code = &self.config.service.code;
        let cache_list = self.config.registry.cache_list_path(service_code);

        let exists = session
            .exists(&cache_list)
            .await
            .map_err(|e| ClusterError::init_failure("cannot read the cache node list", e))?;
        if !exists {
            error!(service_code = %service_code, "Service code not found");
            return Err(ClusterError::ServiceNotFound(service_code.clone()));
        }

        let host = self
            .identity
            .resolve()
            .map_err(|e| ClusterError::init_failure("cannot resolve the local host", e))?;
        let registration = SelfRegistration {
            host,
            pool_size: self.config.pool.size,
            client_tag: self.config.service.client_tag.clone(),
            version: self.version.clone(),
            created_at: Local::now(),
            session_id: session.id(),
        };
        let path = registration.path(&self.config.registry.client_list_path(service_code));
        session.register_ephemeral(&path, &[]).await.map_err(|e| {
            ClusterError::init_failure(format!("cannot register client at {path}"), e)
        })?;
        info!(path = %path, session_id = %session.id(), "Registered client");

        session
            .watch(&cache_list)
            .await
            .map_err(|e| ClusterError::init_failure("cannot watch the cache node list", e))
    }

    async fn monitor(&mut self, active: &mut ActiveSession<B::Session>) -> MonitorExit {
        let cache_list = self.config.registry.cache_list_path(&self.config.service.code);

        loop {
            let event = tokio::select! {
                biased;
                () = self.shared.shutdown.cancelled() => return MonitorExit::Shutdown,
                event = active.session.next_event() => event,
            };

            match event {
                None => return MonitorExit::SessionDead,
                Some(WatchEvent::SessionStateChanged(state)) if state.is_terminal() => {
                    warn!(session_id = %active.session.id(), ?state, "Registry session ended");
                    return MonitorExit::SessionDead;
                }
                Some(WatchEvent::SessionStateChanged(SessionState::Disconnected)) => {
                    warn!(session_id = %active.session.id(), "Registry connection lost; waiting for it to recover");
                }
                Some(WatchEvent::SessionStateChanged(state)) => {
                    info!(session_id = %active.session.id(), ?state, "Registry session state changed");
                }
                Some(WatchEvent::ChildrenChanged { path, children }) if path == cache_list => {
                    self.apply_node_list(children).await;
                }
                Some(WatchEvent::ChildrenChanged { path, .. }) => {
                    debug!(path = %path, "Ignoring children change on unwatched path");
                }
            }
        }
    }

    /// Turns a registry node list into a cluster view for the pool.
    ///
    /// The first list bootstraps the pool. Later lists are pushed to every
    /// member unless they name exactly the current members. An empty list
    /// never replaces a non-empty view.
    async fn apply_node_list(&mut self, children: Vec<String>) {
        let mut addresses: Vec<NodeAddress> = Vec::with_capacity(children.len());
        for child in &children {
            match NodeAddress::from_registry_child(child) {
                Ok(address) => {
                    if !addresses.contains(&address) {
                        addresses.push(address);
                    }
                }
                Err(e) => warn!(child = %child, error = %e, "Ignoring malformed cache node entry"),
            }
        }

        let pool = self.shared.pool.borrow().clone();
        let (Some(pool), Some(current)) = (pool, self.view.clone()) else {
            let view = Arc::new(ClusterView::new(addresses));
            let (pool, status) =
                ClientPool::bootstrap(&self.pool_context, Arc::clone(&view), &self.ready).await;
            if let BootstrapStatus::Degraded { pending } = status {
                debug!(pending, "Client pool started degraded");
            }
            self.view = Some(view);
            self.shared.pool.send_replace(Some(Arc::new(pool)));
            return;
        };

        if current.has_members(&addresses) {
            debug!(generation = current.generation(), "Cache node list unchanged");
            return;
        }
        if addresses.is_empty() {
            warn!(
                generation = current.generation(),
                nodes = current.len(),
                "Registry reported no cache nodes; keeping the current view"
            );
            return;
        }

        let next = Arc::new(current.successor(addresses));
        info!(
            generation = next.generation(),
            nodes = next.len(),
            "Cache node list changed"
        );
        pool.apply_view(Arc::clone(&next));
        self.view = Some(next);
    }

    fn set_state(&self, state: CoordinatorState) {
        let previous = self.shared.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Coordinator state changed");
        }
    }
}
