//! The client entry point.
//!
//! [`CacheClient`] is the call site that wires the two-step coordinator
//! lifecycle together: the coordinator is created without side effects,
//! then started, and the client waits for the first pool bootstrap before
//! it is handed out.

use std::sync::Arc;
use std::time::Duration;

use cachemesh_cluster::{
    ConnectionObserver, CoordinatorHandle, HostIdentity, LocatorFactory, MembershipCoordinator,
    NodeConnector, ReadyLatch,
};
use cachemesh_config::{CacheMeshConfig, ConfigLoader};
use cachemesh_registry::RegistryBackend;
use cachemesh_smget::{SmgetEngine, SmgetError, SmgetHandle, SmgetRequest};
use cachemesh_types::{BKeyRange, ElementFlagFilter};
use tracing::{debug, info, warn};

use crate::error::{CacheMeshError, Result};

/// How long [`CacheClientBuilder::connect`] waits for the first pool
/// bootstrap by default.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Configures a [`CacheClient`] before it connects.
pub struct CacheClientBuilder<B: RegistryBackend, N: NodeConnector> {
    coordinator: MembershipCoordinator<B, N>,
    ready: ReadyLatch,
    ready_timeout: Duration,
    engine: SmgetEngine,
}

impl<B: RegistryBackend, N: NodeConnector> CacheClientBuilder<B, N> {
    pub fn with_identity(mut self, identity: impl HostIdentity) -> Self {
        self.coordinator = self.coordinator.with_identity(identity);
        self
    }

    pub fn with_locators(mut self, locators: LocatorFactory) -> Self {
        self.coordinator = self.coordinator.with_locators(locators);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        self.coordinator = self.coordinator.with_observer(observer);
        self
    }

    /// Bounds the wait for the first pool bootstrap in [`Self::connect`].
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Starts membership monitoring and waits for the pool.
    ///
    /// A bootstrap that does not finish within the ready timeout is not an
    /// error: the client is returned and requests fail with
    /// [`SmgetError::NoClientAvailable`] until a pool exists.
    pub async fn connect(self) -> Result<CacheClient<N>> {
        let coordinator = self.coordinator.start().await?;

        if self.ready.wait_timeout(self.ready_timeout).await {
            info!(state = %coordinator.state(), "Cache client ready");
        } else {
            warn!(
                timeout = ?self.ready_timeout,
                state = %coordinator.state(),
                "Cache client not ready within timeout"
            );
        }

        Ok(CacheClient {
            coordinator,
            engine: self.engine,
        })
    }
}

/// A client attached to one service code of a cache cluster.
pub struct CacheClient<N: NodeConnector> {
    coordinator: CoordinatorHandle<N>,
    engine: SmgetEngine,
}

impl<N: NodeConnector> CacheClient<N> {
    /// Creates a builder. Validates `config` but performs no I/O.
    pub fn builder<B: RegistryBackend>(
        config: CacheMeshConfig,
        backend: Arc<B>,
        connector: Arc<N>,
    ) -> Result<CacheClientBuilder<B, N>> {
        let engine = SmgetEngine::new(&config.smget);
        let ready = ReadyLatch::new();
        let coordinator = MembershipCoordinator::create(config, backend, connector, ready.clone())?;
        Ok(CacheClientBuilder {
            coordinator,
            ready,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            engine,
        })
    }

    /// Creates a builder from the configuration layers `loader` finds.
    pub fn builder_from<B: RegistryBackend>(
        loader: &ConfigLoader,
        backend: Arc<B>,
        connector: Arc<N>,
    ) -> Result<CacheClientBuilder<B, N>> {
        let config = loader.load().map_err(CacheMeshError::Config)?;
        debug!(
            project_dir = %loader.paths().project_dir().display(),
            service = %config.service.code,
            "Loaded client configuration"
        );
        Self::builder(config, backend, connector)
    }

    /// Creates and connects a client with default settings.
    pub async fn connect<B: RegistryBackend>(
        config: CacheMeshConfig,
        backend: Arc<B>,
        connector: Arc<N>,
    ) -> Result<Self> {
        Self::builder(config, backend, connector)?.connect().await
    }

    pub fn coordinator(&self) -> &CoordinatorHandle<N> {
        &self.coordinator
    }

    /// Starts a sorted merge get on the next pool member.
    ///
    /// Returns as soon as the sub-requests are dispatched; the merged window
    /// is read from the returned handle.
    pub fn sorted_merge_get(
        &self,
        keys: Vec<String>,
        range: BKeyRange,
        filter: ElementFlagFilter,
        offset: usize,
        count: usize,
    ) -> Result<SmgetHandle> {
        let request = SmgetRequest::new(keys, range, filter, offset, count)?;

        let pool = self
            .coordinator
            .client_pool()
            .ok_or(SmgetError::NoClientAvailable)?;
        let client = pool.next_handle().ok_or(SmgetError::NoClientAvailable)?;
        debug!(client = %client.name(), keys = request.keys().len(), "Sorted merge get");

        Ok(self.engine.sorted_merge_get(client, request))
    }

    /// Stops membership monitoring and closes every pool member.
    pub fn shutdown(&self) {
        self.coordinator.shutdown();
    }

    /// Shuts down and waits for the coordinator to release its session.
    pub async fn close(self) {
        self.coordinator.shutdown();
        self.coordinator.join().await;
    }
}
