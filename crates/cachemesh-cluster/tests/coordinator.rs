//! Membership coordinator lifecycle against an in-memory registry.

use std::sync::Arc;
use std::time::Duration;

use cachemesh_cluster::{ClusterError, CoordinatorHandle, CoordinatorState, MembershipCoordinator, ReadyLatch};
use cachemesh_config::CacheMeshConfig;
use cachemesh_registry::{MemoryRegistry, SessionId};
use cachemesh_testkit::{
    init_tracing, test_identity, MemoryCluster, MemoryConnector, ServiceFixture, SERVICE_CODE,
};
use cachemesh_types::NodeAddress;
use tokio::time::Instant;

const ROOT: &str = "/cachemesh";

fn node(port: u16) -> NodeAddress {
    NodeAddress::new("10.0.0.1", port)
}

fn config() -> CacheMeshConfig {
    let mut config = CacheMeshConfig::for_service("memory:2181", SERVICE_CODE);
    config.registry.connect_timeout_ms = 500;
    config.pool.size = 2;
    config
}

struct Harness {
    fixture: ServiceFixture,
    cluster: MemoryCluster,
    ready: ReadyLatch,
}

impl Harness {
    fn new(ports: &[u16]) -> Self {
        init_tracing();
        let fixture = ServiceFixture::new(ROOT, SERVICE_CODE);
        let cluster = MemoryCluster::new();
        for port in ports {
            cluster.add_node(&node(*port));
            fixture.add_node(&node(*port));
        }
        Self {
            fixture,
            cluster,
            ready: ReadyLatch::new(),
        }
    }

    fn coordinator(
        &self,
        config: CacheMeshConfig,
    ) -> MembershipCoordinator<MemoryRegistry, MemoryConnector> {
        MembershipCoordinator::create(
            config,
            self.fixture.registry(),
            Arc::new(MemoryConnector::new(self.cluster.clone())),
            self.ready.clone(),
        )
        .unwrap()
        .with_identity(test_identity())
    }

    async fn start(&self) -> CoordinatorHandle<MemoryConnector> {
        self.start_with(config()).await
    }

    async fn start_with(&self, config: CacheMeshConfig) -> CoordinatorHandle<MemoryConnector> {
        let handle = self.coordinator(config).start().await.unwrap();
        assert!(self.ready.wait_timeout(Duration::from_secs(5)).await);
        handle.wait_for_state(CoordinatorState::Monitoring).await;
        handle
    }

    fn session(&self) -> SessionId {
        let live = self.fixture.registry().live_sessions();
        assert_eq!(live.len(), 1, "expected one live session: {live:?}");
        live[0]
    }
}

/// Polls `condition` until it holds.
async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !condition() {
        assert!(Instant::now() < deadline, "condition never became true");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn start_bootstraps_pool_and_registers_client() {
    let harness = Harness::new(&[1, 2]);
    let handle = harness.start().await;

    let pool = handle.client_pool().expect("pool");
    assert_eq!(pool.len(), 2);
    assert_eq!(pool.service_code(), SERVICE_CODE);
    for member in pool.handles() {
        assert!(member.wait_for_connection(&node(1)).await);
        assert!(member.wait_for_connection(&node(2)).await);
        assert_eq!(member.routing().view().generation(), 1);
    }

    let clients = harness.fixture.registered_clients();
    assert_eq!(clients.len(), 1);
    let session = harness.session();
    assert!(clients[0].starts_with("test-host_127.0.0.1_2_rust_"));
    assert!(clients[0].ends_with(&format!("_{}", session.value())));

    handle.shutdown();
    handle.join().await;
}

#[tokio::test]
async fn missing_service_code_fails_start() {
    init_tracing();
    let fixture = ServiceFixture::without_service(ROOT, SERVICE_CODE);
    let coordinator = MembershipCoordinator::create(
        config(),
        fixture.registry(),
        Arc::new(MemoryConnector::new(MemoryCluster::new())),
        ReadyLatch::new(),
    )
    .unwrap()
    .with_identity(test_identity());

    let result = coordinator.start().await;
    assert!(matches!(result, Err(ClusterError::ServiceNotFound(code)) if code == SERVICE_CODE));
    assert!(fixture.registry().live_sessions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_session_times_out() {
    let harness = Harness::new(&[1]);
    harness.fixture.registry().refuse_connections(true);

    let started = Instant::now();
    let result = harness.coordinator(config()).start().await;

    assert!(matches!(result, Err(ClusterError::AdminConnectTimeout { .. })));
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert!(harness.fixture.registry().live_sessions().is_empty());
    assert!(!harness.ready.is_released());
}

#[tokio::test]
async fn invalid_config_is_rejected_without_io() {
    let harness = Harness::new(&[]);
    let mut config = config();
    config.pool.size = 0;

    let result = MembershipCoordinator::create(
        config,
        harness.fixture.registry(),
        Arc::new(MemoryConnector::new(MemoryCluster::new())),
        ReadyLatch::new(),
    );
    assert!(matches!(result, Err(ClusterError::Config(_))));
    assert_eq!(harness.fixture.registry().opened_sessions(), 0);
}

#[tokio::test]
async fn node_list_changes_reach_every_member() {
    let harness = Harness::new(&[1]);
    let handle = harness.start().await;
    let pool = handle.client_pool().expect("pool");

    harness.cluster.add_node(&node(2));
    harness.fixture.add_node(&node(2));

    for member in pool.handles() {
        assert!(member.wait_for_generation(2).await);
        assert!(member.wait_for_connection(&node(2)).await);
        assert!(member.routing().view().contains(&node(1)));
    }

    harness.fixture.remove_node(&node(1));
    for member in pool.handles() {
        assert!(member.wait_for_generation(3).await);
        assert!(!member.routing().view().contains(&node(1)));
    }

    handle.shutdown();
    handle.join().await;
}

#[tokio::test]
async fn empty_node_list_keeps_current_view() {
    let harness = Harness::new(&[1]);
    let handle = harness.start().await;
    let pool = handle.client_pool().expect("pool");

    harness.fixture.remove_node(&node(1));
    harness.cluster.add_node(&node(2));
    harness.fixture.add_node(&node(2));

    for member in pool.handles() {
        assert!(member.wait_for_generation(2).await);
        let routing = member.routing();
        assert_eq!(routing.view().generation(), 2);
        assert_eq!(routing.view().addresses(), &[node(2)]);
    }

    handle.shutdown();
    handle.join().await;
}

#[tokio::test]
async fn expired_session_is_replaced_without_rebuilding_the_pool() {
    let harness = Harness::new(&[1, 2]);
    let handle = harness.start().await;
    let pool = handle.client_pool().expect("pool");
    let first = harness.session();

    assert!(harness.fixture.registry().expire_session(first));

    let registry = harness.fixture.registry();
    eventually(|| {
        let live = registry.live_sessions();
        live.len() == 1 && live[0] != first && handle.state() == CoordinatorState::Monitoring
    })
    .await;

    let second = harness.session();
    let clients = harness.fixture.registered_clients();
    assert_eq!(clients.len(), 1);
    assert!(clients[0].ends_with(&format!("_{}", second.value())));

    // Same pool, same view: the unchanged node list caused no reconnects.
    assert!(Arc::ptr_eq(&pool, &handle.client_pool().expect("pool")));
    for member in pool.handles() {
        assert_eq!(member.routing().view().generation(), 1);
    }
    assert_eq!(harness.cluster.connections(&node(1)), 2);
    assert_eq!(harness.cluster.connections(&node(2)), 2);

    handle.shutdown();
    handle.join().await;
}

#[tokio::test]
async fn transient_disconnect_does_not_reconnect() {
    let harness = Harness::new(&[1]);
    let handle = harness.start().await;
    let session = harness.session();
    let registry = harness.fixture.registry();

    registry.disconnect_session(session);
    registry.reconnect_session(session);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(handle.state(), CoordinatorState::Monitoring);
    assert_eq!(registry.opened_sessions(), 1);

    handle.shutdown();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn failed_reconnects_back_off() {
    let harness = Harness::new(&[1]);
    let handle = harness.start().await;
    let registry = harness.fixture.registry();
    let first = harness.session();

    registry.refuse_connections(true);
    let failed_at = Instant::now();
    registry.expire_session(first);

    // First attempt times out after 500ms, then the coordinator sleeps 5s
    // before the next one.
    eventually(|| registry.opened_sessions() >= 3).await;
    assert!(failed_at.elapsed() >= Duration::from_millis(5_500));
    assert_eq!(handle.state(), CoordinatorState::Connecting);

    registry.refuse_connections(false);
    eventually(|| registry.live_sessions().len() == 1 && handle.state() == CoordinatorState::Monitoring).await;

    handle.shutdown();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_backoff() {
    let harness = Harness::new(&[1]);
    let mut config = config();
    config.coordinator.reconnect_backoff_ms = 3_600_000;
    let handle = harness.start_with(config).await;
    let registry = harness.fixture.registry();

    registry.refuse_connections(true);
    registry.expire_session(harness.session());
    eventually(|| registry.opened_sessions() >= 2 && registry.live_sessions().is_empty()).await;

    let stopping = Instant::now();
    handle.shutdown();
    handle.join().await;
    assert!(stopping.elapsed() < Duration::from_secs(1));
    assert_eq!(handle.state(), CoordinatorState::Shutdown);
}

#[tokio::test]
async fn shutdown_is_idempotent_and_releases_the_session() {
    let harness = Harness::new(&[1]);
    let handle = harness.start().await;

    handle.shutdown();
    handle.shutdown();
    handle.join().await;
    handle.join().await;

    assert!(handle.is_shut_down());
    assert_eq!(handle.state(), CoordinatorState::Shutdown);
    assert!(harness.fixture.registry().live_sessions().is_empty());
    assert!(harness.fixture.registered_clients().is_empty());
    let pool = handle.client_pool().expect("pool");
    assert!(pool.handles().iter().all(|member| member.is_shut_down()));
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_first_connect_is_not_an_error() {
    let harness = Harness::new(&[1]);
    harness.fixture.registry().refuse_connections(true);

    let coordinator = harness.coordinator(config());
    let handle = coordinator.handle();
    let stopper = {
        let handle = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.shutdown();
        })
    };

    let started = coordinator.start().await;
    assert!(started.is_ok());
    stopper.await.unwrap();
    handle.join().await;

    assert_eq!(handle.state(), CoordinatorState::Shutdown);
    assert!(handle.client_pool().is_none());
    assert!(harness.fixture.registry().live_sessions().is_empty());
}
