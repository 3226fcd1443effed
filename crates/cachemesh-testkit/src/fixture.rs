//! Registry layout and process-wide helpers for tests.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use cachemesh_cluster::{HostInfo, StaticIdentity};
use cachemesh_registry::MemoryRegistry;
use cachemesh_types::NodeAddress;
use tracing_subscriber::EnvFilter;

pub const SERVICE_CODE: &str = "test-svc";

/// Installs a test-friendly subscriber honouring `RUST_LOG`. Safe to call
/// from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Identity used for self-registration in tests.
pub fn test_identity() -> StaticIdentity {
    StaticIdentity(HostInfo {
        hostname: "test-host".to_string(),
        ip: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
    })
}

/// A [`MemoryRegistry`] holding the node and client lists of one service.
#[derive(Debug, Clone)]
pub struct ServiceFixture {
    registry: Arc<MemoryRegistry>,
    cache_list: String,
    client_list: String,
}

impl ServiceFixture {
    /// Lays out `{root}/cache_list/{service_code}` and
    /// `{root}/client_list/{service_code}`.
    pub fn new(root: &str, service_code: &str) -> Self {
        let registry = Arc::new(MemoryRegistry::new());
        let root = root.trim_end_matches('/');
        let cache_list = format!("{root}/cache_list/{service_code}");
        let client_list = format!("{root}/client_list/{service_code}");
        registry.create_all(&cache_list).expect("create cache list");
        registry.create_all(&client_list).expect("create client list");
        Self {
            registry,
            cache_list,
            client_list,
        }
    }

    /// Same layout without the node list, for a service that does not exist.
    pub fn without_service(root: &str, service_code: &str) -> Self {
        let fixture = Self::new(root, service_code);
        fixture
            .registry
            .delete(&fixture.cache_list)
            .expect("delete cache list");
        fixture
    }

    pub fn registry(&self) -> Arc<MemoryRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn cache_list_path(&self) -> &str {
        &self.cache_list
    }

    pub fn client_list_path(&self) -> &str {
        &self.client_list
    }

    /// Registry child name of a cache node: `{host}:{port}-{host}`.
    pub fn node_entry(address: &NodeAddress) -> String {
        format!("{}-{}", address, address.host())
    }

    pub fn add_node(&self, address: &NodeAddress) {
        let path = format!("{}/{}", self.cache_list, Self::node_entry(address));
        self.registry.create_persistent(&path).expect("add cache node");
    }

    pub fn remove_node(&self, address: &NodeAddress) {
        let path = format!("{}/{}", self.cache_list, Self::node_entry(address));
        self.registry.delete(&path).expect("remove cache node");
    }

    /// Names of the clients currently registered for the service.
    pub fn registered_clients(&self) -> Vec<String> {
        self.registry.children_of(&self.client_list)
    }
}
