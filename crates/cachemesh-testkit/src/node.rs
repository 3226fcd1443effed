//! In-process cache nodes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cachemesh_cluster::{NodeConnection, NodeConnector, TransportError};
use cachemesh_types::{NodeAddress, NodeSmgetRequest, SmgetElement, SmgetPartial};
use tracing::debug;

#[derive(Debug)]
struct NodeState {
    collections: HashMap<String, Vec<SmgetElement>>,
    latency: Duration,
    failure: Option<String>,
    reachable: bool,
    connect_attempts: usize,
    connections: usize,
    requests: usize,
}

impl NodeState {
    fn new() -> Self {
        Self {
            collections: HashMap::new(),
            latency: Duration::ZERO,
            failure: None,
            reachable: true,
            connect_attempts: 0,
            connections: 0,
            requests: 0,
        }
    }
}

/// A set of in-process cache nodes.
#[derive(Debug, Clone, Default)]
pub struct MemoryCluster {
    nodes: Arc<Mutex<HashMap<NodeAddress, NodeState>>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<NodeAddress, NodeState>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_node<T>(&self, address: &NodeAddress, f: impl FnOnce(&mut NodeState) -> T) -> T {
        let mut nodes = self.lock();
        let node = nodes.entry(address.clone()).or_insert_with(NodeState::new);
        f(node)
    }

    pub fn add_node(&self, address: &NodeAddress) {
        self.with_node(address, |_| ());
    }

    /// Adds `element` to the collection at its key, creating the
    /// collection if needed.
    pub fn insert(&self, address: &NodeAddress, element: SmgetElement) {
        self.with_node(address, |node| {
            node.collections
                .entry(element.key.clone())
                .or_default()
                .push(element);
        });
    }

    /// Creates an empty collection.
    pub fn create_collection(&self, address: &NodeAddress, key: &str) {
        self.with_node(address, |node| {
            node.collections.entry(key.to_string()).or_default();
        });
    }

    /// Delay applied to every connect and request.
    pub fn set_latency(&self, address: &NodeAddress, latency: Duration) {
        self.with_node(address, |node| node.latency = latency);
    }

    /// Makes every request fail with `reason`; `None` heals the node.
    pub fn fail_requests(&self, address: &NodeAddress, reason: Option<&str>) {
        self.with_node(address, |node| node.failure = reason.map(str::to_string));
    }

    /// Unreachable nodes refuse connects and requests.
    pub fn set_reachable(&self, address: &NodeAddress, reachable: bool) {
        self.with_node(address, |node| node.reachable = reachable);
    }

    pub fn connect_attempts(&self, address: &NodeAddress) -> usize {
        self.lock().get(address).map_or(0, |node| node.connect_attempts)
    }

    pub fn connections(&self, address: &NodeAddress) -> usize {
        self.lock().get(address).map_or(0, |node| node.connections)
    }

    pub fn requests(&self, address: &NodeAddress) -> usize {
        self.lock().get(address).map_or(0, |node| node.requests)
    }

    fn begin_connect(&self, address: &NodeAddress) -> Result<Duration, TransportError> {
        let mut nodes = self.lock();
        let node = nodes.get_mut(address).ok_or_else(|| TransportError::Connect {
            address: address.clone(),
            reason: "no such node".to_string(),
        })?;
        node.connect_attempts += 1;
        if !node.reachable {
            return Err(TransportError::Connect {
                address: address.clone(),
                reason: "connection refused".to_string(),
            });
        }
        node.connections += 1;
        Ok(node.latency)
    }

    fn begin_request(&self, address: &NodeAddress) -> Result<Duration, TransportError> {
        let mut nodes = self.lock();
        let node = nodes
            .get_mut(address)
            .filter(|node| node.reachable)
            .ok_or_else(|| TransportError::Closed(address.clone()))?;
        node.requests += 1;
        Ok(node.latency)
    }

    fn serve(&self, address: &NodeAddress, request: &NodeSmgetRequest) -> Result<SmgetPartial, TransportError> {
        let nodes = self.lock();
        let node = nodes
            .get(address)
            .filter(|node| node.reachable)
            .ok_or_else(|| TransportError::Closed(address.clone()))?;
        if let Some(reason) = &node.failure {
            return Err(TransportError::Request {
                address: address.clone(),
                reason: reason.clone(),
            });
        }

        let direction = request.range.direction();
        let mut partial = SmgetPartial::default();
        for key in &request.keys {
            let Some(collection) = node.collections.get(key) else {
                partial.missed_keys.push(key.clone());
                continue;
            };
            partial.elements.extend(
                collection
                    .iter()
                    .filter(|element| request.range.contains(element.bkey))
                    .filter(|element| request.filter.matches(element.eflag.as_deref()))
                    .cloned(),
            );
        }
        partial.elements.sort_by(|a, b| {
            direction
                .compare(a.bkey, b.bkey)
                .then_with(|| a.key.cmp(&b.key))
        });
        partial.elements.truncate(request.count);
        Ok(partial)
    }
}

/// Connects to the nodes of a [`MemoryCluster`].
#[derive(Debug, Default)]
pub struct MemoryConnector {
    cluster: MemoryCluster,
    setup_failures: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(cluster: MemoryCluster) -> Self {
        Self {
            cluster,
            setup_failures: AtomicUsize::new(0),
        }
    }

    /// Makes the next `count` pool member setups fail.
    pub fn fail_next_setups(&self, count: usize) {
        self.setup_failures.store(count, Ordering::SeqCst);
    }

    pub fn cluster(&self) -> &MemoryCluster {
        &self.cluster
    }
}

impl NodeConnector for MemoryConnector {
    type Connection = MemoryConnection;

    fn setup(&self) -> Result<(), TransportError> {
        let injected = self
            .setup_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(TransportError::Setup("injected setup failure".to_string()));
        }
        Ok(())
    }

    async fn connect(&self, address: &NodeAddress) -> Result<MemoryConnection, TransportError> {
        let latency = self.cluster.begin_connect(address)?;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        debug!(node = %address, "Connected to in-memory node");
        Ok(MemoryConnection {
            address: address.clone(),
            cluster: self.cluster.clone(),
        })
    }
}

/// A connection to one in-memory node.
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    address: NodeAddress,
    cluster: MemoryCluster,
}

impl NodeConnection for MemoryConnection {
    fn address(&self) -> &NodeAddress {
        &self.address
    }

    async fn smget(&self, request: NodeSmgetRequest) -> Result<SmgetPartial, TransportError> {
        let latency = self.cluster.begin_request(&self.address)?;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.cluster.serve(&self.address, &request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachemesh_types::{BKeyRange, CompOp, ElementFlagFilter};

    fn node() -> NodeAddress {
        NodeAddress::new("10.0.0.1", 11211)
    }

    fn request(keys: &[&str], range: BKeyRange, count: usize) -> NodeSmgetRequest {
        NodeSmgetRequest {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            range,
            filter: ElementFlagFilter::DO_NOT_FILTER,
            count,
        }
    }

    #[tokio::test]
    async fn serves_sorted_elements_and_missed_keys() {
        let cluster = MemoryCluster::new();
        cluster.insert(&node(), SmgetElement::new("a", 3, "a3"));
        cluster.insert(&node(), SmgetElement::new("a", 1, "a1"));
        cluster.insert(&node(), SmgetElement::new("b", 2, "b2"));

        let connector = MemoryConnector::new(cluster.clone());
        let connection = connector.connect(&node()).await.unwrap();

        let partial = connection
            .smget(request(&["a", "b", "zz"], BKeyRange::new(0, 10), 10))
            .await
            .unwrap();
        let bkeys: Vec<u64> = partial.elements.iter().map(|e| e.bkey.value()).collect();
        assert_eq!(bkeys, vec![1, 2, 3]);
        assert_eq!(partial.missed_keys, vec!["zz".to_string()]);

        let partial = connection
            .smget(request(&["a", "b"], BKeyRange::new(10, 0), 2))
            .await
            .unwrap();
        let bkeys: Vec<u64> = partial.elements.iter().map(|e| e.bkey.value()).collect();
        assert_eq!(bkeys, vec![3, 2]);
        assert_eq!(cluster.requests(&node()), 2);
    }

    #[tokio::test]
    async fn applies_element_flag_filter() {
        let cluster = MemoryCluster::new();
        cluster.insert(&node(), SmgetElement::new("a", 1, "x").with_eflag(&b"EF"[..]));
        cluster.insert(&node(), SmgetElement::new("a", 2, "y"));

        let connector = MemoryConnector::new(cluster);
        let connection = connector.connect(&node()).await.unwrap();

        let mut req = request(&["a"], BKeyRange::new(0, 10), 10);
        req.filter = ElementFlagFilter::new(CompOp::Eq, &b"EF"[..]).unwrap();
        let partial = connection.smget(req).await.unwrap();
        assert_eq!(partial.elements.len(), 1);
        assert_eq!(partial.elements[0].bkey.value(), 1);
    }

    #[tokio::test]
    async fn injected_failures() {
        let cluster = MemoryCluster::new();
        cluster.add_node(&node());
        let connector = MemoryConnector::new(cluster.clone());

        connector.fail_next_setups(1);
        assert!(connector.setup().is_err());
        assert!(connector.setup().is_ok());

        let connection = connector.connect(&node()).await.unwrap();
        cluster.fail_requests(&node(), Some("boom"));
        assert!(matches!(
            connection.smget(request(&["a"], BKeyRange::new(0, 1), 1)).await,
            Err(TransportError::Request { .. })
        ));

        cluster.set_reachable(&node(), false);
        assert!(connector.connect(&node()).await.is_err());
        assert_eq!(cluster.connect_attempts(&node()), 2);
        assert_eq!(cluster.connections(&node()), 1);

        let unknown = NodeAddress::new("10.9.9.9", 1);
        assert!(connector.connect(&unknown).await.is_err());
    }
}
