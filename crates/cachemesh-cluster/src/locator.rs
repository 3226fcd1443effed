//! Key-to-node placement.
//!
//! The default placement is a consistent hash ring with virtual nodes, so
//! membership changes move only the keys owned by the nodes that joined or
//! left.

use std::sync::Arc;

use cachemesh_types::{ClusterView, NodeAddress};

/// Maps keys to the node that owns them.
pub trait NodeLocator: Send + Sync {
    /// Owner of `key`, or `None` when no node can serve it.
    fn locate(&self, key: &str) -> Option<&NodeAddress>;
}

/// Builds the locator for a newly adopted cluster view.
pub type LocatorFactory = Arc<dyn Fn(&ClusterView) -> Arc<dyn NodeLocator> + Send + Sync>;

/// Consistent hash ring over a cluster view.
#[derive(Debug, Clone)]
pub struct HashRing {
    /// Sorted `(point, node index)` pairs.
    points: Vec<(u64, usize)>,
    nodes: Vec<NodeAddress>,
}

impl HashRing {
    /// Virtual nodes placed per member.
    pub const DEFAULT_REPLICAS: usize = 160;

    pub fn new(view: &ClusterView, replicas: usize) -> Self {
        let nodes = view.addresses().to_vec();
        let mut points = Vec::with_capacity(nodes.len() * replicas);
        for (index, node) in nodes.iter().enumerate() {
            for replica in 0..replicas {
                points.push((hash_point(format!("{node}-{replica}").as_bytes()), index));
            }
        }
        points.sort_unstable();

        Self { points, nodes }
    }

    /// Factory producing rings with [`HashRing::DEFAULT_REPLICAS`].
    pub fn factory() -> LocatorFactory {
        Self::factory_with_replicas(Self::DEFAULT_REPLICAS)
    }

    pub fn factory_with_replicas(replicas: usize) -> LocatorFactory {
        Arc::new(move |view: &ClusterView| -> Arc<dyn NodeLocator> {
            Arc::new(HashRing::new(view, replicas))
        })
    }

    pub fn nodes(&self) -> &[NodeAddress] {
        &self.nodes
    }
}

impl NodeLocator for HashRing {
    fn locate(&self, key: &str) -> Option<&NodeAddress> {
        if self.points.is_empty() {
            return None;
        }
        let point = hash_point(key.as_bytes());
        let slot = self.points.partition_point(|(p, _)| *p < point);
        let (_, index) = self.points[slot % self.points.len()];
        self.nodes.get(index)
    }
}

fn hash_point(data: &[u8]) -> u64 {
    let hash = blake3::hash(data);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(prefix)
}
