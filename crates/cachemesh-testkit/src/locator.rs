//! Fixed key placement.

use std::collections::HashMap;
use std::sync::Arc;

use cachemesh_cluster::{LocatorFactory, NodeLocator};
use cachemesh_types::{ClusterView, NodeAddress};

/// Places each key on an explicitly assigned node.
///
/// Keys whose node is not part of the view, or that were never assigned,
/// have no owner.
#[derive(Debug, Clone, Default)]
pub struct KeyMapLocator {
    owners: HashMap<String, NodeAddress>,
}

impl KeyMapLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(mut self, key: impl Into<String>, address: &NodeAddress) -> Self {
        self.owners.insert(key.into(), address.clone());
        self
    }

    /// Factory restricting the placement to each adopted view.
    pub fn factory(self) -> LocatorFactory {
        let owners = Arc::new(self.owners);
        Arc::new(move |view: &ClusterView| -> Arc<dyn NodeLocator> {
            let owners = owners
                .iter()
                .filter(|(_, address)| view.contains(address))
                .map(|(key, address)| (key.clone(), address.clone()))
                .collect();
            Arc::new(KeyMapLocator { owners })
        })
    }
}

impl NodeLocator for KeyMapLocator {
    fn locate(&self, key: &str) -> Option<&NodeAddress> {
        self.owners.get(key)
    }
}
