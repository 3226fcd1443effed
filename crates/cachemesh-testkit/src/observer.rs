//! Connection observer that records what it sees.

use std::sync::{Mutex, MutexGuard, PoisonError};

use cachemesh_cluster::ConnectionObserver;
use cachemesh_types::NodeAddress;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Established {
        address: NodeAddress,
        reconnect_count: u32,
    },
    Lost(NodeAddress),
}

#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ConnectionEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ConnectionEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> Vec<ConnectionEvent> {
        self.lock().clone()
    }

    pub fn established(&self, address: &NodeAddress) -> usize {
        self.lock()
            .iter()
            .filter(|event| matches!(event, ConnectionEvent::Established { address: a, .. } if a == address))
            .count()
    }

    pub fn lost(&self, address: &NodeAddress) -> usize {
        self.lock()
            .iter()
            .filter(|event| matches!(event, ConnectionEvent::Lost(a) if a == address))
            .count()
    }
}

impl ConnectionObserver for RecordingObserver {
    fn connection_established(&self, address: &NodeAddress, reconnect_count: u32) {
        self.lock().push(ConnectionEvent::Established {
            address: address.clone(),
            reconnect_count,
        });
    }

    fn connection_lost(&self, address: &NodeAddress) {
        self.lock().push(ConnectionEvent::Lost(address.clone()));
    }
}
