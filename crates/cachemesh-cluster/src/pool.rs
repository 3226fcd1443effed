//! Client pool bootstrap and view propagation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cachemesh_config::PoolConfig;
use cachemesh_types::{ClusterView, NodeAddress};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{ClientHandle, ConnectionObserver, HandleOptions, LocatorFactory, NodeConnector};

/// Outcome of a pool bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStatus {
    /// Every member reached every node within the budget.
    Connected,
    /// The budget elapsed with `pending` member/node connections missing.
    Degraded { pending: usize },
}

/// One-shot readiness signal released after the first bootstrap attempt.
#[derive(Debug, Clone)]
pub struct ReadyLatch {
    released: Arc<watch::Sender<bool>>,
}

impl ReadyLatch {
    pub fn new() -> Self {
        let (released, _) = watch::channel(false);
        Self {
            released: Arc::new(released),
        }
    }

    /// Releases the latch. Returns `true` only for the call that released it.
    pub fn count_down(&self) -> bool {
        self.released.send_if_modified(|released| {
            if *released {
                false
            } else {
                *released = true;
                true
            }
        })
    }

    pub fn is_released(&self) -> bool {
        *self.released.borrow()
    }

    pub async fn wait(&self) {
        let mut released = self.released.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = released.wait_for(|released| *released).await;
    }

    /// Waits up to `timeout`; returns whether the latch was released.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

impl Default for ReadyLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a pool needs to start its members.
pub struct PoolContext<N: NodeConnector> {
    pub service_code: String,
    pub config: PoolConfig,
    pub connector: Arc<N>,
    pub locators: LocatorFactory,
    pub observers: Vec<Arc<dyn ConnectionObserver>>,
    /// Parent of every member's shutdown token.
    pub shutdown: CancellationToken,
}

impl<N: NodeConnector> Clone for PoolContext<N> {
    fn clone(&self) -> Self {
        Self {
            service_code: self.service_code.clone(),
            config: self.config.clone(),
            connector: Arc::clone(&self.connector),
            locators: Arc::clone(&self.locators),
            observers: self.observers.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

/// Counts the first connection of each node for one member.
///
/// Stops recording once the shared count is settled at zero, either because
/// every connection was seen or because the bootstrap wait is over.
struct ConnectCounter {
    remaining: Arc<watch::Sender<usize>>,
    /// Nodes counted so far; `None` once the counter has stopped.
    counted: Mutex<Option<HashSet<NodeAddress>>>,
}

impl ConnectCounter {
    fn new(remaining: Arc<watch::Sender<usize>>) -> Self {
        Self {
            remaining,
            counted: Mutex::new(Some(HashSet::new())),
        }
    }

    fn is_settled(&self) -> bool {
        *self.remaining.borrow() == 0
    }
}

impl ConnectionObserver for ConnectCounter {
    fn connection_established(&self, address: &NodeAddress, _reconnect_count: u32) {
        let Ok(mut counted) = self.counted.lock() else {
            return;
        };
        if self.is_settled() {
            *counted = None;
            return;
        }

        let first = counted
            .as_mut()
            .is_some_and(|seen| seen.insert(address.clone()));
        if first {
            self.remaining.send_modify(|n| *n = n.saturating_sub(1));
            if self.is_settled() {
                *counted = None;
            }
        }
    }

    fn connection_lost(&self, _address: &NodeAddress) {}
}

/// A fixed-size set of pool members sharing one cluster view.
pub struct ClientPool<N: NodeConnector> {
    service_code: String,
    handles: Vec<ClientHandle<N>>,
    next: AtomicUsize,
}

impl<N: NodeConnector> ClientPool<N> {
    /// Starts `context.config.size` members on `view` and waits up to the
    /// connect budget for all of them to reach every node.
    ///
    /// Never fails: members that cannot be created are logged and skipped,
    /// and an elapsed budget yields [`BootstrapStatus::Degraded`]. The
    /// ready latch is released before returning.
    pub async fn bootstrap(
        context: &PoolContext<N>,
        view: Arc<ClusterView>,
        ready: &ReadyLatch,
    ) -> (Self, BootstrapStatus) {
        let size = context.config.size;
        let expected = size * view.len();
        let (remaining, mut progress) = watch::channel(expected);
        let remaining = Arc::new(remaining);

        info!(
            service_code = %context.service_code,
            members = size,
            nodes = view.len(),
            "Bootstrapping client pool"
        );

        let mut handles = Vec::with_capacity(size);
        for id in 0..size {
            let mut observers = context.observers.clone();
            observers.push(Arc::new(ConnectCounter::new(Arc::clone(&remaining))));
            let options = HandleOptions {
                connector: Arc::clone(&context.connector),
                locators: Arc::clone(&context.locators),
                observers,
                reconnect_interval: context.config.reconnect_interval(),
            };
            let name = format!("{}-{}", context.service_code, id);

            match ClientHandle::spawn(
                id,
                name,
                Arc::clone(&view),
                options,
                context.shutdown.child_token(),
            ) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!(member = id, error = %e, "Failed to create pool member");
                    // A skipped member never connects; its nodes are not waited for.
                    remaining.send_modify(|n| *n = n.saturating_sub(view.len()));
                }
            }
        }

        let budget = context.config.connect_wait(view.len());
        if *progress.borrow() > 0 {
            let _ = tokio::time::timeout(budget, progress.wait_for(|n| *n == 0)).await;
        }
        let pending = *progress.borrow();
        // Later connections no longer count towards bootstrap.
        remaining.send_replace(0);

        let status = if pending == 0 {
            info!(service_code = %context.service_code, "All cache node connections are established");
            BootstrapStatus::Connected
        } else {
            warn!(
                service_code = %context.service_code,
                pending,
                ?budget,
                "Some cache node connections are not established yet; continuing"
            );
            BootstrapStatus::Degraded { pending }
        };

        ready.count_down();

        let pool = Self {
            service_code: context.service_code.clone(),
            handles,
            next: AtomicUsize::new(0),
        };
        (pool, status)
    }

    /// Hands `view` to every member. Does not wait for any of them.
    pub fn apply_view(&self, view: Arc<ClusterView>) {
        for handle in &self.handles {
            handle.apply_view(Arc::clone(&view));
        }
    }

    pub fn service_code(&self) -> &str {
        &self.service_code
    }

    pub fn handles(&self) -> &[ClientHandle<N>] {
        &self.handles
    }

    pub fn handle(&self, id: usize) -> Option<&ClientHandle<N>> {
        self.handles.iter().find(|handle| handle.id() == id)
    }

    /// Next member in round-robin order.
    pub fn next_handle(&self) -> Option<&ClientHandle<N>> {
        if self.handles.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.handles.len();
        self.handles.get(index)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn shutdown(&self) {
        for handle in &self.handles {
            handle.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_latch_releases_once() {
        let latch = ReadyLatch::new();
        assert!(!latch.is_released());

        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move { latch.wait().await })
        };

        assert!(latch.count_down());
        assert!(!latch.count_down());
        assert!(latch.is_released());
        waiter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn ready_latch_wait_times_out() {
        let latch = ReadyLatch::new();
        assert!(!latch.wait_timeout(Duration::from_millis(100)).await);
        latch.count_down();
        assert!(latch.wait_timeout(Duration::from_millis(100)).await);
    }

    #[test]
    fn connect_counter_counts_each_node_once() {
        let (remaining, progress) = watch::channel(2);
        let counter = ConnectCounter::new(Arc::new(remaining));
        let a = NodeAddress::new("10.0.0.1", 11211);
        let b = NodeAddress::new("10.0.0.2", 11211);

        counter.connection_established(&a, 0);
        counter.connection_lost(&a);
        counter.connection_established(&a, 1);
        assert_eq!(*progress.borrow(), 1);

        counter.connection_established(&b, 0);
        counter.connection_established(&b, 0);
        assert_eq!(*progress.borrow(), 0);
    }

    #[test]
    fn connect_counter_stops_recording_once_settled() {
        let (remaining, progress) = watch::channel(1);
        let remaining = Arc::new(remaining);
        let counter = ConnectCounter::new(Arc::clone(&remaining));

        counter.connection_established(&NodeAddress::new("10.0.0.1", 11211), 0);
        assert_eq!(*progress.borrow(), 0);
        assert!(counter.counted.lock().unwrap().is_none());

        counter.connection_established(&NodeAddress::new("10.0.0.2", 11211), 0);
        assert!(counter.counted.lock().unwrap().is_none());
    }

    #[test]
    fn connect_counter_stops_when_bootstrap_gives_up() {
        let (remaining, progress) = watch::channel(3);
        let remaining = Arc::new(remaining);
        let counter = ConnectCounter::new(Arc::clone(&remaining));
        counter.connection_established(&NodeAddress::new("10.0.0.1", 11211), 0);
        assert_eq!(*progress.borrow(), 2);

        remaining.send_replace(0);
        counter.connection_established(&NodeAddress::new("10.0.0.2", 11211), 0);
        assert_eq!(*progress.borrow(), 0);
        assert!(counter.counted.lock().unwrap().is_none());
    }
}
