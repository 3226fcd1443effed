//! Pool members.
//!
//! Each [`ClientHandle`] owns a dispatcher task holding that member's node
//! connections. View updates are handed over through a watch channel, so
//! pushing a view never waits on the member's I/O and a burst of updates
//! collapses into the most recent one.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use cachemesh_types::{ClusterView, NodeAddress};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{ConnectionObserver, LocatorFactory, NodeConnector, NodeLocator, TransportError};

/// Snapshot of a member's routing state.
pub struct RoutingTable<C> {
    view: Arc<ClusterView>,
    locator: Arc<dyn NodeLocator>,
    connections: HashMap<NodeAddress, Arc<C>>,
}

impl<C> RoutingTable<C> {
    pub fn view(&self) -> &ClusterView {
        &self.view
    }

    /// Owner of `key` in the current view, connected or not.
    pub fn locate(&self, key: &str) -> Option<&NodeAddress> {
        self.locator.locate(key)
    }

    pub fn connection(&self, address: &NodeAddress) -> Option<Arc<C>> {
        self.connections.get(address).cloned()
    }

    pub fn is_connected(&self, address: &NodeAddress) -> bool {
        self.connections.contains_key(address)
    }

    pub fn connected_count(&self) -> usize {
        self.connections.len()
    }
}

/// Settings shared by the dispatcher tasks of one pool.
pub struct HandleOptions<N: NodeConnector> {
    pub connector: Arc<N>,
    pub locators: LocatorFactory,
    pub observers: Vec<Arc<dyn ConnectionObserver>>,
    pub reconnect_interval: Duration,
}

/// One member of a client pool.
pub struct ClientHandle<N: NodeConnector> {
    id: usize,
    name: String,
    updates: watch::Sender<Arc<ClusterView>>,
    routing: watch::Receiver<Arc<RoutingTable<N::Connection>>>,
    shutdown: CancellationToken,
}

impl<N: NodeConnector> ClientHandle<N> {
    /// Sets up the member's transport and starts its dispatcher on `view`.
    ///
    /// The dispatcher stops when `shutdown` is cancelled or the handle is
    /// dropped.
    pub fn spawn(
        id: usize,
        name: impl Into<String>,
        view: Arc<ClusterView>,
        options: HandleOptions<N>,
        shutdown: CancellationToken,
    ) -> Result<Self, TransportError> {
        options.connector.setup()?;

        let name = name.into();
        let locator = (options.locators)(&view);
        let initial = Arc::new(RoutingTable {
            view: Arc::clone(&view),
            locator: Arc::clone(&locator),
            connections: HashMap::new(),
        });
        let (routing_tx, routing) = watch::channel(initial);
        let (updates, updates_rx) = watch::channel(Arc::clone(&view));

        let dispatcher = Dispatcher {
            name: name.clone(),
            connector: options.connector,
            locators: options.locators,
            observers: options.observers,
            reconnect_interval: options.reconnect_interval,
            view,
            locator,
            connections: HashMap::new(),
            connecting: JoinSet::new(),
            in_flight: HashSet::new(),
            failed_attempts: HashMap::new(),
            routing: routing_tx,
            shutdown: shutdown.clone(),
        };
        tokio::spawn(dispatcher.run(updates_rx));

        Ok(Self {
            id,
            name,
            updates,
            routing,
            shutdown,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hands `view` to the dispatcher without waiting for it.
    pub fn apply_view(&self, view: Arc<ClusterView>) {
        debug!(handle = %self.name, generation = view.generation(), "Queueing cluster view");
        self.updates.send_replace(view);
    }

    /// Latest routing snapshot published by the dispatcher.
    pub fn routing(&self) -> Arc<RoutingTable<N::Connection>> {
        Arc::clone(&self.routing.borrow())
    }

    /// Waits until the dispatcher has adopted a view of at least
    /// `generation`. Returns `false` if the dispatcher stopped first.
    pub async fn wait_for_generation(&self, generation: u64) -> bool {
        let mut routing = self.routing.clone();
        routing
            .wait_for(|table| table.view.generation() >= generation)
            .await
            .is_ok()
    }

    /// Waits until the member holds a connection to `address`.
    pub async fn wait_for_connection(&self, address: &NodeAddress) -> bool {
        let mut routing = self.routing.clone();
        routing
            .wait_for(|table| table.is_connected(address))
            .await
            .is_ok()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

type ConnectOutcome<C> = (NodeAddress, Result<C, TransportError>);

struct Dispatcher<N: NodeConnector> {
    name: String,
    connector: Arc<N>,
    locators: LocatorFactory,
    observers: Vec<Arc<dyn ConnectionObserver>>,
    reconnect_interval: Duration,
    view: Arc<ClusterView>,
    locator: Arc<dyn NodeLocator>,
    connections: HashMap<NodeAddress, Arc<N::Connection>>,
    /// Connects in flight, polled by the main loop.
    connecting: JoinSet<ConnectOutcome<N::Connection>>,
    in_flight: HashSet<NodeAddress>,
    /// Failed attempts per node since its last successful connect.
    failed_attempts: HashMap<NodeAddress, u32>,
    routing: watch::Sender<Arc<RoutingTable<N::Connection>>>,
    shutdown: CancellationToken,
}

impl<N: NodeConnector> Dispatcher<N> {
    async fn run(mut self, mut updates: watch::Receiver<Arc<ClusterView>>) {
        debug!(handle = %self.name, "Dispatcher started");
        self.connect_missing();

        let mut retry = interval_at(
            Instant::now() + self.reconnect_interval,
            self.reconnect_interval.max(Duration::from_millis(1)),
        );
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let view = Arc::clone(&updates.borrow_and_update());
                    self.adopt(view);
                }
                Some(joined) = self.connecting.join_next(), if !self.connecting.is_empty() => {
                    match joined {
                        Ok(outcome) => self.finish_connect(outcome),
                        Err(e) => warn!(handle = %self.name, error = %e, "Connection attempt aborted"),
                    }
                }
                _ = retry.tick() => self.connect_missing(),
            }
        }

        self.connecting.abort_all();
        self.disconnect_all();
        debug!(handle = %self.name, "Dispatcher stopped");
    }

    fn adopt(&mut self, view: Arc<ClusterView>) {
        if view.generation() <= self.view.generation() {
            return;
        }

        let removed: Vec<NodeAddress> = self
            .connections
            .keys()
            .filter(|address| !view.contains(address))
            .cloned()
            .collect();
        for address in removed {
            self.connections.remove(&address);
            info!(handle = %self.name, node = %address, "Node left the cluster; connection dropped");
            for observer in &self.observers {
                observer.connection_lost(&address);
            }
        }
        self.failed_attempts.retain(|address, _| view.contains(address));

        info!(
            handle = %self.name,
            generation = view.generation(),
            nodes = view.len(),
            "Adopted cluster view"
        );
        self.locator = (self.locators)(&view);
        self.view = view;
        self.publish();
        self.connect_missing();
    }

    /// Starts a connect for every view member without a connection or an
    /// attempt in flight.
    fn connect_missing(&mut self) {
        let missing: Vec<NodeAddress> = self
            .view
            .addresses()
            .iter()
            .filter(|address| {
                !self.connections.contains_key(address) && !self.in_flight.contains(address)
            })
            .cloned()
            .collect();

        for address in missing {
            self.in_flight.insert(address.clone());
            let connector = Arc::clone(&self.connector);
            self.connecting.spawn(async move {
                let result = connector.connect(&address).await;
                (address, result)
            });
        }
    }

    fn finish_connect(&mut self, (address, result): ConnectOutcome<N::Connection>) {
        self.in_flight.remove(&address);

        match result {
            Ok(connection) => {
                if !self.view.contains(&address) {
                    debug!(handle = %self.name, node = %address, "Discarding connection to departed node");
                    return;
                }
                let failures = self.failed_attempts.remove(&address).unwrap_or(0);
                info!(handle = %self.name, node = %address, failures, "Connection established");
                self.connections.insert(address.clone(), Arc::new(connection));
                self.publish();
                for observer in &self.observers {
                    observer.connection_established(&address, failures);
                }
            }
            Err(e) => {
                if !self.view.contains(&address) {
                    return;
                }
                let failures = self.failed_attempts.entry(address.clone()).or_insert(0);
                *failures += 1;
                warn!(
                    handle = %self.name,
                    node = %address,
                    attempt = *failures,
                    error = %e,
                    "Connection attempt failed"
                );
            }
        }
    }

    fn disconnect_all(&mut self) {
        for (address, _) in self.connections.drain() {
            for observer in &self.observers {
                observer.connection_lost(&address);
            }
        }
        self.publish();
    }

    fn publish(&self) {
        self.routing.send_replace(Arc::new(RoutingTable {
            view: Arc::clone(&self.view),
            locator: Arc::clone(&self.locator),
            connections: self.connections.clone(),
        }));
    }
}
