//! Partitioning, dispatch and merge of sorted merge gets.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use cachemesh_cluster::{ClientHandle, NodeConnection, NodeConnector, RoutingTable, TransportError};
use cachemesh_config::SmgetConfig;
use cachemesh_types::{NodeAddress, NodeSmgetRequest, SmgetPartial};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::handle::{Completion, Outcome};
use crate::merge::{merge_window, missed_in_request_order};
use crate::{MergedResult, SmgetHandle, SmgetRequest};

/// Keys routed to one node.
#[derive(Debug)]
pub(crate) struct NodeGroup<C> {
    pub(crate) address: NodeAddress,
    pub(crate) keys: Vec<String>,
    pub(crate) connection: Option<Arc<C>>,
}

/// Fan-out plan of one request.
#[derive(Debug)]
pub(crate) struct Plan<C> {
    pub(crate) groups: Vec<NodeGroup<C>>,
    /// Keys without an owner.
    pub(crate) unrouted: Vec<String>,
}

/// Groups `keys` by owning node, in order of first appearance. Repeated
/// keys are routed once.
pub(crate) fn partition<C>(routing: &RoutingTable<C>, keys: &[String]) -> Plan<C> {
    let mut groups: Vec<NodeGroup<C>> = Vec::new();
    let mut index: HashMap<NodeAddress, usize> = HashMap::new();
    let mut unrouted = Vec::new();
    let mut seen = HashSet::with_capacity(keys.len());

    for key in keys {
        if !seen.insert(key.as_str()) {
            continue;
        }
        let Some(owner) = routing.locate(key) else {
            unrouted.push(key.clone());
            continue;
        };
        let slot = *index.entry(owner.clone()).or_insert_with(|| {
            groups.push(NodeGroup {
                address: owner.clone(),
                keys: Vec::new(),
                connection: routing.connection(owner),
            });
            groups.len() - 1
        });
        groups[slot].keys.push(key.clone());
    }

    Plan { groups, unrouted }
}

/// Runs sorted merge gets on pool members.
#[derive(Debug, Clone, Default)]
pub struct SmgetEngine {
    operation_timeout: Option<Duration>,
}

impl SmgetEngine {
    pub fn new(config: &SmgetConfig) -> Self {
        Self {
            operation_timeout: config.operation_timeout(),
        }
    }

    /// Deadline after which a request stops waiting for its nodes and
    /// finishes as timed out; `None` disables it.
    pub fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout
    }

    /// Starts `request` on `client` and returns its handle immediately.
    ///
    /// Must be called within a Tokio runtime.
    pub fn sorted_merge_get<N: NodeConnector>(
        &self,
        client: &ClientHandle<N>,
        request: SmgetRequest,
    ) -> SmgetHandle {
        let routing = client.routing();
        let plan = partition(routing.as_ref(), request.keys());
        debug!(
            client = %client.name(),
            generation = routing.view().generation(),
            keys = request.keys().len(),
            nodes = plan.groups.len(),
            unrouted = plan.unrouted.len(),
            "Dispatching sorted merge get"
        );

        let (handle, completion, cancel) = SmgetHandle::new();
        tokio::spawn(drive(plan, request, completion, cancel, self.operation_timeout));
        handle
    }
}

type SubResult = (NodeAddress, Result<SmgetPartial, TransportError>);

async fn drive<C: NodeConnection>(
    plan: Plan<C>,
    request: SmgetRequest,
    completion: Completion,
    cancel: CancellationToken,
    operation_timeout: Option<Duration>,
) {
    let mut missed: HashSet<String> = plan.unrouted.into_iter().collect();
    let mut outstanding: HashMap<NodeAddress, Vec<String>> = HashMap::new();
    let mut tasks: JoinSet<SubResult> = JoinSet::new();

    for group in plan.groups {
        let Some(connection) = group.connection else {
            warn!(node = %group.address, keys = group.keys.len(), "No connection to node; keys missed");
            missed.extend(group.keys);
            continue;
        };
        let sub_request = NodeSmgetRequest {
            keys: group.keys.clone(),
            range: request.range(),
            filter: request.filter().clone(),
            count: request.per_node_count(),
        };
        let address = group.address.clone();
        outstanding.insert(group.address, group.keys);
        tasks.spawn(async move {
            let result = connection.smget(sub_request).await;
            (address, result)
        });
    }

    let deadline = async move {
        match operation_timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut partials = Vec::with_capacity(outstanding.len());
    loop {
        let joined = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tasks.abort_all();
                return;
            }
            () = &mut deadline => {
                tasks.abort_all();
                if let Some(timeout) = operation_timeout {
                    if completion.finish(Outcome::TimedOut(timeout)) {
                        warn!(?timeout, pending_nodes = outstanding.len(), "Sorted merge get timed out");
                    }
                }
                return;
            }
            joined = tasks.join_next() => joined,
        };

        match joined {
            None => break,
            Some(Ok((address, Ok(partial)))) => {
                outstanding.remove(&address);
                missed.extend(partial.missed_keys);
                partials.push(partial.elements);
            }
            Some(Ok((address, Err(e)))) => {
                warn!(node = %address, error = %e, "Sorted merge get sub-request failed; keys missed");
                if let Some(keys) = outstanding.remove(&address) {
                    missed.extend(keys);
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "Sorted merge get sub-request aborted");
            }
        }
    }

    // Sub-requests that ended without reporting back.
    for (_, keys) in outstanding.drain() {
        missed.extend(keys);
    }

    if completion.is_finished() {
        return;
    }
    let elements = merge_window(partials, request.direction(), request.offset(), request.count());
    let missed_keys = missed_in_request_order(request.keys(), &missed);
    debug!(elements = elements.len(), missed = missed_keys.len(), "Sorted merge get completed");
    completion.finish(Outcome::Completed(Arc::new(MergedResult::new(elements, missed_keys))));
}
