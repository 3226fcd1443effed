//! Sorted merge gets against in-memory nodes.

use std::sync::Arc;
use std::time::Duration;

use cachemesh_cluster::{ClientHandle, HandleOptions, HashRing, LocatorFactory};
use cachemesh_smget::{SmgetEngine, SmgetError, SmgetRequest, SmgetStatus};
use cachemesh_testkit::{init_tracing, KeyMapLocator, MemoryCluster, MemoryConnector};
use cachemesh_types::{BKeyRange, ClusterView, CompOp, ElementFlagFilter, NodeAddress, SmgetElement};
use tokio_util::sync::CancellationToken;

fn node(port: u16) -> NodeAddress {
    NodeAddress::new("10.0.0.2", port)
}

fn keys(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

async fn client(
    cluster: &MemoryCluster,
    nodes: &[NodeAddress],
    locators: LocatorFactory,
) -> ClientHandle<MemoryConnector> {
    init_tracing();
    let options = HandleOptions {
        connector: Arc::new(MemoryConnector::new(cluster.clone())),
        locators,
        observers: Vec::new(),
        reconnect_interval: Duration::from_secs(1),
    };
    let view = Arc::new(ClusterView::new(nodes.to_vec()));
    let handle = ClientHandle::spawn(0, "svc-0", view, options, CancellationToken::new())
        .expect("member setup");
    for address in nodes {
        let reachable = tokio::time::timeout(Duration::from_secs(5), handle.wait_for_connection(address)).await;
        assert!(matches!(reachable, Ok(true)), "no connection to {address}");
    }
    handle
}

/// Two nodes; `a*` keys on the first, `b*` keys on the second.
fn split_locator(a: &[&str], b: &[&str]) -> LocatorFactory {
    let mut locator = KeyMapLocator::new();
    for key in a {
        locator = locator.assign(*key, &node(1));
    }
    for key in b {
        locator = locator.assign(*key, &node(2));
    }
    locator.factory()
}

fn engine() -> SmgetEngine {
    SmgetEngine::default().with_operation_timeout(Some(Duration::from_secs(5)))
}

async fn get(
    engine: &SmgetEngine,
    client: &ClientHandle<MemoryConnector>,
    request: SmgetRequest,
) -> (Vec<(String, u64)>, Vec<String>) {
    let handle = engine.sorted_merge_get(client, request);
    let result = handle.get(Duration::from_secs(5)).await.expect("merged result");
    let elements = result
        .elements()
        .iter()
        .map(|element| (element.key.clone(), element.bkey.value()))
        .collect();
    (elements, result.missed_keys().to_vec())
}

#[tokio::test]
async fn merges_partials_from_every_node() {
    let cluster = MemoryCluster::new();
    for (port, key, bkeys) in [(1, "a1", [1, 4, 7]), (2, "b1", [2, 5, 8]), (1, "a2", [3, 6, 9])] {
        for bkey in bkeys {
            cluster.insert(&node(port), SmgetElement::new(key, bkey, "v"));
        }
    }
    let client = client(&cluster, &[node(1), node(2)], split_locator(&["a1", "a2"], &["b1"])).await;

    let request = SmgetRequest::new(
        keys(&["a1", "b1", "a2"]),
        BKeyRange::new(0, 100),
        ElementFlagFilter::DO_NOT_FILTER,
        2,
        4,
    )
    .unwrap();
    let (elements, missed) = get(&engine(), &client, request).await;

    assert_eq!(
        elements,
        vec![
            ("a2".to_string(), 3),
            ("a1".to_string(), 4),
            ("b1".to_string(), 5),
            ("a2".to_string(), 6),
        ]
    );
    assert!(missed.is_empty());
    assert_eq!(cluster.requests(&node(1)), 1);
    assert_eq!(cluster.requests(&node(2)), 1);
}

#[tokio::test]
async fn descending_range_merges_highest_first() {
    let cluster = MemoryCluster::new();
    for bkey in [10, 30] {
        cluster.insert(&node(1), SmgetElement::new("a1", bkey, "v"));
    }
    for bkey in [20, 40] {
        cluster.insert(&node(2), SmgetElement::new("b1", bkey, "v"));
    }
    let client = client(&cluster, &[node(1), node(2)], split_locator(&["a1"], &["b1"])).await;

    let request = SmgetRequest::new(
        keys(&["a1", "b1"]),
        BKeyRange::new(35, 0),
        ElementFlagFilter::DO_NOT_FILTER,
        0,
        10,
    )
    .unwrap();
    let (elements, _) = get(&engine(), &client, request).await;

    assert_eq!(
        elements,
        vec![("a1".to_string(), 30), ("b1".to_string(), 20), ("a1".to_string(), 10)]
    );
}

#[tokio::test]
async fn equal_bkeys_are_ordered_by_key() {
    let cluster = MemoryCluster::new();
    cluster.insert(&node(1), SmgetElement::new("k2", 5, "v"));
    cluster.insert(&node(2), SmgetElement::new("k1", 5, "v"));
    let client = client(&cluster, &[node(1), node(2)], split_locator(&["k2"], &["k1"])).await;

    let request = SmgetRequest::new(
        keys(&["k2", "k1"]),
        BKeyRange::new(0, 10),
        ElementFlagFilter::DO_NOT_FILTER,
        0,
        10,
    )
    .unwrap();
    let (elements, _) = get(&engine(), &client, request).await;

    assert_eq!(elements, vec![("k1".to_string(), 5), ("k2".to_string(), 5)]);
}

#[tokio::test]
async fn element_flag_filter_is_applied_by_nodes() {
    let cluster = MemoryCluster::new();
    for (i, bkey) in (0..6u64).enumerate() {
        let element = SmgetElement::new("a1", bkey, "v");
        let element = if i % 2 == 0 { element.with_eflag("EFLAG") } else { element };
        cluster.insert(&node(1), element);
    }
    let client = client(&cluster, &[node(1)], split_locator(&["a1"], &[])).await;

    let filter = ElementFlagFilter::new(CompOp::Eq, "EFLAG").unwrap();
    let request = SmgetRequest::new(keys(&["a1"]), BKeyRange::new(0, 10), filter, 0, 10).unwrap();
    let (elements, missed) = get(&engine(), &client, request).await;

    let bkeys: Vec<u64> = elements.into_iter().map(|(_, bkey)| bkey).collect();
    assert_eq!(bkeys, vec![0, 2, 4]);
    assert!(missed.is_empty());
}

#[tokio::test]
async fn keys_not_held_are_missed_in_request_order() {
    let cluster = MemoryCluster::new();
    cluster.insert(&node(1), SmgetElement::new("a1", 1, "v"));
    cluster.create_collection(&node(2), "b2");
    let client = client(
        &cluster,
        &[node(1), node(2)],
        split_locator(&["a1", "a3"], &["b1", "b2"]),
    )
    .await;

    let request = SmgetRequest::new(
        keys(&["b1", "a1", "a3", "b2"]),
        BKeyRange::new(0, 10),
        ElementFlagFilter::DO_NOT_FILTER,
        0,
        10,
    )
    .unwrap();
    let (elements, missed) = get(&engine(), &client, request).await;

    assert_eq!(elements, vec![("a1".to_string(), 1)]);
    // b2 exists but holds nothing in range; it is not missed.
    assert_eq!(missed, keys(&["b1", "a3"]));
}

#[tokio::test]
async fn failed_node_marks_its_keys_missed() {
    let cluster = MemoryCluster::new();
    cluster.insert(&node(1), SmgetElement::new("a1", 1, "v"));
    cluster.insert(&node(2), SmgetElement::new("b1", 2, "v"));
    cluster.insert(&node(2), SmgetElement::new("b2", 3, "v"));
    let client = client(&cluster, &[node(1), node(2)], split_locator(&["a1"], &["b1", "b2"])).await;
    cluster.fail_requests(&node(2), Some("SERVER_ERROR out of memory"));

    let request = SmgetRequest::new(
        keys(&["b2", "a1", "b1"]),
        BKeyRange::new(0, 10),
        ElementFlagFilter::DO_NOT_FILTER,
        0,
        10,
    )
    .unwrap();
    let (elements, missed) = get(&engine(), &client, request).await;

    assert_eq!(elements, vec![("a1".to_string(), 1)]);
    assert_eq!(missed, keys(&["b2", "b1"]));
}

#[tokio::test]
async fn unroutable_keys_are_missed() {
    let cluster = MemoryCluster::new();
    cluster.insert(&node(1), SmgetElement::new("a1", 1, "v"));
    let client = client(&cluster, &[node(1)], split_locator(&["a1"], &[])).await;

    let request = SmgetRequest::new(
        keys(&["nowhere", "a1"]),
        BKeyRange::new(0, 10),
        ElementFlagFilter::DO_NOT_FILTER,
        0,
        10,
    )
    .unwrap();
    let (elements, missed) = get(&engine(), &client, request).await;

    assert_eq!(elements.len(), 1);
    assert_eq!(missed, keys(&["nowhere"]));
}

#[tokio::test]
async fn duplicate_keys_are_served_once() {
    let cluster = MemoryCluster::new();
    cluster.insert(&node(1), SmgetElement::new("a1", 1, "v"));
    cluster.insert(&node(1), SmgetElement::new("a1", 2, "v"));
    let client = client(&cluster, &[node(1)], split_locator(&["a1", "a9"], &[])).await;

    let request = SmgetRequest::new(
        keys(&["a1", "a9", "a1", "a9"]),
        BKeyRange::new(0, 10),
        ElementFlagFilter::DO_NOT_FILTER,
        0,
        10,
    )
    .unwrap();
    let (elements, missed) = get(&engine(), &client, request).await;

    assert_eq!(elements, vec![("a1".to_string(), 1), ("a1".to_string(), 2)]);
    assert_eq!(missed, keys(&["a9"]));
    assert_eq!(cluster.requests(&node(1)), 1);
}

#[tokio::test]
async fn hash_ring_routes_every_key_to_a_node() {
    let cluster = MemoryCluster::new();
    let nodes = [node(1), node(2), node(3)];
    for address in &nodes {
        cluster.add_node(address);
    }
    let client = client(&cluster, &nodes, HashRing::factory()).await;
    let routing = client.routing();
    let names: Vec<String> = (0..30).map(|i| format!("key{i}")).collect();
    for (i, key) in names.iter().enumerate() {
        let owner = routing.locate(key).expect("owner").clone();
        cluster.insert(&owner, SmgetElement::new(key.clone(), i as u64, "v"));
    }

    let request = SmgetRequest::new(
        names.clone(),
        BKeyRange::new(0, 100),
        ElementFlagFilter::DO_NOT_FILTER,
        0,
        100,
    )
    .unwrap();
    let (elements, missed) = get(&engine(), &client, request).await;

    let bkeys: Vec<u64> = elements.into_iter().map(|(_, bkey)| bkey).collect();
    assert_eq!(bkeys, (0..30).collect::<Vec<u64>>());
    assert!(missed.is_empty());
}

#[tokio::test(start_paused = true)]
async fn operation_timeout_finishes_slow_requests() {
    let cluster = MemoryCluster::new();
    cluster.insert(&node(1), SmgetElement::new("a1", 1, "v"));
    let client = client(&cluster, &[node(1)], split_locator(&["a1"], &[])).await;
    cluster.set_latency(&node(1), Duration::from_secs(60));

    let engine = SmgetEngine::default().with_operation_timeout(Some(Duration::from_millis(700)));
    let request = SmgetRequest::new(
        keys(&["a1"]),
        BKeyRange::new(0, 10),
        ElementFlagFilter::DO_NOT_FILTER,
        0,
        10,
    )
    .unwrap();
    let handle = engine.sorted_merge_get(&client, request);

    let result = handle.get(Duration::from_secs(10)).await;
    assert_eq!(result, Err(SmgetError::Timeout(Duration::from_millis(700))));
    assert_eq!(handle.status(), SmgetStatus::TimedOut);
    assert!(!handle.cancel());
}

#[tokio::test(start_paused = true)]
async fn cancel_abandons_the_request() {
    let cluster = MemoryCluster::new();
    cluster.insert(&node(1), SmgetElement::new("a1", 1, "v"));
    let client = client(&cluster, &[node(1)], split_locator(&["a1"], &[])).await;
    cluster.set_latency(&node(1), Duration::from_secs(60));

    let request = SmgetRequest::new(
        keys(&["a1"]),
        BKeyRange::new(0, 10),
        ElementFlagFilter::DO_NOT_FILTER,
        0,
        10,
    )
    .unwrap();
    let handle = SmgetEngine::default()
        .with_operation_timeout(None)
        .sorted_merge_get(&client, request);

    assert_eq!(
        handle.get(Duration::from_millis(1)).await,
        Err(SmgetError::Timeout(Duration::from_millis(1)))
    );
    assert_eq!(handle.status(), SmgetStatus::Pending);

    assert!(handle.cancel());
    assert!(handle.is_done());
    assert_eq!(handle.get(Duration::from_secs(1)).await, Err(SmgetError::Cancelled));
    assert_eq!(handle.missed_keys(), None);
}
