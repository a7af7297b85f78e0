//! End-to-end traversal behavior: cycles, caps, failures and the SQLite store
//!
//! Run with: cargo test --test traversal_tests

mod common;

use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{edge, seeded_pool, CompleteGraphStore, MockStore};
use relgraph::api::{GraphService, TraverseRequest};
use relgraph::storage::SqliteGraphStore;
use relgraph::traversal::{TraversalEngine, TraversalRequest, Truncation};
use relgraph::types::{CyclePolicy, Direction, EngineConfig, EntityId, Layer};

fn engine_over(store: Arc<MockStore>) -> TraversalEngine {
    TraversalEngine::new(
        store.clone(),
        store,
        EngineConfig {
            retry_base_delay_ms: 1,
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_three_node_cycle_returns_three_edges_from_sqlite() {
    let (x, y, z) = (EntityId::new_v4(), EntityId::new_v4(), EntityId::new_v4());
    let pool = seeded_pool(
        &[(x, "X"), (y, "Y"), (z, "Z")],
        &[
            edge(x, y, Layer::Causal, 0.8),
            edge(y, z, Layer::Causal, 0.6),
            edge(z, x, Layer::Causal, 0.9),
        ],
    );
    let store = Arc::new(SqliteGraphStore::from_pool(&pool));
    let engine = TraversalEngine::new(store.clone(), store, EngineConfig::default());

    let result = engine
        .traverse(&TraversalRequest::new(x).with_depth(3))
        .await;

    assert_eq!(result.edges.len(), 3);
    let keys: HashSet<_> = result.edges.iter().map(|e| e.edge.key()).collect();
    assert_eq!(keys.len(), 3);
    assert!(!result.truncated);
    assert_eq!(result.stats.nodes_visited, 3);

    // hop 1: Z->X (0.9) then X->Y (0.8); hop 2: the closing Y->Z
    let order: Vec<(usize, f32, bool)> = result
        .edges
        .iter()
        .map(|e| (e.hop, e.edge.strength, e.closing))
        .collect();
    assert_eq!(order, vec![(1, 0.9, false), (1, 0.8, false), (2, 0.6, true)]);
    assert_eq!(result.edges[0].source_name, "Z");
    assert_eq!(result.edges[0].target_name, "X");
}

#[tokio::test]
async fn test_cycle_with_discard_policy_keeps_discovery_edges_only() {
    let (x, y, z) = (EntityId::new_v4(), EntityId::new_v4(), EntityId::new_v4());
    let store = MockStore::new(vec![
        edge(x, y, Layer::Causal, 0.8),
        edge(y, z, Layer::Causal, 0.6),
        edge(z, x, Layer::Causal, 0.9),
    ])
    .into_arc();
    let engine = engine_over(store);

    let result = engine
        .traverse(
            &TraversalRequest::new(x)
                .with_depth(3)
                .with_cycle_policy(CyclePolicy::Discard),
        )
        .await;
    assert_eq!(result.edges.len(), 2);
}

#[tokio::test]
async fn test_outgoing_cycle_terminates_and_expands_each_node_once() {
    let ids: Vec<EntityId> = (0..6).map(|_| EntityId::new_v4()).collect();
    let mut edges: Vec<_> = ids
        .windows(2)
        .map(|w| edge(w[0], w[1], Layer::Causal, 0.5))
        .collect();
    edges.push(edge(ids[5], ids[0], Layer::Causal, 0.5));
    edges.push(edge(ids[3], ids[1], Layer::Causal, 0.5));
    let store = MockStore::new(edges).into_arc();
    let engine = engine_over(store.clone());

    let result = engine
        .traverse(
            &TraversalRequest::new(ids[0])
                .with_depth(5)
                .with_direction(Direction::Outgoing),
        )
        .await;

    let expanded = store.expanded.lock().clone();
    let unique: HashSet<_> = expanded.iter().collect();
    assert_eq!(expanded.len(), unique.len());
    assert_eq!(result.stats.nodes_visited, 6);
    // 5 discovery edges + closing 3->1; node 5 sits at the depth limit
    assert_eq!(result.edges.len(), 6);
    assert!(result.edges.iter().any(|e| e.closing && e.hop == 4));
}

#[tokio::test]
async fn test_complete_graph_hits_node_cap() {
    let store = Arc::new(CompleteGraphStore::new(2000));
    let engine = TraversalEngine::new(store.clone(), store.clone(), EngineConfig::default());

    let result = engine
        .traverse(
            &TraversalRequest::new(store.node(17))
                .with_depth(3)
                .with_node_cap(1000)
                .with_direction(Direction::Outgoing),
        )
        .await;

    assert!(result.truncated);
    assert_eq!(result.truncation, Some(Truncation::NodeCap));
    assert!(result.stats.nodes_visited <= 1000);
    assert_eq!(result.stats.nodes_visited, 1000);
    assert_eq!(result.edges.len(), 999);
    // Stopped mid-level: no second level was fetched
    assert_eq!(store.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_node_cap_is_clamped_to_ceiling() {
    let store = Arc::new(CompleteGraphStore::new(300));
    let config = EngineConfig {
        node_cap_ceiling: 50,
        ..Default::default()
    };
    let engine = TraversalEngine::new(store.clone(), store.clone(), config);

    let result = engine
        .traverse(&TraversalRequest::new(store.node(0)).with_node_cap(100_000))
        .await;
    assert_eq!(result.stats.node_cap, 50);
    assert_eq!(result.stats.nodes_visited, 50);
    assert!(result.truncated);
}

#[tokio::test]
async fn test_unknown_entity_is_empty_and_clean() {
    let pool = seeded_pool(&[], &[]);
    let service = GraphService::from_pool(&pool, EngineConfig::default());

    let response = service
        .traverse(&TraverseRequest {
            entity_ids: vec![EntityId::new_v4().to_string()],
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(response.edges.is_empty());
    assert!(!response.truncated);
    assert!(!response.partial);
    assert!(response.partial_failures.is_empty());
}

#[tokio::test]
async fn test_transient_failure_is_retried_then_succeeds() {
    let ids: Vec<EntityId> = (0..2).map(|_| EntityId::new_v4()).collect();
    let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = attempts.clone();
    let store = MockStore::new(vec![edge(ids[0], ids[1], Layer::Causal, 0.7)])
        .failing_when(move |_, _| counter.fetch_add(1, Ordering::SeqCst) < 2)
        .into_arc();
    let engine = engine_over(store);

    let result = engine
        .traverse(
            &TraversalRequest::new(ids[0])
                .with_depth(1)
                .with_direction(Direction::Outgoing),
        )
        .await;

    assert!(!result.partial);
    assert_eq!(result.edges.len(), 1);
    assert_eq!(result.stats.retries, 2);
    assert_eq!(result.stats.store_calls, 3);
}

#[tokio::test]
async fn test_layer_filter_limits_walk() {
    let ids: Vec<EntityId> = (0..3).map(|_| EntityId::new_v4()).collect();
    let pool = seeded_pool(
        &[],
        &[
            edge(ids[0], ids[1], Layer::Causal, 0.5),
            edge(ids[0], ids[2], Layer::Semantic, 0.5),
        ],
    );
    let store = Arc::new(SqliteGraphStore::from_pool(&pool));
    let engine = TraversalEngine::new(store.clone(), store, EngineConfig::default());

    let result = engine
        .traverse(&TraversalRequest::new(ids[0]).with_layers(vec![Layer::Semantic]))
        .await;
    assert_eq!(result.edges.len(), 1);
    assert_eq!(result.edges[0].edge.target_id, ids[2]);
    // Unresolvable names fall back to empty strings
    assert_eq!(result.edges[0].source_name, "");
}

#[tokio::test]
async fn test_failed_lookup_is_reported_when_cap_stops_the_level() {
    let (s, a, b) = (EntityId::new_v4(), EntityId::new_v4(), EntityId::new_v4());
    let mut edges = vec![
        edge(s, a, Layer::Causal, 0.9),
        edge(s, b, Layer::Causal, 0.8),
    ];
    edges.extend((0..10).map(|_| edge(a, EntityId::new_v4(), Layer::Causal, 0.5)));
    let store = MockStore::new(edges)
        .failing_when(move |node, _| node == b)
        .into_arc();
    let engine = engine_over(store.clone());

    let result = engine
        .traverse(
            &TraversalRequest::new(s)
                .with_depth(2)
                .with_node_cap(5)
                .with_direction(Direction::Outgoing),
        )
        .await;

    assert_eq!(result.truncation, Some(Truncation::NodeCap));
    assert!(result.partial);
    assert_eq!(result.failed_nodes.len(), 1);
    assert_eq!(result.failed_nodes[0].entity_id, b);
    assert_eq!(result.failed_nodes[0].reason, "store_unavailable");
    assert_eq!(result.stats.retries, 2);
    // s once, a once, b three times
    assert_eq!(result.stats.store_calls, 5);
    assert_eq!(store.call_count(), 5);
}

#[tokio::test]
async fn test_exhausted_graph_under_clamped_depth_is_not_truncated() {
    let ids: Vec<EntityId> = (0..6).map(|_| EntityId::new_v4()).collect();
    let edges: Vec<_> = ids
        .windows(2)
        .map(|w| edge(w[0], w[1], Layer::Causal, 0.5))
        .collect();
    let store = MockStore::new(edges).into_arc();
    let engine = engine_over(store);

    let result = engine
        .traverse(&TraversalRequest::new(ids[0]).with_depth(10))
        .await;

    assert_eq!(result.stats.effective_max_depth, 5);
    assert_eq!(result.edges.len(), 5);
    assert!(!result.truncated);
    assert_eq!(result.truncation, None);
}

#[tokio::test]
async fn test_zero_depth_walks_one_hop() {
    let ids: Vec<EntityId> = (0..3).map(|_| EntityId::new_v4()).collect();
    let store = MockStore::new(vec![
        edge(ids[0], ids[1], Layer::Causal, 0.5),
        edge(ids[1], ids[2], Layer::Causal, 0.5),
    ])
    .into_arc();
    let engine = engine_over(store);

    let result = engine
        .traverse(&TraversalRequest::new(ids[0]).with_depth(0))
        .await;

    assert_eq!(result.stats.effective_max_depth, 1);
    assert_eq!(result.edges.len(), 1);
    assert_eq!(result.edges[0].edge.target_id, ids[1]);
}
