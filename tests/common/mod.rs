//! In-process stores shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relgraph::error::{RelgraphError, Result};
use relgraph::storage::queries::{upsert_entity, upsert_relationship};
use relgraph::storage::{EdgeStore, EntityLookup, StoragePool};
use relgraph::types::{
    Direction, Edge, Entity, EntityId, EntityType, Layer, MatchedSide, NeighborEdge,
    NeighborQuery, RelationshipType, StorageConfig,
};

pub fn edge(source: EntityId, target: EntityId, layer: Layer, strength: f32) -> Edge {
    Edge {
        source_id: source,
        target_id: target,
        relationship_type: RelationshipType::Causes,
        layer,
        strength,
        metadata: BTreeMap::new(),
    }
}

type FailWhen = dyn Fn(EntityId, &NeighborQuery) -> bool + Send + Sync;

/// Adjacency-list store with call counting, optional latency and
/// injectable failures
#[derive(Default)]
pub struct MockStore {
    edges: Vec<Edge>,
    names: HashMap<EntityId, String>,
    delay: Option<Duration>,
    fail_when: Option<Box<FailWhen>>,
    pub calls: AtomicUsize,
    pub expanded: Mutex<Vec<EntityId>>,
}

impl MockStore {
    pub fn new(edges: Vec<Edge>) -> Self {
        Self {
            edges,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_name(mut self, id: EntityId, name: &str) -> Self {
        self.names.insert(id, name.to_string());
        self
    }

    pub fn failing_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(EntityId, &NeighborQuery) -> bool + Send + Sync + 'static,
    {
        self.fail_when = Some(Box::new(predicate));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

fn matches(edge: &Edge, query: &NeighborQuery) -> bool {
    edge.strength >= query.min_strength
        && (query.layers.is_empty() || query.layers.contains(&edge.layer))
        && (query.relationship_types.is_empty()
            || query.relationship_types.contains(&edge.relationship_type))
}

#[async_trait]
impl EdgeStore for MockStore {
    async fn neighbors(
        &self,
        entity_id: EntityId,
        query: &NeighborQuery,
    ) -> Result<Vec<NeighborEdge>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.expanded.lock().push(entity_id);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(fail) = &self.fail_when {
            if fail(entity_id, query) {
                return Err(RelgraphError::StoreUnavailable("injected outage".into()));
            }
        }

        let mut out = Vec::new();
        for edge in self.edges.iter().filter(|e| matches(e, query)) {
            let outgoing = edge.source_id == entity_id && query.direction != Direction::Incoming;
            let incoming = edge.target_id == entity_id
                && edge.source_id != entity_id
                && query.direction != Direction::Outgoing;
            if outgoing {
                out.push(NeighborEdge {
                    edge: edge.clone(),
                    matched: MatchedSide::Source,
                });
            } else if incoming {
                out.push(NeighborEdge {
                    edge: edge.clone(),
                    matched: MatchedSide::Target,
                });
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl EntityLookup for MockStore {
    async fn lookup_entities(&self, ids: &[EntityId]) -> Result<HashMap<EntityId, Entity>> {
        Ok(ids
            .iter()
            .filter_map(|id| {
                self.names.get(id).map(|name| {
                    (
                        *id,
                        Entity {
                            id: *id,
                            name: name.clone(),
                            entity_type: EntityType::Other,
                        },
                    )
                })
            })
            .collect())
    }
}

/// Every node links to every other node; edges are generated on demand
pub struct CompleteGraphStore {
    nodes: Vec<EntityId>,
    pub calls: AtomicUsize,
}

impl CompleteGraphStore {
    pub fn new(size: usize) -> Self {
        Self {
            nodes: (0..size).map(|_| EntityId::new_v4()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn node(&self, index: usize) -> EntityId {
        self.nodes[index]
    }
}

#[async_trait]
impl EdgeStore for CompleteGraphStore {
    async fn neighbors(
        &self,
        entity_id: EntityId,
        _query: &NeighborQuery,
    ) -> Result<Vec<NeighborEdge>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .nodes
            .iter()
            .filter(|other| **other != entity_id)
            .map(|other| NeighborEdge {
                edge: edge(entity_id, *other, Layer::Entity, 0.5),
                matched: MatchedSide::Source,
            })
            .collect())
    }
}

#[async_trait]
impl EntityLookup for CompleteGraphStore {
    async fn lookup_entities(&self, _ids: &[EntityId]) -> Result<HashMap<EntityId, Entity>> {
        Ok(HashMap::new())
    }
}

/// In-memory SQLite pool seeded with named entities and edges
pub fn seeded_pool(entities: &[(EntityId, &str)], edges: &[Edge]) -> StoragePool {
    let pool = StoragePool::new(StorageConfig::in_memory()).unwrap();
    pool.with_connection(|conn| {
        for (id, name) in entities {
            upsert_entity(
                conn,
                &Entity {
                    id: *id,
                    name: name.to_string(),
                    entity_type: EntityType::Event,
                },
            )?;
        }
        for edge in edges {
            upsert_relationship(conn, edge)?;
        }
        Ok(())
    })
    .unwrap();
    pool
}
