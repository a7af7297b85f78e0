//! Caller-facing operations: validate, fan out, merge
//!
//! `GraphService` is what the JSON-RPC tools and the CLI call. Request-wide
//! parameters (filters, direction, strength) are validated up front and
//! reject the whole call; per-entity and per-kind problems become entries in
//! `partial_failures` so the rest of the batch still runs.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{RelgraphError, Result};
use crate::storage::{SqliteGraphStore, StoragePool};
use crate::traversal::{
    merge, FanoutCoordinator, FanoutJob, FanoutOverrides, HopEdge, MergedEdge, Provenance,
    TraversalEngine, TraversalResult,
};
use crate::types::{
    Direction, EngineConfig, EntityId, NeighborEdge, NeighborQuery, TraversalKind,
};
use crate::validate::{
    parse_layers, parse_relationship_types, parse_traversal_kind, preview, validate_entity_id,
    validate_min_strength,
};

/// Multi-entity traversal request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraverseRequest {
    pub entity_ids: Vec<String>,
    /// Traversal kinds to run per entity (empty = `all`)
    #[serde(default)]
    pub kinds: Vec<String>,
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default)]
    pub min_strength: Option<f32>,
    #[serde(default)]
    pub relationship_types: Vec<String>,
    #[serde(default)]
    pub layers: Vec<String>,
    /// Overrides each kind's preset direction
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub node_cap: Option<usize>,
}

/// One (entity, kind) pair that did not contribute cleanly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialFailure {
    /// Caller input, escaped and bounded
    pub entity_id: String,
    pub kind: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraverseStats {
    pub units: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraverseResponse {
    pub edges: Vec<MergedEdge>,
    /// Some traversal stopped at the node cap or depth ceiling
    pub truncated: bool,
    /// Some unit failed or some node could not be expanded
    pub partial: bool,
    pub partial_failures: Vec<PartialFailure>,
    pub stats: TraverseStats,
}

/// Chain search between two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindChainRequest {
    pub from_id: String,
    pub to_id: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default)]
    pub min_strength: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainResponse {
    pub found: bool,
    pub hops: usize,
    pub chain: Vec<HopEdge>,
    pub truncated: bool,
}

/// Single-hop lookup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NeighborsRequest {
    pub entity_id: String,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub relationship_types: Vec<String>,
    #[serde(default)]
    pub layers: Vec<String>,
    #[serde(default)]
    pub min_strength: Option<f32>,
}

pub struct GraphService {
    coordinator: FanoutCoordinator,
}

impl GraphService {
    pub fn new(engine: Arc<TraversalEngine>) -> Self {
        Self {
            coordinator: FanoutCoordinator::new(engine),
        }
    }

    /// Service backed by a SQLite pool
    pub fn from_pool(pool: &StoragePool, config: EngineConfig) -> Self {
        let store = Arc::new(SqliteGraphStore::from_pool(pool));
        let engine = TraversalEngine::new(store.clone(), store, config);
        Self::new(Arc::new(engine))
    }

    pub fn with_coordinator(coordinator: FanoutCoordinator) -> Self {
        Self { coordinator }
    }

    pub fn engine(&self) -> &Arc<TraversalEngine> {
        self.coordinator.engine()
    }

    pub fn coordinator(&self) -> &FanoutCoordinator {
        &self.coordinator
    }

    /// Run every requested kind for every entity and merge the results
    pub async fn traverse(&self, request: &TraverseRequest) -> Result<TraverseResponse> {
        if request.entity_ids.is_empty() {
            return Err(RelgraphError::InvalidInput(
                "entity_ids must not be empty".to_string(),
            ));
        }

        let overrides = FanoutOverrides {
            max_depth: request.max_depth,
            min_strength: request.min_strength.map(validate_min_strength).transpose()?,
            node_cap: request.node_cap,
            direction: request.direction.as_deref().map(parse_direction).transpose()?,
            relationship_types: parse_relationship_types(&request.relationship_types)?,
            layers: parse_layers(&request.layers)?,
        };

        let mut partial_failures = Vec::new();
        let mut kinds: Vec<TraversalKind> = Vec::new();
        for raw in &request.kinds {
            match parse_traversal_kind(raw) {
                Ok(kind) if !kinds.contains(&kind) => kinds.push(kind),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(kind = %preview(raw), "Unknown traversal kind");
                    partial_failures.extend(request.entity_ids.iter().map(|id| PartialFailure {
                        entity_id: preview(id),
                        kind: preview(raw),
                        reason: e.kind().to_string(),
                        detail: Some(e.to_string()),
                    }));
                }
            }
        }
        if request.kinds.is_empty() {
            kinds.push(TraversalKind::All);
        }

        let fanout = self
            .coordinator
            .run(&request.entity_ids, &kinds, &overrides)
            .await;

        let mut contributions: Vec<(Provenance, &TraversalResult)> = Vec::new();
        for outcome in &fanout.outcomes {
            match &outcome.result {
                Ok(result) => {
                    if let Some(failure) = node_failure(&outcome.job, result) {
                        partial_failures.push(failure);
                    }
                    contributions.push((
                        Provenance {
                            entity_id: result.start_id,
                            kind: outcome.job.kind,
                        },
                        result,
                    ));
                }
                Err(failure) => partial_failures.push(PartialFailure {
                    entity_id: preview(&outcome.job.entity_id),
                    kind: outcome.job.kind.to_string(),
                    reason: failure.reason().to_string(),
                    detail: Some(failure.detail()),
                }),
            }
        }

        let merged = merge(contributions);
        let stats = TraverseStats {
            units: fanout.outcomes.len(),
            succeeded: fanout.succeeded().count(),
            failed: fanout.failed().count(),
            timed_out: fanout.timed_out(),
            elapsed_ms: fanout.elapsed_ms,
        };

        tracing::info!(
            units = stats.units,
            failed = stats.failed,
            edges = merged.edges.len(),
            elapsed_ms = stats.elapsed_ms,
            "Traverse request complete"
        );

        Ok(TraverseResponse {
            edges: merged.edges,
            truncated: merged.truncated,
            partial: merged.partial || !partial_failures.is_empty(),
            partial_failures,
            stats,
        })
    }

    /// Discovery chain from `from_id` to `to_id`, if one exists within the
    /// depth bound
    pub async fn find_chain(&self, request: &FindChainRequest) -> Result<ChainResponse> {
        let from = checked_entity_id(&request.from_id)?;
        let to = checked_entity_id(&request.to_id)?;
        let kind = match request.kind.as_deref() {
            Some(raw) => parse_traversal_kind(raw)?,
            None => TraversalKind::All,
        };

        let engine = self.engine();
        let mut traversal = engine.request_for_kind(from, kind);
        traversal.max_depth = request
            .max_depth
            .unwrap_or(engine.config().max_depth_ceiling);
        if let Some(strength) = request.min_strength {
            traversal.min_strength = validate_min_strength(strength)?;
        }

        let result = engine.traverse(&traversal).await;
        let chain: Option<Vec<HopEdge>> = result
            .chain_to(to)
            .map(|edges| edges.into_iter().cloned().collect());

        Ok(match chain {
            Some(chain) => ChainResponse {
                found: true,
                hops: chain.len(),
                chain,
                truncated: result.truncated,
            },
            None => ChainResponse {
                found: false,
                hops: 0,
                chain: vec![],
                truncated: result.truncated,
            },
        })
    }

    /// Immediate edges of one entity
    pub async fn neighbors(&self, request: &NeighborsRequest) -> Result<Vec<NeighborEdge>> {
        let entity_id = checked_entity_id(&request.entity_id)?;
        let query = NeighborQuery {
            direction: request
                .direction
                .as_deref()
                .map(parse_direction)
                .transpose()?
                .unwrap_or_default(),
            relationship_types: parse_relationship_types(&request.relationship_types)?,
            layers: parse_layers(&request.layers)?,
            min_strength: request
                .min_strength
                .map(validate_min_strength)
                .transpose()?
                .unwrap_or(0.0),
        };
        self.engine().store().neighbors(entity_id, &query).await
    }
}

/// Validate a single caller-supplied id, logging rejections
fn checked_entity_id(raw: &str) -> Result<EntityId> {
    validate_entity_id(raw).map_err(|e| {
        tracing::error!(input = %preview(raw), "Rejected malformed entity identifier");
        RelgraphError::from(e)
    })
}

fn parse_direction(raw: &str) -> Result<Direction> {
    raw.parse::<Direction>().map_err(RelgraphError::InvalidInput)
}

/// Report a successful unit whose traversal could not expand some nodes
fn node_failure(job: &FanoutJob, result: &TraversalResult) -> Option<PartialFailure> {
    let first = result.failed_nodes.first()?;
    let ids: Vec<String> = result
        .failed_nodes
        .iter()
        .map(|n| n.entity_id.to_string())
        .collect();
    Some(PartialFailure {
        entity_id: preview(&job.entity_id),
        kind: job.kind.to_string(),
        reason: first.reason.clone(),
        detail: Some(format!(
            "{} node(s) could not be expanded: {}",
            ids.len(),
            ids.join(", ")
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::queries::{upsert_entity, upsert_relationship};
    use crate::types::{Edge, Entity, EntityType, Layer, RelationshipType, StorageConfig};
    use std::collections::BTreeMap;

    fn service_with_chain() -> (GraphService, Vec<EntityId>) {
        let pool = StoragePool::new(StorageConfig::in_memory()).unwrap();
        let ids: Vec<EntityId> = (0..3).map(|_| EntityId::new_v4()).collect();
        pool.with_connection(|conn| {
            for (i, id) in ids.iter().enumerate() {
                upsert_entity(
                    conn,
                    &Entity {
                        id: *id,
                        name: format!("node-{}", i),
                        entity_type: EntityType::Event,
                    },
                )?;
            }
            for pair in ids.windows(2) {
                upsert_relationship(
                    conn,
                    &Edge {
                        source_id: pair[0],
                        target_id: pair[1],
                        relationship_type: RelationshipType::Causes,
                        layer: Layer::Causal,
                        strength: 0.8,
                        metadata: BTreeMap::new(),
                    },
                )?;
            }
            Ok(())
        })
        .unwrap();
        (GraphService::from_pool(&pool, EngineConfig::default()), ids)
    }

    #[tokio::test]
    async fn test_empty_entity_ids_is_rejected() {
        let (service, _) = service_with_chain();
        let err = service.traverse(&TraverseRequest::default()).await.unwrap_err();
        assert_eq!(err.reason(), "invalid_input");
    }

    #[tokio::test]
    async fn test_unknown_kind_is_reported_per_entity() {
        let (service, ids) = service_with_chain();
        let request = TraverseRequest {
            entity_ids: vec![ids[0].to_string()],
            kinds: vec!["causal_effects".to_string(), "astrology".to_string()],
            ..Default::default()
        };
        let response = service.traverse(&request).await.unwrap();

        assert_eq!(response.edges.len(), 2);
        assert_eq!(response.edges[0].source_name, "node-0");
        assert_eq!(response.partial_failures.len(), 1);
        assert_eq!(response.partial_failures[0].reason, "unknown_traversal_kind");
        assert!(response.partial);
    }

    #[tokio::test]
    async fn test_bad_filter_rejects_whole_request() {
        let (service, ids) = service_with_chain();
        let request = TraverseRequest {
            entity_ids: vec![ids[0].to_string()],
            relationship_types: vec!["teleports".to_string()],
            ..Default::default()
        };
        let err = service.traverse(&request).await.unwrap_err();
        assert_eq!(err.reason(), "unknown_relationship_type");
    }

    #[tokio::test]
    async fn test_find_chain_and_neighbors() {
        let (service, ids) = service_with_chain();
        let chain = service
            .find_chain(&FindChainRequest {
                from_id: ids[0].to_string(),
                to_id: ids[2].to_string(),
                kind: Some("causal_effects".to_string()),
                max_depth: None,
                min_strength: None,
            })
            .await
            .unwrap();
        assert!(chain.found);
        assert_eq!(chain.hops, 2);

        let neighbors = service
            .neighbors(&NeighborsRequest {
                entity_id: ids[1].to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(neighbors.len(), 2);

        let err = service
            .neighbors(&NeighborsRequest {
                entity_id: "not-an-id".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "malformed_identifier");
    }
}
