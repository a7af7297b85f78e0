//! Bounded, cycle-safe, level-synchronous BFS over an `EdgeStore`
//!
//! One call of [`TraversalEngine::traverse`] owns one [`VisitedSet`]. Each BFS
//! level fetches the neighbors of every frontier node (concurrently, bounded
//! by `frontier_concurrency`), waits for all of them, and only then commits
//! newly discovered nodes. That barrier is what lets the next level skip
//! already-visited nodes safely.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::error::Result;
use crate::storage::{EdgeStore, EntityLookup};
use crate::types::{
    CyclePolicy, Direction, Edge, EdgeKey, EngineConfig, EntityId, Layer, NeighborEdge,
    NeighborQuery, RelationshipType, TraversalKind,
};

/// Input to a single traversal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversalRequest {
    pub start_id: EntityId,
    /// Requested depth; clamped to the engine's ceiling
    pub max_depth: usize,
    /// Filter by relationship types (empty = all types)
    #[serde(default)]
    pub relationship_types: Vec<RelationshipType>,
    /// Filter by layers (empty = all layers)
    #[serde(default)]
    pub layers: Vec<Layer>,
    #[serde(default)]
    pub min_strength: f32,
    #[serde(default)]
    pub direction: Direction,
    /// Maximum number of distinct nodes, start included
    pub node_cap: usize,
    /// Overrides the engine's default policy when set
    #[serde(default)]
    pub cycle_policy: Option<CyclePolicy>,
}

impl TraversalRequest {
    /// Request with the stock defaults (depth 2, cap 1000, both directions)
    pub fn new(start_id: EntityId) -> Self {
        let defaults = EngineConfig::default();
        Self {
            start_id,
            max_depth: defaults.default_max_depth,
            relationship_types: vec![],
            layers: vec![],
            min_strength: 0.0,
            direction: Direction::Both,
            node_cap: defaults.default_node_cap,
            cycle_policy: None,
        }
    }

    pub fn with_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_node_cap(mut self, node_cap: usize) -> Self {
        self.node_cap = node_cap;
        self
    }

    pub fn with_layers(mut self, layers: Vec<Layer>) -> Self {
        self.layers = layers;
        self
    }

    pub fn with_relationship_types(mut self, types: Vec<RelationshipType>) -> Self {
        self.relationship_types = types;
        self
    }

    pub fn with_min_strength(mut self, min_strength: f32) -> Self {
        self.min_strength = min_strength;
        self
    }

    pub fn with_cycle_policy(mut self, policy: CyclePolicy) -> Self {
        self.cycle_policy = Some(policy);
        self
    }

    fn neighbor_query(&self) -> NeighborQuery {
        NeighborQuery {
            direction: self.direction,
            relationship_types: self.relationship_types.clone(),
            layers: self.layers.clone(),
            min_strength: self.min_strength,
        }
    }
}

/// An edge discovered during traversal, annotated with its hop distance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HopEdge {
    #[serde(flatten)]
    pub edge: Edge,
    /// 1 = adjacent to the start node
    pub hop: usize,
    /// The far end was already visited; the edge was recorded but not expanded
    #[serde(default)]
    pub closing: bool,
    /// Node this edge committed to the visited set (None for closing edges)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovered_id: Option<EntityId>,
    pub source_name: String,
    pub target_name: String,
}

/// Why a traversal stopped before exhausting the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Truncation {
    /// The visited-node cap was reached mid-expansion
    NodeCap,
    /// The request was clamped to the depth ceiling and the last level still
    /// discovered nodes
    DepthCeiling,
}

/// A frontier node whose neighbor lookup failed after retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedNode {
    pub entity_id: EntityId,
    /// Depth of the failed node (0 = start)
    pub depth: usize,
    /// Stable error kind, e.g. `store_unavailable`
    pub reason: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraversalStats {
    /// Distinct nodes committed, start included
    pub nodes_visited: usize,
    /// Nodes committed at each depth
    pub nodes_per_depth: BTreeMap<usize, usize>,
    pub max_depth_reached: usize,
    /// Depth actually used after clamping
    pub effective_max_depth: usize,
    /// Node cap actually used after clamping
    pub node_cap: usize,
    /// Neighbor lookups issued, retries included
    pub store_calls: usize,
    pub retries: usize,
    pub elapsed_ms: u64,
}

/// Result of one traversal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversalResult {
    pub start_id: EntityId,
    /// Ordered by hop ascending, then strength descending
    pub edges: Vec<HopEdge>,
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncation: Option<Truncation>,
    /// Some frontier nodes could not be expanded
    pub partial: bool,
    #[serde(default)]
    pub failed_nodes: Vec<FailedNode>,
    pub stats: TraversalStats,
}

impl TraversalResult {
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Reconstruct the chain of discovery edges from the start node to
    /// `target`. `Some(vec![])` for the start itself, `None` when `target`
    /// was not reached.
    pub fn chain_to(&self, target: EntityId) -> Option<Vec<&HopEdge>> {
        if target == self.start_id {
            return Some(vec![]);
        }

        let discovered_by: HashMap<EntityId, &HopEdge> = self
            .edges
            .iter()
            .filter_map(|e| e.discovered_id.map(|id| (id, e)))
            .collect();

        let mut chain = Vec::new();
        let mut current = target;
        while current != self.start_id {
            let edge = discovered_by.get(&current)?;
            chain.push(*edge);
            current = if edge.edge.target_id == current {
                edge.edge.source_id
            } else {
                edge.edge.target_id
            };
            // discovery edges form a tree rooted at the start
            if chain.len() > self.edges.len() {
                return None;
            }
        }
        chain.reverse();
        Some(chain)
    }
}

/// Set of nodes committed during one traversal call, bounded by the node cap.
/// Never shared between traversals.
#[derive(Debug)]
pub struct VisitedSet {
    seen: HashSet<EntityId>,
    cap: usize,
}

impl VisitedSet {
    pub fn new(start: EntityId, cap: usize) -> Self {
        let mut seen = HashSet::new();
        seen.insert(start);
        Self {
            seen,
            cap: cap.max(1),
        }
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.seen.contains(id)
    }

    pub fn is_full(&self) -> bool {
        self.seen.len() >= self.cap
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Commit a node. Returns false if it was already present or the set is
    /// full.
    pub fn insert(&mut self, id: EntityId) -> bool {
        if self.is_full() {
            return false;
        }
        self.seen.insert(id)
    }
}

/// Runs single traversals against a shared store
pub struct TraversalEngine {
    store: Arc<dyn EdgeStore>,
    entities: Arc<dyn EntityLookup>,
    config: EngineConfig,
}

impl TraversalEngine {
    pub fn new(
        store: Arc<dyn EdgeStore>,
        entities: Arc<dyn EntityLookup>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            entities,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn EdgeStore> {
        &self.store
    }

    /// Request template for a traversal kind, using the configured defaults
    pub fn request_for_kind(&self, start_id: EntityId, kind: TraversalKind) -> TraversalRequest {
        TraversalRequest {
            start_id,
            max_depth: self.config.default_max_depth,
            relationship_types: vec![],
            layers: kind.layers(),
            min_strength: 0.0,
            direction: kind.direction(),
            node_cap: self.config.default_node_cap,
            cycle_policy: None,
        }
    }

    /// Run one bounded traversal.
    ///
    /// Never fails as a whole: store failures that survive retries mark the
    /// affected nodes in `failed_nodes` and the walk continues elsewhere.
    pub async fn traverse(&self, request: &TraversalRequest) -> TraversalResult {
        let started = Instant::now();
        let start_id = request.start_id;

        // Depth 0 would look exactly like "no relationships"; walk at least one hop
        let max_depth = request
            .max_depth
            .min(self.config.max_depth_ceiling)
            .max(1);
        let depth_clamped = request.max_depth > self.config.max_depth_ceiling;
        let node_cap = request.node_cap.min(self.config.node_cap_ceiling).max(1);
        let policy = request.cycle_policy.unwrap_or(self.config.cycle_policy);
        let query = request.neighbor_query();

        let mut stats = TraversalStats {
            effective_max_depth: max_depth,
            node_cap,
            ..Default::default()
        };
        stats.nodes_per_depth.insert(0, 1);

        let mut visited = VisitedSet::new(start_id, node_cap);
        let mut recorded: HashSet<EdgeKey> = HashSet::new();
        let mut edges: Vec<HopEdge> = Vec::new();
        let mut failed_nodes: Vec<FailedNode> = Vec::new();
        let mut truncation: Option<Truncation> = None;

        let mut frontier = vec![start_id];
        let mut depth = 0;

        'levels: while depth < max_depth && !frontier.is_empty() {
            // Fetch the whole level before committing anything from it
            let lookups = self.fetch_level(&frontier, &query).await;

            // Account for every lookup first, so a cap hit below cannot hide
            // a failure from later in the level
            let mut expanded = Vec::with_capacity(lookups.len());
            for (node, outcome, retries) in lookups {
                stats.store_calls += 1 + retries as usize;
                stats.retries += retries as usize;

                match outcome {
                    Ok(neighbors) => expanded.push(neighbors),
                    Err(e) => {
                        tracing::warn!(
                            start = %start_id,
                            node = %node,
                            depth,
                            "Neighbor lookup failed after {} retries: {}",
                            retries,
                            e
                        );
                        failed_nodes.push(FailedNode {
                            entity_id: node,
                            depth,
                            reason: e.reason().to_string(),
                            error: e.to_string(),
                        });
                    }
                }
            }

            let hop = depth + 1;
            let mut next_frontier = Vec::new();

            for neighbors in expanded {
                for neighbor in neighbors {
                    let key = neighbor.edge.key();
                    if recorded.contains(&key) {
                        continue;
                    }

                    let other = neighbor.far_end();
                    if visited.contains(&other) {
                        if policy == CyclePolicy::RecordClosing {
                            recorded.insert(key);
                            edges.push(HopEdge {
                                edge: neighbor.edge,
                                hop,
                                closing: true,
                                discovered_id: None,
                                source_name: String::new(),
                                target_name: String::new(),
                            });
                        }
                        continue;
                    }

                    if !visited.insert(other) {
                        truncation = Some(Truncation::NodeCap);
                        tracing::warn!(
                            start = %start_id,
                            node_cap,
                            depth = hop,
                            "Traversal reached node cap; result truncated"
                        );
                        break 'levels;
                    }

                    recorded.insert(key);
                    edges.push(HopEdge {
                        edge: neighbor.edge,
                        hop,
                        closing: false,
                        discovered_id: Some(other),
                        source_name: String::new(),
                        target_name: String::new(),
                    });
                    next_frontier.push(other);
                    *stats.nodes_per_depth.entry(hop).or_insert(0) += 1;
                    stats.max_depth_reached = hop;
                }
            }

            depth = hop;
            frontier = next_frontier;
        }

        if truncation.is_none()
            && depth_clamped
            && depth == max_depth
            && !frontier.is_empty()
            && self
                .frontier_continues(&frontier, &query, &visited, &mut stats)
                .await
        {
            truncation = Some(Truncation::DepthCeiling);
            tracing::warn!(
                start = %start_id,
                requested = request.max_depth,
                ceiling = max_depth,
                "Traversal depth clamped to ceiling; result truncated"
            );
        }

        self.resolve_names(&mut edges).await;

        // Stable: discovery order breaks remaining ties
        edges.sort_by(|a, b| {
            a.hop
                .cmp(&b.hop)
                .then_with(|| b.edge.strength.total_cmp(&a.edge.strength))
        });

        stats.nodes_visited = visited.len();
        stats.elapsed_ms = started.elapsed().as_millis() as u64;

        tracing::debug!(
            start = %start_id,
            edges = edges.len(),
            nodes = stats.nodes_visited,
            store_calls = stats.store_calls,
            elapsed_ms = stats.elapsed_ms,
            "Traversal complete"
        );

        TraversalResult {
            start_id,
            edges,
            truncated: truncation.is_some(),
            truncation,
            partial: !failed_nodes.is_empty(),
            failed_nodes,
            stats,
        }
    }

    /// Run `request` and return the discovery chain that reached `to`
    pub async fn find_chain(
        &self,
        request: &TraversalRequest,
        to: EntityId,
    ) -> Option<Vec<HopEdge>> {
        let result = self.traverse(request).await;
        result
            .chain_to(to)
            .map(|chain| chain.into_iter().cloned().collect())
    }

    /// Neighbor lookups for a whole frontier, at most `frontier_concurrency`
    /// in flight, returned in frontier order
    async fn fetch_level(
        &self,
        frontier: &[EntityId],
        query: &NeighborQuery,
    ) -> Vec<(EntityId, Result<Vec<NeighborEdge>>, u32)> {
        let pending: Vec<_> = frontier
            .iter()
            .map(|node| self.neighbors_with_retry(*node, query))
            .collect();
        stream::iter(pending)
            .buffered(self.config.frontier_concurrency.max(1))
            .collect()
            .await
    }

    /// Whether the frontier left at the depth ceiling leads anywhere new.
    /// A lookup that fails here counts as "may continue".
    async fn frontier_continues(
        &self,
        frontier: &[EntityId],
        query: &NeighborQuery,
        visited: &VisitedSet,
        stats: &mut TraversalStats,
    ) -> bool {
        let mut continues = false;
        for (node, outcome, retries) in self.fetch_level(frontier, query).await {
            stats.store_calls += 1 + retries as usize;
            stats.retries += retries as usize;
            match outcome {
                Ok(neighbors) => {
                    continues |= neighbors.iter().any(|n| !visited.contains(&n.far_end()));
                }
                Err(e) => {
                    tracing::debug!(node = %node, "Ceiling check lookup failed: {}", e);
                    continues = true;
                }
            }
        }
        continues
    }

    /// One neighbor lookup with bounded exponential backoff on transient
    /// failures. Returns the node, the outcome and the number of retries spent.
    async fn neighbors_with_retry(
        &self,
        node: EntityId,
        query: &NeighborQuery,
    ) -> (EntityId, Result<Vec<NeighborEdge>>, u32) {
        let mut retries = 0;
        loop {
            match self.store.neighbors(node, query).await {
                Ok(neighbors) => return (node, Ok(neighbors), retries),
                Err(e) if e.is_retryable() && retries < self.config.max_retries => {
                    retries += 1;
                    let delay = self.config.retry_delay(retries);
                    tracing::debug!(
                        node = %node,
                        attempt = retries,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying neighbor lookup: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return (node, Err(e), retries),
            }
        }
    }

    /// Fill in display names. Unresolvable entities get an empty name.
    async fn resolve_names(&self, edges: &mut [HopEdge]) {
        if edges.is_empty() {
            return;
        }

        let mut ids: Vec<EntityId> = edges
            .iter()
            .flat_map(|e| [e.edge.source_id, e.edge.target_id])
            .collect();
        ids.sort();
        ids.dedup();

        let names = match self.entities.lookup_entities(&ids).await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!("Entity lookup failed, using empty names: {}", e);
                HashMap::new()
            }
        };

        let name_of = |id: &EntityId| {
            names
                .get(id)
                .map(|entity| entity.name.clone())
                .unwrap_or_default()
        };

        for edge in edges.iter_mut() {
            edge.source_name = name_of(&edge.edge.source_id);
            edge.target_name = name_of(&edge.edge.target_id);
        }
    }
}
