//! Core types for relgraph

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validate::{validate_entity_id, ValidationError};

/// Opaque entity identifier.
///
/// Always holds a value that passed [`validate_entity_id`]; the only ways to
/// build one are parsing a canonical hyphenated UUID or wrapping a [`Uuid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(Uuid);

impl EntityId {
    /// Generate a fresh random identifier
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for EntityId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_entity_id(s)
    }
}

impl TryFrom<String> for EntityId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_entity_id(&value)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.to_string()
    }
}

impl ToSql for EntityId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for EntityId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        validate_entity_id(s).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Type tag of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Project,
    Event,
    Concept,
    Organization,
    Document,
    #[default]
    Other,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Project => "project",
            EntityType::Event => "event",
            EntityType::Concept => "concept",
            EntityType::Organization => "organization",
            EntityType::Document => "document",
            EntityType::Other => "other",
        }
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "person" => Ok(EntityType::Person),
            "project" => Ok(EntityType::Project),
            "event" => Ok(EntityType::Event),
            "concept" => Ok(EntityType::Concept),
            "organization" | "org" => Ok(EntityType::Organization),
            "document" | "doc" => Ok(EntityType::Document),
            "other" => Ok(EntityType::Other),
            _ => Err(format!("Unknown entity type: {}", s)),
        }
    }
}

/// A node of the relationship graph, as seen by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub entity_type: EntityType,
}

/// Relationship types. A closed set: anything else is rejected at the
/// validation boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Causes,
    Enables,
    Prevents,
    Triggers,
    Precedes,
    Follows,
    RelatedTo,
    SimilarTo,
    PartOf,
    Mentions,
    WorksOn,
    DependsOn,
    Contradicts,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Causes => "causes",
            RelationshipType::Enables => "enables",
            RelationshipType::Prevents => "prevents",
            RelationshipType::Triggers => "triggers",
            RelationshipType::Precedes => "precedes",
            RelationshipType::Follows => "follows",
            RelationshipType::RelatedTo => "related_to",
            RelationshipType::SimilarTo => "similar_to",
            RelationshipType::PartOf => "part_of",
            RelationshipType::Mentions => "mentions",
            RelationshipType::WorksOn => "works_on",
            RelationshipType::DependsOn => "depends_on",
            RelationshipType::Contradicts => "contradicts",
        }
    }

    pub fn all() -> &'static [RelationshipType] {
        &[
            RelationshipType::Causes,
            RelationshipType::Enables,
            RelationshipType::Prevents,
            RelationshipType::Triggers,
            RelationshipType::Precedes,
            RelationshipType::Follows,
            RelationshipType::RelatedTo,
            RelationshipType::SimilarTo,
            RelationshipType::PartOf,
            RelationshipType::Mentions,
            RelationshipType::WorksOn,
            RelationshipType::DependsOn,
            RelationshipType::Contradicts,
        ]
    }
}

impl FromStr for RelationshipType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        RelationshipType::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| ValidationError::UnknownRelationshipType(s.to_string()))
    }
}

/// Relationship category. Every edge belongs to exactly one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Semantic,
    Temporal,
    Causal,
    Entity,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Semantic => "semantic",
            Layer::Temporal => "temporal",
            Layer::Causal => "causal",
            Layer::Entity => "entity",
        }
    }

    pub fn all() -> &'static [Layer] {
        &[Layer::Semantic, Layer::Temporal, Layer::Causal, Layer::Entity]
    }
}

impl FromStr for Layer {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "semantic" => Ok(Layer::Semantic),
            "temporal" => Ok(Layer::Temporal),
            "causal" => Ok(Layer::Causal),
            "entity" | "entity_to_entity" => Ok(Layer::Entity),
            _ => Err(ValidationError::UnknownLayer(s.to_string())),
        }
    }
}

/// Direction of graph traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Follow outgoing edges only (source -> target)
    Outgoing,
    /// Follow incoming edges only (target -> source)
    Incoming,
    /// Follow edges in both directions
    #[default]
    Both,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "outgoing" | "out" => Ok(Direction::Outgoing),
            "incoming" | "in" => Ok(Direction::Incoming),
            "both" | "bidirectional" => Ok(Direction::Both),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}

/// Identity of an edge. No two stored edges share one.
pub type EdgeKey = (EntityId, EntityId, RelationshipType);

/// A directed, typed, weighted relationship
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source_id: EntityId,
    pub target_id: EntityId,
    pub relationship_type: RelationshipType,
    pub layer: Layer,
    /// Confidence/weight in [0.0, 1.0]
    pub strength: f32,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Edge {
    pub fn key(&self) -> EdgeKey {
        (self.source_id, self.target_id, self.relationship_type)
    }
}

/// Which end of an edge matched the queried entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchedSide {
    Source,
    Target,
}

/// A single-hop edge as returned by an edge store
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborEdge {
    pub edge: Edge,
    pub matched: MatchedSide,
}

impl NeighborEdge {
    /// The node on the far end from the queried entity
    pub fn far_end(&self) -> EntityId {
        match self.matched {
            MatchedSide::Source => self.edge.target_id,
            MatchedSide::Target => self.edge.source_id,
        }
    }
}

/// Filters for a single-hop neighbor lookup. Empty filter lists mean "any".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborQuery {
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub relationship_types: Vec<RelationshipType>,
    #[serde(default)]
    pub layers: Vec<Layer>,
    #[serde(default)]
    pub min_strength: f32,
}

impl Default for NeighborQuery {
    fn default() -> Self {
        Self {
            direction: Direction::Both,
            relationship_types: vec![],
            layers: vec![],
            min_strength: 0.0,
        }
    }
}

/// Named traversal presets run per entity by the fanout coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraversalKind {
    /// Downstream consequences along causal edges
    CausalEffects,
    /// Upstream causes along causal edges
    CausalOrigins,
    Semantic,
    Temporal,
    Entity,
    /// Every layer, both directions
    All,
}

impl TraversalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraversalKind::CausalEffects => "causal_effects",
            TraversalKind::CausalOrigins => "causal_origins",
            TraversalKind::Semantic => "semantic",
            TraversalKind::Temporal => "temporal",
            TraversalKind::Entity => "entity",
            TraversalKind::All => "all",
        }
    }

    pub fn all() -> &'static [TraversalKind] {
        &[
            TraversalKind::CausalEffects,
            TraversalKind::CausalOrigins,
            TraversalKind::Semantic,
            TraversalKind::Temporal,
            TraversalKind::Entity,
            TraversalKind::All,
        ]
    }

    /// Layers this kind walks (empty = all layers)
    pub fn layers(&self) -> Vec<Layer> {
        match self {
            TraversalKind::CausalEffects | TraversalKind::CausalOrigins => vec![Layer::Causal],
            TraversalKind::Semantic => vec![Layer::Semantic],
            TraversalKind::Temporal => vec![Layer::Temporal],
            TraversalKind::Entity => vec![Layer::Entity],
            TraversalKind::All => vec![],
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            TraversalKind::CausalEffects | TraversalKind::Temporal => Direction::Outgoing,
            TraversalKind::CausalOrigins => Direction::Incoming,
            TraversalKind::Semantic | TraversalKind::Entity | TraversalKind::All => Direction::Both,
        }
    }
}

impl fmt::Display for TraversalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TraversalKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        match normalized.as_str() {
            "causal" => Ok(TraversalKind::CausalEffects),
            "any" => Ok(TraversalKind::All),
            _ => TraversalKind::all()
                .iter()
                .copied()
                .find(|k| k.as_str() == normalized)
                .ok_or_else(|| ValidationError::UnknownTraversalKind(s.to_string())),
        }
    }
}

/// What to do with an edge whose far end was already visited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CyclePolicy {
    /// Record the edge once, flagged as closing, without expanding its far end
    #[default]
    RecordClosing,
    /// Drop the edge entirely
    Discard,
}

/// Configuration for the traversal engine and fanout coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Depth used when the caller does not ask for one
    #[serde(default = "default_max_depth")]
    pub default_max_depth: usize,
    /// Hard ceiling applied to every request
    #[serde(default = "default_max_depth_ceiling")]
    pub max_depth_ceiling: usize,
    /// Node cap used when the caller does not ask for one
    #[serde(default = "default_node_cap")]
    pub default_node_cap: usize,
    /// Hard ceiling for caller-provided node caps
    #[serde(default = "default_node_cap_ceiling")]
    pub node_cap_ceiling: usize,
    /// Retries per failing neighbor lookup (not counting the first attempt)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff; doubles per retry
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Concurrent neighbor lookups within one BFS level
    #[serde(default = "default_frontier_concurrency")]
    pub frontier_concurrency: usize,
    /// Overall deadline for one fanout batch
    #[serde(default = "default_fanout_timeout_ms")]
    pub fanout_timeout_ms: u64,
    #[serde(default)]
    pub cycle_policy: CyclePolicy,
}

fn default_max_depth() -> usize {
    2
}

fn default_max_depth_ceiling() -> usize {
    5
}

fn default_node_cap() -> usize {
    1000
}

fn default_node_cap_ceiling() -> usize {
    10_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    50
}

fn default_frontier_concurrency() -> usize {
    16
}

fn default_fanout_timeout_ms() -> u64 {
    5000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_depth: default_max_depth(),
            max_depth_ceiling: default_max_depth_ceiling(),
            default_node_cap: default_node_cap(),
            node_cap_ceiling: default_node_cap_ceiling(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            frontier_concurrency: default_frontier_concurrency(),
            fanout_timeout_ms: default_fanout_timeout_ms(),
            cycle_policy: CyclePolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn fanout_timeout(&self) -> Duration {
        Duration::from_millis(self.fanout_timeout_ms)
    }

    /// Backoff before retry number `attempt` (1-based)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(10);
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }

    /// Check that the configuration is usable
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_depth_ceiling == 0 {
            return Err(crate::RelgraphError::Config(
                "max_depth_ceiling must be at least 1".to_string(),
            ));
        }
        if self.default_node_cap == 0 || self.node_cap_ceiling == 0 {
            return Err(crate::RelgraphError::Config(
                "node caps must be at least 1".to_string(),
            ));
        }
        if self.frontier_concurrency == 0 {
            return Err(crate::RelgraphError::Config(
                "frontier_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the storage engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database
    pub db_path: String,
    /// Storage mode (local or read-only)
    #[serde(default)]
    pub storage_mode: StorageMode,
    /// Number of pooled connections for concurrent readers
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    4
}

impl StorageConfig {
    pub fn in_memory() -> Self {
        Self {
            db_path: ":memory:".to_string(),
            storage_mode: StorageMode::Local,
            pool_size: 1,
        }
    }
}

/// Storage mode for SQLite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StorageMode {
    /// Read-write with WAL journaling
    #[default]
    Local,
    /// Open an existing database read-only
    ReadOnly,
}

impl FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StorageMode::Local),
            "read-only" | "readonly" => Ok(StorageMode::ReadOnly),
            _ => Err(format!("Unknown storage mode: {}", s)),
        }
    }
}
