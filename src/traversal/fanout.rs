//! Concurrent execution of (entity × kind) traversal units
//!
//! Every unit is an independent tokio task: it validates its own identifier,
//! builds a request from its kind's template, and runs one traversal. The
//! coordinator waits for all of them up to a single overall deadline; units
//! still running at the deadline are aborted, which drops their in-flight
//! store calls.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

use super::engine::{TraversalEngine, TraversalRequest, TraversalResult};
use crate::types::{Direction, Layer, RelationshipType, TraversalKind};
use crate::validate::{preview, validate_entity_id, ValidationError};

/// One (entity, kind) pair to execute. The identifier is raw caller input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutJob {
    pub entity_id: String,
    pub kind: TraversalKind,
}

impl FanoutJob {
    pub fn new(entity_id: impl Into<String>, kind: TraversalKind) -> Self {
        Self {
            entity_id: entity_id.into(),
            kind,
        }
    }
}

/// Cross product of entities and kinds, entity-major
pub fn jobs_for(entity_ids: &[String], kinds: &[TraversalKind]) -> Vec<FanoutJob> {
    entity_ids
        .iter()
        .flat_map(|id| kinds.iter().map(move |kind| FanoutJob::new(id.clone(), *kind)))
        .collect()
}

/// Caller overrides applied on top of each kind's request template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FanoutOverrides {
    pub max_depth: Option<usize>,
    pub min_strength: Option<f32>,
    pub node_cap: Option<usize>,
    pub direction: Option<Direction>,
    #[serde(default)]
    pub relationship_types: Vec<RelationshipType>,
    /// Replaces the kind's layer preset when non-empty
    #[serde(default)]
    pub layers: Vec<Layer>,
}

impl FanoutOverrides {
    pub fn apply(&self, request: &mut TraversalRequest) {
        if let Some(depth) = self.max_depth {
            request.max_depth = depth;
        }
        if let Some(strength) = self.min_strength {
            request.min_strength = strength;
        }
        if let Some(cap) = self.node_cap {
            request.node_cap = cap;
        }
        if let Some(direction) = self.direction {
            request.direction = direction;
        }
        if !self.relationship_types.is_empty() {
            request.relationship_types = self.relationship_types.clone();
        }
        if !self.layers.is_empty() {
            request.layers = self.layers.clone();
        }
    }
}

/// Why a unit produced no traversal result
#[derive(Debug, Clone, PartialEq)]
pub enum UnitFailure {
    /// Identifier rejected before any store access
    Validation(ValidationError),
    /// Still running at the overall deadline
    TimedOut,
    /// The unit's task panicked or was lost
    Panicked(String),
}

impl UnitFailure {
    /// Stable reason string for caller-facing failure lists
    pub fn reason(&self) -> &'static str {
        match self {
            UnitFailure::Validation(e) => e.kind(),
            UnitFailure::TimedOut => "timed_out",
            UnitFailure::Panicked(_) => "internal",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            UnitFailure::Validation(e) => e.to_string(),
            UnitFailure::TimedOut => "traversal did not finish before the deadline".to_string(),
            UnitFailure::Panicked(msg) => msg.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub job: FanoutJob,
    pub result: std::result::Result<TraversalResult, UnitFailure>,
}

impl UnitOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Outcome of every unit, in job order
#[derive(Debug, Clone)]
pub struct FanoutResult {
    pub outcomes: Vec<UnitOutcome>,
    pub elapsed_ms: u64,
}

impl FanoutResult {
    pub fn succeeded(&self) -> impl Iterator<Item = (&FanoutJob, &TraversalResult)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|r| (&o.job, r)))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&FanoutJob, &UnitFailure)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.job, e)))
    }

    pub fn timed_out(&self) -> usize {
        self.failed()
            .filter(|(_, e)| matches!(e, UnitFailure::TimedOut))
            .count()
    }
}

type UnitResult = std::result::Result<TraversalResult, UnitFailure>;

/// Runs traversal units concurrently under one overall deadline
pub struct FanoutCoordinator {
    engine: Arc<TraversalEngine>,
    timeout: Duration,
}

impl FanoutCoordinator {
    /// Coordinator using the engine's configured fanout timeout
    pub fn new(engine: Arc<TraversalEngine>) -> Self {
        let timeout = engine.config().fanout_timeout();
        Self { engine, timeout }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn engine(&self) -> &Arc<TraversalEngine> {
        &self.engine
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run every (entity × kind) pair
    pub async fn run(
        &self,
        entity_ids: &[String],
        kinds: &[TraversalKind],
        overrides: &FanoutOverrides,
    ) -> FanoutResult {
        self.run_jobs(jobs_for(entity_ids, kinds), overrides).await
    }

    /// Run an explicit job list. Outcomes come back in job order regardless
    /// of completion order.
    pub async fn run_jobs(
        &self,
        jobs: Vec<FanoutJob>,
        overrides: &FanoutOverrides,
    ) -> FanoutResult {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.timeout;

        let mut set = JoinSet::new();
        for (index, job) in jobs.iter().enumerate() {
            let engine = self.engine.clone();
            let job = job.clone();
            let overrides = overrides.clone();
            set.spawn(async move {
                let outcome = AssertUnwindSafe(run_unit(engine, job, overrides))
                    .catch_unwind()
                    .await;
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<UnitResult>> = (0..jobs.len()).map(|_| None).collect();
        let mut deadline_hit = false;

        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok((index, Ok(result))))) => slots[index] = Some(result),
                Ok(Some(Ok((index, Err(panic))))) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(
                        entity = %preview(&jobs[index].entity_id),
                        kind = %jobs[index].kind,
                        "Traversal unit panicked: {}",
                        message
                    );
                    slots[index] = Some(Err(UnitFailure::Panicked(message)));
                }
                Ok(Some(Err(e))) => {
                    tracing::error!("Traversal unit lost: {}", e);
                }
                Ok(None) => break,
                Err(_) => {
                    deadline_hit = true;
                    break;
                }
            }
        }

        // Aborting drops each unit's pending store future, which cancels the
        // statement it is running.
        set.shutdown().await;

        let outcomes = jobs
            .into_iter()
            .zip(slots)
            .map(|(job, slot)| {
                let result = match slot {
                    Some(result) => result,
                    None if deadline_hit => {
                        tracing::warn!(
                            entity = %preview(&job.entity_id),
                            kind = %job.kind,
                            timeout_ms = self.timeout.as_millis() as u64,
                            "Traversal unit timed out"
                        );
                        Err(UnitFailure::TimedOut)
                    }
                    None => Err(UnitFailure::Panicked(
                        "task exited without a result".to_string(),
                    )),
                };
                UnitOutcome { job, result }
            })
            .collect();

        FanoutResult {
            outcomes,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }
}

async fn run_unit(
    engine: Arc<TraversalEngine>,
    job: FanoutJob,
    overrides: FanoutOverrides,
) -> UnitResult {
    let entity_id = match validate_entity_id(&job.entity_id) {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(
                kind = %job.kind,
                input = %preview(&job.entity_id),
                "Rejected malformed entity identifier"
            );
            return Err(UnitFailure::Validation(e));
        }
    };

    let mut request = engine.request_for_kind(entity_id, job.kind);
    overrides.apply(&mut request);
    Ok(engine.traverse(&request).await)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::storage::{EdgeStore, EntityLookup};
    use crate::types::{Entity, EngineConfig, EntityId, NeighborEdge, NeighborQuery};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns no edges after an optional delay; panics for one entity
    struct SlowStore {
        delay: Duration,
        panic_on: Option<EntityId>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EdgeStore for SlowStore {
        async fn neighbors(
            &self,
            entity_id: EntityId,
            _query: &NeighborQuery,
        ) -> Result<Vec<NeighborEdge>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panic_on == Some(entity_id) {
                panic!("store blew up");
            }
            tokio::time::sleep(self.delay).await;
            Ok(vec![])
        }
    }

    #[async_trait]
    impl EntityLookup for SlowStore {
        async fn lookup_entities(&self, _ids: &[EntityId]) -> Result<HashMap<EntityId, Entity>> {
            Ok(HashMap::new())
        }
    }

    fn coordinator(
        delay: Duration,
        panic_on: Option<EntityId>,
    ) -> (FanoutCoordinator, Arc<SlowStore>) {
        let store = Arc::new(SlowStore {
            delay,
            panic_on,
            calls: AtomicUsize::new(0),
        });
        let engine = TraversalEngine::new(store.clone(), store.clone(), EngineConfig::default());
        (FanoutCoordinator::new(Arc::new(engine)), store)
    }

    #[test]
    fn test_jobs_cross_product() {
        let ids = vec!["a".to_string(), "b".to_string()];
        let jobs = jobs_for(&ids, &[TraversalKind::CausalEffects, TraversalKind::Semantic]);
        assert_eq!(jobs.len(), 4);
        assert_eq!(jobs[1], FanoutJob::new("a", TraversalKind::Semantic));
        assert_eq!(jobs[2], FanoutJob::new("b", TraversalKind::CausalEffects));
    }

    #[test]
    fn test_overrides_replace_template_fields() {
        let mut request =
            TraversalRequest::new(EntityId::new_v4()).with_layers(vec![Layer::Causal]);
        let overrides = FanoutOverrides {
            max_depth: Some(4),
            direction: Some(Direction::Incoming),
            ..Default::default()
        };
        overrides.apply(&mut request);
        assert_eq!(request.max_depth, 4);
        assert_eq!(request.direction, Direction::Incoming);
        assert_eq!(request.layers, vec![Layer::Causal]);
    }

    #[tokio::test]
    async fn test_malformed_unit_does_not_touch_store() {
        let (coordinator, store) = coordinator(Duration::ZERO, None);
        let ids = vec!["'; DROP TABLE entities; --".to_string()];
        let result = coordinator
            .run(&ids, &[TraversalKind::All], &FanoutOverrides::default())
            .await;

        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
        let (_, failure) = result.failed().next().unwrap();
        assert_eq!(failure.reason(), "malformed_identifier");
    }

    #[tokio::test]
    async fn test_timeout_marks_unfinished_units() {
        let (coordinator, _) = coordinator(Duration::from_secs(5), None);
        let coordinator = coordinator.with_timeout(Duration::from_millis(50));
        let ids = vec![EntityId::new_v4().to_string(), "bogus".to_string()];
        let result = coordinator
            .run(&ids, &[TraversalKind::Semantic], &FanoutOverrides::default())
            .await;

        assert_eq!(result.outcomes.len(), 2);
        assert_eq!(result.timed_out(), 1);
        assert!(matches!(
            result.outcomes[1].result,
            Err(UnitFailure::Validation(_))
        ));
        assert!(result.elapsed_ms < 2000);
    }

    #[tokio::test]
    async fn test_panicking_unit_is_isolated() {
        let bad = EntityId::new_v4();
        let (coordinator, _) = coordinator(Duration::ZERO, Some(bad));
        let ids = vec![bad.to_string(), EntityId::new_v4().to_string()];
        let result = coordinator
            .run(&ids, &[TraversalKind::All], &FanoutOverrides::default())
            .await;

        assert_eq!(result.failed().next().map(|(_, e)| e.reason()), Some("internal"));
        assert_eq!(result.succeeded().count(), 1);
        assert_eq!(result.outcomes[1].job.entity_id, ids[1]);
    }
}
