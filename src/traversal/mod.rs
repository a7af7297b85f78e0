//! Multi-hop traversal over the relationship graph
//!
//! - `engine`: one bounded BFS from one start entity
//! - `fanout`: many (entity × kind) traversals run concurrently
//! - `merge`: deduplicate and rank their union

pub mod engine;
pub mod fanout;
pub mod merge;

pub use engine::{
    FailedNode, HopEdge, TraversalEngine, TraversalRequest, TraversalResult, TraversalStats,
    Truncation, VisitedSet,
};
pub use fanout::{
    jobs_for, FanoutCoordinator, FanoutJob, FanoutOverrides, FanoutResult, UnitFailure,
    UnitOutcome,
};
pub use merge::{merge, MergedEdge, MergedResult, Provenance};
