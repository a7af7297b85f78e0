//! relgraph - bounded multi-hop traversal over a relationship graph
//!
//! Given one or more entity identifiers, walks a directed, typed, weighted
//! edge graph stored in SQLite and returns the causal and associative chains
//! around them. Traversals are cycle-safe, capped in depth and visited-node
//! count, and fan out concurrently across entities and traversal kinds.

pub mod api;
pub mod error;
pub mod mcp;
pub mod storage;
pub mod traversal;
pub mod types;
pub mod validate;

pub use api::{GraphService, TraverseRequest, TraverseResponse};
pub use error::{RelgraphError, Result};
pub use storage::{EdgeStore, EntityLookup, SqliteGraphStore, Storage, StoragePool};
pub use traversal::{FanoutCoordinator, TraversalEngine, TraversalRequest, TraversalResult};
pub use types::*;
pub use validate::{validate_entity_id, ValidationError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
