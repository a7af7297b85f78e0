//! Storage engine for relgraph
//!
//! Handles SQLite connections, schema management, the single-hop queries the
//! traversal engine is built on, and the `EdgeStore`/`EntityLookup` seams.

mod connection;
mod graph_store;
mod migrations;
pub mod queries;

pub use connection::{Storage, StoragePool};
pub use graph_store::{EdgeStore, EntityLookup, SqliteGraphStore};
pub use migrations::SCHEMA_VERSION;
pub use queries::GraphStats;
