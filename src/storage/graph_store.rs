//! Store traits used by the traversal engine, and their SQLite implementation
//!
//! `EdgeStore` is the single-hop contract; `EntityLookup` resolves display
//! attributes. Both are read-only and shared by every concurrent traversal.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::connection::{Storage, StoragePool};
use super::queries;
use crate::error::{RelgraphError, Result};
use crate::types::{Entity, EntityId, NeighborEdge, NeighborQuery};

/// SQLite VM instructions between cancellation checks
const PROGRESS_CHECK_OPS: i32 = 1000;

/// Read-only, single-hop access to the relationship graph
#[async_trait]
pub trait EdgeStore: Send + Sync {
    /// Immediate edges of `entity_id` matching `query`.
    ///
    /// Transient backing-store failures surface as
    /// [`RelgraphError::StoreUnavailable`]; retrying is the caller's job.
    async fn neighbors(&self, entity_id: EntityId, query: &NeighborQuery)
        -> Result<Vec<NeighborEdge>>;
}

/// Display-attribute lookup for traversal output
#[async_trait]
pub trait EntityLookup: Send + Sync {
    /// Resolve what can be resolved; unknown ids are absent from the map.
    async fn lookup_entities(&self, ids: &[EntityId]) -> Result<HashMap<EntityId, Entity>>;
}

/// `EdgeStore` + `EntityLookup` over SQLite.
///
/// Each call runs on the blocking pool. Dropping the returned future
/// interrupts the statement through a progress handler, so a cancelled
/// traversal releases its connection promptly.
pub struct SqliteGraphStore {
    connections: Vec<Arc<Mutex<Connection>>>,
    next: AtomicUsize,
}

/// Raises the cancellation flag when the owning future is dropped
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Detaches the progress handler when the statement finishes, even by
/// unwinding, so a stale cancellation flag never outlives its call
struct ProgressHandlerReset<'a>(&'a Connection);

impl Drop for ProgressHandlerReset<'_> {
    fn drop(&mut self) {
        self.0.progress_handler(PROGRESS_CHECK_OPS, None::<fn() -> bool>);
    }
}

impl SqliteGraphStore {
    /// Share the single connection of a `Storage`
    pub fn new(storage: &Storage) -> Self {
        Self {
            connections: vec![storage.shared_connection()],
            next: AtomicUsize::new(0),
        }
    }

    /// Spread lookups across every pooled connection
    pub fn from_pool(pool: &StoragePool) -> Self {
        Self {
            connections: pool.connections(),
            next: AtomicUsize::new(0),
        }
    }

    fn next_connection(&self) -> Arc<Mutex<Connection>> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        self.connections[idx].clone()
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.next_connection();
        let cancelled = Arc::new(AtomicBool::new(false));
        let _guard = CancelOnDrop(cancelled.clone());

        let handle = tokio::task::spawn_blocking(move || {
            if cancelled.load(Ordering::Acquire) {
                return Err(RelgraphError::Cancelled);
            }
            let conn = conn.lock();
            if cancelled.load(Ordering::Acquire) {
                return Err(RelgraphError::Cancelled);
            }

            let flag = cancelled.clone();
            conn.progress_handler(PROGRESS_CHECK_OPS, Some(move || flag.load(Ordering::Acquire)));
            let _reset = ProgressHandlerReset(&conn);
            f(&conn)
        });

        handle
            .await
            .map_err(|e| RelgraphError::Internal(format!("store task failed: {}", e)))?
    }
}

#[async_trait]
impl EdgeStore for SqliteGraphStore {
    async fn neighbors(
        &self,
        entity_id: EntityId,
        query: &NeighborQuery,
    ) -> Result<Vec<NeighborEdge>> {
        let query = query.clone();
        self.run_blocking(move |conn| queries::select_neighbors(conn, entity_id, &query))
            .await
    }
}

#[async_trait]
impl EntityLookup for SqliteGraphStore {
    async fn lookup_entities(&self, ids: &[EntityId]) -> Result<HashMap<EntityId, Entity>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids = ids.to_vec();
        self.run_blocking(move |conn| queries::get_entities(conn, &ids))
            .await
    }
}
