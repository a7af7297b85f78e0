//! Database connection management
//!
//! Implements SQLite connection handling with a single shared connection
//! (`Storage`) and a round-robin pool (`StoragePool`) for concurrent readers.

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::migrations::{check_schema, run_migrations};
use crate::error::Result;
use crate::types::{StorageConfig, StorageMode};

/// Storage engine wrapping a single SQLite connection
pub struct Storage {
    config: StorageConfig,
    conn: Arc<Mutex<Connection>>,
}

/// Connection pool for concurrent access
pub struct StoragePool {
    config: StorageConfig,
    pool: Vec<Arc<Mutex<Connection>>>,
    next: AtomicUsize,
}

fn is_in_memory(config: &StorageConfig) -> bool {
    config.db_path == ":memory:"
}

/// Create a new connection with appropriate pragmas
fn create_connection(config: &StorageConfig) -> Result<Connection> {
    let conn = if is_in_memory(config) {
        Connection::open_in_memory()?
    } else {
        match config.storage_mode {
            StorageMode::Local => {
                if let Some(parent) = Path::new(&config.db_path).parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX;
                Connection::open_with_flags(&config.db_path, flags)?
            }
            StorageMode::ReadOnly => {
                let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
                Connection::open_with_flags(&config.db_path, flags)?
            }
        }
    };

    configure_pragmas(&conn, config.storage_mode)?;

    Ok(conn)
}

/// Configure SQLite pragmas based on storage mode
fn configure_pragmas(conn: &Connection, mode: StorageMode) -> Result<()> {
    match mode {
        StorageMode::Local => {
            conn.execute_batch(
                r#"
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                PRAGMA wal_autocheckpoint=1000;
                PRAGMA busy_timeout=5000;
                PRAGMA cache_size=-64000;
                PRAGMA temp_store=MEMORY;
                PRAGMA mmap_size=268435456;
                "#,
            )?;
        }
        StorageMode::ReadOnly => {
            conn.execute_batch(
                r#"
                PRAGMA query_only=ON;
                PRAGMA busy_timeout=5000;
                PRAGMA cache_size=-64000;
                PRAGMA temp_store=MEMORY;
                PRAGMA mmap_size=268435456;
                "#,
            )?;
        }
    }
    Ok(())
}

/// Prepare the schema on a fresh connection: migrate when writable,
/// verify when read-only.
fn prepare_schema(conn: &Connection, mode: StorageMode) -> Result<()> {
    match mode {
        StorageMode::Local => run_migrations(conn),
        StorageMode::ReadOnly => check_schema(conn),
    }
}

impl Storage {
    /// Open or create a database with the given configuration
    pub fn open(config: StorageConfig) -> Result<Self> {
        let conn = create_connection(&config)?;
        prepare_schema(&conn, config.storage_mode)?;

        Ok(Self {
            config,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::open(StorageConfig::in_memory())
    }

    /// Get a reference to the connection (for single-threaded use)
    pub fn connection(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Shared handle to the underlying connection
    pub fn shared_connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    /// Execute a function with the connection
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Execute a function with a transaction
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Get current storage mode
    pub fn storage_mode(&self) -> StorageMode {
        self.config.storage_mode
    }

    /// Get database path
    pub fn db_path(&self) -> &str {
        &self.config.db_path
    }

    /// Get configuration
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }
}

impl StoragePool {
    /// Create a connection pool sized by `config.pool_size`.
    ///
    /// An in-memory database cannot be shared between connections, so it
    /// always gets a pool of one.
    pub fn new(config: StorageConfig) -> Result<Self> {
        let pool_size = if is_in_memory(&config) {
            1
        } else {
            config.pool_size.max(1)
        };
        let mut pool = Vec::with_capacity(pool_size);

        for _ in 0..pool_size {
            let conn = create_connection(&config)?;
            pool.push(Arc::new(Mutex::new(conn)));
        }

        // Migrate (or verify) once, on the first connection
        if let Some(first) = pool.first() {
            let conn = first.lock();
            prepare_schema(&conn, config.storage_mode)?;
        }

        Ok(Self {
            config,
            pool,
            next: AtomicUsize::new(0),
        })
    }

    /// Get a connection from the pool (round-robin)
    pub fn get(&self) -> Arc<Mutex<Connection>> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.pool.len();
        self.pool[idx].clone()
    }

    /// All pooled connections
    pub fn connections(&self) -> Vec<Arc<Mutex<Connection>>> {
        self.pool.clone()
    }

    /// Execute a function with a connection from the pool
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn_arc = self.get();
        let conn = conn_arc.lock();
        f(&conn)
    }

    pub fn size(&self) -> usize {
        self.pool.len()
    }

    /// Get configuration
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }
}

impl Clone for Storage {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            conn: self.conn.clone(),
        }
    }
}
