//! Database migrations for relgraph

use rusqlite::Connection;

use crate::error::{RelgraphError, Result};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version = schema_version(conn)?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < SCHEMA_VERSION {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Read the applied schema version (0 when nothing has been applied)
pub fn schema_version(conn: &Connection) -> Result<i32> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Verify that a database opened read-only is at the current schema version
pub fn check_schema(conn: &Connection) -> Result<()> {
    let has_table: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version')",
        [],
        |row| row.get(0),
    )?;
    if !has_table {
        return Err(RelgraphError::Config(
            "database has no relgraph schema; open it once in local mode to migrate".to_string(),
        ));
    }

    let version = schema_version(conn)?;
    if version < SCHEMA_VERSION {
        return Err(RelgraphError::Config(format!(
            "database schema v{} is older than v{}; open it once in local mode to migrate",
            version, SCHEMA_VERSION
        )));
    }
    Ok(())
}

/// Initial schema (v1)
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Entities: display attributes only, owned by the ingestion path
        CREATE TABLE IF NOT EXISTS entities (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            entity_type TEXT NOT NULL DEFAULT 'other',
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        -- Directed, typed, weighted relationships. No foreign keys: an edge
        -- may outlive the entity rows it points at.
        CREATE TABLE IF NOT EXISTS relationships (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id TEXT NOT NULL,
            target_id TEXT NOT NULL,
            relationship_type TEXT NOT NULL,
            layer TEXT NOT NULL,
            strength REAL NOT NULL CHECK (strength >= 0.0 AND strength <= 1.0),
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(source_id, target_id, relationship_type)
        );

        INSERT INTO schema_version (version) VALUES (1);
        "#,
    )?;

    Ok(())
}

/// Hop-lookup indexes (v2)
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE INDEX IF NOT EXISTS idx_relationships_source
            ON relationships(source_id, layer, strength);
        CREATE INDEX IF NOT EXISTS idx_relationships_target
            ON relationships(target_id, layer, strength);
        CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type);

        INSERT INTO schema_version (version) VALUES (2);
        "#,
    )?;

    Ok(())
}
