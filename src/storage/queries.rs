//! SQL queries for the relationship graph
//!
//! The only read the traversal engine needs is [`select_neighbors`]: one hop,
//! one statement. Multi-hop composition lives in `crate::traversal`.

use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::{RelgraphError, Result};
use crate::types::{
    Direction, Edge, Entity, EntityId, EntityType, Layer, MatchedSide, NeighborEdge,
    NeighborQuery, RelationshipType,
};

/// SQLite limit safety: ids per IN (...) list
const ID_CHUNK_SIZE: usize = 100;

const NEIGHBOR_COLUMNS: &str =
    "source_id, target_id, relationship_type, layer, strength, metadata";

/// Summary counts for the stored graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStats {
    pub entity_count: i64,
    pub relationship_count: i64,
    pub layer_counts: BTreeMap<String, i64>,
    pub schema_version: i32,
}

/// Insert or update an entity (ingestion path and tests; never called by the engine)
pub fn upsert_entity(conn: &Connection, entity: &Entity) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO entities (id, name, entity_type, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            entity_type = excluded.entity_type,
            updated_at = excluded.updated_at",
        params![entity.id, entity.name, entity.entity_type.as_str(), now, now],
    )?;
    Ok(())
}

/// Insert or update a relationship.
///
/// The `(source_id, target_id, relationship_type)` triple is unique; a second
/// write for the same triple replaces layer, strength and metadata.
pub fn upsert_relationship(conn: &Connection, edge: &Edge) -> Result<()> {
    if !edge.strength.is_finite() || !(0.0..=1.0).contains(&edge.strength) {
        return Err(RelgraphError::InvalidInput(format!(
            "strength must be within [0.0, 1.0], got {}",
            edge.strength
        )));
    }

    let now = Utc::now().to_rfc3339();
    let metadata = serde_json::to_string(&edge.metadata)?;
    conn.execute(
        "INSERT INTO relationships
            (source_id, target_id, relationship_type, layer, strength, metadata, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(source_id, target_id, relationship_type) DO UPDATE SET
            layer = excluded.layer,
            strength = excluded.strength,
            metadata = excluded.metadata,
            updated_at = excluded.updated_at",
        params![
            edge.source_id,
            edge.target_id,
            edge.relationship_type.as_str(),
            edge.layer.as_str(),
            edge.strength,
            metadata,
            now,
            now,
        ],
    )?;
    Ok(())
}

/// Get a single entity, `None` when it does not resolve
pub fn get_entity(conn: &Connection, id: EntityId) -> Result<Option<Entity>> {
    let mut stmt =
        conn.prepare_cached("SELECT id, name, entity_type FROM entities WHERE id = ?")?;
    let entity = stmt
        .query_row(params![id], entity_from_row)
        .optional()
        .map_err(RelgraphError::from_sqlite)?;
    Ok(entity)
}

/// Resolve display attributes for many entities at once. Ids with no row are
/// simply absent from the returned map.
pub fn get_entities(conn: &Connection, ids: &[EntityId]) -> Result<HashMap<EntityId, Entity>> {
    let mut result = HashMap::with_capacity(ids.len());

    for chunk in ids.chunks(ID_CHUNK_SIZE) {
        let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let query = format!(
            "SELECT id, name, entity_type FROM entities WHERE id IN ({})",
            placeholders
        );

        let mut stmt = conn.prepare(&query).map_err(RelgraphError::from_sqlite)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(chunk.iter()), entity_from_row)
            .map_err(RelgraphError::from_sqlite)?;

        for row in rows {
            let entity = row.map_err(RelgraphError::from_sqlite)?;
            result.insert(entity.id, entity);
        }
    }

    Ok(result)
}

/// Immediate (one-hop) edges of `entity_id`, filtered and tagged with the
/// side that matched.
///
/// For [`Direction::Both`] the outgoing and incoming selects are unioned in a
/// single statement; a self-loop is returned once, from the source side.
/// Output order is deterministic: strength descending, then edge identity.
pub fn select_neighbors(
    conn: &Connection,
    entity_id: EntityId,
    query: &NeighborQuery,
) -> Result<Vec<NeighborEdge>> {
    let (filter_clause, filter_params) = filter_clause(query);

    let outgoing = format!(
        "SELECT {cols}, 'source' AS matched FROM relationships WHERE source_id = ?{filters}",
        cols = NEIGHBOR_COLUMNS,
        filters = filter_clause,
    );
    let incoming = format!(
        "SELECT {cols}, 'target' AS matched FROM relationships WHERE target_id = ?{filters}",
        cols = NEIGHBOR_COLUMNS,
        filters = filter_clause,
    );

    let mut params: Vec<&dyn ToSql> = Vec::new();
    let body = match query.direction {
        Direction::Outgoing => {
            params.push(&entity_id);
            params.extend(filter_params.iter().map(|p| p.as_ref()));
            outgoing
        }
        Direction::Incoming => {
            params.push(&entity_id);
            params.extend(filter_params.iter().map(|p| p.as_ref()));
            incoming
        }
        Direction::Both => {
            params.push(&entity_id);
            params.extend(filter_params.iter().map(|p| p.as_ref()));
            params.push(&entity_id);
            params.extend(filter_params.iter().map(|p| p.as_ref()));
            params.push(&entity_id);
            format!("{} UNION ALL {} AND source_id != ?", outgoing, incoming)
        }
    };

    let sql = format!(
        "{} ORDER BY strength DESC, source_id, target_id, relationship_type, matched",
        body
    );

    let mut stmt = conn.prepare_cached(&sql).map_err(RelgraphError::from_sqlite)?;
    let rows = stmt
        .query_map(params.as_slice(), neighbor_from_row)
        .map_err(RelgraphError::from_sqlite)?;

    let mut neighbors = Vec::new();
    for row in rows {
        match row {
            Ok(neighbor) => neighbors.push(neighbor),
            // Rows written with a type or layer this build does not know
            Err(e @ rusqlite::Error::FromSqlConversionFailure(..))
            | Err(e @ rusqlite::Error::InvalidColumnType(..)) => {
                tracing::warn!("Skipping unreadable relationship row for {}: {}", entity_id, e);
            }
            Err(e) => return Err(RelgraphError::from_sqlite(e)),
        }
    }

    Ok(neighbors)
}

/// Build the shared `AND ...` filter suffix and its parameters
fn filter_clause(query: &NeighborQuery) -> (String, Vec<Box<dyn ToSql>>) {
    let mut clause = String::from(" AND strength >= ?");
    let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(f64::from(query.min_strength))];

    if !query.relationship_types.is_empty() {
        let placeholders = vec!["?"; query.relationship_types.len()].join(", ");
        clause.push_str(&format!(" AND relationship_type IN ({})", placeholders));
        for t in &query.relationship_types {
            params.push(Box::new(t.as_str()));
        }
    }

    if !query.layers.is_empty() {
        let placeholders = vec!["?"; query.layers.len()].join(", ");
        clause.push_str(&format!(" AND layer IN ({})", placeholders));
        for l in &query.layers {
            params.push(Box::new(l.as_str()));
        }
    }

    (clause, params)
}

/// Summary counts for the whole graph
pub fn graph_stats(conn: &Connection) -> Result<GraphStats> {
    let entity_count: i64 = conn.query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))?;
    let relationship_count: i64 =
        conn.query_row("SELECT COUNT(*) FROM relationships", [], |row| row.get(0))?;

    let mut layer_counts: BTreeMap<String, i64> = Layer::all()
        .iter()
        .map(|l| (l.as_str().to_string(), 0))
        .collect();
    let mut stmt =
        conn.prepare("SELECT layer, COUNT(*) FROM relationships GROUP BY layer")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    for row in rows {
        let (layer, count) = row?;
        layer_counts.insert(layer, count);
    }

    Ok(GraphStats {
        entity_count,
        relationship_count,
        layer_counts,
        schema_version: super::migrations::schema_version(conn)?,
    })
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn entity_from_row(row: &Row) -> rusqlite::Result<Entity> {
    let type_str: String = row.get(2)?;
    Ok(Entity {
        id: row.get(0)?,
        name: row.get(1)?,
        // Unknown tags from newer writers degrade to Other
        entity_type: type_str.parse().unwrap_or(EntityType::Other),
    })
}

fn neighbor_from_row(row: &Row) -> rusqlite::Result<NeighborEdge> {
    let type_str: String = row.get(2)?;
    let layer_str: String = row.get(3)?;
    let metadata_str: String = row.get(5)?;
    let matched_str: String = row.get(6)?;

    let relationship_type: RelationshipType =
        type_str.parse().map_err(|e| conversion_error(2, e))?;
    let layer: Layer = layer_str.parse().map_err(|e| conversion_error(3, e))?;

    Ok(NeighborEdge {
        edge: Edge {
            source_id: row.get(0)?,
            target_id: row.get(1)?,
            relationship_type,
            layer,
            strength: row.get::<_, f64>(4)? as f32,
            metadata: serde_json::from_str(&metadata_str).unwrap_or_default(),
        },
        matched: if matched_str == "target" {
            MatchedSide::Target
        } else {
            MatchedSide::Source
        },
    })
}
