//! Validation at the caller boundary
//!
//! Every value that arrives as a string (entity identifiers, relationship
//! types, layers, traversal kinds, strength thresholds) is turned into a typed
//! value here or rejected. Malformed identifiers never reach a query: they are
//! treated as a possible injection attempt, not a typo.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{EntityId, Layer, RelationshipType, TraversalKind};

/// Canonical 8-4-4-4-12 form, case-insensitive. Braced, URN and simple
/// (unhyphenated) forms are not accepted.
static ENTITY_ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
    )
    .unwrap()
});

/// Length of a canonical identifier
pub const ENTITY_ID_LENGTH: usize = 36;

/// Maximum number of characters of rejected input echoed in errors and logs
const PREVIEW_LIMIT: usize = 48;

/// Validation failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("malformed identifier: {0}")]
    MalformedIdentifier(String),

    #[error("unknown relationship type: {0}")]
    UnknownRelationshipType(String),

    #[error("unknown layer: {0}")]
    UnknownLayer(String),

    #[error("unknown traversal kind: {0}")]
    UnknownTraversalKind(String),

    #[error("invalid strength threshold: {0}")]
    InvalidStrength(String),
}

impl ValidationError {
    /// Build a malformed-identifier error carrying a bounded, escaped preview
    /// of the offending input.
    pub fn malformed(raw: &str) -> Self {
        ValidationError::MalformedIdentifier(preview(raw))
    }

    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::MalformedIdentifier(_) => "malformed_identifier",
            ValidationError::UnknownRelationshipType(_) => "unknown_relationship_type",
            ValidationError::UnknownLayer(_) => "unknown_layer",
            ValidationError::UnknownTraversalKind(_) => "unknown_traversal_kind",
            ValidationError::InvalidStrength(_) => "invalid_strength",
        }
    }
}

/// Escape and truncate untrusted input before it is logged or echoed back.
pub fn preview(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .take(PREVIEW_LIMIT)
        .flat_map(char::escape_debug)
        .collect();
    if raw.chars().count() > PREVIEW_LIMIT {
        out.push_str("...");
    }
    out
}

/// Validate an externally supplied entity identifier.
///
/// Only the format is checked. A well-formed identifier that names no entity
/// passes; traversal simply finds no edges for it.
pub fn validate_entity_id(raw: &str) -> Result<EntityId, ValidationError> {
    if raw.len() != ENTITY_ID_LENGTH || !ENTITY_ID_PATTERN.is_match(raw) {
        return Err(ValidationError::malformed(raw));
    }

    Uuid::parse_str(raw)
        .map(EntityId::from_uuid)
        .map_err(|_| ValidationError::malformed(raw))
}

/// Validate a batch of identifiers, keeping each outcome paired with its input.
pub fn validate_entity_ids<'a>(
    raws: &'a [String],
) -> Vec<(&'a str, Result<EntityId, ValidationError>)> {
    raws.iter()
        .map(|raw| (raw.as_str(), validate_entity_id(raw)))
        .collect()
}

pub fn parse_relationship_types(
    raws: &[String],
) -> Result<Vec<RelationshipType>, ValidationError> {
    let mut types: Vec<RelationshipType> = raws
        .iter()
        .map(|s| {
            s.parse::<RelationshipType>()
                .map_err(|_| ValidationError::UnknownRelationshipType(preview(s)))
        })
        .collect::<Result<_, _>>()?;
    types.sort();
    types.dedup();
    Ok(types)
}

pub fn parse_layers(raws: &[String]) -> Result<Vec<Layer>, ValidationError> {
    let mut layers: Vec<Layer> = raws
        .iter()
        .map(|s| {
            s.parse::<Layer>()
                .map_err(|_| ValidationError::UnknownLayer(preview(s)))
        })
        .collect::<Result<_, _>>()?;
    layers.sort();
    layers.dedup();
    Ok(layers)
}

pub fn parse_traversal_kind(raw: &str) -> Result<TraversalKind, ValidationError> {
    raw.parse::<TraversalKind>()
        .map_err(|_| ValidationError::UnknownTraversalKind(preview(raw)))
}

/// Strength thresholds must be finite and within [0.0, 1.0]
pub fn validate_min_strength(value: f32) -> Result<f32, ValidationError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ValidationError::InvalidStrength(value.to_string()))
    }
}
