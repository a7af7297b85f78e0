//! MCP tool definitions for relgraph

use serde_json::json;

use super::protocol::ToolDefinition;

/// All tool definitions for relgraph
pub const TOOL_DEFINITIONS: &[(&str, &str, &str)] = &[
    (
        "graph_traverse",
        "Discover causal and associative chains from one or more entities. Runs every requested traversal kind for every entity concurrently and returns one merged, ranked edge list with per-entity failures reported separately.",
        r#"{
            "type": "object",
            "properties": {
                "entity_ids": {"type": "array", "items": {"type": "string"}, "description": "Starting entity UUIDs"},
                "kinds": {"type": "array", "items": {"type": "string", "enum": ["causal_effects", "causal_origins", "semantic", "temporal", "entity", "all"]}, "description": "Traversal kinds to run per entity (default: all)"},
                "max_depth": {"type": "integer", "minimum": 1, "maximum": 5, "default": 2, "description": "Maximum hops (clamped server-side)"},
                "min_strength": {"type": "number", "minimum": 0, "maximum": 1, "default": 0, "description": "Minimum edge strength"},
                "relationship_types": {"type": "array", "items": {"type": "string"}, "description": "Filter by relationship type (causes, enables, depends_on, ...)"},
                "layers": {"type": "array", "items": {"type": "string", "enum": ["semantic", "temporal", "causal", "entity"]}, "description": "Replace each kind's layer preset"},
                "direction": {"type": "string", "enum": ["outgoing", "incoming", "both"], "description": "Replace each kind's direction preset"},
                "node_cap": {"type": "integer", "minimum": 1, "default": 1000, "description": "Maximum distinct nodes per traversal"}
            },
            "required": ["entity_ids"]
        }"#,
    ),
    (
        "graph_find_chain",
        "Find the chain of relationships connecting one entity to another within the depth bound",
        r#"{
            "type": "object",
            "properties": {
                "from_id": {"type": "string", "description": "Starting entity UUID"},
                "to_id": {"type": "string", "description": "Target entity UUID"},
                "kind": {"type": "string", "enum": ["causal_effects", "causal_origins", "semantic", "temporal", "entity", "all"], "default": "all"},
                "max_depth": {"type": "integer", "minimum": 1, "maximum": 5, "default": 5, "description": "Maximum chain length"},
                "min_strength": {"type": "number", "minimum": 0, "maximum": 1, "default": 0}
            },
            "required": ["from_id", "to_id"]
        }"#,
    ),
    (
        "graph_neighbors",
        "List the immediate relationships of an entity",
        r#"{
            "type": "object",
            "properties": {
                "entity_id": {"type": "string", "description": "Entity UUID"},
                "direction": {"type": "string", "enum": ["outgoing", "incoming", "both"], "default": "both"},
                "relationship_types": {"type": "array", "items": {"type": "string"}},
                "layers": {"type": "array", "items": {"type": "string"}},
                "min_strength": {"type": "number", "minimum": 0, "maximum": 1, "default": 0}
            },
            "required": ["entity_id"]
        }"#,
    ),
    (
        "graph_stats",
        "Entity and relationship counts, per-layer breakdown and schema version",
        r#"{
            "type": "object",
            "properties": {}
        }"#,
    ),
];

/// Get all tool definitions as ToolDefinition structs
pub fn get_tool_definitions() -> Vec<ToolDefinition> {
    TOOL_DEFINITIONS
        .iter()
        .map(|(name, description, schema)| ToolDefinition {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: serde_json::from_str(schema).unwrap_or(json!({})),
        })
        .collect()
}
