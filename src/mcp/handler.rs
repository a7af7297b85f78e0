//! Tool dispatch for the stdio server

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::protocol::{
    methods, InitializeResult, McpHandler, McpRequest, McpResponse, ToolCallResult,
};
use super::tools::get_tool_definitions;
use crate::api::{FindChainRequest, GraphService, NeighborsRequest, TraverseRequest};
use crate::error::{RelgraphError, Result};
use crate::storage::{queries, StoragePool};
use crate::types::EngineConfig;

/// MCP request handler.
///
/// The protocol loop is synchronous; async tool bodies run on the handler's
/// own runtime.
pub struct GraphHandler {
    service: GraphService,
    pool: Arc<StoragePool>,
    runtime: tokio::runtime::Runtime,
}

impl GraphHandler {
    pub fn new(pool: Arc<StoragePool>, config: EngineConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("relgraph-worker")
            .build()?;
        Ok(Self {
            service: GraphService::from_pool(&pool, config),
            pool,
            runtime,
        })
    }

    pub fn service(&self) -> &GraphService {
        &self.service
    }

    /// Dispatch one tool call. Errors come back as `{"error", "reason"}`
    /// objects rather than protocol errors.
    pub fn handle_tool_call(&self, name: &str, params: Value) -> Value {
        match name {
            "graph_traverse" => self.tool_traverse(params),
            "graph_find_chain" => self.tool_find_chain(params),
            "graph_neighbors" => self.tool_neighbors(params),
            "graph_stats" => self.tool_stats(),
            _ => json!({"error": format!("Unknown tool: {}", name), "reason": "unknown_tool"}),
        }
    }

    fn tool_traverse(&self, params: Value) -> Value {
        let result = parse_params::<TraverseRequest>(params)
            .and_then(|request| self.runtime.block_on(self.service.traverse(&request)));
        to_value(result)
    }

    fn tool_find_chain(&self, params: Value) -> Value {
        let result = parse_params::<FindChainRequest>(params)
            .and_then(|request| self.runtime.block_on(self.service.find_chain(&request)));
        to_value(result)
    }

    fn tool_neighbors(&self, params: Value) -> Value {
        let result = parse_params::<NeighborsRequest>(params)
            .and_then(|request| self.runtime.block_on(self.service.neighbors(&request)))
            .map(|neighbors| {
                json!({
                    "count": neighbors.len(),
                    "neighbors": neighbors
                        .iter()
                        .map(|n| json!({
                            "edge": n.edge,
                            "matched": n.matched,
                            "other_id": n.far_end(),
                        }))
                        .collect::<Vec<_>>(),
                })
            });
        to_value(result)
    }

    fn tool_stats(&self) -> Value {
        to_value(self.pool.with_connection(queries::graph_stats))
    }
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params)
        .map_err(|e| RelgraphError::InvalidInput(format!("invalid arguments: {}", e)))
}

fn to_value<T: Serialize>(result: Result<T>) -> Value {
    match result {
        Ok(value) => json!(value),
        Err(e) => json!({"error": e.to_string(), "reason": e.reason()}),
    }
}

impl McpHandler for GraphHandler {
    fn handle_request(&self, request: McpRequest) -> McpResponse {
        match request.method.as_str() {
            methods::INITIALIZE => {
                let result = InitializeResult::default();
                McpResponse::success(request.id, json!(result))
            }
            methods::INITIALIZED => McpResponse::success(request.id, json!({})),
            methods::LIST_TOOLS => {
                let tools = get_tool_definitions();
                McpResponse::success(request.id, json!({"tools": tools}))
            }
            methods::CALL_TOOL => {
                let Some(name) = request.params.get("name").and_then(|v| v.as_str()) else {
                    return McpResponse::from_error(
                        request.id,
                        RelgraphError::InvalidInput("tools/call requires a tool name".to_string()),
                    );
                };
                let arguments = request
                    .params
                    .get("arguments")
                    .cloned()
                    .unwrap_or(json!({}));

                let result = self.handle_tool_call(name, arguments);
                let tool_result = if result.get("error").is_some() {
                    ToolCallResult::error(
                        serde_json::to_string_pretty(&result).unwrap_or_default(),
                    )
                } else {
                    ToolCallResult::json(&result)
                };
                McpResponse::success(request.id, json!(tool_result))
            }
            _ => McpResponse::error(
                request.id,
                -32601,
                format!("Method not found: {}", request.method),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::queries::upsert_relationship;
    use crate::types::{Edge, EntityId, Layer, RelationshipType, StorageConfig};
    use std::collections::BTreeMap;

    fn test_handler() -> (GraphHandler, EntityId) {
        let pool = StoragePool::new(StorageConfig::in_memory()).unwrap();
        let start = EntityId::new_v4();
        pool.with_connection(|conn| {
            upsert_relationship(
                conn,
                &Edge {
                    source_id: start,
                    target_id: EntityId::new_v4(),
                    relationship_type: RelationshipType::Enables,
                    layer: Layer::Causal,
                    strength: 0.6,
                    metadata: BTreeMap::new(),
                },
            )
        })
        .unwrap();
        let handler = GraphHandler::new(Arc::new(pool), EngineConfig::default()).unwrap();
        (handler, start)
    }

    #[test]
    fn test_traverse_tool_reports_injection_as_failure() {
        let (handler, start) = test_handler();
        let result = handler.handle_tool_call(
            "graph_traverse",
            json!({
                "entity_ids": [start.to_string(), "'; DROP TABLE entities; --"],
                "kinds": ["causal_effects"]
            }),
        );

        assert!(result.get("error").is_none(), "unexpected error: {result}");
        assert_eq!(result["edges"].as_array().unwrap().len(), 1);
        assert_eq!(
            result["partial_failures"][0]["reason"],
            "malformed_identifier"
        );

        let stats = handler.handle_tool_call("graph_stats", json!({}));
        assert_eq!(stats["relationship_count"], 1);
    }

    #[test]
    fn test_bad_arguments_become_error_objects() {
        let (handler, _) = test_handler();
        let result = handler.handle_tool_call("graph_neighbors", json!({"entity_id": 42}));
        assert_eq!(result["reason"], "invalid_input");

        let unknown = handler.handle_tool_call("graph_delete", json!({}));
        assert_eq!(unknown["reason"], "unknown_tool");
    }

    #[test]
    fn test_call_tool_marks_errors() {
        let (handler, _) = test_handler();
        let response = handler.handle_request(McpRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(1)),
            method: methods::CALL_TOOL.to_string(),
            params: json!({
                "name": "graph_find_chain",
                "arguments": {"from_id": "x", "to_id": "y"}
            }),
        });
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
    }

    #[test]
    fn test_call_tool_without_name_is_a_protocol_error() {
        let (handler, _) = test_handler();
        let response = handler.handle_request(McpRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(2)),
            method: methods::CALL_TOOL.to_string(),
            params: json!({"arguments": {}}),
        });

        assert!(response.result.is_none());
        let error = response.error.unwrap();
        assert_eq!(error.code, -32602);
        assert_eq!(error.data.unwrap()["reason"], "invalid_input");
    }
}
