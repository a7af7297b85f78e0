//! relgraph MCP Server
//!
//! Run with: relgraph-server

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relgraph::error::{RelgraphError, Result};
use relgraph::mcp::{GraphHandler, McpServer};
use relgraph::storage::StoragePool;
use relgraph::types::*;

#[derive(Parser, Debug)]
#[command(name = "relgraph-server")]
#[command(about = "relgraph MCP server for relationship graph traversal")]
struct Args {
    /// Database path
    #[arg(
        long,
        env = "RELGRAPH_DB_PATH",
        default_value = "~/.local/share/relgraph/graph.db"
    )]
    db_path: String,

    /// Storage mode (local, read-only)
    #[arg(long, env = "RELGRAPH_STORAGE_MODE", default_value = "local")]
    storage_mode: String,

    /// Pooled connections for concurrent lookups
    #[arg(long, env = "RELGRAPH_POOL_SIZE", default_value = "4")]
    pool_size: usize,

    /// Hard ceiling on traversal depth
    #[arg(long, env = "RELGRAPH_MAX_DEPTH_CEILING", default_value = "5")]
    max_depth_ceiling: usize,

    /// Default visited-node cap per traversal
    #[arg(long, env = "RELGRAPH_NODE_CAP", default_value = "1000")]
    node_cap: usize,

    /// Overall deadline for one traverse request in ms
    #[arg(long, env = "RELGRAPH_FANOUT_TIMEOUT_MS", default_value = "5000")]
    fanout_timeout_ms: u64,

    /// Retries per failing neighbor lookup
    #[arg(long, env = "RELGRAPH_MAX_RETRIES", default_value = "2")]
    max_retries: u32,
}

fn main() -> Result<()> {
    // Initialize logging to stderr (stdout is for MCP protocol)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    // Expand ~ in path
    let db_path = shellexpand::tilde(&args.db_path).to_string();

    let storage_mode: StorageMode = args
        .storage_mode
        .parse()
        .map_err(RelgraphError::Config)?;

    let storage_config = StorageConfig {
        db_path,
        storage_mode,
        pool_size: args.pool_size,
    };

    let engine_config = EngineConfig {
        max_depth_ceiling: args.max_depth_ceiling,
        default_max_depth: EngineConfig::default()
            .default_max_depth
            .min(args.max_depth_ceiling),
        default_node_cap: args.node_cap,
        node_cap_ceiling: EngineConfig::default().node_cap_ceiling.max(args.node_cap),
        fanout_timeout_ms: args.fanout_timeout_ms,
        max_retries: args.max_retries,
        ..Default::default()
    };
    engine_config.validate()?;

    // Open storage
    let pool = StoragePool::new(storage_config)?;
    tracing::info!(
        db_path = %pool.config().db_path,
        mode = ?pool.config().storage_mode,
        pool_size = pool.size(),
        "Storage opened"
    );

    // Create handler and server
    let handler = GraphHandler::new(Arc::new(pool), engine_config)?;
    let server = McpServer::new(handler);

    tracing::info!("relgraph MCP server starting...");
    server.run()?;

    Ok(())
}
