//! relgraph CLI
//!
//! Command-line interface for inspecting the relationship graph.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relgraph::api::{FindChainRequest, GraphService, NeighborsRequest, TraverseRequest};
use relgraph::error::{RelgraphError, Result};
use relgraph::storage::{queries, StoragePool};
use relgraph::types::*;
use relgraph::validate::{preview, validate_entity_ids};

#[derive(Parser)]
#[command(name = "relgraph")]
#[command(about = "Relationship graph traversal CLI")]
#[command(version)]
struct Cli {
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

    /// Hard ceiling on traversal depth
    #[arg(long, env = "RELGRAPH_MAX_DEPTH_CEILING", default_value = "5")]
    max_depth_ceiling: usize,

    /// Default visited-node cap per traversal
    #[arg(long, env = "RELGRAPH_NODE_CAP", default_value = "1000")]
    node_cap: usize,

    /// Overall deadline for one traverse command in ms
    #[arg(long, env = "RELGRAPH_FANOUT_TIMEOUT_MS", default_value = "5000")]
    fanout_timeout_ms: u64,

    /// Print full JSON instead of a summary
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Traverse from one or more entities and print the merged result
    Traverse {
        /// Starting entity ids
        #[arg(required = true)]
        entity_ids: Vec<String>,
        /// Traversal kinds (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        kinds: Vec<String>,
        /// Maximum hops
        #[arg(short = 'd', long)]
        max_depth: Option<usize>,
        /// Minimum edge strength (0-1)
        #[arg(short = 's', long)]
        min_strength: Option<f32>,
        /// Relationship types (comma-separated)
        #[arg(short = 't', long, value_delimiter = ',')]
        relationship_types: Vec<String>,
        /// Override direction (outgoing, incoming, both)
        #[arg(long)]
        direction: Option<String>,
    },
    /// Find the chain connecting two entities
    Chain {
        from: String,
        to: String,
        /// Traversal kind
        #[arg(short, long)]
        kind: Option<String>,
        /// Maximum chain length
        #[arg(short = 'd', long)]
        max_depth: Option<usize>,
    },
    /// Show the immediate relationships of an entity
    Neighbors {
        entity_id: String,
        /// Direction (outgoing, incoming, both)
        #[arg(long, default_value = "both")]
        direction: String,
        /// Layers (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        layers: Vec<String>,
        /// Minimum edge strength (0-1)
        #[arg(short = 's', long)]
        min_strength: Option<f32>,
    },
    /// Show statistics
    Stats,
    /// Check identifiers without touching the database
    Validate {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Validate { ids } = &cli.command {
        let mut invalid = 0;
        for (raw, outcome) in validate_entity_ids(ids) {
            match outcome {
                Ok(id) => println!("ok       {}", id),
                Err(e) => {
                    invalid += 1;
                    println!("invalid  {} ({})", preview(raw), e.kind());
                }
            }
        }
        if invalid > 0 {
            return Err(RelgraphError::InvalidInput(format!(
                "{} of {} identifiers are malformed",
                invalid,
                ids.len()
            )));
        }
        return Ok(());
    }

    // Expand ~ in path
    let db_path = shellexpand::tilde(&cli.db_path).to_string();
    let storage_mode: StorageMode = cli.storage_mode.parse().map_err(RelgraphError::Config)?;

    let pool = StoragePool::new(StorageConfig {
        db_path,
        storage_mode,
        pool_size: 2,
    })?;

    let engine_config = EngineConfig {
        max_depth_ceiling: cli.max_depth_ceiling,
        default_max_depth: EngineConfig::default()
            .default_max_depth
            .min(cli.max_depth_ceiling),
        default_node_cap: cli.node_cap,
        node_cap_ceiling: EngineConfig::default().node_cap_ceiling.max(cli.node_cap),
        fanout_timeout_ms: cli.fanout_timeout_ms,
        ..Default::default()
    };
    engine_config.validate()?;
    let service = GraphService::from_pool(&pool, engine_config);

    match cli.command {
        Commands::Traverse {
            entity_ids,
            kinds,
            max_depth,
            min_strength,
            relationship_types,
            direction,
        } => {
            let request = TraverseRequest {
                entity_ids,
                kinds,
                max_depth,
                min_strength,
                relationship_types,
                direction,
                ..Default::default()
            };
            let response = service.traverse(&request).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                for edge in &response.edges {
                    println!(
                        "[{}] {} -{}/{} {:.2}-> {}{}",
                        edge.hop,
                        label(&edge.source_name, &edge.edge.source_id),
                        edge.edge.relationship_type.as_str(),
                        edge.edge.layer.as_str(),
                        edge.edge.strength,
                        label(&edge.target_name, &edge.edge.target_id),
                        if edge.closing { " (closing)" } else { "" }
                    );
                }
                for failure in &response.partial_failures {
                    println!(
                        "failed {} [{}]: {}",
                        failure.entity_id, failure.kind, failure.reason
                    );
                }
                println!(
                    "{} edges from {} units in {}ms{}",
                    response.edges.len(),
                    response.stats.units,
                    response.stats.elapsed_ms,
                    if response.truncated { " (truncated)" } else { "" }
                );
            }
        }

        Commands::Chain {
            from,
            to,
            kind,
            max_depth,
        } => {
            let chain = service
                .find_chain(&FindChainRequest {
                    from_id: from,
                    to_id: to,
                    kind,
                    max_depth,
                    min_strength: None,
                })
                .await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&chain)?);
            } else if !chain.found {
                println!("No chain found");
            } else {
                for edge in &chain.chain {
                    println!(
                        "{}. {} -{}-> {}",
                        edge.hop,
                        label(&edge.source_name, &edge.edge.source_id),
                        edge.edge.relationship_type.as_str(),
                        label(&edge.target_name, &edge.edge.target_id)
                    );
                }
            }
        }

        Commands::Neighbors {
            entity_id,
            direction,
            layers,
            min_strength,
        } => {
            let neighbors = service
                .neighbors(&NeighborsRequest {
                    entity_id,
                    direction: Some(direction),
                    layers,
                    min_strength,
                    ..Default::default()
                })
                .await?;

            if cli.json {
                let edges: Vec<&Edge> = neighbors.iter().map(|n| &n.edge).collect();
                println!("{}", serde_json::to_string_pretty(&edges)?);
            } else {
                for neighbor in &neighbors {
                    let arrow = match neighbor.matched {
                        MatchedSide::Source => "->",
                        MatchedSide::Target => "<-",
                    };
                    println!(
                        "{} {} ({}, {}, {:.2})",
                        arrow,
                        neighbor.far_end(),
                        neighbor.edge.relationship_type.as_str(),
                        neighbor.edge.layer.as_str(),
                        neighbor.edge.strength
                    );
                }
            }
        }

        Commands::Stats => {
            let stats = pool.with_connection(queries::graph_stats)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        Commands::Validate { .. } => {}
    }

    Ok(())
}

fn label(name: &str, id: &EntityId) -> String {
    if name.is_empty() {
        id.to_string()
    } else {
        format!("{} ({})", name, truncate(&id.to_string(), 8))
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
