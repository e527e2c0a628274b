pub mod config;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::engine::types::ConversationGraph;
use crate::storage::{JsonStore, LeadSink};

use config::ParleyConfig;

#[derive(Parser)]
#[command(name = "parley", version, about = "Conversational agent orchestration server")]
pub struct Cli {
    /// Path to a .env file to load (default: auto-detect .env in cwd)
    #[arg(long, global = true)]
    dotenv: Option<PathBuf>,

    /// Path to parley.yaml (default: auto-detect in cwd)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0", env = "HOST")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value = "3000", env = "PORT")]
        port: u16,

        /// State store directory
        #[arg(long, default_value = "data/store", env = "STORE_DIR")]
        store_dir: PathBuf,
    },

    /// Validate a conversation graph file without serving
    Validate {
        /// Path to a graph JSON file
        graph: PathBuf,
    },

    /// List captured leads for an agent
    Leads {
        /// Agent ID
        agent_id: String,

        /// State store directory
        #[arg(long, default_value = "data/store")]
        store_dir: PathBuf,

        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    load_dotenv(cli.dotenv.as_deref());
    let config = ParleyConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            store_dir,
        } => {
            let host = config.host.clone().unwrap_or(host);
            let port = config.port.unwrap_or(port);
            let store_dir = config
                .store_dir
                .clone()
                .map(PathBuf::from)
                .unwrap_or(store_dir);
            crate::api::serve(&host, port, store_dir, config).await
        }
        Commands::Validate { graph } => cmd_validate(graph),
        Commands::Leads {
            agent_id,
            store_dir,
            format,
        } => cmd_leads(agent_id, store_dir, format).await,
    }
}

/// Load environment variables from a .env file.
/// If an explicit path is given, load from that path (error if missing).
/// Otherwise, auto-detect .env in the current working directory (silently skip if absent).
fn load_dotenv(explicit_path: Option<&std::path::Path>) {
    match explicit_path {
        Some(path) => match dotenvy::from_path(path) {
            Ok(()) => info!("Loaded env from {}", path.display()),
            Err(e) => {
                eprintln!(
                    "Warning: Failed to load dotenv file '{}': {}",
                    path.display(),
                    e
                );
            }
        },
        None => match dotenvy::dotenv() {
            Ok(path) => info!("Loaded env from {}", path.display()),
            Err(dotenvy::Error::Io(_)) => {
                // No .env file found, skip
            }
            Err(e) => {
                eprintln!("Warning: Failed to parse .env file: {}", e);
            }
        },
    }
}

fn cmd_validate(graph_path: PathBuf) -> Result<()> {
    let data = std::fs::read_to_string(&graph_path)
        .with_context(|| format!("Failed to read graph file: {}", graph_path.display()))?;
    let graph: ConversationGraph = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse graph file: {}", graph_path.display()))?;

    println!("Start node: {}", graph.start);
    println!("Nodes: {}", graph.nodes.len());

    let errors = graph.validate();
    if errors.is_empty() {
        println!("Validation: OK");

        let mut ids: Vec<&String> = graph.nodes.keys().collect();
        ids.sort();
        println!("\nNodes:");
        for id in ids {
            let node = &graph.nodes[id];
            let next = node.next.as_deref().unwrap_or("(terminal)");
            let capture = node
                .capture
                .as_deref()
                .map(|key| format!(" captures '{}'", key))
                .unwrap_or_default();
            println!("  {} -> {}{}", id, next, capture);
        }
    } else {
        println!("Validation: FAILED");
        for err in &errors {
            println!("  - {}", err);
        }
        anyhow::bail!("{} validation error(s) found", errors.len());
    }

    Ok(())
}

async fn cmd_leads(agent_id: String, store_dir: PathBuf, format: String) -> Result<()> {
    let store = JsonStore::new(store_dir);
    let leads = store.list_leads(&agent_id).await?;

    if leads.is_empty() {
        println!("No leads captured for agent '{}'.", agent_id);
        return Ok(());
    }

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&leads)?);
        return Ok(());
    }

    println!(
        "{:<38} {:<20} {:<24} FOLLOW-UP",
        "LEAD ID", "NAME", "CAPTURED"
    );
    println!("{}", "-".repeat(100));

    for lead in &leads {
        let captured = lead.captured_at.format("%Y-%m-%d %H:%M:%S").to_string();
        println!(
            "{:<38} {:<20} {:<24} {}",
            lead.id, lead.name, captured, lead.followup_info
        );
    }

    println!("\nTotal: {} lead(s)", leads.len());
    Ok(())
}
