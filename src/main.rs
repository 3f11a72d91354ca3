// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! chunkfleet main entry point - CLI, node roles and operator console.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use chunkfleet::config::{self, CliOptions, ResolvedConfig};
use chunkfleet::engine::{CommandEngine, GenerationEngine};
use chunkfleet::network::{local_hostname, AgentConfig, CoordinatorConfig};
use chunkfleet::partition::{ChunkPlan, Selection};
use chunkfleet::telemetry::{init_telemetry, TelemetryConfig};
use chunkfleet::transfer::{
    format_bytes, status_counts, DirectoryBackend, TransferBackend, TransferManager,
    TransferStatus,
};
use chunkfleet::{Node, NodeSettings, Role};

/// Distributed chunk pre-generation.
#[derive(Parser)]
#[command(name = "chunkfleet")]
#[command(author, version, about = "Distributed chunk pre-generation", long_about = None)]
struct Cli {
    /// Data directory for queues and chunk lists
    #[arg(long, env = "CHUNKFLEET_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Directory containing world folders
    #[arg(long, env = "CHUNKFLEET_WORLD_DIR", global = true)]
    world_dir: Option<PathBuf>,

    /// Generation engine program
    #[arg(long, env = "CHUNKFLEET_ENGINE", global = true)]
    engine: Option<String>,

    /// Disable region transfers
    #[arg(long, global = true)]
    no_transfer: bool,

    /// Show debug output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// The area to generate.
#[derive(Args, Debug, Clone)]
struct SelectionArgs {
    /// World folder name
    #[arg(long, default_value = "world")]
    world: String,

    /// Center X in blocks
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    center_x: f64,

    /// Center Z in blocks
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    center_z: f64,

    /// Radius in blocks
    #[arg(long)]
    radius: Option<f64>,

    /// Shape: square or circle
    #[arg(long, default_value = "square")]
    shape: String,
}

impl SelectionArgs {
    fn selection(&self) -> Option<Selection> {
        self.radius.map(|radius| {
            Selection::new(self.world.clone(), self.center_x, self.center_z, radius)
                .with_shape(self.shape.as_str())
        })
    }

    fn require(&self) -> anyhow::Result<Selection> {
        self.selection().context("--radius is required")
    }
}

/// Subcommands for chunkfleet.
#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator
    Host {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Also generate locally as instance 0
        #[arg(long)]
        participate: bool,

        /// Broadcast start as soon as the coordinator is up
        #[arg(long)]
        start: bool,

        /// Seconds between status lines (0 disables)
        #[arg(long, default_value_t = 30)]
        status_interval: u64,

        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Connect to a coordinator and generate the assigned share
    Worker {
        /// Coordinator address, host[:port]
        address: String,

        /// Name reported to the coordinator
        #[arg(long)]
        hostname: Option<String>,
    },

    /// Generate the whole selection on this machine
    Standalone {
        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Print the regions an instance owns
    Plan {
        /// Instance index
        #[arg(long, default_value_t = 0)]
        index: u32,

        /// Total instances
        #[arg(long, default_value_t = 1)]
        total: u32,

        /// Also write the chunk list
        #[arg(long)]
        write: bool,

        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Inspect or drive the transfer queue
    Transfer {
        #[command(subcommand)]
        action: TransferAction,
    },

    /// Show the resolved configuration
    Config,
}

/// Transfer subcommand actions.
#[derive(Subcommand)]
enum TransferAction {
    /// Show queue status
    Status,
    /// Process pending records
    Start,
    /// Retry failed records
    Retry {
        /// Also reset records that used up their attempts
        #[arg(long)]
        reset: bool,
    },
    /// Remove finished records
    Clear {
        /// Remove every record
        #[arg(long)]
        all: bool,
    },
    /// Test the destination without uploading
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let telemetry = if cli.verbose {
        TelemetryConfig::development()
    } else {
        TelemetryConfig::default()
    };
    let _guard = init_telemetry(&telemetry)?;

    let cli_options = CliOptions {
        host_port: match &cli.command {
            Commands::Host { port, .. } => *port,
            _ => None,
        },
        host_participates: match &cli.command {
            Commands::Host { participate: true, .. } => Some(true),
            _ => None,
        },
        data_dir: cli.data_dir.clone(),
        world_dir: cli.world_dir.clone(),
        engine_command: cli.engine.clone(),
        no_transfer: cli.no_transfer,
    };

    let workspace_root = std::env::current_dir()?;
    let config = config::load_config(&workspace_root, cli_options)?;

    match cli.command {
        Commands::Host {
            start,
            status_interval,
            selection,
            ..
        } => run_host(&config, selection.selection(), start, status_interval).await,
        Commands::Worker { address, hostname } => run_worker(&config, &address, hostname).await,
        Commands::Standalone { selection } => run_standalone(&config, selection.require()?).await,
        Commands::Plan {
            index,
            total,
            write,
            selection,
        } => print_plan(&config, &selection.require()?, index, total, write),
        Commands::Transfer { action } => handle_transfer(&config, action).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

// ============================================================================
// Construction
// ============================================================================

fn build_engine(config: &ResolvedConfig) -> Option<Arc<dyn GenerationEngine>> {
    config
        .engine
        .clone()
        .filter(|spec| !spec.command.trim().is_empty())
        .map(|spec| Arc::new(CommandEngine::new(spec)) as Arc<dyn GenerationEngine>)
}

/// Transfer manager plus its backend, or `None` with the reason logged.
fn build_transfer(config: &ResolvedConfig) -> Option<(TransferManager, Arc<DirectoryBackend>)> {
    let transfer = &config.transfer;
    if !transfer.enabled {
        return None;
    }
    let problems = transfer.validate();
    if !problems.is_empty() {
        for problem in &problems {
            warn!("Transfer config: {}", problem);
        }
        warn!("Transfers disabled until the configuration is fixed");
        return None;
    }
    let backend = Arc::new(transfer.backend()?);
    let options = transfer.options(&config.data_dir, &config.world_dir);
    match TransferManager::new(options, backend.clone()) {
        Ok(manager) => Some((manager, backend)),
        Err(e) => {
            warn!("Failed to open transfer queue: {}", e);
            None
        }
    }
}

fn node_settings(config: &ResolvedConfig) -> NodeSettings {
    NodeSettings {
        chunk_list_dir: config.chunk_list_dir.clone(),
    }
}

// ============================================================================
// Roles
// ============================================================================

async fn run_host(
    config: &ResolvedConfig,
    selection: Option<Selection>,
    start: bool,
    status_interval: u64,
) -> anyhow::Result<()> {
    let bind_addr = SocketAddr::from(([0, 0, 0, 0], config.host_port));
    let role = Role::Host(CoordinatorConfig {
        bind_addr,
        host_participates: config.host_participates,
        stale_after: config.stale_after(),
    });
    let node = Node::initialize(role, node_settings(config), build_engine(config), None)?;
    node.start().await?;

    if start {
        let selection = selection.clone().context("--start needs --radius")?;
        node.start_generation(Some(selection)).await?;
    }

    run_console(&node, selection, status_interval).await;
    node.shutdown().await;
    Ok(())
}

async fn run_worker(config: &ResolvedConfig, address: &str, hostname: Option<String>) -> anyhow::Result<()> {
    let agent = AgentConfig::from_address(address)?
        .with_hostname(hostname.unwrap_or_else(local_hostname))
        .with_reconnect_delay(config.reconnect_delay());
    let transfer = build_transfer(config).map(|(manager, _)| manager);
    let node = Node::initialize(Role::Worker(agent), node_settings(config), build_engine(config), transfer)?;
    node.start().await?;

    run_console(&node, None, 0).await;
    node.shutdown().await;
    Ok(())
}

async fn run_standalone(config: &ResolvedConfig, selection: Selection) -> anyhow::Result<()> {
    let transfer = build_transfer(config).map(|(manager, _)| manager);
    let node = Node::initialize(Role::Standalone, node_settings(config), build_engine(config), transfer)?;
    node.start().await?;
    node.start_generation(Some(selection.clone())).await?;

    run_console(&node, Some(selection), 30).await;
    node.shutdown().await;
    Ok(())
}

/// Read operator commands from stdin until `quit` or end of input.
async fn run_console(node: &Node, selection: Option<Selection>, status_interval: u64) {
    println!("Commands: start, stop, status, transfer, retry, quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_secs(status_interval.max(1)));
    ticker.tick().await;

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick(), if status_interval > 0 => {
                println!("{}", node.status_text().await);
                continue;
            }
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                // Detached from a terminal: keep serving until interrupted.
                let _ = tokio::signal::ctrl_c().await;
                break;
            }
            Err(e) => {
                warn!("Console read failed: {}", e);
                break;
            }
        };

        match line.trim() {
            "" => {}
            "start" => match node.start_generation(selection.clone()).await {
                Ok(()) => println!("Generation started"),
                Err(e) => println!("Cannot start: {}", e),
            },
            "stop" => {
                node.stop_generation().await;
                println!("Generation stopped");
            }
            "status" => println!("{}", node.status_text().await),
            "transfer" => match node.transfers() {
                Ok(manager) => {
                    if manager.start() {
                        println!("Transfers started");
                    }
                }
                Err(e) => println!("{}", e),
            },
            "retry" => match node.transfers().map(|m| m.retry_failed()) {
                Ok(Ok(count)) => println!("Retrying {} failed transfer(s)", count),
                Ok(Err(e)) => println!("Retry failed: {}", e),
                Err(e) => println!("{}", e),
            },
            "quit" | "exit" => break,
            other => println!("Unknown command: {}", other),
        }
    }
    info!("Shutting down");
}

// ============================================================================
// One-shot commands
// ============================================================================

fn print_plan(config: &ResolvedConfig, selection: &Selection, index: u32, total: u32, write: bool) -> anyhow::Result<()> {
    if total == 0 || index >= total {
        bail!("index must be below total ({} >= {})", index, total);
    }
    let plan = ChunkPlan::build(selection, index, total);
    println!(
        "{} {} around ({}, {}) radius {}: instance {}/{} owns {} of {} chunks in {} region(s)",
        plan.world,
        plan.shape,
        selection.center_x,
        selection.center_z,
        selection.radius,
        index,
        total,
        plan.chunk_count,
        plan.total_chunks,
        plan.regions.len()
    );
    for region in &plan.regions {
        println!("  {}", region.relative_path());
    }
    if write {
        let path = plan
            .write_chunk_list(&config.chunk_list_dir)
            .with_context(|| format!("writing chunk list to {}", config.chunk_list_dir.display()))?;
        println!("Chunk list: {}", path.display());
    }
    Ok(())
}

async fn handle_transfer(config: &ResolvedConfig, action: TransferAction) -> anyhow::Result<()> {
    let Some((manager, backend)) = build_transfer(config) else {
        bail!("Transfers are disabled or misconfigured (see `chunkfleet config`)");
    };

    match action {
        TransferAction::Status => print_transfer_status(&manager),
        TransferAction::Start => {
            if manager.start() {
                manager.wait().await;
            }
            print_transfer_status(&manager);
        }
        TransferAction::Retry { reset } => {
            let count = if reset {
                manager.rearm_failed()?
            } else {
                manager.retry_failed()?
            };
            println!("Retrying {} record(s)", count);
            manager.wait().await;
            print_transfer_status(&manager);
        }
        TransferAction::Clear { all } => {
            if all {
                manager.clear_all()?;
                println!("Cleared all records");
            } else {
                let removed = manager.clear_completed()?;
                println!("Cleared {} finished record(s)", removed);
            }
        }
        TransferAction::Check => {
            let credentials = manager.options().credentials.clone();
            backend
                .connect(&credentials)
                .await
                .with_context(|| format!("connecting to {}", backend.name()))?;
            backend.disconnect().await;
            println!("Destination reachable: {}", backend.root().display());
        }
    }
    Ok(())
}

fn print_transfer_status(manager: &TransferManager) {
    let summary = manager.status();
    println!("{}", summary);
    if summary.is_empty() {
        return;
    }
    println!(
        "World: {}  Bytes: {} / {}",
        manager.world_name().unwrap_or_else(|| "-".to_string()),
        format_bytes(summary.bytes_transferred),
        format_bytes(summary.total_bytes)
    );
    let records = manager.records();
    for (status, count) in status_counts(&records) {
        if count > 0 {
            println!("  {:<12} {}", status.as_str(), count);
        }
    }
    for record in records.iter().filter(|r| r.status() == TransferStatus::Failed) {
        println!(
            "  failed {} after {} attempt(s): {}",
            record.region(),
            record.attempt_count(),
            record.error_message().unwrap_or("unknown error")
        );
    }
}
