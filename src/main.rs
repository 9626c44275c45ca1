//! Infocentral — AI-generated dashboard block backend.
//!
//! Usage:
//!   infocentral init                 Write a default config
//!   infocentral create "<prompt>"    Create a block from a prompt
//!   infocentral list                 List blocks
//!   infocentral data <id>            Fetch block data (cache-aware)
//!   infocentral daemon               Run the background refresh daemon

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use infocentral::config::{self, InfocentralConfig};
use infocentral::executor::Executor;
use infocentral::lifecycle::Orchestrator;
use infocentral::oracle::OracleClient;
use infocentral::scheduler::RefreshDaemon;
use infocentral::store::Database;
use infocentral::types::*;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "infocentral")]
#[command(version = "0.1.0")]
#[command(about = "AI-generated dashboard block backend")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to infocentral home directory (defaults to ~/.infocentral).
    #[arg(long)]
    home: Option<String>,

    /// Log level (debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default config file.
    Init,

    /// Create a new block from a natural-language prompt.
    Create {
        prompt: String,

        /// Override the derived title.
        #[arg(long)]
        title: Option<String>,

        /// Cache TTL in seconds.
        #[arg(long)]
        interval: Option<u32>,
    },

    /// Iterate on an existing block with a follow-up prompt.
    Update { id: i64, prompt: String },

    /// Ask the oracle to heal a block from its latest failure.
    Heal { id: i64 },

    /// Force a refresh, bypassing the cache.
    Refresh { id: i64 },

    /// Fetch block data, served from cache when fresh.
    Data { id: i64 },

    /// List all blocks.
    List,

    /// Show one block in detail.
    Show { id: i64 },

    /// List all versions of a block.
    Versions { id: i64 },

    /// Show the execution audit trail of a block.
    Logs { id: i64 },

    /// Update a block's layout (JSON).
    Layout { id: i64, layout: String },

    /// Soft-delete a block.
    Delete { id: i64 },

    /// Run the background refresh daemon.
    Daemon,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let home_dir = match &cli.home {
        Some(home) => PathBuf::from(shellexpand::tilde(home).into_owned()),
        None => config::default_home_dir(),
    };

    match cli.command {
        Commands::Init => cmd_init(&home_dir),
        Commands::Create {
            prompt,
            title,
            interval,
        } => cmd_create(&home_dir, &prompt, title, interval).await,
        Commands::Update { id, prompt } => cmd_update(&home_dir, id, &prompt).await,
        Commands::Heal { id } => cmd_heal(&home_dir, id).await,
        Commands::Refresh { id } => cmd_refresh(&home_dir, id).await,
        Commands::Data { id } => cmd_data(&home_dir, id).await,
        Commands::List => cmd_list(&home_dir).await,
        Commands::Show { id } => cmd_show(&home_dir, id).await,
        Commands::Versions { id } => cmd_versions(&home_dir, id).await,
        Commands::Logs { id } => cmd_logs(&home_dir, id).await,
        Commands::Layout { id, layout } => cmd_layout(&home_dir, id, &layout).await,
        Commands::Delete { id } => cmd_delete(&home_dir, id).await,
        Commands::Daemon => cmd_daemon(&home_dir).await,
    }
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

fn cmd_init(home_dir: &Path) -> Result<()> {
    let config_path = home_dir.join("infocentral.toml");
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
        return Ok(());
    }

    let cfg = InfocentralConfig::default();
    config::save_config(&cfg, &config_path)?;
    println!(
        "{} Wrote default config to {}",
        ">>>".green().bold(),
        config_path.display()
    );
    println!("Set oracle_api_key before creating blocks.");
    Ok(())
}

async fn cmd_create(
    home_dir: &Path,
    prompt: &str,
    title: Option<String>,
    interval: Option<u32>,
) -> Result<()> {
    let (cfg, orch) = bootstrap(home_dir)?;
    let interval = interval.unwrap_or(cfg.default_refresh_interval);

    println!("{} Generating block code...", ">>>".green().bold());
    let block = orch.create_block(prompt, title, interval).await?;

    print_block_line(&block);
    if block.status == BlockStatus::Error {
        println!(
            "{} Generated code failed validation; run `infocentral heal {}` or it will self-heal on refresh.",
            "!".yellow().bold(),
            block.id
        );
    }
    Ok(())
}

async fn cmd_update(home_dir: &Path, id: i64, prompt: &str) -> Result<()> {
    let (_cfg, orch) = bootstrap(home_dir)?;

    println!("{} Iterating on block {}...", ">>>".green().bold(), id);
    let block = orch.update_block(id, prompt).await?;
    print_block_line(&block);
    Ok(())
}

async fn cmd_heal(home_dir: &Path, id: i64) -> Result<()> {
    let (_cfg, orch) = bootstrap(home_dir)?;

    println!("{} Healing block {}...", ">>>".green().bold(), id);
    let block = orch.heal_block(id).await?;
    if block.status == BlockStatus::Active {
        println!(
            "{} Block {} healed (now at v{})",
            "ok".green().bold(),
            block.id,
            block.current_version
        );
    } else {
        println!(
            "{} Heal attempt failed; block {} still {}",
            "!".yellow().bold(),
            block.id,
            colorize_block_status(block.status)
        );
    }
    Ok(())
}

async fn cmd_refresh(home_dir: &Path, id: i64) -> Result<()> {
    let (_cfg, orch) = bootstrap(home_dir)?;
    let data = orch.refresh_data(id).await?;
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}

async fn cmd_data(home_dir: &Path, id: i64) -> Result<()> {
    let (_cfg, orch) = bootstrap(home_dir)?;
    let envelope = orch.get_data(id).await?;
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

async fn cmd_list(home_dir: &Path) -> Result<()> {
    let (_cfg, orch) = bootstrap(home_dir)?;
    let blocks = orch.list_blocks().await?;

    if blocks.is_empty() {
        println!("No blocks. Create one with `infocentral create \"<prompt>\"`.");
        return Ok(());
    }

    for block in blocks {
        print_block_line(&block);
    }
    Ok(())
}

async fn cmd_show(home_dir: &Path, id: i64) -> Result<()> {
    let (_cfg, orch) = bootstrap(home_dir)?;
    let block = orch.get_block(id).await?;

    println!();
    println!("{}", format!("=== Block {} ===", block.id).bold());
    println!();
    println!("  {}:    {}", "Title".bold(), block.title);
    println!("  {}:   {}", "Prompt".bold(), block.user_prompt);
    println!(
        "  {}:   {}",
        "Status".bold(),
        colorize_block_status(block.status)
    );
    println!("  {}:  v{}", "Version".bold(), block.current_version);
    println!("  {}: {}s", "Interval".bold(), block.refresh_interval);
    println!("  {}:   {}", "Layout".bold(), block.layout);
    println!("  {}:  {}", "Created".bold(), block.created_at.to_rfc3339());
    println!("  {}:  {}", "Updated".bold(), block.updated_at.to_rfc3339());
    println!();
    Ok(())
}

async fn cmd_versions(home_dir: &Path, id: i64) -> Result<()> {
    let (_cfg, orch) = bootstrap(home_dir)?;
    let versions = orch.list_versions(id).await?;

    for v in versions {
        println!(
            "  v{:<4} {:<12} {}  {}",
            v.version,
            colorize_version_status(v.status),
            v.created_at.to_rfc3339(),
            v.explanation.lines().next().unwrap_or(""),
        );
    }
    Ok(())
}

async fn cmd_logs(home_dir: &Path, id: i64) -> Result<()> {
    let (_cfg, orch) = bootstrap(home_dir)?;
    let logs = orch.list_logs(id).await?;

    for log in logs {
        let outcome = if log.success {
            "ok".green().to_string()
        } else {
            "failed".red().to_string()
        };
        let duration = log
            .duration_ms
            .map(|ms| format!("{ms}ms"))
            .unwrap_or_else(|| "-".into());
        println!(
            "  {} {:<5} v{:<4} {:<8} {:>8}  {}",
            log.created_at.to_rfc3339(),
            log.execution_type,
            log.version,
            outcome,
            duration,
            log.error_message.as_deref().unwrap_or(""),
        );
    }
    Ok(())
}

async fn cmd_layout(home_dir: &Path, id: i64, layout: &str) -> Result<()> {
    let (_cfg, orch) = bootstrap(home_dir)?;
    let layout: serde_json::Value =
        serde_json::from_str(layout).context("Layout must be valid JSON")?;
    orch.update_layout(id, layout).await?;
    println!("Layout of block {id} updated.");
    Ok(())
}

async fn cmd_delete(home_dir: &Path, id: i64) -> Result<()> {
    let (_cfg, orch) = bootstrap(home_dir)?;
    orch.delete_block(id).await?;
    println!("Block {id} deleted.");
    Ok(())
}

async fn cmd_daemon(home_dir: &Path) -> Result<()> {
    let (cfg, orch, store) = bootstrap_with_store(home_dir)?;

    println!(
        "{} Starting refresh daemon (tick: {}s)...",
        ">>>".green().bold(),
        cfg.scheduler_tick_secs
    );

    let cancel = CancellationToken::new();
    let daemon = RefreshDaemon::new(orch, store, cfg.scheduler_tick_secs);

    let daemon_cancel = cancel.clone();
    let handle = tokio::spawn(async move { daemon.run(daemon_cancel).await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    println!("\n{} Shutting down gracefully...", "<<<".red().bold());
    cancel.cancel();

    let shutdown_timeout = tokio::time::Duration::from_secs(10);
    let _ = tokio::time::timeout(shutdown_timeout, handle).await;

    info!("Daemon shutdown complete");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Bootstrap the runtime: load config, open the store, wire the
/// orchestrator.
fn bootstrap(home_dir: &Path) -> Result<(InfocentralConfig, Arc<Orchestrator>)> {
    let (cfg, orch, _store) = bootstrap_with_store(home_dir)?;
    Ok((cfg, orch))
}

fn bootstrap_with_store(
    home_dir: &Path,
) -> Result<(InfocentralConfig, Arc<Orchestrator>, Arc<Mutex<Database>>)> {
    if !home_dir.exists() {
        std::fs::create_dir_all(home_dir)
            .with_context(|| format!("Failed to create home directory: {}", home_dir.display()))?;
    }

    let config_path = home_dir.join("infocentral.toml");
    let cfg = config::load_config(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = cfg.resolved_db_path();
    let db_path = Path::new(&db_path);
    if let Some(parent) = db_path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    let db = Database::open(db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    let store = Arc::new(Mutex::new(db));

    let oracle = OracleClient::new(
        &cfg.oracle_api_url,
        &cfg.oracle_api_key,
        &cfg.oracle_model,
        cfg.oracle_max_tokens,
    );
    let executor = Executor::new(
        cfg.resolved_artifacts_dir(),
        &cfg.interpreter,
        cfg.execution_timeout_secs,
        cfg.keep_versions,
    );

    let orch = Arc::new(Orchestrator::new(
        store.clone(),
        Arc::new(oracle),
        Arc::new(executor),
        cfg.heal_window_secs,
    ));

    Ok((cfg, orch, store))
}

fn print_block_line(block: &Block) {
    println!(
        "  {:<4} {:<30} v{:<3} {:<10} every {}s",
        block.id,
        block.title,
        block.current_version,
        colorize_block_status(block.status),
        block.refresh_interval,
    );
}

fn colorize_block_status(status: BlockStatus) -> String {
    match status {
        BlockStatus::Active => "active".green().to_string(),
        BlockStatus::Error => "error".red().to_string(),
        BlockStatus::Disabled => "disabled".yellow().to_string(),
        BlockStatus::Deleted => "deleted".dimmed().to_string(),
    }
}

fn colorize_version_status(status: VersionStatus) -> String {
    match status {
        VersionStatus::Active => "active".green().to_string(),
        VersionStatus::Deprecated => "deprecated".dimmed().to_string(),
        VersionStatus::Failed => "failed".red().to_string(),
    }
}
