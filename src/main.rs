//! # GroupWarden — WhatsApp group lifecycle daemon
//!
//! Opens and closes groups on schedule, keeps the group inventory in sync
//! and sweeps inactive members.
//!
//! Usage:
//!   groupwarden run                         # Boot jobs and run the worker until Ctrl-C
//!   groupwarden schedule 12 09:00 18:00     # Change a group's open/close times
//!   groupwarden cancel 12                   # Drop a group's open/close jobs
//!   groupwarden jobs                        # List scheduled jobs
//!   groupwarden sweep                       # Run one inactivity sweep now
//!   groupwarden sync                        # Sync groups from WhatsApp now

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use warden_channels::{EvolutionClient, MessageVariation};
use warden_core::WardenConfig;
use warden_db::WardenDb;
use warden_lifecycle::{Warden, jobs};
use warden_scheduler::{SchedulerDb, SchedulerEngine, SharedScheduler, offset_from_minutes};

#[derive(Parser)]
#[command(
    name = "groupwarden",
    version,
    about = "🛡️ GroupWarden — scheduled open/close, inactivity sweeps and welcomes for WhatsApp groups"
)]
struct Cli {
    /// Config file (default: ~/.groupwarden/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register jobs and run the dispatch worker until interrupted
    Run,
    /// Set a group's open/close times and reschedule its jobs
    Schedule {
        group_id: i64,
        /// HH:MM
        open: String,
        /// HH:MM
        close: String,
    },
    /// Remove a group's open/close jobs
    Cancel { group_id: i64 },
    /// Open a group now
    Open { group_id: i64 },
    /// Close a group now
    Close { group_id: i64 },
    /// List scheduled jobs
    Jobs,
    /// Run one inactivity sweep
    Sweep,
    /// Sync groups and participants from WhatsApp
    Sync,
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(())
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        "groupwarden=debug,warden_core=debug,warden_scheduler=debug,warden_db=debug,warden_channels=debug,warden_lifecycle=debug"
    } else {
        "groupwarden=info,warden_scheduler=info,warden_channels=info,warden_lifecycle=info"
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> Result<WardenConfig> {
    let mut config = match path {
        Some(p) => WardenConfig::load_from(p)?,
        None => WardenConfig::load()?,
    };
    config.apply_env();
    config.validate()?;
    Ok(config)
}

fn open_scheduler(config: &WardenConfig) -> Result<SharedScheduler> {
    let path = expand_path(&config.database.jobs_path);
    ensure_parent(&path)?;
    let store = SchedulerDb::open(&path)
        .with_context(|| format!("opening job store {}", path.display()))?;
    let offset = offset_from_minutes(config.scheduler.utc_offset_minutes)?;
    Ok(SchedulerEngine::new(Box::new(store), offset)?.shared())
}

fn build_warden(config: WardenConfig, scheduler: SharedScheduler) -> Result<Warden> {
    let path = expand_path(&config.database.path);
    ensure_parent(&path)?;
    let db = WardenDb::open(&path).with_context(|| format!("opening database {}", path.display()))?;
    let client = EvolutionClient::new(
        &config.evolution,
        MessageVariation::from_config(&config.messaging),
    )?;
    Ok(Warden::new(config, scheduler, Arc::new(db), Arc::new(client))?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json);

    let config = load_config(cli.config.as_deref())?;
    let scheduler = open_scheduler(&config)?;

    match cli.command {
        Command::Jobs => {
            let engine = scheduler.lock().await;
            if engine.job_count() == 0 {
                println!("No scheduled jobs.");
            }
            for job in engine.list_jobs() {
                let next = job
                    .next_run
                    .map(|t| t.with_timezone(&engine.offset()).format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "{:<20} {:<18} {:<16} next {}  (ran {}x)",
                    job.key.as_str(),
                    job.action.name(),
                    job.cron,
                    next,
                    job.run_count
                );
            }
        }
        Command::Cancel { group_id } => {
            let removed = jobs::cancel_group_jobs(&scheduler, group_id).await?;
            println!("🗑️ Removed {removed} job(s) for group {group_id}");
        }
        Command::Schedule { group_id, open, close } => {
            let warden = build_warden(config, scheduler)?;
            let group = warden
                .service()
                .change_open_close_times(group_id, &open, &close)
                .await?;
            println!("⏰ '{}' now opens at {open} and closes at {close}", group.name);
        }
        Command::Open { group_id } => {
            let warden = build_warden(config, scheduler)?;
            let group = warden.service().open_group(group_id).await?;
            println!("🔓 '{}' opened", group.name);
        }
        Command::Close { group_id } => {
            let warden = build_warden(config, scheduler)?;
            let group = warden.service().close_group(group_id).await?;
            println!("🔒 '{}' closed", group.name);
        }
        Command::Sweep => {
            let warden = build_warden(config, scheduler)?;
            print_json(&warden.run_inactivity_sweep().await?)?;
        }
        Command::Sync => {
            let warden = build_warden(config, scheduler)?;
            print_json(&warden.run_full_sync().await?)?;
        }
        Command::Run => run(build_warden(config, scheduler)?).await?,
    }
    Ok(())
}

async fn run(warden: Warden) -> Result<()> {
    let scheduled = warden.boot().await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (worker, handle) = warden.spawn_worker(shutdown_rx);

    let cfg = warden.config();
    println!("🛡️ GroupWarden v{}", env!("CARGO_PKG_VERSION"));
    println!("   📡 Evolution API:  {} ({})", cfg.evolution.base_url, cfg.evolution.instance);
    println!("   🗄️  Database:       {}", cfg.database.path);
    println!("   📅 Groups:         {scheduled} scheduled");
    println!("   ⏱️  Tick:           {}s", cfg.scheduler.tick_secs);
    println!();

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    tracing::info!("🛑 Shutdown requested");

    let flushed = warden.flush_welcomes().await;
    if flushed > 0 {
        tracing::info!("👋 Flushed {flushed} pending welcome batch(es)");
    }
    shutdown_tx.send(true).ok();
    handle.await.context("worker task")?;

    let stats = worker.stats();
    tracing::info!(
        "🏁 Done: {} job(s) dispatched, {} ok, {} failed",
        stats.dispatched,
        stats.succeeded,
        stats.failed
    );
    Ok(())
}
