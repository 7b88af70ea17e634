use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use docsync_core::SyncConfig;
use docsync_core::app::{RunMode, scheduler};
use docsync_core::domain::{Category, JobId, LockRecord};
use docsync_core::ports::OutputStore;

mod wiring;

use wiring::Wiring;

#[derive(Parser, Debug)]
#[command(name = "docsync")]
#[command(version)]
#[command(about = "Harvest documents and push them to the target system, coordinated across machines")]
#[command(propagate_version = true)]
struct Cli {
    /// Env file to load before reading DOCSYNC_* variables (default: ./.env if present)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Override the machine identity written into lock records
    #[arg(long, global = true)]
    machine_id: Option<String>,

    /// Override the shared lock ledger file
    #[arg(long, global = true)]
    ledger_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the harvest scheduler until Ctrl-C
    Run {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,

        /// Bypass local history and lock checks (operator override)
        #[arg(long)]
        force: bool,
    },

    /// Upload pending outputs of one category (or all)
    Upload {
        /// Category name; omit to upload every configured category
        category: Option<String>,
    },

    /// Inspect or clean the lock ledger
    Locks {
        /// Operate on the upload ledger instead of the harvest ledger
        #[arg(long, global = true)]
        upload: bool,

        #[command(subcommand)]
        command: LockCommands,
    },

    /// Print local status as JSON
    Status,
}

#[derive(Subcommand, Debug)]
enum LockCommands {
    /// Newest records first
    List {
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Delete one record so the job is harvested again
    Delete { job_id: String },

    /// Delete every record locked on a date (YYYY-MM-DD, UTC)
    ClearDate { date: NaiveDate },

    /// Delete completed/failed records older than N days
    Sweep {
        #[arg(long, default_value = "7")]
        days: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let mut config =
        SyncConfig::from_env(cli.env_file.as_deref()).context("failed to load configuration")?;
    if let Some(machine_id) = cli.machine_id {
        config.machine_id = Some(machine_id);
    }
    if let Some(ledger_file) = cli.ledger_file {
        config.ledger_file = ledger_file;
    }
    let wiring = Wiring::new(config);
    wiring
        .prepare_local_dirs()
        .await
        .context("failed to create local data directories")?;
    tracing::info!(machine_id = %wiring.machine, "docsync starting");

    match cli.command {
        Commands::Run { once, force } => run(&wiring, once, force).await,
        Commands::Upload { category } => upload(&wiring, category).await,
        Commands::Locks { upload, command } => locks(&wiring, upload, command).await,
        Commands::Status => status(&wiring).await,
    }
}

async fn run(wiring: &Wiring, once: bool, force: bool) -> Result<()> {
    let mode = if force { RunMode::Force } else { RunMode::Normal };
    let cycle = Arc::new(wiring.harvest_cycle());
    let handle = scheduler::spawn(
        cycle,
        wiring.config.backoff(),
        wiring.board.clone(),
        Arc::clone(&wiring.clock),
    );

    if once {
        let result = handle.trigger(mode).await;
        handle.shutdown().await;
        let report = result.context("harvest cycle failed")?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if force {
        // 強制モードは最初の 1 回だけ、以降は通常サイクル
        if let Err(err) = handle.trigger(RunMode::Force).await {
            tracing::error!(error = %err, "forced cycle failed");
        }
    }
    handle.activate();
    tracing::info!(
        interval = ?wiring.config.download_interval,
        "scheduler active, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("shutting down, waiting for the current cycle to finish");
    handle.shutdown().await;
    Ok(())
}

async fn upload(wiring: &Wiring, category: Option<String>) -> Result<()> {
    let coordinator = wiring.upload_coordinator();
    let categories = match category {
        Some(name) => vec![Category::new(name)],
        None => wiring.config.category_names(),
    };

    let mut failed = 0;
    for category in &categories {
        match coordinator.run(category).await {
            Ok(summary) => println!(
                "{category}: uploaded {} jobs ({} rows, {} held back)",
                summary.uploaded, summary.rows, summary.skipped_remote
            ),
            Err(err) => {
                eprintln!("{category}: {err}");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} categories failed to upload", categories.len());
    }
    Ok(())
}

#[derive(Serialize)]
struct LockRow<'a> {
    job_id: &'a str,
    status: &'a str,
    locked_by: &'a str,
    locked_at: &'a str,
    notes: &'a str,
}

impl<'a> From<&'a LockRecord> for LockRow<'a> {
    fn from(r: &'a LockRecord) -> Self {
        Self {
            job_id: r.job_id.as_str(),
            status: r.status.as_str(),
            locked_by: &r.locked_by,
            locked_at: &r.locked_at,
            notes: &r.notes,
        }
    }
}

async fn locks(wiring: &Wiring, upload: bool, command: LockCommands) -> Result<()> {
    let retention = wiring.retention(upload);
    match command {
        LockCommands::List { limit } => {
            let records = retention.recent(limit).await?;
            if records.is_empty() {
                println!("no lock records");
            }
            for record in &records {
                println!("{}", serde_json::to_string(&LockRow::from(record))?);
            }
        }
        LockCommands::Delete { job_id } => {
            if retention.delete(&JobId::new(&job_id)).await? {
                println!("deleted {job_id}");
            } else {
                println!("no record for {job_id}");
            }
        }
        LockCommands::ClearDate { date } => {
            let removed = retention.clear_date(date).await?;
            println!("deleted {removed} records locked on {date}");
        }
        LockCommands::Sweep { days } => {
            let removed = retention
                .sweep_older_than(Duration::from_secs(days * 24 * 60 * 60))
                .await?;
            println!("deleted {removed} settled records older than {days} days");
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct CategoryStatus {
    category: String,
    harvested: usize,
    uploaded: usize,
    stored_outputs: usize,
}

#[derive(Serialize)]
struct LocalStatus {
    machine_id: String,
    distributed_lock: bool,
    ledger_reachable: bool,
    categories: Vec<CategoryStatus>,
}

async fn status(wiring: &Wiring) -> Result<()> {
    wiring.harvest_history.lock().await.load().await?;
    wiring.upload_history.lock().await.load().await?;

    let mut categories = Vec::new();
    for category in wiring.config.category_names() {
        let stored = wiring.outputs.list(&category).await?.len();
        categories.push(CategoryStatus {
            category: category.to_string(),
            harvested: wiring.harvest_history.lock().await.count(&category),
            uploaded: wiring.upload_history.lock().await.count(&category),
            stored_outputs: stored,
        });
    }

    let report = LocalStatus {
        machine_id: wiring.machine.to_string(),
        distributed_lock: wiring.config.enable_distributed_lock,
        ledger_reachable: wiring.ledger.ping().await.is_ok(),
        categories,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
