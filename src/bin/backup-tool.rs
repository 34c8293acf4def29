//! Backup administration tool for draft-room snapshots
//!
//! Lists, inspects, verifies and prunes the snapshots the service writes,
//! without starting the service.

use anyhow::Result;
use clap::{Parser, Subcommand};
use draft_room::backup::{BackupController, FileSnapshotStore, RestoreOutcome, SnapshotStore};
use draft_room::config::{AppConfig, BackupBackend, BackupSettings};
use draft_room::engine::Matchmaker;
use draft_room::events::LoggingEventPublisher;
use draft_room::SessionState;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "backup-tool")]
#[command(about = "Inspect and maintain draft-room snapshots")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Snapshot directory
    #[arg(long, default_value = "./backups")]
    dir: PathBuf,

    /// Key prefix inside the directory
    #[arg(long, default_value = "snapshots/")]
    prefix: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored snapshots, oldest first
    List,
    /// Summarize one snapshot
    Inspect {
        version: u64,

        /// Print the full snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load a snapshot into a scratch engine and check its invariants
    Verify {
        /// Snapshot version, newest readable one when omitted
        #[arg(short, long)]
        version: Option<u64>,

        /// Configuration file whose game modes the snapshot is checked against
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Delete all but the newest snapshots
    Prune {
        /// Number of snapshots to keep
        #[arg(short, long)]
        keep: usize,
    },
}

fn controller(cli: &Cli) -> BackupController {
    let settings = BackupSettings {
        backend: BackupBackend::File,
        directory: cli.dir.clone(),
        prefix: cli.prefix.clone(),
        ..BackupSettings::default()
    };
    let store: Arc<dyn SnapshotStore> = Arc::new(FileSnapshotStore::new(&cli.dir));
    BackupController::new(store, &settings)
}

async fn list(controller: &BackupController) -> Result<()> {
    let snapshots = controller.list_snapshots().await?;
    if snapshots.is_empty() {
        println!("📭 No snapshots under {}", controller.prefix());
        return Ok(());
    }

    println!("📦 {} snapshot(s):", snapshots.len());
    for info in snapshots {
        let created = info
            .created_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "unreadable".to_string());
        let size = info
            .size_bytes
            .map(|s| format!("{} bytes", s))
            .unwrap_or_else(|| "-".to_string());
        println!("  v{:<6} {}  {}  {}", info.version, created, size, info.key);
    }
    Ok(())
}

async fn inspect(controller: &BackupController, version: u64, json: bool) -> Result<()> {
    let snapshot = controller.load_version(version).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let state = &snapshot.state;
    println!("📦 Snapshot v{} (format {})", snapshot.version, snapshot.format_version);
    println!("   Created: {}", snapshot.created_at.to_rfc3339());
    println!("   Players: {}", state.players.len());

    for (mode, entries) in &state.queues {
        println!("   Queue {}: {} waiting", mode, entries.len());
    }

    let mut by_state: BTreeMap<String, usize> = BTreeMap::new();
    for session in &state.sessions {
        *by_state.entry(session.state.to_string()).or_default() += 1;
    }
    println!("   Sessions: {}", state.sessions.len());
    for (label, count) in by_state {
        println!("     {}: {}", label, count);
    }

    let live = state
        .sessions
        .iter()
        .filter(|s| !s.state.is_terminal())
        .count();
    let active = state
        .sessions
        .iter()
        .filter(|s| s.state == SessionState::Active)
        .count();
    println!("   Live sessions: {} ({} active)", live, active);

    let modes: Vec<String> = state.ledger.modes().cloned().collect();
    if !modes.is_empty() {
        println!("   Ledger modes: {}", modes.join(", "));
    }
    Ok(())
}

async fn verify(
    controller: &BackupController,
    version: Option<u64>,
    config: Option<PathBuf>,
) -> Result<()> {
    let config = match config {
        Some(path) => AppConfig::from_file(&path)?,
        None => AppConfig::default(),
    };
    let matchmaker = Matchmaker::new(&config, Arc::new(LoggingEventPublisher))?;

    let (version, report) = match version {
        Some(version) => (version, controller.restore_version(&matchmaker, version).await?),
        None => match controller.restore(&matchmaker).await {
            RestoreOutcome::Restored {
                version,
                report,
                skipped,
            } => {
                for v in skipped {
                    println!("⚠️  Skipped unreadable snapshot v{}", v);
                }
                (version, report)
            }
            RestoreOutcome::Empty => {
                anyhow::bail!("no snapshots under {}", controller.prefix())
            }
            RestoreOutcome::Failed { reason } => {
                anyhow::bail!("no readable snapshot: {}", reason)
            }
        },
    };

    println!("🔎 Snapshot v{} loaded", version);
    println!("   Players: {}", report.players);
    println!("   Queued: {}", report.queued);
    println!("   Sessions: {}", report.sessions);
    if report.dropped_entries > 0 || report.dropped_sessions > 0 {
        println!(
            "⚠️  Dropped {} queue entries and {} sessions",
            report.dropped_entries, report.dropped_sessions
        );
    }
    if report.dropped_parties > 0 {
        println!("⚠️  Dropped {} parties", report.dropped_parties);
    }
    if report.repaired_statuses > 0 {
        println!("⚠️  Repaired {} player statuses", report.repaired_statuses);
    }

    matchmaker.check_invariants().await?;
    println!("✅ Invariants hold");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let controller = controller(&cli);

    let result = match &cli.command {
        Commands::List => list(&controller).await,
        Commands::Inspect { version, json } => inspect(&controller, *version, *json).await,
        Commands::Verify { version, config } => {
            verify(&controller, *version, config.clone()).await
        }
        Commands::Prune { keep } => controller.prune(*keep).await.map(|deleted| {
            println!("🧹 Deleted {} snapshot(s), kept up to {}", deleted, keep);
        }),
    };

    if let Err(e) = result {
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
