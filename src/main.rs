//! pos-backup — command-line front end for the catalog backup engine.

use anyhow::Result;
use clap::{Parser, Subcommand};
use pos_backup::{
    logging, BackupEngine, BackupOutcome, EngineOptions, RestoreOutcome,
};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the live catalog files
    #[arg(long, default_value = "html/JS")]
    data_dir: PathBuf,

    /// Directory holding backup artifacts
    #[arg(long, default_value = "backups")]
    backup_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a backup (incremental by default)
    Backup {
        /// Force a full backup
        #[arg(long)]
        full: bool,
    },
    /// List all backups, newest first
    List,
    /// Verify the integrity of one backup
    Verify { id: String },
    /// Restore a backup into the live store
    Restore {
        id: String,
        /// Materialize without touching the live store
        #[arg(long)]
        preview: bool,
    },
    /// Copy a backup's artifacts to an external directory
    Export { id: String, dest: PathBuf },
    /// Import backup artifact pairs from an external directory
    Import { src: PathBuf },
    /// Print catalog statistics
    Stats,
    /// Print the backup system health status
    Health,
    /// Run the automatic backup scheduler until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level)?;

    let engine = BackupEngine::open(EngineOptions::new(args.data_dir, args.backup_dir))?;

    match args.command {
        Command::Backup { full } => {
            if full {
                let record = engine.create_full_backup()?;
                println!("created full backup {}", record.id);
            } else {
                match engine.create_incremental_backup()? {
                    BackupOutcome::Full(record) => {
                        println!("no prior backup, created full backup {}", record.id)
                    }
                    BackupOutcome::Incremental(record) => println!(
                        "created incremental backup {} (base {})",
                        record.id,
                        record.base_backup_id.as_deref().unwrap_or("-")
                    ),
                    BackupOutcome::NoChange => println!("no changes since the last backup"),
                }
            }
        }
        Command::List => {
            for record in engine.list_backups()? {
                println!(
                    "{}  {}  {:<11}  {} bytes",
                    record.id, record.timestamp, record.kind, record.size
                );
            }
        }
        Command::Verify { id } => {
            if engine.verify_integrity(&id)? {
                println!("backup {id} is intact");
            } else {
                println!("backup {id} FAILED its integrity check");
                std::process::exit(1);
            }
        }
        Command::Restore { id, preview } => match engine.restore(&id, preview)? {
            RestoreOutcome::Preview { snapshot, record } => {
                println!("preview of {} ({}):", record.id, record.kind);
                for (file, content) in &snapshot.files {
                    match content {
                        Some(Value::Array(records)) => {
                            println!("  {file}: {} records", records.len())
                        }
                        Some(_) => println!("  {file}: present"),
                        None => println!("  {file}: absent"),
                    }
                }
            }
            RestoreOutcome::Applied {
                message,
                conflicts,
                safety_backup_id,
                ..
            } => {
                println!("{message}");
                if !conflicts.is_empty() {
                    println!("resolved {} conflict(s)", conflicts.len());
                }
                println!("previous state saved as {safety_backup_id}");
            }
        },
        Command::Export { id, dest } => {
            engine.export_backup(&id, &dest)?;
            println!("exported {id} to {}", dest.display());
        }
        Command::Import { src } => {
            let count = engine.import_backups(&src)?;
            println!("imported {count} backup(s)");
        }
        Command::Stats => {
            let stats = engine.stats()?;
            println!("total backups: {}", stats.total_backups);
            println!("total size:    {} bytes", stats.total_size);
            println!("full:          {}", stats.full_backups);
            println!("incremental:   {}", stats.incremental_backups);
            if let Some(last) = &stats.last_backup {
                println!("newest:        {} ({})", last.id, last.timestamp);
            }
            if let Some(oldest) = &stats.oldest_backup {
                println!("oldest:        {} ({})", oldest.id, oldest.timestamp);
            }
        }
        Command::Health => {
            let health = engine.health_status();
            println!("status: {}", health.status);
            println!("{}", health.message);
            for recommendation in &health.recommendations {
                println!("  - {recommendation}");
            }
        }
        Command::Watch => {
            if !engine.config().auto_backup_enabled {
                println!("auto backups are disabled in the configuration");
                return Ok(());
            }
            engine.start_scheduler().await;
            tracing::info!("Scheduler running, press Ctrl+C to stop");
            tokio::signal::ctrl_c().await?;
            engine.stop_scheduler().await;
        }
    }

    Ok(())
}
