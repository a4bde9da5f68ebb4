//! Background scheduler: one cancellable task creating periodic backups.
//!
//! The loop sleeps for the configured interval, runs the configured backup
//! kind on a blocking worker, and on failure logs and retries after a fixed
//! fallback delay instead of dying. Cancellation interrupts either wait
//! immediately.

use crate::engine::BackupEngine;
use crate::writer::BackupOutcome;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Wait before retrying after a failed scheduled backup.
const RETRY_DELAY: Duration = Duration::from_secs(3600);

pub struct Scheduler {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Spawn the periodic loop. Must be called from within a tokio runtime.
    pub fn spawn(engine: Arc<BackupEngine>) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(run(engine, token));
        tracing::info!("Automatic backup scheduler started");
        Self { cancel, handle }
    }

    /// Cancel the loop and wait for it to wind down. In-flight backups run
    /// to completion; only the waits are interruptible.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
        tracing::info!("Automatic backup scheduler stopped");
    }
}

async fn run(engine: Arc<BackupEngine>, cancel: CancellationToken) {
    loop {
        // re-read each cycle; a config update restarts the loop anyway, but
        // a fresh read keeps the wait honest after manual file edits
        let interval = Duration::from_secs(engine.config().interval_hours.saturating_mul(3600));
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        let worker = engine.clone();
        match tokio::task::spawn_blocking(move || worker.scheduled_backup()).await {
            Ok(Ok(outcome)) => match outcome {
                BackupOutcome::Full(record) => {
                    tracing::info!(id = %record.id, "Scheduled full backup created")
                }
                BackupOutcome::Incremental(record) => {
                    tracing::info!(id = %record.id, "Scheduled incremental backup created")
                }
                BackupOutcome::NoChange => {
                    tracing::info!("Scheduled backup skipped, no changes")
                }
            },
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Scheduled backup failed");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(RETRY_DELAY) => {}
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Scheduled backup task panicked");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(RETRY_DELAY) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineOptions;
    use tempfile::TempDir;

    #[tokio::test]
    async fn shutdown_interrupts_the_interval_sleep() {
        let dir = TempDir::new().unwrap();
        let engine = BackupEngine::open(EngineOptions::new(
            dir.path().join("data"),
            dir.path().join("backups"),
        ))
        .unwrap();

        // default interval is 24 h; shutdown must not wait for it
        let scheduler = Scheduler::spawn(engine);
        tokio::time::timeout(Duration::from_secs(1), scheduler.shutdown())
            .await
            .expect("shutdown should be prompt");
    }
}
