//! The engine facade: one instance owning the store handle, configuration
//! and scheduler handle. Callers share it via `Arc`; there is no global
//! state anywhere in the crate.

use crate::config::{BackupConfig, ConfigUpdate};
use crate::error::Result;
use crate::health::{HealthReporter, HealthStatus};
use crate::restore::{self, RestoreEngine, RestoreOutcome};
use crate::scheduler::Scheduler;
use crate::snapshot::collector::SnapshotCollector;
use crate::store::{BackupRecord, BackupStore, BackupType};
use crate::writer::{BackupOutcome, BackupWriter};
use crate::{HISTORY_FILE, IMAGES_DIR, PRODUCTS_FILE};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

/// Name of the configuration sidecar inside the backup directory.
pub const CONFIG_FILE: &str = "backup_config.json";

/// Where the engine reads live data and keeps its artifacts.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub data_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub tracked_files: Vec<String>,
    pub tracked_dirs: Vec<String>,
}

impl EngineOptions {
    pub fn new(data_dir: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            backup_dir: backup_dir.into(),
            tracked_files: vec![PRODUCTS_FILE.into(), HISTORY_FILE.into()],
            tracked_dirs: vec![IMAGES_DIR.into()],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupStats {
    pub total_backups: usize,
    /// On-disk bytes across all payload artifacts.
    pub total_size: u64,
    pub full_backups: usize,
    pub incremental_backups: usize,
    pub last_backup: Option<BackupRecord>,
    pub oldest_backup: Option<BackupRecord>,
}

pub struct BackupEngine {
    store: BackupStore,
    collector: SnapshotCollector,
    config: RwLock<BackupConfig>,
    config_path: PathBuf,
    /// Serializes every store mutation: writer, restore write-back,
    /// retention and import never interleave on the same artifacts.
    mutation: Mutex<()>,
    scheduler: tokio::sync::Mutex<Option<Scheduler>>,
    /// Handle back to the owning `Arc`, needed to hand the scheduler loop
    /// a shared reference.
    self_ref: Weak<BackupEngine>,
}

impl BackupEngine {
    /// Open the engine: create the backup directory and load the sidecar
    /// configuration. The scheduler is not started here; call
    /// [`BackupEngine::start_scheduler`] from a runtime once constructed.
    pub fn open(options: EngineOptions) -> Result<Arc<Self>> {
        let store = BackupStore::open(&options.backup_dir)?;
        let config_path = options.backup_dir.join(CONFIG_FILE);
        let config = BackupConfig::load_or_default(&config_path);
        config.validate()?;
        let collector = SnapshotCollector::new(
            options.data_dir,
            options.tracked_files,
            options.tracked_dirs,
        );

        tracing::info!(backup_dir = %store.dir().display(), "Backup engine initialized");
        Ok(Arc::new_cyclic(|self_ref| Self {
            store,
            collector,
            config: RwLock::new(config),
            config_path,
            mutation: Mutex::new(()),
            scheduler: tokio::sync::Mutex::new(None),
            self_ref: self_ref.clone(),
        }))
    }

    pub fn config(&self) -> BackupConfig {
        self.config.read().clone()
    }

    pub fn create_full_backup(&self) -> Result<BackupRecord> {
        let config = self.config();
        let _guard = self.mutation.lock();
        BackupWriter::new(&self.store, &self.collector, &config).create_full()
    }

    pub fn create_incremental_backup(&self) -> Result<BackupOutcome> {
        let config = self.config();
        let _guard = self.mutation.lock();
        BackupWriter::new(&self.store, &self.collector, &config).create_incremental()
    }

    pub(crate) fn scheduled_backup(&self) -> Result<BackupOutcome> {
        if self.config().incremental_enabled {
            self.create_incremental_backup()
        } else {
            self.create_full_backup().map(BackupOutcome::Full)
        }
    }

    pub fn list_backups(&self) -> Result<Vec<BackupRecord>> {
        self.store.list()
    }

    pub fn verify_integrity(&self, id: &str) -> Result<bool> {
        restore::verify_integrity(&self.store, id)
    }

    pub fn restore(&self, id: &str, preview: bool) -> Result<RestoreOutcome> {
        let config = self.config();
        let engine = RestoreEngine::new(&self.store, &self.collector, &config);
        if preview {
            // preview never mutates the store
            return engine.restore(id, true);
        }
        let _guard = self.mutation.lock();
        engine.restore(id, false)
    }

    pub fn export_backup(&self, id: &str, dest: &Path) -> Result<()> {
        self.store.export(id, dest)
    }

    pub fn import_backups(&self, src: &Path) -> Result<usize> {
        let _guard = self.mutation.lock();
        self.store.import_from(src)
    }

    pub fn stats(&self) -> Result<BackupStats> {
        let records = self.store.list()?;
        let total_size = records
            .iter()
            .filter_map(|record| self.store.payload_size(&record.id))
            .sum();
        Ok(BackupStats {
            total_backups: records.len(),
            total_size,
            full_backups: records
                .iter()
                .filter(|r| r.kind == BackupType::Full)
                .count(),
            incremental_backups: records
                .iter()
                .filter(|r| r.kind == BackupType::Incremental)
                .count(),
            last_backup: records.first().cloned(),
            oldest_backup: records.last().cloned(),
        })
    }

    pub fn health_status(&self) -> HealthStatus {
        let config = self.config();
        HealthReporter::new(&self.store, &config).status()
    }

    /// Apply a partial configuration update, persist it, and restart the
    /// scheduler when the update touches its settings.
    pub async fn update_config(&self, update: ConfigUpdate) -> Result<BackupConfig> {
        let updated = {
            let mut config = self.config.write();
            let mut next = config.clone();
            update.apply(&mut next);
            next.validate()?;
            next.save(&self.config_path)?;
            *config = next.clone();
            next
        };
        tracing::info!("Backup configuration updated");

        if update.affects_scheduler() {
            self.restart_scheduler().await;
        }
        Ok(updated)
    }

    /// Start the background loop if auto backups are enabled and it is not
    /// already running.
    pub async fn start_scheduler(&self) {
        let mut slot = self.scheduler.lock().await;
        if slot.is_some() || !self.config().auto_backup_enabled {
            return;
        }
        if let Some(engine) = self.self_ref.upgrade() {
            *slot = Some(Scheduler::spawn(engine));
        }
    }

    pub async fn stop_scheduler(&self) {
        if let Some(scheduler) = self.scheduler.lock().await.take() {
            scheduler.shutdown().await;
        }
    }

    pub async fn restart_scheduler(&self) {
        self.stop_scheduler().await;
        self.start_scheduler().await;
    }
}
