//! Backup creation: full snapshots and incremental diffs.

use crate::config::BackupConfig;
use crate::error::Result;
use crate::restore;
use crate::retention::RetentionManager;
use crate::snapshot::collector::SnapshotCollector;
use crate::snapshot::{self, checksum};
use crate::store::{BackupRecord, BackupStore, BackupType, ID_PREFIX};
use chrono::{Local, Utc};
use serde::Serialize;

/// What an incremental request actually produced. The "first incremental is
/// really a full backup" case is an explicit variant, not an overloaded
/// return value.
#[derive(Debug, Clone)]
pub enum BackupOutcome {
    Full(BackupRecord),
    Incremental(BackupRecord),
    /// Nothing differed from the base; no artifact was written.
    NoChange,
}

impl BackupOutcome {
    pub fn record(&self) -> Option<&BackupRecord> {
        match self {
            BackupOutcome::Full(record) | BackupOutcome::Incremental(record) => Some(record),
            BackupOutcome::NoChange => None,
        }
    }
}

pub struct BackupWriter<'a> {
    store: &'a BackupStore,
    collector: &'a SnapshotCollector,
    config: &'a BackupConfig,
}

impl<'a> BackupWriter<'a> {
    pub fn new(
        store: &'a BackupStore,
        collector: &'a SnapshotCollector,
        config: &'a BackupConfig,
    ) -> Self {
        Self {
            store,
            collector,
            config,
        }
    }

    /// Snapshot the live store and persist it as a full backup.
    pub fn create_full(&self) -> Result<BackupRecord> {
        let snapshot = self.collector.collect();
        let record = self.persist(&snapshot, BackupType::Full, None)?;
        tracing::info!(id = %record.id, "Full backup created");
        RetentionManager::new(self.store, self.config.max_backups).enforce()?;
        Ok(record)
    }

    /// Persist only what changed since the latest backup. With no prior
    /// backup this delegates to a full one; with no changes nothing is
    /// written at all, keeping the catalog free of no-op entries.
    pub fn create_incremental(&self) -> Result<BackupOutcome> {
        let Some(latest) = self.store.latest()? else {
            return self.create_full().map(BackupOutcome::Full);
        };

        let base = restore::materialize(self.store, &latest.id)?;
        let current = self.collector.collect();
        let diff = snapshot::diff_snapshots(&base, &current);
        if diff.is_empty() {
            tracing::info!("No changes detected, skipping incremental backup");
            return Ok(BackupOutcome::NoChange);
        }

        let record = self.persist(&diff, BackupType::Incremental, Some(latest.id.clone()))?;
        tracing::info!(id = %record.id, base = %latest.id, "Incremental backup created");
        RetentionManager::new(self.store, self.config.max_backups).enforce()?;
        Ok(BackupOutcome::Incremental(record))
    }

    /// Serialize, checksum, then write payload before record. A failed
    /// record write deletes the orphaned payload so no half-pair survives.
    fn persist<T: Serialize>(
        &self,
        payload: &T,
        kind: BackupType,
        base_backup_id: Option<String>,
    ) -> Result<BackupRecord> {
        let id = self.next_id();
        let serialized = serde_json::to_vec_pretty(payload)?;
        let record = BackupRecord {
            id: id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            kind,
            base_backup_id,
            checksum: checksum::checksum(payload)?,
            compressed: self.config.compression_enabled,
            size: serialized.len() as u64,
        };

        self.store.write_payload(&id, &serialized, record.compressed)?;
        if let Err(e) = self.store.write_record(&record) {
            let _ = self.store.delete(&id);
            return Err(e);
        }
        Ok(record)
    }

    /// Time-derived id, suffixed on collision so ids stay unique within the
    /// store even when backups land in the same second.
    fn next_id(&self) -> String {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let base = format!("{ID_PREFIX}{stamp}");
        if !self.store.contains(&base) {
            return base;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{base}-{n}");
            if !self.store.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: BackupStore,
        collector: SnapshotCollector,
        config: BackupConfig,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        std::fs::write(
            data_dir.join("productos.json"),
            serde_json::to_vec(&json!([{"id": "p1", "stock": 3, "precio": "100"}])).unwrap(),
        )
        .unwrap();
        std::fs::write(data_dir.join("historial.json"), b"[]").unwrap();

        let store = BackupStore::open(dir.path().join("backups")).unwrap();
        let collector = SnapshotCollector::new(
            data_dir,
            vec!["productos.json".into(), "historial.json".into()],
            vec![],
        );
        Fixture {
            _dir: dir,
            store,
            collector,
            config: BackupConfig::default(),
        }
    }

    fn set_stock(fixture: &Fixture, stock: u64) {
        std::fs::write(
            fixture.collector.data_dir().join("productos.json"),
            serde_json::to_vec(&json!([{"id": "p1", "stock": stock, "precio": "100"}])).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn first_incremental_is_a_full_backup() {
        let f = fixture();
        let writer = BackupWriter::new(&f.store, &f.collector, &f.config);

        let outcome = writer.create_incremental().unwrap();
        match outcome {
            BackupOutcome::Full(record) => {
                assert_eq!(record.kind, BackupType::Full);
                assert!(record.base_backup_id.is_none());
            }
            other => panic!("expected full outcome, got {other:?}"),
        }
    }

    #[test]
    fn unchanged_data_produces_no_backup() {
        let f = fixture();
        let writer = BackupWriter::new(&f.store, &f.collector, &f.config);
        writer.create_full().unwrap();

        let outcome = writer.create_incremental().unwrap();
        assert!(matches!(outcome, BackupOutcome::NoChange));
        assert_eq!(f.store.list().unwrap().len(), 1);
    }

    #[test]
    fn changed_data_produces_incremental_with_base() {
        let f = fixture();
        let writer = BackupWriter::new(&f.store, &f.collector, &f.config);
        let full = writer.create_full().unwrap();

        set_stock(&f, 1);
        let outcome = writer.create_incremental().unwrap();
        match outcome {
            BackupOutcome::Incremental(record) => {
                assert_eq!(record.base_backup_id.as_deref(), Some(full.id.as_str()));
            }
            other => panic!("expected incremental outcome, got {other:?}"),
        }
        assert_eq!(f.store.list().unwrap().len(), 2);
    }

    #[test]
    fn record_checksum_matches_payload() {
        let f = fixture();
        let writer = BackupWriter::new(&f.store, &f.collector, &f.config);
        let record = writer.create_full().unwrap();

        let (payload, _) = f.store.read(&record.id).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(checksum::checksum(&value).unwrap(), record.checksum);
    }

    #[test]
    fn ids_stay_unique_within_one_second() {
        let f = fixture();
        let writer = BackupWriter::new(&f.store, &f.collector, &f.config);

        let first = writer.create_full().unwrap();
        let second = writer.create_full().unwrap();
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn retention_runs_after_each_backup() {
        let f = fixture();
        let config = BackupConfig {
            max_backups: 2,
            ..BackupConfig::default()
        };
        let writer = BackupWriter::new(&f.store, &f.collector, &config);

        for _ in 0..4 {
            writer.create_full().unwrap();
        }
        assert_eq!(f.store.list().unwrap().len(), 2);
    }
}
