//! Restore: verify a stored backup, materialize incremental chains, detect
//! and resolve conflicts against the live store, and write the result back
//! atomically.

pub mod merge;

use crate::config::BackupConfig;
use crate::error::{BackupError, Result};
use crate::snapshot::collector::SnapshotCollector;
use crate::snapshot::{self, checksum, Snapshot, SnapshotDiff};
use crate::store::{BackupRecord, BackupStore, BackupType};
use crate::writer::BackupWriter;
use crate::{HISTORY_FILE, PRODUCTS_FILE};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// A divergence between the live store and the backup for one tracked file.
/// Produced during restore only; never persisted.
#[derive(Debug, Clone)]
pub struct Conflict {
    pub file: String,
    pub current: Value,
    pub restore: Value,
}

#[derive(Debug)]
pub enum RestoreOutcome {
    /// Materialized snapshot returned without touching the live store.
    Preview {
        snapshot: Snapshot,
        record: BackupRecord,
    },
    Applied {
        record: BackupRecord,
        conflicts: Vec<Conflict>,
        /// Full backup of the live state taken just before write-back, so a
        /// restore can itself be undone.
        safety_backup_id: String,
        restored_files: Vec<String>,
        message: String,
    },
}

/// Reconstruct the full snapshot a backup represents, following
/// `base_backup_id` links back to a full ancestor and replaying each diff
/// forward.
pub fn materialize(store: &BackupStore, id: &str) -> Result<Snapshot> {
    let (payload, record) = store.read(id)?;
    materialize_from(store, payload, record)
}

fn materialize_from(store: &BackupStore, payload: Vec<u8>, record: BackupRecord) -> Result<Snapshot> {
    let target_id = record.id.clone();
    match record.kind {
        BackupType::Full => parse_snapshot(&payload, &target_id),
        BackupType::Incremental => {
            let mut diffs = vec![parse_diff(&payload, &target_id)?];
            let mut seen: HashSet<String> = HashSet::from([target_id.clone()]);
            let mut base_id = require_base(&record)?;
            loop {
                if !seen.insert(base_id.clone()) {
                    return Err(BackupError::CorruptBackup {
                        id: target_id,
                        reason: "incremental chain is cyclic".into(),
                    });
                }
                let (payload, base_record) = match store.read(&base_id) {
                    Ok(pair) => pair,
                    Err(BackupError::NotFound(_)) => {
                        return Err(BackupError::MissingBase {
                            id: target_id,
                            base: base_id,
                        });
                    }
                    Err(e) => return Err(e),
                };
                match base_record.kind {
                    BackupType::Full => {
                        let mut materialized = parse_snapshot(&payload, &base_record.id)?;
                        for diff in diffs.drain(..).rev() {
                            snapshot::apply_diff(&mut materialized, diff);
                        }
                        return Ok(materialized);
                    }
                    BackupType::Incremental => {
                        diffs.push(parse_diff(&payload, &base_record.id)?);
                        base_id = require_base(&base_record)?;
                    }
                }
            }
        }
    }
}

/// Integrity check for one backup: recompute the payload checksum and
/// compare with the record. Corrupt artifacts count as a failed check
/// rather than an error; an unknown id is still an error.
pub fn verify_integrity(store: &BackupStore, id: &str) -> Result<bool> {
    let (payload, record) = match store.read(id) {
        Ok(pair) => pair,
        Err(BackupError::CorruptBackup { .. }) => return Ok(false),
        Err(e) => return Err(e),
    };
    match serde_json::from_slice::<Value>(&payload) {
        Ok(value) => Ok(checksum::checksum(&value)? == record.checksum),
        Err(_) => Ok(false),
    }
}

pub struct RestoreEngine<'a> {
    store: &'a BackupStore,
    collector: &'a SnapshotCollector,
    config: &'a BackupConfig,
}

impl<'a> RestoreEngine<'a> {
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

    pub fn restore(&self, id: &str, preview: bool) -> Result<RestoreOutcome> {
        let (payload, record) = self.store.read(id)?;
        verify_payload(&payload, &record)?;
        let snapshot = materialize_from(self.store, payload, record.clone())?;

        if preview {
            return Ok(RestoreOutcome::Preview { snapshot, record });
        }

        let conflicts = self.detect_conflicts(&snapshot);
        if !conflicts.is_empty() {
            tracing::info!(count = conflicts.len(), "Detected restore conflicts");
        }
        let resolved = self.resolve(&snapshot, &conflicts);

        // The live state right now, recoverable if this restore turns out
        // to be a mistake.
        let safety =
            BackupWriter::new(self.store, self.collector, self.config).create_full()?;
        tracing::info!(id = %safety.id, "Current data backed up before restore");

        let restored_files = self.write_back(resolved)?;
        let message = format!(
            "restored {} file(s) from backup {}",
            restored_files.len(),
            record.id
        );
        tracing::info!(id = %record.id, files = restored_files.len(), "Restore completed");

        Ok(RestoreOutcome::Applied {
            record,
            conflicts,
            safety_backup_id: safety.id,
            restored_files,
            message,
        })
    }

    /// A conflict exists for each tracked filename present on both sides
    /// whose contents differ under that file's equality rule.
    fn detect_conflicts(&self, snapshot: &Snapshot) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        for (file, restore_content) in &snapshot.files {
            let Some(restore_content) = restore_content else {
                continue;
            };
            let path = self.collector.data_dir().join(file);
            if !path.exists() {
                continue;
            }
            let current = match read_live_json(&path) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(file, error = %e, "Skipping conflict check for unreadable live file");
                    continue;
                }
            };
            if contents_conflict(file, &current, restore_content) {
                conflicts.push(Conflict {
                    file: file.clone(),
                    current,
                    restore: restore_content.clone(),
                });
            }
        }
        conflicts
    }

    fn resolve(
        &self,
        snapshot: &Snapshot,
        conflicts: &[Conflict],
    ) -> BTreeMap<String, Option<Value>> {
        let mut resolved = snapshot.files.clone();
        for conflict in conflicts {
            let content = match conflict.file.as_str() {
                PRODUCTS_FILE => merge::merge_products(&conflict.current, &conflict.restore),
                HISTORY_FILE => merge::merge_history(&conflict.current, &conflict.restore),
                other => {
                    tracing::warn!(file = other, "Conflict resolved in favor of the backup");
                    conflict.restore.clone()
                }
            };
            resolved.insert(conflict.file.clone(), Some(content));
        }
        resolved
    }

    /// Write each resolved file atomically: temp sibling, then rename over
    /// the destination. Individual files are atomic but the set is not
    /// transactional, so a failure reports whether earlier files had
    /// already been replaced.
    fn write_back(&self, resolved: BTreeMap<String, Option<Value>>) -> Result<Vec<String>> {
        let mut restored = Vec::new();
        for (file, content) in resolved {
            let Some(content) = content else {
                continue;
            };
            let path = self.collector.data_dir().join(&file);
            if let Err(source) = write_atomic(&path, &content) {
                return Err(BackupError::WriteFailure {
                    file,
                    partially_applied: !restored.is_empty(),
                    source,
                });
            }
            tracing::info!(file = %file, "Restored file");
            restored.push(file);
        }
        Ok(restored)
    }
}

fn verify_payload(payload: &[u8], record: &BackupRecord) -> Result<()> {
    let value: Value = serde_json::from_slice(payload).map_err(|e| BackupError::CorruptBackup {
        id: record.id.clone(),
        reason: format!("unreadable payload: {e}"),
    })?;
    if checksum::checksum(&value)? != record.checksum {
        return Err(BackupError::IntegrityViolation(record.id.clone()));
    }
    Ok(())
}

fn contents_conflict(file: &str, current: &Value, restore: &Value) -> bool {
    match file {
        PRODUCTS_FILE => merge::products_conflict(current, restore),
        HISTORY_FILE => merge::history_conflict(current, restore),
        _ => {
            checksum::canonical_bytes(current).ok() != checksum::canonical_bytes(restore).ok()
        }
    }
}

fn read_live_json(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_atomic(path: &Path, content: &Value) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    let raw = serde_json::to_vec_pretty(content)?;
    if let Err(e) = std::fs::write(&tmp, raw).and_then(|_| std::fs::rename(&tmp, path)) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

fn parse_snapshot(payload: &[u8], id: &str) -> Result<Snapshot> {
    serde_json::from_slice(payload).map_err(|e| BackupError::CorruptBackup {
        id: id.into(),
        reason: format!("unreadable snapshot payload: {e}"),
    })
}

fn parse_diff(payload: &[u8], id: &str) -> Result<SnapshotDiff> {
    serde_json::from_slice(payload).map_err(|e| BackupError::CorruptBackup {
        id: id.into(),
        reason: format!("unreadable diff payload: {e}"),
    })
}

fn require_base(record: &BackupRecord) -> Result<String> {
    record
        .base_backup_id
        .clone()
        .ok_or_else(|| BackupError::CorruptBackup {
            id: record.id.clone(),
            reason: "incremental record has no base backup id".into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::BackupOutcome;
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: BackupStore,
        collector: SnapshotCollector,
        config: BackupConfig,
    }

    impl Fixture {
        fn writer(&self) -> BackupWriter<'_> {
            BackupWriter::new(&self.store, &self.collector, &self.config)
        }

        fn restore_engine(&self) -> RestoreEngine<'_> {
            RestoreEngine::new(&self.store, &self.collector, &self.config)
        }

        fn write_live(&self, file: &str, content: &Value) {
            std::fs::write(
                self.collector.data_dir().join(file),
                serde_json::to_vec_pretty(content).unwrap(),
            )
            .unwrap();
        }

        fn read_live(&self, file: &str) -> Value {
            read_live_json(&self.collector.data_dir().join(file)).unwrap()
        }
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        let store = BackupStore::open(dir.path().join("backups")).unwrap();
        let collector = SnapshotCollector::new(
            data_dir,
            vec![PRODUCTS_FILE.into(), HISTORY_FILE.into()],
            vec![],
        );
        let f = Fixture {
            _dir: dir,
            store,
            collector,
            config: BackupConfig::default(),
        };
        f.write_live(PRODUCTS_FILE, &json!([{"id": "p1", "stock": 3, "precio": "100"}]));
        f.write_live(HISTORY_FILE, &json!([]));
        f
    }

    fn incremental_id(outcome: BackupOutcome) -> String {
        match outcome {
            BackupOutcome::Incremental(record) => record.id,
            other => panic!("expected incremental backup, got {other:?}"),
        }
    }

    #[test]
    fn verify_detects_tampering() {
        let f = fixture();
        let record = f.writer().create_full().unwrap();
        assert!(verify_integrity(&f.store, &record.id).unwrap());

        // flip a byte in the stored payload
        let (mut payload, _) = f.store.read(&record.id).unwrap();
        let pos = payload
            .iter()
            .position(|b| *b == b'3')
            .expect("stock digit in payload");
        payload[pos] = b'4';
        f.store
            .write_payload(&record.id, &payload, record.compressed)
            .unwrap();

        assert!(!verify_integrity(&f.store, &record.id).unwrap());
        assert!(matches!(
            f.restore_engine().restore(&record.id, true),
            Err(BackupError::IntegrityViolation(_))
        ));
    }

    #[test]
    fn chain_materialization_replays_diffs_in_order() {
        let f = fixture();
        let full = f.writer().create_full().unwrap();

        f.write_live(PRODUCTS_FILE, &json!([{"id": "p1", "stock": 2, "precio": "100"}]));
        let i1 = incremental_id(f.writer().create_incremental().unwrap());

        f.write_live(HISTORY_FILE, &json!([{"fecha": "2024-01-02", "accion": "venta", "producto": "p1"}]));
        let i2 = incremental_id(f.writer().create_incremental().unwrap());

        let materialized = materialize(&f.store, &i2).unwrap();
        assert_eq!(
            materialized.files[PRODUCTS_FILE],
            Some(json!([{"id": "p1", "stock": 2, "precio": "100"}]))
        );
        assert_eq!(
            materialized.files[HISTORY_FILE],
            Some(json!([{"fecha": "2024-01-02", "accion": "venta", "producto": "p1"}]))
        );

        // chain links resolve and timestamps strictly increase toward the tip
        let r2 = f.store.read_record(&i2).unwrap();
        let r1 = f.store.read_record(&i1).unwrap();
        assert_eq!(r2.base_backup_id.as_deref(), Some(i1.as_str()));
        assert_eq!(r1.base_backup_id.as_deref(), Some(full.id.as_str()));
        assert!(r1.timestamp > full.timestamp);
        assert!(r2.timestamp > r1.timestamp);
    }

    #[test]
    fn preview_does_not_touch_the_live_store() {
        let f = fixture();
        let record = f.writer().create_full().unwrap();

        f.write_live(PRODUCTS_FILE, &json!([{"id": "p1", "stock": 9, "precio": "100"}]));
        let before = f.read_live(PRODUCTS_FILE);

        let outcome = f.restore_engine().restore(&record.id, true).unwrap();
        match outcome {
            RestoreOutcome::Preview { snapshot, .. } => {
                assert_eq!(
                    snapshot.files[PRODUCTS_FILE],
                    Some(json!([{"id": "p1", "stock": 3, "precio": "100"}]))
                );
            }
            other => panic!("expected preview, got {other:?}"),
        }
        assert_eq!(f.read_live(PRODUCTS_FILE), before);
        assert_eq!(f.store.list().unwrap().len(), 1);
    }

    #[test]
    fn missing_base_surfaces_as_error() {
        let f = fixture();
        let full = f.writer().create_full().unwrap();
        f.write_live(PRODUCTS_FILE, &json!([{"id": "p1", "stock": 2, "precio": "100"}]));
        let i1 = incremental_id(f.writer().create_incremental().unwrap());

        f.store.delete(&full.id).unwrap();
        assert!(matches!(
            materialize(&f.store, &i1),
            Err(BackupError::MissingBase { .. })
        ));
    }

    #[test]
    fn restore_takes_a_safety_backup_and_writes_files() {
        let f = fixture();
        let record = f.writer().create_full().unwrap();

        // a sale after the backup: stock drops, history grows
        f.write_live(PRODUCTS_FILE, &json!([{"id": "p1", "stock": 1, "precio": "100"}]));

        let outcome = f.restore_engine().restore(&record.id, false).unwrap();
        match outcome {
            RestoreOutcome::Applied {
                conflicts,
                safety_backup_id,
                restored_files,
                ..
            } => {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].file, PRODUCTS_FILE);
                assert!(f.store.read(&safety_backup_id).is_ok());
                assert_eq!(restored_files.len(), 2);
            }
            other => panic!("expected applied outcome, got {other:?}"),
        }

        // current stock wins the merge; price was equal so no note
        let products = f.read_live(PRODUCTS_FILE);
        let p1 = products[0].as_object().unwrap();
        assert_eq!(p1["stock"], json!(1));
        assert_eq!(p1["precio"], json!("100"));
        assert!(p1.get("_conflict_note").is_none());
    }

    #[test]
    fn conflict_free_restore_reproduces_snapshot_content() {
        let f = fixture();
        let record = f.writer().create_full().unwrap();

        // wipe the live products file entirely; no common ids, no conflict
        std::fs::remove_file(f.collector.data_dir().join(PRODUCTS_FILE)).unwrap();

        let outcome = f.restore_engine().restore(&record.id, false).unwrap();
        match outcome {
            RestoreOutcome::Applied { conflicts, .. } => assert!(conflicts.is_empty()),
            other => panic!("expected applied outcome, got {other:?}"),
        }
        assert_eq!(
            f.read_live(PRODUCTS_FILE),
            json!([{"id": "p1", "stock": 3, "precio": "100"}])
        );
    }

    #[test]
    fn write_back_failure_reports_partial_application() {
        let f = fixture();
        let record = f.writer().create_full().unwrap();

        // historial.json sorts before productos.json, so it is written
        // first; a directory squatting on productos.json fails the rename
        std::fs::remove_file(f.collector.data_dir().join(PRODUCTS_FILE)).unwrap();
        std::fs::create_dir(f.collector.data_dir().join(PRODUCTS_FILE)).unwrap();

        match f.restore_engine().restore(&record.id, false) {
            Err(BackupError::WriteFailure {
                file,
                partially_applied,
                ..
            }) => {
                assert_eq!(file, PRODUCTS_FILE);
                assert!(partially_applied);
            }
            other => panic!("expected write failure, got {other:?}"),
        }
        // the temp sibling was cleaned up
        assert!(!f.collector.data_dir().join("productos.tmp").exists());
    }
}
