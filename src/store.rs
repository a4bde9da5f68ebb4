//! Artifact persistence: one payload plus one metadata record per backup id.
//!
//! The two artifacts live side by side in the backup directory as
//! `<id>.json` and `<id>_info.json`. A pair with one half missing is a
//! corrupt backup, never silently ignored.

use crate::error::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Backup ids all share this prefix; import relies on it to recognize
/// artifacts in foreign directories.
pub const ID_PREFIX: &str = "backup_";

const PAYLOAD_SUFFIX: &str = ".json";
const RECORD_SUFFIX: &str = "_info.json";

const COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Full,
    Incremental,
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupType::Full => f.write_str("full"),
            BackupType::Incremental => f.write_str("incremental"),
        }
    }
}

/// One row of backup catalog metadata. Written together with its payload;
/// read-only afterwards until retention or explicit deletion removes both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: BackupType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_backup_id: Option<String>,
    /// Canonical-JSON checksum of the payload (snapshot for full backups,
    /// diff for incrementals).
    pub checksum: String,
    /// Authoritative for how the payload artifact is read back.
    pub compressed: bool,
    /// Byte length of the serialized payload before compression.
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn payload_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}{PAYLOAD_SUFFIX}"))
    }

    pub fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}{RECORD_SUFFIX}"))
    }

    /// True when either artifact for the id exists.
    pub fn contains(&self, id: &str) -> bool {
        self.payload_path(id).exists() || self.record_path(id).exists()
    }

    /// Write the payload artifact, compressing when asked. The record's
    /// `compressed` flag is what readers trust later.
    pub fn write_payload(&self, id: &str, payload: &[u8], compressed: bool) -> Result<()> {
        let bytes = if compressed {
            zstd::encode_all(payload, COMPRESSION_LEVEL)?
        } else {
            payload.to_vec()
        };
        std::fs::write(self.payload_path(id), bytes)?;
        Ok(())
    }

    pub fn write_record(&self, record: &BackupRecord) -> Result<()> {
        let raw = serde_json::to_vec_pretty(record)?;
        std::fs::write(self.record_path(&record.id), raw)?;
        Ok(())
    }

    pub fn read_record(&self, id: &str) -> Result<BackupRecord> {
        let record_path = self.record_path(id);
        if !record_path.exists() {
            return Err(if self.payload_path(id).exists() {
                BackupError::CorruptBackup {
                    id: id.into(),
                    reason: "metadata artifact is missing".into(),
                }
            } else {
                BackupError::NotFound(id.into())
            });
        }
        let raw = std::fs::read(record_path)?;
        serde_json::from_slice(&raw).map_err(|e| BackupError::CorruptBackup {
            id: id.into(),
            reason: format!("unreadable metadata: {e}"),
        })
    }

    /// Read payload and record for one id, decompressing per the record's
    /// flag. Content is never sniffed.
    pub fn read(&self, id: &str) -> Result<(Vec<u8>, BackupRecord)> {
        let record = self.read_record(id)?;
        let payload_path = self.payload_path(id);
        if !payload_path.exists() {
            return Err(BackupError::CorruptBackup {
                id: id.into(),
                reason: "payload artifact is missing".into(),
            });
        }
        let raw = std::fs::read(payload_path)?;
        let payload = if record.compressed {
            zstd::decode_all(raw.as_slice()).map_err(|e| BackupError::CorruptBackup {
                id: id.into(),
                reason: format!("payload failed to decompress: {e}"),
            })?
        } else {
            raw
        };
        Ok((payload, record))
    }

    /// Remove both artifacts for an id.
    pub fn delete(&self, id: &str) -> Result<()> {
        for path in [self.payload_path(id), self.record_path(id)] {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    /// All records, newest first by timestamp. Unreadable record artifacts
    /// are skipped with a warning so one bad file never hides the rest of
    /// the catalog.
    pub fn list(&self) -> Result<Vec<BackupRecord>> {
        let mut records = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.strip_suffix(RECORD_SUFFIX).is_none() {
                continue;
            }
            let parsed = std::fs::read(entry.path())
                .map_err(BackupError::from)
                .and_then(|raw| Ok(serde_json::from_slice::<BackupRecord>(&raw)?));
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(artifact = %name, error = %e, "Skipping unreadable backup record")
                }
            }
        }
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    pub fn latest(&self) -> Result<Option<BackupRecord>> {
        Ok(self.list()?.into_iter().next())
    }

    /// On-disk size of the payload artifact, if present.
    pub fn payload_size(&self, id: &str) -> Option<u64> {
        std::fs::metadata(self.payload_path(id)).ok().map(|m| m.len())
    }

    /// Copy both artifacts for one id into an external directory.
    pub fn export(&self, id: &str, dest: &Path) -> Result<()> {
        self.read_record(id)?;
        if !self.payload_path(id).exists() {
            return Err(BackupError::CorruptBackup {
                id: id.into(),
                reason: "payload artifact is missing".into(),
            });
        }
        std::fs::create_dir_all(dest)?;
        std::fs::copy(self.payload_path(id), dest.join(format!("{id}{PAYLOAD_SUFFIX}")))?;
        std::fs::copy(self.record_path(id), dest.join(format!("{id}{RECORD_SUFFIX}")))?;
        tracing::info!(id, dest = %dest.display(), "Exported backup");
        Ok(())
    }

    /// Scan an external directory for record artifacts matching the naming
    /// convention and copy complete pairs in. Records whose payload is
    /// missing are skipped. Returns the number of imported backups.
    pub fn import_from(&self, src: &Path) -> Result<usize> {
        let mut imported = 0;
        for entry in std::fs::read_dir(src)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(id) = name.strip_suffix(RECORD_SUFFIX) else {
                continue;
            };
            if !id.starts_with(ID_PREFIX) {
                continue;
            }
            let payload_src = src.join(format!("{id}{PAYLOAD_SUFFIX}"));
            if !payload_src.exists() {
                tracing::warn!(id, "Skipping import: payload artifact is missing");
                continue;
            }
            std::fs::copy(&payload_src, self.payload_path(id))?;
            std::fs::copy(entry.path(), self.record_path(id))?;
            tracing::info!(id, "Imported backup");
            imported += 1;
        }
        Ok(imported)
    }
}
