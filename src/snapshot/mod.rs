//! Snapshot model: the full logical state of the tracked data store at one
//! instant, plus the diff type persisted by incremental backups.

pub mod checksum;
pub mod collector;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Nested metadata view of a tracked directory. File bytes never enter a
/// snapshot, only sizes, timestamps and content checksums.
pub type DirectoryTree = BTreeMap<String, TreeNode>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TreeNode {
    File {
        size: u64,
        modified: String,
        checksum: Option<String>,
    },
    Directory {
        contents: DirectoryTree,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub timestamp: String,
    pub version: String,
    pub os: String,
    pub arch: String,
}

/// Ordered maps keep canonical serialization stable, which the checksum
/// engine depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// One entry per tracked filename; `None` when the file is absent.
    pub files: BTreeMap<String, Option<Value>>,
    pub directories: BTreeMap<String, DirectoryTree>,
    pub metadata: SnapshotMetadata,
}

/// Partial snapshot persisted by incremental backups: changed `files`
/// entries as full replacement values, and the complete new `directories`
/// map iff any subtree differs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<BTreeMap<String, Option<Value>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directories: Option<BTreeMap<String, DirectoryTree>>,
}

impl SnapshotDiff {
    /// An empty diff means nothing changed and no backup should be written.
    pub fn is_empty(&self) -> bool {
        self.files.is_none() && self.directories.is_none()
    }
}

/// Changes in `current` relative to `base`. Snapshot metadata is not
/// compared; it changes on every collection.
pub fn diff_snapshots(base: &Snapshot, current: &Snapshot) -> SnapshotDiff {
    let mut changed = BTreeMap::new();
    for (name, value) in &current.files {
        if base.files.get(name) != Some(value) {
            changed.insert(name.clone(), value.clone());
        }
    }

    SnapshotDiff {
        files: if changed.is_empty() { None } else { Some(changed) },
        directories: if base.directories != current.directories {
            Some(current.directories.clone())
        } else {
            None
        },
    }
}

/// Replay a diff on top of a materialized snapshot. File entries are full
/// replacements; the directories map is replaced wholesale when the diff
/// carries a non-empty one.
pub fn apply_diff(snapshot: &mut Snapshot, diff: SnapshotDiff) {
    if let Some(files) = diff.files {
        snapshot.files.extend(files);
    }
    if let Some(directories) = diff.directories {
        if !directories.is_empty() {
            snapshot.directories = directories;
        }
    }
}
