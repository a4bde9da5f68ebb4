//! Snapshot collection from the live data store.
//!
//! Collection is read-only and degrades per entry: a missing or unreadable
//! tracked file becomes a `None` entry and an unreadable directory subtree
//! is simply skipped, so one bad file never loses a whole snapshot.

use super::checksum;
use super::{DirectoryTree, Snapshot, SnapshotMetadata, TreeNode};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Snapshot schema version stamped into metadata.
pub const SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone)]
pub struct SnapshotCollector {
    data_dir: PathBuf,
    tracked_files: Vec<String>,
    tracked_dirs: Vec<String>,
}

impl SnapshotCollector {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        tracked_files: Vec<String>,
        tracked_dirs: Vec<String>,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            tracked_files,
            tracked_dirs,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn tracked_files(&self) -> &[String] {
        &self.tracked_files
    }

    /// Read the live store into an in-memory snapshot. The `files` map gets
    /// an entry for every tracked filename and nothing else.
    pub fn collect(&self) -> Snapshot {
        let mut files = BTreeMap::new();
        for name in &self.tracked_files {
            files.insert(name.clone(), self.read_tracked_file(name));
        }

        let mut directories = BTreeMap::new();
        for name in &self.tracked_dirs {
            let root = self.data_dir.join(name);
            if root.is_dir() {
                directories.insert(name.clone(), directory_tree(&root));
            }
        }

        Snapshot {
            files,
            directories,
            metadata: SnapshotMetadata {
                timestamp: Utc::now().to_rfc3339(),
                version: SCHEMA_VERSION.into(),
                os: std::env::consts::OS.into(),
                arch: std::env::consts::ARCH.into(),
            },
        }
    }

    fn read_tracked_file(&self, name: &str) -> Option<Value> {
        let path = self.data_dir.join(name);
        if !path.exists() {
            return None;
        }
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(file = name, error = %e, "Failed to read tracked file");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(file = name, error = %e, "Tracked file is not valid JSON");
                None
            }
        }
    }
}

/// Capture a directory subtree as metadata plus per-file content checksums.
fn directory_tree(root: &Path) -> DirectoryTree {
    let mut tree = DirectoryTree::new();

    for entry in WalkDir::new(root).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let node = if entry.file_type().is_dir() {
            TreeNode::Directory {
                contents: DirectoryTree::new(),
            }
        } else {
            file_node(entry.path())
        };
        insert_node(&mut tree, relative, node);
    }

    tree
}

fn file_node(path: &Path) -> TreeNode {
    let (size, modified) = match std::fs::metadata(path) {
        Ok(meta) => {
            let modified = meta
                .modified()
                .ok()
                .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
                .unwrap_or_default();
            (meta.len(), modified)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to stat file");
            (0, String::new())
        }
    };

    let checksum = match std::fs::read(path) {
        Ok(bytes) => Some(checksum::digest(&bytes)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to checksum file");
            None
        }
    };

    TreeNode::File {
        size,
        modified,
        checksum,
    }
}

/// Place a node at its relative path, creating intermediate directory nodes
/// as needed. The walker visits parents before children, so intermediates
/// normally exist already.
fn insert_node(tree: &mut DirectoryTree, relative: &Path, node: TreeNode) {
    let mut components: Vec<&str> = relative.iter().filter_map(|c| c.to_str()).collect();
    let Some(leaf) = components.pop() else {
        return;
    };

    let mut cursor = tree;
    for part in components {
        let entry = cursor
            .entry(part.to_string())
            .or_insert_with(|| TreeNode::Directory {
                contents: DirectoryTree::new(),
            });
        match entry {
            TreeNode::Directory { contents } => cursor = contents,
            TreeNode::File { .. } => return,
        }
    }
    cursor.insert(leaf.to_string(), node);
}
