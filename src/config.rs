//! Backup configuration: a sidecar JSON document in the backup directory,
//! read at startup and rewritten on every update.

use crate::error::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Hours between scheduled backups
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// Maximum number of backups kept by retention
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,

    /// Compress payload artifacts before writing
    #[serde(default = "default_true")]
    pub compression_enabled: bool,

    /// Scheduled backups are incremental rather than full
    #[serde(default = "default_true")]
    pub incremental_enabled: bool,

    /// Run the background scheduler
    #[serde(default = "default_true")]
    pub auto_backup_enabled: bool,
}

fn default_interval_hours() -> u64 {
    24
}

fn default_max_backups() -> usize {
    30
}

fn default_true() -> bool {
    true
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_interval_hours(),
            max_backups: default_max_backups(),
            compression_enabled: true,
            incremental_enabled: true,
            auto_backup_enabled: true,
        }
    }
}

impl BackupConfig {
    /// Load the sidecar document, falling back to defaults when it is
    /// missing or unreadable. A bad config file must never keep the engine
    /// from starting.
    pub fn load_or_default(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Unreadable backup config, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_hours == 0 {
            return Err(BackupError::Config("interval_hours must be at least 1".into()));
        }
        if self.max_backups == 0 {
            return Err(BackupError::Config("max_backups must be at least 1".into()));
        }
        Ok(())
    }
}

/// Partial update applied by `BackupEngine::update_config`. Absent fields
/// leave the current value untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigUpdate {
    pub interval_hours: Option<u64>,
    pub max_backups: Option<usize>,
    pub compression_enabled: Option<bool>,
    pub incremental_enabled: Option<bool>,
    pub auto_backup_enabled: Option<bool>,
}

impl ConfigUpdate {
    /// True when the update touches a setting the running scheduler
    /// depends on, requiring a restart.
    pub fn affects_scheduler(&self) -> bool {
        self.interval_hours.is_some() || self.auto_backup_enabled.is_some()
    }

    pub fn apply(&self, config: &mut BackupConfig) {
        if let Some(v) = self.interval_hours {
            config.interval_hours = v;
        }
        if let Some(v) = self.max_backups {
            config.max_backups = v;
        }
        if let Some(v) = self.compression_enabled {
            config.compression_enabled = v;
        }
        if let Some(v) = self.incremental_enabled {
            config.incremental_enabled = v;
        }
        if let Some(v) = self.auto_backup_enabled {
            config.auto_backup_enabled = v;
        }
    }
}
