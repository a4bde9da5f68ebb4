//! Backup system health: freshness of the newest backup plus integrity of
//! the most recent few.

use crate::config::BackupConfig;
use crate::restore;
use crate::store::BackupStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// How many of the newest backups get an integrity check.
const INTEGRITY_SAMPLE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    Warning,
    Error,
}

impl fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthLevel::Healthy => f.write_str("healthy"),
            HealthLevel::Warning => f.write_str("warning"),
            HealthLevel::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: HealthLevel,
    pub message: String,
    pub recommendations: Vec<String>,
}

impl HealthStatus {
    fn new(status: HealthLevel, message: impl Into<String>, recommendations: &[&str]) -> Self {
        Self {
            status,
            message: message.into(),
            recommendations: recommendations.iter().map(|r| r.to_string()).collect(),
        }
    }
}

pub struct HealthReporter<'a> {
    store: &'a BackupStore,
    config: &'a BackupConfig,
}

impl<'a> HealthReporter<'a> {
    pub fn new(store: &'a BackupStore, config: &'a BackupConfig) -> Self {
        Self { store, config }
    }

    pub fn status(&self) -> HealthStatus {
        let records = match self.store.list() {
            Ok(records) => records,
            Err(e) => {
                return HealthStatus::new(
                    HealthLevel::Error,
                    format!("health check failed: {e}"),
                    &["Check the backup directory"],
                )
            }
        };

        if records.is_empty() {
            return HealthStatus::new(
                HealthLevel::Warning,
                "no backups found",
                &["Create your first backup"],
            );
        }

        // twice the configured interval is the allowed staleness
        let max_hours = self.config.interval_hours.saturating_mul(2) as i64;
        if let Some(hours) = hours_since(&records[0].timestamp) {
            if hours > max_hours {
                return HealthStatus::new(
                    HealthLevel::Error,
                    format!("last backup was {hours} hours ago"),
                    &["Create a new backup", "Check automatic backup settings"],
                );
            }
        }

        let corrupted = records
            .iter()
            .take(INTEGRITY_SAMPLE)
            .filter(|record| !matches!(restore::verify_integrity(self.store, &record.id), Ok(true)))
            .count();
        if corrupted > 0 {
            return HealthStatus::new(
                HealthLevel::Warning,
                format!("{corrupted} corrupted backup(s) found"),
                &["Create a new full backup", "Remove corrupted backups"],
            );
        }

        HealthStatus::new(
            HealthLevel::Healthy,
            "backup system is working properly",
            &[],
        )
    }
}

fn hours_since(timestamp: &str) -> Option<i64> {
    let then = DateTime::parse_from_rfc3339(timestamp).ok()?;
    Some((Utc::now() - then.with_timezone(&Utc)).num_hours())
}
