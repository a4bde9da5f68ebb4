//! Retention: cap the catalog at the newest `max_backups` records.

use crate::error::Result;
use crate::store::BackupStore;

pub struct RetentionManager<'a> {
    store: &'a BackupStore,
    max_backups: usize,
}

impl<'a> RetentionManager<'a> {
    pub fn new(store: &'a BackupStore, max_backups: usize) -> Self {
        Self { store, max_backups }
    }

    /// Delete every record beyond the newest `max_backups`, payload and
    /// metadata together. The newest N are kept regardless of type, so an
    /// old full base can be dropped while incrementals referencing it
    /// survive; restore reports such chains as a missing base.
    pub fn enforce(&self) -> Result<usize> {
        let records = self.store.list()?;
        let mut removed = 0;
        for record in records.iter().skip(self.max_backups) {
            self.store.delete(&record.id)?;
            tracing::info!(id = %record.id, "Removed old backup");
            removed += 1;
        }
        Ok(removed)
    }
}
