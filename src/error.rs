//! Error taxonomy for the backup engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("backup {0} not found")]
    NotFound(String),

    #[error("backup {id} is corrupt: {reason}")]
    CorruptBackup { id: String, reason: String },

    #[error("backup {0} failed its integrity check")]
    IntegrityViolation(String),

    #[error("base backup {base} referenced by {id} is missing")]
    MissingBase { id: String, base: String },

    #[error("write-back of {file} failed ({source}); {}", write_back_note(.partially_applied))]
    WriteFailure {
        file: String,
        /// True when earlier files of the restore set had already been
        /// replaced before this failure.
        partially_applied: bool,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

fn write_back_note(partially_applied: &bool) -> &'static str {
    if *partially_applied {
        "earlier files were already replaced"
    } else {
        "nothing was changed"
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
