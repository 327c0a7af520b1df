use std::path::PathBuf;

use thiserror::Error;

/// Errors that stop a restoration run.
///
/// Per-item problems (missing sidecars, unreadable JSON, failed `utime`)
/// never surface here; they go to the diagnostics sink instead.
#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("Failed to extract {archive}: {reason}")]
    Extraction { archive: PathBuf, reason: String },

    #[error("Zip error in {archive}: {source}")]
    Zip {
        archive: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("No media root ({names}) found under {overlay}")]
    NoMediaRoot { overlay: PathBuf, names: String },

    #[error("Source directory not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Stage transition {from} -> {to} is not allowed")]
    StageOrder { from: String, to: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl RestoreError {
    pub(crate) fn extraction(archive: impl Into<PathBuf>, reason: impl ToString) -> Self {
        RestoreError::Extraction {
            archive: archive.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for restoration operations.
pub type Result<T> = std::result::Result<T, RestoreError>;
