//! Error taxonomy shared by every library operation.

use std::path::PathBuf;
use thiserror::Error;

use crate::exif::ExifToolError;
use crate::fs::FsError;

/// How many failing items a [`LibraryError::PartialFailure`] keeps for display.
pub const FAILURE_SAMPLE_SIZE: usize = 5;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("EXIF tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("{failed} of {} items failed (e.g. {})", .succeeded + .failed, .sample.join("; "))]
    PartialFailure {
        succeeded: usize,
        failed: usize,
        sample: Vec<String>,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("network error: {0}")]
    Network(String),

    #[error("no importable images in {}", .0.display())]
    NothingToImport(PathBuf),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type LibraryResult<T> = Result<T, LibraryError>;

impl LibraryError {
    pub fn roll_not_found(id: i64) -> Self {
        LibraryError::NotFound { entity: "roll", id }
    }

    pub fn photo_not_found(id: i64) -> Self {
        LibraryError::NotFound { entity: "photo", id }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LibraryError::NotFound { .. })
    }
}

impl From<FsError> for LibraryError {
    fn from(err: FsError) -> Self {
        match err {
            FsError::NotFound(path) => LibraryError::Io {
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
                path,
            },
            FsError::PermissionDenied(path) => LibraryError::Io {
                source: std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "permission denied",
                ),
                path,
            },
            FsError::Io { path, source } => LibraryError::Io { path, source },
        }
    }
}

impl From<ExifToolError> for LibraryError {
    fn from(err: ExifToolError) -> Self {
        match err {
            ExifToolError::Unavailable(reason) => LibraryError::ToolUnavailable(reason),
            ExifToolError::MalformedPayload(reason) => LibraryError::Validation(reason),
            ExifToolError::Timeout { path, seconds } => LibraryError::Timeout {
                operation: format!("exiftool on {}", path.display()),
                seconds,
            },
            ExifToolError::FileLocked(path) => LibraryError::Io {
                source: std::io::Error::new(std::io::ErrorKind::WouldBlock, "file is locked"),
                path,
            },
            ExifToolError::ReadOnly(path) => LibraryError::Io {
                source: std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "file is read-only",
                ),
                path,
            },
            ExifToolError::Failed { path, reason } => LibraryError::Io {
                source: std::io::Error::other(reason),
                path,
            },
        }
    }
}
