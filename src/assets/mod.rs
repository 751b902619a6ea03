//! Asset lifecycle: turning a deletion policy into filesystem actions and
//! running them with per-item outcome tracking.
//!
//! Metadata rows go first. Filesystem failures are reported, never fatal,
//! and never bring a deleted row back.

mod derivatives;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use crate::config::PlacementMode;
use crate::db::{Database, Photo, Roll, PREVIEWS_DIR, THUMBNAILS_DIR};
use crate::error::{LibraryError, LibraryResult, FAILURE_SAMPLE_SIZE};
use crate::fs::{Filesystem, FsError, FsResult};

pub use derivatives::{derivative_name, DerivativeGenerator, ImageDerivatives};

/// What happens on disk when a roll is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeletePolicy {
    pub delete_files: bool,
    /// Only meaningful together with `delete_files`.
    pub delete_originals: bool,
}

impl DeletePolicy {
    pub const KEEP_FILES: Self = Self {
        delete_files: false,
        delete_originals: false,
    };
    pub const DERIVED_ONLY: Self = Self {
        delete_files: true,
        delete_originals: false,
    };
    pub const EVERYTHING: Self = Self {
        delete_files: true,
        delete_originals: true,
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsAction {
    RemoveFile(PathBuf),
    RemoveDir(PathBuf),
}

impl FsAction {
    pub fn path(&self) -> &Path {
        match self {
            FsAction::RemoveFile(path) | FsAction::RemoveDir(path) => path,
        }
    }
}

/// Filesystem work a roll deletion needs under `policy`.
pub fn plan_roll_deletion(roll: &Roll, policy: DeletePolicy) -> Vec<FsAction> {
    match (policy.delete_files, policy.delete_originals) {
        (false, _) => Vec::new(),
        (true, false) => vec![
            FsAction::RemoveDir(roll.path.join(THUMBNAILS_DIR)),
            FsAction::RemoveDir(roll.path.join(PREVIEWS_DIR)),
        ],
        (true, true) => vec![FsAction::RemoveDir(roll.path.clone())],
    }
}

/// Derived files of a deleted photo. Originals are never removed here.
pub fn plan_photo_cleanup(photo: &Photo) -> Vec<FsAction> {
    photo
        .derived_paths()
        .map(|path| FsAction::RemoveFile(path.clone()))
        .collect()
}

/// Per-path outcome of a cleanup run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    /// Already absent; tolerated.
    pub missing: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn merge(&mut self, other: CleanupReport) {
        self.removed.extend(other.removed);
        self.missing.extend(other.missing);
        self.failed.extend(other.failed);
    }
}

/// Result of a batch photo delete. `deleted` counts metadata rows only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhotoDeletion {
    pub deleted: usize,
    pub missing_ids: Vec<i64>,
    pub failed_ids: Vec<(i64, String)>,
    pub cleanup: CleanupReport,
}

/// Result of deleting several rolls, each one independently.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RollBatchDeletion {
    pub deleted: Vec<i64>,
    pub failed: Vec<(i64, String)>,
    pub cleanup: CleanupReport,
    pub cancelled: bool,
}

impl RollBatchDeletion {
    pub fn partial_failure(&self) -> Option<LibraryError> {
        if self.failed.is_empty() {
            return None;
        }
        Some(LibraryError::PartialFailure {
            succeeded: self.deleted.len(),
            failed: self.failed.len(),
            sample: self
                .failed
                .iter()
                .take(FAILURE_SAMPLE_SIZE)
                .map(|(id, reason)| format!("roll {id}: {reason}"))
                .collect(),
        })
    }
}

/// Progress of a multi-roll delete.
#[derive(Debug, Clone)]
pub struct DeleteProgress {
    pub current: usize,
    pub total: usize,
    pub roll_id: i64,
    pub error: Option<String>,
}

pub struct AssetManager {
    db: Arc<Database>,
    fs: Arc<dyn Filesystem>,
}

impl AssetManager {
    pub fn new(db: Arc<Database>, fs: Arc<dyn Filesystem>) -> Self {
        Self { db, fs }
    }

    pub fn filesystem(&self) -> &dyn Filesystem {
        self.fs.as_ref()
    }

    /// Copy or move one original into place.
    pub fn place(&self, src: &Path, dst: &Path, mode: PlacementMode) -> FsResult<()> {
        match mode {
            PlacementMode::Copy => self.fs.copy(src, dst),
            PlacementMode::Move => self.fs.move_file(src, dst),
        }
    }

    /// Undo a placement whose photo row could not be written, so no file
    /// is left in the library without a record.
    pub fn unplace(&self, src: &Path, dst: &Path, mode: PlacementMode) {
        let result = match mode {
            PlacementMode::Copy => self.fs.delete_file(dst),
            PlacementMode::Move => self.fs.move_file(dst, src),
        };
        if let Err(e) = result {
            tracing::error!(path = ?dst, error = %e, "Failed to roll back placed file");
        }
    }

    /// Run actions, recording each outcome. Never stops early.
    pub fn execute(&self, actions: &[FsAction]) -> CleanupReport {
        let mut report = CleanupReport::default();
        for action in actions {
            let result: Result<(), FsError> = match action {
                FsAction::RemoveFile(path) => self.fs.delete_file(path),
                FsAction::RemoveDir(path) => self.fs.delete_dir(path),
            };
            let path = action.path().to_path_buf();
            match result {
                Ok(()) => report.removed.push(path),
                Err(e) if e.is_not_found() => {
                    tracing::debug!(path = ?path, "Already gone");
                    report.missing.push(path);
                }
                Err(e) => {
                    tracing::warn!(path = ?path, error = %e, "Failed to remove asset");
                    report.failed.push((path, e.to_string()));
                }
            }
        }
        report
    }

    /// Delete a roll and its photos, then apply `policy` on disk.
    pub fn delete_roll(&self, roll_id: i64, policy: DeletePolicy) -> LibraryResult<CleanupReport> {
        let roll = self.db.require_roll(roll_id)?;
        let actions = plan_roll_deletion(&roll, policy);

        if !self.db.delete_roll(roll_id)? {
            return Err(LibraryError::roll_not_found(roll_id));
        }
        tracing::info!(roll_id, path = ?roll.path, ?policy, "Deleted roll");

        Ok(self.execute(&actions))
    }

    /// Delete several rolls independently; one failure never stops the rest.
    pub fn delete_rolls(
        &self,
        roll_ids: &[i64],
        policy: DeletePolicy,
        cancel: &AtomicBool,
        progress_tx: Option<mpsc::Sender<DeleteProgress>>,
    ) -> RollBatchDeletion {
        let mut outcome = RollBatchDeletion::default();
        let total = roll_ids.len();

        for (index, &roll_id) in roll_ids.iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                outcome.cancelled = true;
                break;
            }

            let error = match self.delete_roll(roll_id, policy) {
                Ok(cleanup) => {
                    outcome.deleted.push(roll_id);
                    outcome.cleanup.merge(cleanup);
                    None
                }
                Err(e) => {
                    tracing::warn!(roll_id, error = %e, "Failed to delete roll");
                    outcome.failed.push((roll_id, e.to_string()));
                    Some(e.to_string())
                }
            };

            if let Some(ref tx) = progress_tx {
                let _ = tx.send(DeleteProgress {
                    current: index + 1,
                    total,
                    roll_id,
                    error,
                });
            }
        }
        outcome
    }

    /// Delete photo rows, then (optionally) their thumbnails and previews.
    pub fn delete_photos(&self, photo_ids: &[i64], delete_files: bool) -> PhotoDeletion {
        let batch = self.db.delete_photos(photo_ids);

        let mut outcome = PhotoDeletion {
            deleted: batch.deleted.len(),
            missing_ids: batch.missing,
            failed_ids: batch.failed,
            cleanup: CleanupReport::default(),
        };

        if delete_files {
            for photo in &batch.deleted {
                let report = self.execute(&plan_photo_cleanup(photo));
                outcome.cleanup.merge(report);
            }
        }

        if !outcome.cleanup.is_clean() {
            tracing::warn!(
                failed = outcome.cleanup.failed.len(),
                "Some derived files could not be removed"
            );
        }
        outcome
    }
}
