//! Folder import: one roll per run, one photo per successfully placed file.
//!
//! `Idle -> Scanning -> Creating -> Placing -> (Syncing) -> Done | Failed`
//!
//! Only conditions that prevent any progress (bad options, unreadable or
//! empty source) end in `Failed`. Per-file problems are recorded and the
//! run continues.

mod naming;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use crate::assets::{AssetManager, DerivativeGenerator};
use crate::config::PlacementMode;
use crate::db::{Database, NewPhoto, NewRoll, Photo};
use crate::error::{LibraryError, LibraryResult};
use crate::exif::{ExifSyncEngine, ExifWriteResult, FailedFile};
use crate::location::Location;

pub use naming::{
    parse_shoot_date, roll_dir_name, sanitize_filename, unique_roll_dir, unique_target_name,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportOptions {
    pub source_path: PathBuf,
    pub library_root: PathBuf,
    pub film_stock: String,
    pub camera: String,
    #[serde(default)]
    pub lens: Option<String>,
    /// `YYYY-MM-DD`
    pub shoot_date: String,
    /// Defaults to the generated folder name.
    #[serde(default)]
    pub roll_name: Option<String>,
    #[serde(default)]
    pub lab_info: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub mode: PlacementMode,
    #[serde(default)]
    pub auto_write_exif: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResult {
    pub roll_id: i64,
    /// Files that were placed and recorded.
    pub photos_count: usize,
    pub failed_files: Vec<FailedFile>,
    /// Present when the run went through `Syncing`.
    pub exif: Option<ExifWriteResult>,
    pub cancelled: bool,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportState {
    Idle,
    Scanning,
    Creating,
    Placing,
    Syncing,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub enum ImportProgress {
    State(ImportState),
    Started { roll_id: i64, total: usize },
    /// One per source file, in order. `error` marks a file that was skipped.
    File {
        current: usize,
        total: usize,
        filename: String,
        roll_id: i64,
        error: Option<String>,
    },
    Completed { roll_id: i64, photos_count: usize, failed: usize },
    Error { message: String },
}

pub struct ImportOrchestrator {
    db: Arc<Database>,
    assets: Arc<AssetManager>,
    derivatives: Arc<dyn DerivativeGenerator>,
    exif: Arc<ExifSyncEngine>,
    extensions: Vec<String>,
}

struct Reporter {
    tx: Option<mpsc::Sender<ImportProgress>>,
}

impl Reporter {
    fn send(&self, event: ImportProgress) {
        if let Some(ref tx) = self.tx {
            let _ = tx.send(event);
        }
    }

    fn state(&self, state: ImportState) {
        tracing::debug!(?state, "Import state");
        self.send(ImportProgress::State(state));
    }

    fn fail(&self, err: LibraryError) -> LibraryError {
        tracing::warn!(error = %err, "Import failed");
        self.send(ImportProgress::Error {
            message: err.to_string(),
        });
        self.state(ImportState::Failed);
        err
    }
}

impl ImportOrchestrator {
    pub fn new(
        db: Arc<Database>,
        assets: Arc<AssetManager>,
        derivatives: Arc<dyn DerivativeGenerator>,
        exif: Arc<ExifSyncEngine>,
        extensions: Vec<String>,
    ) -> Self {
        Self {
            db,
            assets,
            derivatives,
            exif,
            extensions,
        }
    }

    /// Count importable files without touching anything. A missing folder
    /// is an error; an empty one is `Ok(0)`.
    pub fn preview_import_count(&self, source: &Path) -> LibraryResult<usize> {
        Ok(self.scan(source)?.len())
    }

    fn scan(&self, source: &Path) -> LibraryResult<Vec<PathBuf>> {
        Ok(self
            .assets
            .filesystem()
            .list_images(source, &self.extensions)?)
    }

    pub fn import_folder(
        &self,
        options: &ImportOptions,
        cancel: &AtomicBool,
        progress_tx: Option<mpsc::Sender<ImportProgress>>,
    ) -> LibraryResult<ImportResult> {
        let reporter = Reporter { tx: progress_tx };

        reporter.state(ImportState::Scanning);
        let shoot_date = match validate_options(options) {
            Ok(date) => date,
            Err(e) => return Err(reporter.fail(e)),
        };
        let sources = match self.scan(&options.source_path) {
            Ok(sources) if sources.is_empty() => {
                let err = LibraryError::NothingToImport(options.source_path.clone());
                return Err(reporter.fail(err));
            }
            Ok(sources) => sources,
            Err(e) => return Err(reporter.fail(e)),
        };
        let total = sources.len();
        tracing::info!(source = ?options.source_path, total, "Importing folder");

        reporter.state(ImportState::Creating);
        let fs = self.assets.filesystem();
        let dir_name = roll_dir_name(shoot_date, &options.film_stock, &options.camera);
        let (roll_dir, folder_name) =
            unique_roll_dir(fs, &options.library_root, shoot_date, &dir_name);
        if let Err(e) = fs.create_dir_all(&roll_dir) {
            return Err(reporter.fail(e.into()));
        }

        let new_roll = NewRoll {
            name: options
                .roll_name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| folder_name.clone()),
            path: roll_dir.clone(),
            film_stock: options.film_stock.trim().to_string(),
            camera: options.camera.trim().to_string(),
            lens: clean(&options.lens),
            shoot_date: shoot_date.format("%Y-%m-%d").to_string(),
            lab_info: clean(&options.lab_info),
            notes: clean(&options.notes),
            location: options.location.clone(),
        };
        let roll = match self.db.create_roll(&new_roll) {
            Ok(roll) => roll,
            Err(e) => {
                if let Err(cleanup) = fs.delete_dir(&roll_dir) {
                    tracing::warn!(
                        path = ?roll_dir,
                        error = %cleanup,
                        "Failed to remove empty roll folder"
                    );
                }
                return Err(reporter.fail(e));
            }
        };
        reporter.send(ImportProgress::Started {
            roll_id: roll.id,
            total,
        });

        reporter.state(ImportState::Placing);
        let mut used_stems = HashSet::new();
        let mut photos_count = 0;
        let mut failed_files = Vec::new();
        let mut cancelled = false;

        for (index, source) in sources.iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                tracing::info!(roll_id = roll.id, placed = photos_count, "Import cancelled");
                cancelled = true;
                break;
            }

            let filename = source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let target_name = unique_target_name(source, &mut used_stems);

            let placed = self.place_one(roll.id, &roll_dir, source, &target_name, options.mode);
            let error = match placed {
                Ok(_) => {
                    photos_count += 1;
                    None
                }
                Err(e) => {
                    tracing::warn!(path = ?source, error = %e, "Failed to import file");
                    failed_files.push(FailedFile {
                        path: source.clone(),
                        reason: e.to_string(),
                    });
                    Some(e.to_string())
                }
            };

            reporter.send(ImportProgress::File {
                current: index + 1,
                total,
                filename,
                roll_id: roll.id,
                error,
            });
        }

        let mut exif = None;
        if options.auto_write_exif && photos_count > 0 && !cancelled {
            reporter.state(ImportState::Syncing);
            match self.exif.write_roll_exif_with_progress(roll.id, true, cancel, None) {
                Ok(result) => exif = Some(result),
                Err(e) => {
                    tracing::warn!(roll_id = roll.id, error = %e, "EXIF write after import failed");
                    reporter.send(ImportProgress::Error {
                        message: format!("EXIF write failed: {e}"),
                    });
                }
            }
        }

        let message = summarize(&folder_name, photos_count, total, exif.as_ref(), cancelled);
        tracing::info!(roll_id = roll.id, photos_count, failed = failed_files.len(), "{message}");

        reporter.send(ImportProgress::Completed {
            roll_id: roll.id,
            photos_count,
            failed: failed_files.len(),
        });
        reporter.state(ImportState::Done);

        Ok(ImportResult {
            roll_id: roll.id,
            photos_count,
            failed_files,
            exif,
            cancelled,
            message,
        })
    }

    /// Place one file, render its derivatives and record it. Either all of
    /// that sticks, or the placed file is taken back out.
    fn place_one(
        &self,
        roll_id: i64,
        roll_dir: &Path,
        source: &Path,
        target_name: &str,
        mode: PlacementMode,
    ) -> LibraryResult<Photo> {
        let target = roll_dir.join(target_name);
        self.assets.place(source, &target, mode)?;

        let thumbnail_path = self
            .derivatives
            .generate_thumbnail(&target, roll_dir)
            .map_err(|e| tracing::warn!(path = ?target, error = %e, "Thumbnail generation failed"))
            .ok();
        let preview_path = self
            .derivatives
            .generate_preview(&target, roll_dir)
            .map_err(|e| tracing::warn!(path = ?target, error = %e, "Preview generation failed"))
            .ok();

        let new_photo = NewPhoto {
            roll_id,
            filename: target_name.to_string(),
            file_path: target.clone(),
            thumbnail_path: thumbnail_path.clone(),
            preview_path: preview_path.clone(),
        };
        match self.db.create_photo(&new_photo) {
            Ok(photo) => Ok(photo),
            Err(e) => {
                let fs = self.assets.filesystem();
                for derived in thumbnail_path.iter().chain(preview_path.iter()) {
                    if let Err(err) = fs.delete_file(derived) {
                        tracing::warn!(
                            path = ?derived,
                            error = %err,
                            "Failed to remove derived file"
                        );
                    }
                }
                self.assets.unplace(source, &target, mode);
                Err(e)
            }
        }
    }
}

fn validate_options(options: &ImportOptions) -> LibraryResult<chrono::NaiveDate> {
    if options.library_root.as_os_str().is_empty() {
        return Err(LibraryError::Validation("library path is empty".to_string()));
    }
    if options.source_path.as_os_str().is_empty() {
        return Err(LibraryError::Validation("source path is empty".to_string()));
    }
    if options.film_stock.trim().is_empty() {
        return Err(LibraryError::Validation("film stock is required".to_string()));
    }
    if options.camera.trim().is_empty() {
        return Err(LibraryError::Validation("camera is required".to_string()));
    }
    if let Some(location) = &options.location {
        location.validate()?;
    }
    parse_shoot_date(&options.shoot_date)
}

fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn summarize(
    folder: &str,
    placed: usize,
    total: usize,
    exif: Option<&ExifWriteResult>,
    cancelled: bool,
) -> String {
    let mut message = if placed == total {
        format!("Imported {placed} photos as roll '{folder}'")
    } else {
        format!("Imported {placed} of {total} photos as roll '{folder}'")
    };
    if cancelled {
        message.push_str(" (cancelled)");
    }
    if let Some(exif) = exif {
        if exif.has_failures() {
            message.push_str(&format!(
                "; EXIF written to {} files, {} failed",
                exif.success_count, exif.failed_count
            ));
        } else if exif.success_count > 0 {
            message.push_str(&format!("; EXIF written to {} files", exif.success_count));
        }
    }
    message
}
