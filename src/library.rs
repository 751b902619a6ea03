//! The orchestration surface: every user-facing operation goes through here.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread;

use crate::assets::{
    AssetManager, DeletePolicy, DeleteProgress, DerivativeGenerator, ImageDerivatives,
    RollBatchDeletion,
};
use crate::config::Config;
use crate::db::{Database, Photo, Roll, RollEdit, RollWithPhotos};
use crate::error::{LibraryError, LibraryResult, FAILURE_SAMPLE_SIZE};
use crate::exif::{
    ExifData, ExifProgress, ExifSyncEngine, ExifTool, ExifToolCli, ExifWriteResult,
    PhotoExifPayload,
};
use crate::filter::{filter_rolls, RollFilters};
use crate::fs::{Filesystem, LocalFs};
use crate::import::{
    parse_shoot_date, ImportOptions, ImportOrchestrator, ImportProgress, ImportResult,
};
use crate::location::Location;
use crate::tasks::{
    TaskEvent, TaskHandle, TaskId, TaskKind, TaskManager, TaskOutcome, TaskProgress, TaskReport,
};

pub struct Library {
    config: Config,
    db: Arc<Database>,
    assets: Arc<AssetManager>,
    exif: Arc<ExifSyncEngine>,
    importer: Arc<ImportOrchestrator>,
    tasks: Mutex<TaskManager>,
}

impl Library {
    /// Open the on-disk store and wire the real filesystem, image renderer
    /// and exiftool.
    pub fn open(config: Config) -> LibraryResult<Self> {
        let db = Database::open(&config.db_path)?;
        db.initialize()?;
        tracing::info!(db = ?config.db_path, "Library opened");

        let fs: Arc<dyn Filesystem> = Arc::new(LocalFs);
        let derivatives = Arc::new(ImageDerivatives::from_config(fs.clone(), &config.import));
        let tool = Arc::new(ExifToolCli::from_config(&config.exif));
        Ok(Self::with_parts(Arc::new(db), fs, derivatives, tool, config))
    }

    pub fn with_parts(
        db: Arc<Database>,
        fs: Arc<dyn Filesystem>,
        derivatives: Arc<dyn DerivativeGenerator>,
        tool: Arc<dyn ExifTool>,
        config: Config,
    ) -> Self {
        let assets = Arc::new(AssetManager::new(db.clone(), fs));
        let exif = Arc::new(ExifSyncEngine::new(
            db.clone(),
            tool,
            config.exif.effective_concurrency(),
        ));
        let importer = Arc::new(ImportOrchestrator::new(
            db.clone(),
            assets.clone(),
            derivatives,
            exif.clone(),
            config.import.image_extensions.clone(),
        ));
        Self {
            config,
            db,
            assets,
            exif,
            importer,
            tasks: Mutex::new(TaskManager::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Import options with the configured library root, placement mode and
    /// auto-write setting filled in.
    pub fn import_options(
        &self,
        source_path: impl Into<PathBuf>,
        film_stock: &str,
        camera: &str,
        shoot_date: &str,
    ) -> LibraryResult<ImportOptions> {
        let library_root = self
            .config
            .library
            .root()
            .ok_or_else(|| LibraryError::Validation("library path is not configured".to_string()))?;
        Ok(ImportOptions {
            source_path: source_path.into(),
            library_root: library_root.to_path_buf(),
            film_stock: film_stock.to_string(),
            camera: camera.to_string(),
            lens: None,
            shoot_date: shoot_date.to_string(),
            roll_name: None,
            lab_info: None,
            notes: None,
            location: None,
            mode: self.config.import.default_mode,
            auto_write_exif: self.config.import.auto_write_exif,
        })
    }

    // Rolls

    pub fn list_rolls(&self) -> LibraryResult<Vec<Roll>> {
        self.db.list_rolls()
    }

    pub fn list_rolls_filtered(&self, filters: &RollFilters) -> LibraryResult<Vec<Roll>> {
        let rolls = self.db.list_rolls()?;
        let counts = if filters.has_favorites {
            self.db.favorite_counts()?
        } else {
            Default::default()
        };
        Ok(filter_rolls(&rolls, filters, &counts)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn film_stocks(&self) -> LibraryResult<Vec<String>> {
        self.db.distinct_film_stocks()
    }

    pub fn cameras(&self) -> LibraryResult<Vec<String>> {
        self.db.distinct_cameras()
    }

    pub fn get_roll_with_photos(&self, roll_id: i64) -> LibraryResult<RollWithPhotos> {
        let roll = self.db.require_roll(roll_id)?;
        let photos = self.db.list_photos_by_roll(roll_id)?;
        let cover_photo = self.db.get_roll_cover(roll_id)?;
        Ok(RollWithPhotos {
            roll,
            photos,
            cover_photo,
        })
    }

    /// Save catalogue fields. When embedded fields changed, every photo in
    /// the roll becomes unsynced; with `auto_write_exif` the files are
    /// rewritten right away (failures only logged).
    pub fn update_roll(&self, edit: &RollEdit) -> LibraryResult<bool> {
        let edit = normalize_edit(edit)?;
        let Some(current) = self.db.get_roll(edit.id)? else {
            return Ok(false);
        };
        let embedded = edit.changes_embedded_fields(&current);

        if !self.db.update_roll(&edit)? {
            return Ok(false);
        }
        tracing::info!(roll_id = edit.id, embedded, "Roll updated");

        if embedded && self.config.import.auto_write_exif {
            self.auto_write(edit.id);
        }
        Ok(true)
    }

    /// Location is embedded like the other roll fields, so a change follows
    /// the same `auto_write_exif` rule as [`Library::update_roll`].
    pub fn update_roll_location(
        &self,
        roll_id: i64,
        location: Option<&Location>,
    ) -> LibraryResult<bool> {
        let Some(current) = self.db.get_roll(roll_id)? else {
            return Ok(false);
        };
        if !self.db.set_roll_location(roll_id, location)? {
            return Ok(false);
        }
        if current.location.as_ref() != location && self.config.import.auto_write_exif {
            self.auto_write(roll_id);
        }
        Ok(true)
    }

    /// Store the location on the roll and copy it to every photo without
    /// its own override. Returns how many photos now carry the roll location.
    pub fn apply_roll_location_to_photos(
        &self,
        roll_id: i64,
        lat: f64,
        lon: f64,
        city: &str,
        country: &str,
    ) -> LibraryResult<usize> {
        let location = Location::new(lat, lon, city, country)?;
        let previous = self.db.require_roll(roll_id)?.location;
        let updated = self.db.apply_roll_location(roll_id, &location)?;
        tracing::info!(roll_id, updated, location = %location.label(), "Applied roll location");

        if previous.as_ref() != Some(&location) && self.config.import.auto_write_exif {
            self.auto_write(roll_id);
        }
        Ok(updated)
    }

    /// `false` when the roll does not exist. Files that could not be removed
    /// are logged; the roll is gone from the catalogue either way.
    pub fn delete_roll(&self, roll_id: i64, policy: DeletePolicy) -> LibraryResult<bool> {
        match self.assets.delete_roll(roll_id, policy) {
            Ok(report) => {
                if !report.is_clean() {
                    tracing::warn!(
                        roll_id,
                        failed = report.failed.len(),
                        "Roll deleted, some files remain"
                    );
                }
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn delete_rolls(
        &self,
        roll_ids: &[i64],
        policy: DeletePolicy,
        cancel: &AtomicBool,
        progress_tx: Option<mpsc::Sender<DeleteProgress>>,
    ) -> RollBatchDeletion {
        self.assets.delete_rolls(roll_ids, policy, cancel, progress_tx)
    }

    // Photos

    pub fn set_photo_as_cover(&self, roll_id: i64, photo_id: i64) -> LibraryResult<bool> {
        self.db.set_cover(roll_id, photo_id)
    }

    /// The new favorite state.
    pub fn toggle_favorite(&self, photo_id: i64) -> LibraryResult<bool> {
        self.db
            .toggle_favorite(photo_id)?
            .ok_or_else(|| LibraryError::photo_not_found(photo_id))
    }

    pub fn set_favorite(&self, photo_id: i64, favorite: bool) -> LibraryResult<bool> {
        self.db.set_favorite(photo_id, favorite)
    }

    pub fn list_favorites(&self, roll_id: i64) -> LibraryResult<Vec<Photo>> {
        self.db.list_favorites_by_roll(roll_id)
    }

    pub fn update_photo_rating(&self, photo_id: i64, rating: u8) -> LibraryResult<bool> {
        self.db.update_rating(photo_id, rating)
    }

    /// Set or clear a photo's own location override.
    pub fn update_photo_location(
        &self,
        photo_id: i64,
        location: Option<&Location>,
    ) -> LibraryResult<bool> {
        self.db.set_photo_location(photo_id, location)
    }

    pub fn delete_photo(&self, photo_id: i64, delete_files: bool) -> LibraryResult<bool> {
        Ok(self.delete_photos(&[photo_id], delete_files)? == 1)
    }

    /// Remove photo rows (and optionally their derived files). Returns the
    /// number of rows removed; file cleanup failures never reduce it.
    pub fn delete_photos(&self, photo_ids: &[i64], delete_files: bool) -> LibraryResult<usize> {
        let outcome = self.assets.delete_photos(photo_ids, delete_files);
        if !outcome.missing_ids.is_empty() {
            tracing::debug!(missing = ?outcome.missing_ids, "Some photos were already gone");
        }
        if outcome.failed_ids.is_empty() {
            return Ok(outcome.deleted);
        }
        Err(LibraryError::PartialFailure {
            succeeded: outcome.deleted,
            failed: outcome.failed_ids.len(),
            sample: outcome
                .failed_ids
                .iter()
                .take(FAILURE_SAMPLE_SIZE)
                .map(|(id, reason)| format!("photo {id}: {reason}"))
                .collect(),
        })
    }

    // Import

    pub fn preview_import_count(&self, source: &Path) -> LibraryResult<usize> {
        self.importer.preview_import_count(source)
    }

    pub fn import_folder(
        &self,
        options: &ImportOptions,
        cancel: &AtomicBool,
        progress_tx: Option<mpsc::Sender<ImportProgress>>,
    ) -> LibraryResult<ImportResult> {
        self.importer.import_folder(options, cancel, progress_tx)
    }

    // EXIF

    pub fn is_exif_tool_available(&self) -> bool {
        self.exif.is_tool_available()
    }

    pub fn write_roll_exif(
        &self,
        roll_id: i64,
        auto_write: bool,
    ) -> LibraryResult<ExifWriteResult> {
        self.exif.write_roll_exif(roll_id, auto_write)
    }

    pub fn write_roll_exif_with_progress(
        &self,
        roll_id: i64,
        cancel: &AtomicBool,
        progress_tx: Option<mpsc::Sender<ExifProgress>>,
    ) -> LibraryResult<ExifWriteResult> {
        self.exif
            .write_roll_exif_with_progress(roll_id, false, cancel, progress_tx)
    }

    pub fn write_photo_exif(
        &self,
        photo_id: i64,
        payload: &PhotoExifPayload,
    ) -> LibraryResult<bool> {
        self.exif.write_photo_exif(photo_id, payload)
    }

    pub fn read_photo_exif(&self, photo_id: i64) -> LibraryResult<ExifData> {
        self.exif.read_photo_exif(photo_id)
    }

    pub fn clear_photo_exif(&self, photo_id: i64) -> LibraryResult<bool> {
        self.exif.clear_photo_exif(photo_id)
    }

    pub fn clear_roll_exif(&self, roll_id: i64) -> LibraryResult<ExifWriteResult> {
        self.exif.clear_roll_exif(roll_id)
    }

    fn auto_write(&self, roll_id: i64) {
        match self.exif.write_roll_exif(roll_id, true) {
            Ok(result) if result.has_failures() => tracing::warn!(
                roll_id,
                written = result.success_count,
                failed = result.failed_count,
                "Automatic EXIF write partially failed"
            ),
            Ok(_) => {}
            Err(e) => tracing::warn!(roll_id, error = %e, "Automatic EXIF write failed"),
        }
    }

    // Background tasks

    fn task_manager(&self) -> MutexGuard<'_, TaskManager> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn spawn_import(&self, options: ImportOptions) -> TaskHandle {
        let kind = TaskKind::Import {
            source: options.source_path.clone(),
        };
        let (id, tx, cancel_flag) = self.task_manager().register(kind);
        let importer = self.importer.clone();
        let cancel = cancel_flag.clone();

        let thread = thread::spawn(move || {
            let result = relay(&tx, import_event, |progress| {
                importer.import_folder(&options, &cancel, Some(progress))
            });
            let outcome = match result {
                Ok(result) if result.cancelled => TaskOutcome::Cancelled(result.message),
                Ok(result) => TaskOutcome::Completed(result.message),
                Err(e) => TaskOutcome::Failed(e.to_string()),
            };
            let _ = tx.send(TaskEvent::Finished(outcome));
        });

        TaskHandle {
            id,
            cancel_flag,
            thread,
        }
    }

    pub fn spawn_write_roll_exif(&self, roll_id: i64) -> TaskHandle {
        self.spawn_exif_task(TaskKind::RollExifWrite { roll_id }, roll_id, false)
    }

    pub fn spawn_clear_roll_exif(&self, roll_id: i64) -> TaskHandle {
        self.spawn_exif_task(TaskKind::RollExifClear { roll_id }, roll_id, true)
    }

    fn spawn_exif_task(&self, kind: TaskKind, roll_id: i64, clear: bool) -> TaskHandle {
        let (id, tx, cancel_flag) = self.task_manager().register(kind);
        let exif = self.exif.clone();
        let db = self.db.clone();
        let cancel = cancel_flag.clone();

        let thread = thread::spawn(move || {
            if let Ok(photos) = db.list_photos_by_roll(roll_id) {
                let _ = tx.send(TaskEvent::Started {
                    total: photos.len(),
                });
            }

            let result = relay(&tx, exif_event, |progress| {
                if clear {
                    exif.clear_roll_exif_with_progress(roll_id, &cancel, Some(progress))
                } else {
                    exif.write_roll_exif_with_progress(roll_id, false, &cancel, Some(progress))
                }
            });

            let outcome = match result {
                Ok(result) if cancel.load(Ordering::SeqCst) => TaskOutcome::Cancelled(format!(
                    "{} files updated before cancel",
                    result.success_count
                )),
                Err(_) if cancel.load(Ordering::SeqCst) => {
                    TaskOutcome::Cancelled("cancelled".to_string())
                }
                Ok(result) => match result.partial_failure() {
                    Some(err) if result.success_count == 0 => TaskOutcome::Failed(err.to_string()),
                    Some(err) => TaskOutcome::Completed(err.to_string()),
                    None => {
                        TaskOutcome::Completed(format!("{} files updated", result.success_count))
                    }
                },
                Err(e) => TaskOutcome::Failed(e.to_string()),
            };
            let _ = tx.send(TaskEvent::Finished(outcome));
        });

        TaskHandle {
            id,
            cancel_flag,
            thread,
        }
    }

    pub fn spawn_delete_rolls(&self, roll_ids: Vec<i64>, policy: DeletePolicy) -> TaskHandle {
        let kind = TaskKind::DeleteRolls {
            roll_ids: roll_ids.clone(),
        };
        let (id, tx, cancel_flag) = self.task_manager().register(kind);
        let assets = self.assets.clone();
        let cancel = cancel_flag.clone();

        let thread = thread::spawn(move || {
            let _ = tx.send(TaskEvent::Started {
                total: roll_ids.len(),
            });
            let deletion = relay(&tx, delete_event, |progress| {
                assets.delete_rolls(&roll_ids, policy, &cancel, Some(progress))
            });

            let outcome = if deletion.cancelled {
                TaskOutcome::Cancelled(format!(
                    "Deleted {} rolls before cancel",
                    deletion.deleted.len()
                ))
            } else if let Some(err) = deletion.partial_failure() {
                TaskOutcome::Failed(err.to_string())
            } else {
                TaskOutcome::Completed(format!("Deleted {} rolls", deletion.deleted.len()))
            };
            let _ = tx.send(TaskEvent::Finished(outcome));
        });

        TaskHandle {
            id,
            cancel_flag,
            thread,
        }
    }

    /// Drain task channels. Returns the tasks that finished since the last poll.
    pub fn poll_tasks(&self) -> Vec<TaskReport> {
        self.task_manager().poll()
    }

    pub fn task_progress(&self, id: TaskId) -> Option<TaskProgress> {
        self.task_manager().progress(id).cloned()
    }

    pub fn cancel_task(&self, id: TaskId) -> bool {
        self.task_manager().cancel(id)
    }

    /// Returns how many tasks were asked to stop.
    pub fn cancel_all_tasks(&self) -> usize {
        self.task_manager().cancel_all()
    }

    pub fn has_running_tasks(&self) -> bool {
        self.task_manager().is_busy()
    }
}

/// Run `work` with a progress sender whose events are translated into task
/// events on a helper thread. Returns once every event has been forwarded.
fn relay<E, R>(
    tx: &mpsc::Sender<TaskEvent>,
    convert: fn(E) -> Option<TaskEvent>,
    work: impl FnOnce(mpsc::Sender<E>) -> R,
) -> R
where
    E: Send,
{
    let (progress_tx, progress_rx) = mpsc::channel::<E>();
    thread::scope(|scope| {
        let forward = tx.clone();
        scope.spawn(move || {
            for event in progress_rx {
                if let Some(event) = convert(event) {
                    let _ = forward.send(event);
                }
            }
        });
        work(progress_tx)
    })
}

fn import_event(event: ImportProgress) -> Option<TaskEvent> {
    match event {
        ImportProgress::Started { total, .. } => Some(TaskEvent::Started { total }),
        ImportProgress::File {
            current,
            total,
            filename,
            error,
            ..
        } => Some(TaskEvent::Item {
            current,
            total,
            item: filename,
            error,
        }),
        _ => None,
    }
}

fn exif_event(event: ExifProgress) -> Option<TaskEvent> {
    Some(TaskEvent::Item {
        current: event.completed,
        total: event.total,
        item: event.path.to_string_lossy().to_string(),
        error: event.error,
    })
}

fn delete_event(event: DeleteProgress) -> Option<TaskEvent> {
    Some(TaskEvent::Item {
        current: event.current,
        total: event.total,
        item: format!("roll {}", event.roll_id),
        error: event.error,
    })
}

fn required(field: &str, value: &str) -> LibraryResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(LibraryError::Validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

fn optional(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn normalize_edit(edit: &RollEdit) -> LibraryResult<RollEdit> {
    let shoot_date = parse_shoot_date(&edit.shoot_date)?;
    Ok(RollEdit {
        id: edit.id,
        name: required("roll name", &edit.name)?,
        film_stock: required("film stock", &edit.film_stock)?,
        camera: required("camera", &edit.camera)?,
        lens: optional(&edit.lens),
        shoot_date: shoot_date.format("%Y-%m-%d").to_string(),
        lab_info: optional(&edit.lab_info),
        notes: optional(&edit.notes),
    })
}
