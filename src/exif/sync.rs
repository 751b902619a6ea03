//! Writing catalogue metadata into files and tracking which files are current.
//!
//! Metadata rows are always committed before the tool runs, so a failed
//! write never loses the user's edit; the photo simply stays unsynced.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};

use super::{
    compose_user_comment, extract_user_note, format_shoot_date_for_exif, parse_camera_string,
    read_tags_native, ExifData, ExifTool, ExifToolError, ExifWriteResult, TagMap, WriteMode,
};
use crate::db::{Database, Photo, Roll};
use crate::error::{LibraryError, LibraryResult};

/// What a photo-level write carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PhotoExifPayload {
    /// Any subset of fields; unset fields are left alone in the file.
    Fields(ExifData),
    /// Only UserComment changes.
    CommentOnly { comment: String },
}

/// Per-file progress of a batch write. Completion order is not file order.
#[derive(Debug, Clone)]
pub struct ExifProgress {
    pub completed: usize,
    pub total: usize,
    pub path: PathBuf,
    pub error: Option<String>,
}

#[derive(Clone, Copy)]
enum BatchOp {
    Write,
    Clear,
}

struct Job {
    photo_id: i64,
    path: PathBuf,
    tags: TagMap,
    generation: i64,
}

pub struct ExifSyncEngine {
    db: Arc<Database>,
    tool: Arc<dyn ExifTool>,
    concurrency: usize,
}

impl ExifSyncEngine {
    pub fn new(db: Arc<Database>, tool: Arc<dyn ExifTool>, concurrency: usize) -> Self {
        Self {
            db,
            tool,
            concurrency: concurrency.clamp(1, 8),
        }
    }

    pub fn is_tool_available(&self) -> bool {
        self.tool.is_available()
    }

    /// Roll-level tags for one photo: camera, lens, date and the composed
    /// UserComment using the photo's effective location.
    pub fn roll_payload(roll: &Roll, photo: &Photo) -> ExifData {
        let (make, model) = parse_camera_string(&roll.camera);
        let note = photo
            .exif_user_comment
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .or(roll.notes.as_deref());
        let location = roll.effective_location_for(photo);
        let comment = compose_user_comment(&roll.film_stock, location, note);

        ExifData {
            make: Some(make).filter(|m| !m.is_empty()),
            model: Some(model).filter(|m| !m.is_empty()),
            lens_model: roll.lens.clone().filter(|l| !l.trim().is_empty()),
            date_time_original: format_shoot_date_for_exif(&roll.shoot_date),
            user_comment: Some(comment).filter(|c| !c.is_empty()),
            ..Default::default()
        }
    }

    pub fn write_roll_exif(
        &self,
        roll_id: i64,
        auto_write: bool,
    ) -> LibraryResult<ExifWriteResult> {
        self.write_roll_exif_with_progress(roll_id, auto_write, &AtomicBool::new(false), None)
    }

    /// Write roll metadata into every photo of the roll.
    ///
    /// With `auto_write` (the automatic path after import or an edit) a
    /// missing tool is a warning and an empty result; otherwise it is an error.
    pub fn write_roll_exif_with_progress(
        &self,
        roll_id: i64,
        auto_write: bool,
        cancel: &AtomicBool,
        progress_tx: Option<mpsc::Sender<ExifProgress>>,
    ) -> LibraryResult<ExifWriteResult> {
        let roll = self.db.require_roll(roll_id)?;
        let photos = self.db.list_photos_by_roll(roll_id)?;
        if photos.is_empty() {
            return Ok(ExifWriteResult::default());
        }

        if format_shoot_date_for_exif(&roll.shoot_date).is_none() {
            return Err(ExifToolError::MalformedPayload(format!(
                "shoot date {:?} is not YYYY-MM-DD",
                roll.shoot_date
            ))
            .into());
        }

        if !self.tool.is_available() {
            if auto_write {
                tracing::warn!(roll_id, "exiftool not available, skipping automatic EXIF write");
                return Ok(ExifWriteResult::default());
            }
            return Err(LibraryError::ToolUnavailable(
                "exiftool is not installed or not on PATH".to_string(),
            ));
        }

        let jobs = photos
            .iter()
            .map(|photo| Job {
                photo_id: photo.id,
                path: photo.file_path.clone(),
                tags: Self::roll_payload(&roll, photo).to_tag_map(),
                generation: photo.exif_generation,
            })
            .collect::<Vec<_>>();

        let result = self.run_batch(jobs, BatchOp::Write, cancel, progress_tx);
        tracing::info!(
            roll_id,
            succeeded = result.success_count,
            failed = result.failed_count,
            "Roll EXIF write complete"
        );
        Ok(result)
    }

    /// Write a photo-level payload. Returns true once the file is written
    /// and the photo is marked synced.
    pub fn write_photo_exif(
        &self,
        photo_id: i64,
        payload: &PhotoExifPayload,
    ) -> LibraryResult<bool> {
        let photo = self.db.require_photo(photo_id)?;
        let roll = self.db.require_roll(photo.roll_id)?;

        if let PhotoExifPayload::Fields(data) = payload {
            data.validate()?;
        }
        if !self.tool.is_available() {
            return Err(LibraryError::ToolUnavailable(
                "exiftool is not installed or not on PATH".to_string(),
            ));
        }

        let location = roll.effective_location_for(&photo).cloned();
        let (supplied_comment, description, mut data) = match payload {
            PhotoExifPayload::Fields(data) => (
                data.user_comment.clone(),
                data.description.clone(),
                data.clone(),
            ),
            PhotoExifPayload::CommentOnly { comment } => {
                (Some(comment.clone()), None, ExifData::default())
            }
        };

        // Cache the user's note, not the composed string
        let note = match &supplied_comment {
            Some(comment) => extract_user_note(
                comment,
                location.as_ref(),
                photo.exif_user_comment.as_deref(),
            ),
            None => photo.exif_user_comment.clone(),
        };
        let description = description.or_else(|| photo.exif_description.clone());

        if let Some(rating) = data.rating {
            self.db.update_rating(photo_id, rating)?;
        }
        let generation = self
            .db
            .update_photo_exif_text(photo_id, note.as_deref(), description.as_deref())?
            .ok_or_else(|| LibraryError::photo_not_found(photo_id))?;

        if supplied_comment.is_some() {
            data.user_comment = Some(compose_user_comment(
                &roll.film_stock,
                location.as_ref(),
                note.as_deref(),
            ));
        }
        data.film_stock = None;
        let tags = data.to_tag_map();

        if let Err(e) = self.tool.write_tags(&photo.file_path, &tags, WriteMode::Merge) {
            tracing::warn!(
                photo_id,
                path = ?photo.file_path,
                error = %e,
                "Photo EXIF write failed"
            );
            return Err(e.into());
        }

        if !self.db.mark_exif_synced(photo_id, generation)? {
            tracing::debug!(photo_id, "Photo changed during write, leaving it unsynced");
        }
        Ok(true)
    }

    /// Current tags of the photo's file, in the same shape used for writes.
    /// Falls back to the built-in reader when the tool is missing.
    pub fn read_photo_exif(&self, photo_id: i64) -> LibraryResult<ExifData> {
        let photo = self.db.require_photo(photo_id)?;

        let tags = if self.tool.is_available() {
            self.tool.read_tags(&photo.file_path)?
        } else {
            tracing::debug!(photo_id, "exiftool not available, using built-in reader");
            read_tags_native(&photo.file_path)?
        };
        Ok(ExifData::from_tag_map(&tags))
    }

    /// Strip all metadata from one file.
    pub fn clear_photo_exif(&self, photo_id: i64) -> LibraryResult<bool> {
        let photo = self.db.require_photo(photo_id)?;
        if !self.tool.is_available() {
            return Err(LibraryError::ToolUnavailable(
                "exiftool is not installed or not on PATH".to_string(),
            ));
        }

        // The file will no longer match the catalogue either way
        self.db.mark_exif_unsynced(photo_id)?;
        self.tool.clear_tags(&photo.file_path)?;
        Ok(true)
    }

    pub fn clear_roll_exif(&self, roll_id: i64) -> LibraryResult<ExifWriteResult> {
        self.clear_roll_exif_with_progress(roll_id, &AtomicBool::new(false), None)
    }

    pub fn clear_roll_exif_with_progress(
        &self,
        roll_id: i64,
        cancel: &AtomicBool,
        progress_tx: Option<mpsc::Sender<ExifProgress>>,
    ) -> LibraryResult<ExifWriteResult> {
        self.db.require_roll(roll_id)?;
        let photos = self.db.list_photos_by_roll(roll_id)?;
        if photos.is_empty() {
            return Ok(ExifWriteResult::default());
        }
        if !self.tool.is_available() {
            return Err(LibraryError::ToolUnavailable(
                "exiftool is not installed or not on PATH".to_string(),
            ));
        }

        self.db.invalidate_roll_exif(roll_id)?;
        let jobs = photos
            .iter()
            .map(|photo| Job {
                photo_id: photo.id,
                path: photo.file_path.clone(),
                tags: TagMap::new(),
                generation: photo.exif_generation,
            })
            .collect::<Vec<_>>();

        Ok(self.run_batch(jobs, BatchOp::Clear, cancel, progress_tx))
    }

    /// Fan the jobs out over a bounded pool. Every job ends up in the result
    /// exactly once; jobs not started before cancellation count as failed.
    fn run_batch(
        &self,
        jobs: Vec<Job>,
        op: BatchOp,
        cancel: &AtomicBool,
        progress_tx: Option<mpsc::Sender<ExifProgress>>,
    ) -> ExifWriteResult {
        let total = jobs.len();
        let completed = AtomicUsize::new(0);

        let run_one = |tx: &mut Option<mpsc::Sender<ExifProgress>>, job: &Job| {
            let outcome = if cancel.load(Ordering::Relaxed) {
                Err("cancelled".to_string())
            } else {
                self.apply(job, op).map_err(|e| e.to_string())
            };

            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(tx) = tx.as_ref() {
                let _ = tx.send(ExifProgress {
                    completed: done,
                    total,
                    path: job.path.clone(),
                    error: outcome.as_ref().err().cloned(),
                });
            }
            (job.path.clone(), outcome)
        };

        let outcomes: Vec<(PathBuf, Result<(), String>)> = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .thread_name(|i| format!("exif-writer-{i}"))
            .build()
        {
            Ok(pool) => pool.install(|| {
                jobs.par_iter()
                    .map_with(progress_tx.clone(), |tx, job| run_one(tx, job))
                    .collect()
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Could not build EXIF pool, writing sequentially");
                let mut tx = progress_tx.clone();
                jobs.iter().map(|job| run_one(&mut tx, job)).collect()
            }
        };

        let mut result = ExifWriteResult::default();
        for (path, outcome) in outcomes {
            match outcome {
                Ok(()) => result.record_success(),
                Err(reason) => {
                    tracing::warn!(path = ?path, reason = %reason, "EXIF update failed");
                    result.record_failure(path, reason);
                }
            }
        }
        result
    }

    fn apply(&self, job: &Job, op: BatchOp) -> Result<(), ExifToolError> {
        match op {
            BatchOp::Write => {
                self.tool.write_tags(&job.path, &job.tags, WriteMode::Merge)?;
                match self.db.mark_exif_synced(job.photo_id, job.generation) {
                    Ok(true) => {}
                    Ok(false) => tracing::debug!(
                        photo_id = job.photo_id,
                        "Photo changed during write, leaving it unsynced"
                    ),
                    Err(e) => tracing::error!(
                        photo_id = job.photo_id,
                        error = %e,
                        "Failed to record EXIF sync"
                    ),
                }
                Ok(())
            }
            BatchOp::Clear => self.tool.clear_tags(&job.path),
        }
    }
}
