//! Embedded metadata: the payload record, its exiftool tag mapping and
//! the per-batch write report.

mod native;
mod sync;
mod tool;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::error::{LibraryError, FAILURE_SAMPLE_SIZE};
use crate::location::Location;

pub use native::read_tags_native;
pub use sync::{ExifProgress, ExifSyncEngine, PhotoExifPayload};
pub use tool::{ExifTool, ExifToolCli};

/// Tag name (exiftool spelling, e.g. `UserComment`) to value.
pub type TagMap = BTreeMap<String, String>;

/// Separator between UserComment segments.
pub const COMMENT_SEPARATOR: &str = " | ";
const FILM_PREFIX: &str = "Shot on ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Only the given tags change; everything else in the file is kept.
    Merge,
    /// All existing metadata is stripped before the given tags are written.
    Overwrite,
}

#[derive(Debug, Error)]
pub enum ExifToolError {
    #[error("{0}")]
    Unavailable(String),

    #[error("malformed EXIF payload: {0}")]
    MalformedPayload(String),

    #[error("timed out after {seconds}s on {}", .path.display())]
    Timeout { path: PathBuf, seconds: u64 },

    #[error("file is locked: {}", .0.display())]
    FileLocked(PathBuf),

    #[error("file is read-only: {}", .0.display())]
    ReadOnly(PathBuf),

    #[error("{reason}")]
    Failed { path: PathBuf, reason: String },
}

/// The record read from and written to a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExifData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub make: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lens_model: Option<String>,
    /// `YYYY:MM:DD HH:MM:SS`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time_original: Option<String>,
    /// Parsed back out of UserComment; never written as a tag of its own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub film_stock: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub iso: Option<u32>,
    /// `f/2.8` or `2.8`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aperture: Option<String>,
    /// `1/250` or `0.5`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutter_speed: Option<String>,
    /// `50` or `50 mm`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focal_length: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_altitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ExifData {
    /// Reject values the tool would refuse or silently mangle.
    pub fn validate(&self) -> Result<(), ExifToolError> {
        let malformed = |msg: String| Err(ExifToolError::MalformedPayload(msg));

        if self.iso == Some(0) {
            return malformed("ISO must be positive".to_string());
        }
        if let Some(aperture) = &self.aperture {
            if parse_positive(strip_aperture_prefix(aperture)).is_none() {
                return malformed(format!("aperture {aperture:?} is not a positive f-number"));
            }
        }
        if let Some(shutter) = &self.shutter_speed {
            if parse_exposure(shutter).is_none() {
                return malformed(format!("shutter speed {shutter:?} is not a positive duration"));
            }
        }
        if let Some(focal) = &self.focal_length {
            if parse_positive(strip_mm_suffix(focal)).is_none() {
                return malformed(format!("focal length {focal:?} is not a positive length"));
            }
        }
        if let Some(lat) = self.gps_latitude {
            if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
                return malformed(format!("GPS latitude {lat} out of range"));
            }
        }
        if let Some(lon) = self.gps_longitude {
            if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
                return malformed(format!("GPS longitude {lon} out of range"));
            }
        }
        if self.gps_latitude.is_some() != self.gps_longitude.is_some() {
            return malformed("GPS latitude and longitude must be given together".to_string());
        }
        if let Some(alt) = self.gps_altitude {
            if !alt.is_finite() {
                return malformed("GPS altitude is not a number".to_string());
            }
        }
        if let Some(rating) = self.rating {
            if rating > 5 {
                return malformed(format!("rating {rating} out of range 0-5"));
            }
        }
        if let Some(date) = &self.date_time_original {
            if NaiveDateTime::parse_from_str(date, "%Y:%m:%d %H:%M:%S").is_err() {
                return malformed(format!("date {date:?} is not YYYY:MM:DD HH:MM:SS"));
            }
        }
        Ok(())
    }

    /// Tags for every field that is set. UserComment is passed through as is.
    pub fn to_tag_map(&self) -> TagMap {
        let mut tags = TagMap::new();
        let mut put = |key: &str, value: String| {
            tags.insert(key.to_string(), value);
        };

        if let Some(make) = non_empty(&self.make) {
            put("Make", make.to_string());
        }
        if let Some(model) = non_empty(&self.model) {
            put("Model", model.to_string());
        }
        if let Some(lens) = non_empty(&self.lens_model) {
            put("LensModel", lens.to_string());
        }
        if let Some(date) = non_empty(&self.date_time_original) {
            put("DateTimeOriginal", date.to_string());
            put("CreateDate", date.to_string());
        }
        if let Some(iso) = self.iso {
            put("ISO", iso.to_string());
        }
        if let Some(aperture) = &self.aperture {
            put("FNumber", strip_aperture_prefix(aperture).to_string());
        }
        if let Some(shutter) = &self.shutter_speed {
            put("ExposureTime", shutter.trim().trim_end_matches('s').trim().to_string());
        }
        if let Some(focal) = &self.focal_length {
            put("FocalLength", strip_mm_suffix(focal).to_string());
        }
        if let (Some(lat), Some(lon)) = (self.gps_latitude, self.gps_longitude) {
            put("GPSLatitude", lat.abs().to_string());
            put("GPSLatitudeRef", if lat < 0.0 { "S" } else { "N" }.to_string());
            put("GPSLongitude", lon.abs().to_string());
            put("GPSLongitudeRef", if lon < 0.0 { "W" } else { "E" }.to_string());
        }
        if let Some(alt) = self.gps_altitude {
            put("GPSAltitude", alt.abs().to_string());
            put("GPSAltitudeRef", if alt < 0.0 { "1" } else { "0" }.to_string());
        }
        if let Some(rating) = self.rating {
            put("Rating", rating.to_string());
        }
        if let Some(comment) = &self.user_comment {
            put("UserComment", comment.clone());
        }
        if let Some(description) = &self.description {
            put("Description", description.clone());
        }
        tags
    }

    /// Interpret tags from either the exiftool JSON output or the native reader.
    pub fn from_tag_map(tags: &TagMap) -> Self {
        let get = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| tags.get(*k))
                .map(|v| v.trim())
                .find(|v| !v.is_empty())
                .map(str::to_string)
        };

        let user_comment = get(&["UserComment"]);
        let film_stock = user_comment.as_deref().and_then(parse_film_stock);

        Self {
            make: get(&["Make"]),
            model: get(&["Model"]),
            lens_model: get(&["LensModel", "Lens"]),
            date_time_original: get(&["DateTimeOriginal", "CreateDate"]),
            film_stock,
            iso: get(&["ISO", "PhotographicSensitivity", "ISOSpeedRatings"])
                .and_then(|v| leading_number(&v))
                .filter(|v| *v > 0.0)
                .map(|v| v.round() as u32),
            aperture: get(&["FNumber", "Aperture"]).map(|v| {
                if v.starts_with('f') || v.starts_with('F') {
                    v
                } else {
                    format!("f/{v}")
                }
            }),
            shutter_speed: get(&["ExposureTime", "ShutterSpeed"]),
            focal_length: get(&["FocalLength"]),
            gps_latitude: get(&["GPSLatitude"]).and_then(|v| parse_coordinate(&v, 'S')),
            gps_longitude: get(&["GPSLongitude"]).and_then(|v| parse_coordinate(&v, 'W')),
            gps_altitude: get(&["GPSAltitude"]).and_then(|v| {
                let value = leading_number(&v)?;
                Some(if v.contains("Below") { -value } else { value })
            }),
            rating: get(&["Rating"])
                .and_then(|v| v.parse::<u8>().ok())
                .filter(|r| *r <= 5),
            user_comment,
            description: get(&["Description", "ImageDescription"]),
        }
    }
}

/// Outcome for one file that could not be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Aggregate of a batch write. Every requested file is counted exactly once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExifWriteResult {
    pub success_count: usize,
    pub failed_count: usize,
    pub failed_files: Vec<FailedFile>,
}

impl ExifWriteResult {
    pub fn record_success(&mut self) {
        self.success_count += 1;
    }

    pub fn record_failure(&mut self, path: PathBuf, reason: impl Into<String>) {
        self.failed_count += 1;
        self.failed_files.push(FailedFile {
            path,
            reason: reason.into(),
        });
    }

    pub fn total(&self) -> usize {
        self.success_count + self.failed_count
    }

    pub fn has_failures(&self) -> bool {
        self.failed_count > 0
    }

    /// The batch as an error, when anything failed.
    pub fn partial_failure(&self) -> Option<LibraryError> {
        if !self.has_failures() {
            return None;
        }
        Some(LibraryError::PartialFailure {
            succeeded: self.success_count,
            failed: self.failed_count,
            sample: self
                .failed_files
                .iter()
                .take(FAILURE_SAMPLE_SIZE)
                .map(|f| {
                    let name = f
                        .path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| f.path.display().to_string());
                    format!("{name}: {}", f.reason)
                })
                .collect(),
        })
    }
}

/// Split a free-form camera name into Make and Model.
///
/// `"Canon AE-1"` is `("Canon", "AE-1")`, a single word is all Make.
pub fn parse_camera_string(camera: &str) -> (String, String) {
    let mut parts = camera.split_whitespace();
    match parts.next() {
        Some(make) => (make.to_string(), parts.collect::<Vec<_>>().join(" ")),
        None => (String::new(), String::new()),
    }
}

/// `2024-01-15` becomes `2024:01:15 12:00:00`. Film rolls carry no time of day.
pub fn format_shoot_date_for_exif(shoot_date: &str) -> Option<String> {
    NaiveDate::parse_from_str(shoot_date.trim(), "%Y-%m-%d")
        .ok()
        .map(|date| date.format("%Y:%m:%d 12:00:00").to_string())
}

/// `"Shot on {film} | {city}, {country} | {note}"`, leaving out empty segments.
pub fn compose_user_comment(
    film_stock: &str,
    location: Option<&Location>,
    note: Option<&str>,
) -> String {
    let mut segments = Vec::with_capacity(3);
    let film_stock = film_stock.trim();
    if !film_stock.is_empty() {
        segments.push(format!("{FILM_PREFIX}{film_stock}"));
    }
    if let Some(location) = location {
        segments.push(location.label());
    }
    if let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) {
        segments.push(note.to_string());
    }
    segments.join(COMMENT_SEPARATOR)
}

/// Film stock from a composed UserComment.
pub fn parse_film_stock(comment: &str) -> Option<String> {
    let rest = comment.split(FILM_PREFIX).nth(1)?;
    let stock = rest.split(COMMENT_SEPARATOR).next().unwrap_or(rest).trim();
    (!stock.is_empty()).then(|| stock.to_string())
}

/// The user's own note inside a comment that may already have been composed.
///
/// The film segment is dropped, and so is a location segment after it: the
/// label of `location`, or any `City, Country` label when the rest is not
/// simply the `cached` note (the location may have changed since the read).
pub fn extract_user_note(
    comment: &str,
    location: Option<&Location>,
    cached: Option<&str>,
) -> Option<String> {
    let mut segments: Vec<&str> = comment.split(COMMENT_SEPARATOR).map(str::trim).collect();
    let composed = segments.first().is_some_and(|s| s.starts_with(FILM_PREFIX));
    if composed {
        segments.remove(0);
    }
    if let Some(first) = segments.first().copied() {
        let current = location.is_some_and(|l| l.label() == first);
        let stale = composed
            && looks_like_location_label(first)
            && cached.map(str::trim) != Some(segments.join(COMMENT_SEPARATOR).as_str());
        if current || stale {
            segments.remove(0);
        }
    }
    let note = segments.join(COMMENT_SEPARATOR);
    let note = note.trim();
    (!note.is_empty()).then(|| note.to_string())
}

fn looks_like_location_label(segment: &str) -> bool {
    match segment.split_once(", ") {
        Some((city, country)) => {
            !city.trim().is_empty() && !country.trim().is_empty() && !country.contains(',')
        }
        None => false,
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn strip_aperture_prefix(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix("f/")
        .or_else(|| value.strip_prefix("F/"))
        .or_else(|| value.strip_prefix('f'))
        .or_else(|| value.strip_prefix('F'))
        .unwrap_or(value)
        .trim()
}

fn strip_mm_suffix(value: &str) -> &str {
    let value = value.trim();
    value.strip_suffix("mm").unwrap_or(value).trim()
}

fn parse_positive(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite() && *v > 0.0)
}

fn parse_exposure(value: &str) -> Option<f64> {
    let value = value.trim().trim_end_matches('s').trim();
    match value.split_once('/') {
        Some((num, den)) => {
            let num = parse_positive(num.trim())?;
            let den = parse_positive(den.trim())?;
            Some(num / den)
        }
        None => parse_positive(value),
    }
}

fn leading_number(value: &str) -> Option<f64> {
    let end = value
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    value[..end].parse().ok()
}

/// `"35.6762 N"`, `"33.86 S"` or a bare signed decimal.
fn parse_coordinate(value: &str, negative_ref: char) -> Option<f64> {
    let number = leading_number(value.trim())?;
    let negative = value.trim().ends_with(negative_ref);
    Some(if negative { -number.abs() } else { number })
}
