//! Roll and photo records.

use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::location::{effective_location, Location};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roll {
    pub id: i64,
    pub name: String,
    /// Root folder holding the originals plus `thumbnails/` and `previews/`.
    pub path: PathBuf,
    pub film_stock: String,
    pub camera: String,
    pub lens: Option<String>,
    pub shoot_date: String,
    pub lab_info: Option<String>,
    pub notes: Option<String>,
    pub location: Option<Location>,
    pub created_at: String,
    pub updated_at: String,
}

impl Roll {
    /// The location embedded for `photo`: its own override, else the roll's.
    pub fn effective_location_for<'a>(&'a self, photo: &'a Photo) -> Option<&'a Location> {
        effective_location(self.location.as_ref(), photo.own_location())
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.path.join(THUMBNAILS_DIR)
    }

    pub fn previews_dir(&self) -> PathBuf {
        self.path.join(PREVIEWS_DIR)
    }
}

pub const THUMBNAILS_DIR: &str = "thumbnails";
pub const PREVIEWS_DIR: &str = "previews";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub id: i64,
    pub roll_id: i64,
    pub filename: String,
    pub file_path: PathBuf,
    pub thumbnail_path: Option<PathBuf>,
    pub preview_path: Option<PathBuf>,
    pub rating: u8,
    pub is_cover: bool,
    pub is_favorite: bool,
    pub location: Option<Location>,
    /// The stored location is a copy of the roll's, not a user override.
    pub location_inherited: bool,
    pub exif_synced: bool,
    pub exif_written_at: Option<String>,
    pub exif_user_comment: Option<String>,
    pub exif_description: Option<String>,
    /// Bumped on every edit that invalidates the embedded payload.
    pub exif_generation: i64,
    pub created_at: String,
}

impl Photo {
    pub fn own_location(&self) -> Option<&Location> {
        if self.location_inherited {
            None
        } else {
            self.location.as_ref()
        }
    }

    /// Derived files only; the original is never part of this list.
    pub fn derived_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.thumbnail_path.iter().chain(self.preview_path.iter())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRoll {
    pub name: String,
    pub path: PathBuf,
    pub film_stock: String,
    pub camera: String,
    pub lens: Option<String>,
    pub shoot_date: String,
    pub lab_info: Option<String>,
    pub notes: Option<String>,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPhoto {
    pub roll_id: i64,
    pub filename: String,
    pub file_path: PathBuf,
    pub thumbnail_path: Option<PathBuf>,
    pub preview_path: Option<PathBuf>,
}

/// Editable roll fields. The folder path and id never change after import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollEdit {
    pub id: i64,
    pub name: String,
    pub film_stock: String,
    pub camera: String,
    pub lens: Option<String>,
    pub shoot_date: String,
    pub lab_info: Option<String>,
    pub notes: Option<String>,
}

impl RollEdit {
    /// Whether applying this edit changes anything written into the files.
    /// Name and lab info are catalogue-only.
    pub fn changes_embedded_fields(&self, current: &Roll) -> bool {
        self.film_stock != current.film_stock
            || self.camera != current.camera
            || blank_to_none(&self.lens) != blank_to_none(&current.lens)
            || self.shoot_date != current.shoot_date
            || blank_to_none(&self.notes) != blank_to_none(&current.notes)
    }
}

fn blank_to_none(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Serialize)]
pub struct RollWithPhotos {
    pub roll: Roll,
    pub photos: Vec<Photo>,
    pub cover_photo: Option<Photo>,
}

pub(crate) const ROLL_COLUMNS: &str = "id, name, path, film_stock, camera, lens, shoot_date, \
     lab_info, notes, lat, lon, city, country, created_at, updated_at";

pub(crate) const PHOTO_COLUMNS: &str = "id, roll_id, filename, file_path, thumbnail_path, \
     preview_path, rating, is_cover, is_favorite, lat, lon, city, country, location_inherited, \
     exif_synced, exif_written_at, exif_user_comment, exif_description, exif_generation, \
     created_at";

pub(crate) fn roll_from_row(row: &Row<'_>) -> rusqlite::Result<Roll> {
    Ok(Roll {
        id: row.get(0)?,
        name: row.get(1)?,
        path: PathBuf::from(row.get::<_, String>(2)?),
        film_stock: row.get(3)?,
        camera: row.get(4)?,
        lens: row.get(5)?,
        shoot_date: row.get(6)?,
        lab_info: row.get(7)?,
        notes: row.get(8)?,
        location: Location::from_parts(row.get(9)?, row.get(10)?, row.get(11)?, row.get(12)?),
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

pub(crate) fn photo_from_row(row: &Row<'_>) -> rusqlite::Result<Photo> {
    Ok(Photo {
        id: row.get(0)?,
        roll_id: row.get(1)?,
        filename: row.get(2)?,
        file_path: PathBuf::from(row.get::<_, String>(3)?),
        thumbnail_path: row.get::<_, Option<String>>(4)?.map(PathBuf::from),
        preview_path: row.get::<_, Option<String>>(5)?.map(PathBuf::from),
        rating: row.get::<_, i64>(6)?.clamp(0, 5) as u8,
        is_cover: row.get(7)?,
        is_favorite: row.get(8)?,
        location: Location::from_parts(row.get(9)?, row.get(10)?, row.get(11)?, row.get(12)?),
        location_inherited: row.get(13)?,
        exif_synced: row.get(14)?,
        exif_written_at: row.get(15)?,
        exif_user_comment: row.get(16)?,
        exif_description: row.get(17)?,
        exif_generation: row.get(18)?,
        created_at: row.get(19)?,
    })
}
