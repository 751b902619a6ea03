//! Photo records: cover, favorite, rating, location override and sync state.

use rusqlite::{params, Connection};

use super::models::{photo_from_row, NewPhoto, Photo, PHOTO_COLUMNS};
use super::rolls::{location_params, query_roll};
use super::Database;
use crate::error::{LibraryError, LibraryResult};
use crate::location::{effective_location, Location};

/// Outcome of a best-effort batch removal. Each id lands in exactly one list.
#[derive(Debug, Default)]
pub struct PhotoBatchDelete {
    pub deleted: Vec<Photo>,
    pub missing: Vec<i64>,
    pub failed: Vec<(i64, String)>,
}

fn query_photo(conn: &Connection, id: i64) -> rusqlite::Result<Option<Photo>> {
    let result = conn.query_row(
        &format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE id = ?1"),
        [id],
        photo_from_row,
    );
    match result {
        Ok(photo) => Ok(Some(photo)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Make sure a non-empty roll has a cover, promoting the first photo by
/// filename when it has none. Returns the cover id.
fn ensure_cover_in(conn: &Connection, roll_id: i64) -> rusqlite::Result<Option<i64>> {
    let existing = conn.query_row(
        "SELECT id FROM photos WHERE roll_id = ?1 AND is_cover = 1 LIMIT 1",
        [roll_id],
        |row| row.get::<_, i64>(0),
    );
    match existing {
        Ok(id) => return Ok(Some(id)),
        Err(rusqlite::Error::QueryReturnedNoRows) => {}
        Err(e) => return Err(e),
    }

    let first = conn.query_row(
        "SELECT id FROM photos WHERE roll_id = ?1 ORDER BY filename, id LIMIT 1",
        [roll_id],
        |row| row.get::<_, i64>(0),
    );
    match first {
        Ok(id) => {
            conn.execute("UPDATE photos SET is_cover = 1 WHERE id = ?1", [id])?;
            Ok(Some(id))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

impl Database {
    /// Insert a photo. The first photo of a roll becomes its cover.
    pub fn create_photo(&self, photo: &NewPhoto) -> LibraryResult<Photo> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO photos
                (roll_id, filename, file_path, thumbnail_path, preview_path, is_cover)
            VALUES (?1, ?2, ?3, ?4, ?5,
                    NOT EXISTS (SELECT 1 FROM photos WHERE roll_id = ?1 AND is_cover = 1))
            "#,
            params![
                photo.roll_id,
                photo.filename,
                photo.file_path.to_string_lossy(),
                photo.thumbnail_path.as_ref().map(|p| p.to_string_lossy().to_string()),
                photo.preview_path.as_ref().map(|p| p.to_string_lossy().to_string()),
            ],
        )?;
        let id = conn.last_insert_rowid();
        query_photo(&conn, id)?.ok_or_else(|| LibraryError::photo_not_found(id))
    }

    pub fn get_photo(&self, id: i64) -> LibraryResult<Option<Photo>> {
        Ok(query_photo(&self.conn(), id)?)
    }

    pub fn require_photo(&self, id: i64) -> LibraryResult<Photo> {
        self.get_photo(id)?
            .ok_or_else(|| LibraryError::photo_not_found(id))
    }

    pub fn list_photos_by_roll(&self, roll_id: i64) -> LibraryResult<Vec<Photo>> {
        self.query_photos(
            &format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE roll_id = ?1 ORDER BY filename, id"),
            roll_id,
        )
    }

    pub fn list_favorites_by_roll(&self, roll_id: i64) -> LibraryResult<Vec<Photo>> {
        self.query_photos(
            &format!(
                "SELECT {PHOTO_COLUMNS} FROM photos WHERE roll_id = ?1 AND is_favorite = 1
                 ORDER BY filename, id"
            ),
            roll_id,
        )
    }

    fn query_photos(&self, sql: &str, roll_id: i64) -> LibraryResult<Vec<Photo>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let photos = stmt
            .query_map([roll_id], photo_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(photos)
    }

    pub fn get_roll_cover(&self, roll_id: i64) -> LibraryResult<Option<Photo>> {
        let conn = self.conn();
        let result = conn.query_row(
            &format!(
                "SELECT {PHOTO_COLUMNS} FROM photos
                 WHERE roll_id = ?1 AND is_cover = 1 LIMIT 1"
            ),
            [roll_id],
            photo_from_row,
        );
        match result {
            Ok(photo) => Ok(Some(photo)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Make `photo_id` the only cover of `roll_id`. Returns false, changing
    /// nothing, if the photo is not in that roll.
    pub fn set_cover(&self, roll_id: i64, photo_id: i64) -> LibraryResult<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        match query_photo(&tx, photo_id)? {
            Some(photo) if photo.roll_id == roll_id => {}
            _ => return Ok(false),
        }

        tx.execute(
            "UPDATE photos SET is_cover = 0 WHERE roll_id = ?1 AND id != ?2",
            params![roll_id, photo_id],
        )?;
        tx.execute("UPDATE photos SET is_cover = 1 WHERE id = ?1", [photo_id])?;
        tx.commit()?;
        Ok(true)
    }

    pub fn ensure_cover(&self, roll_id: i64) -> LibraryResult<Option<i64>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let cover = ensure_cover_in(&tx, roll_id)?;
        tx.commit()?;
        Ok(cover)
    }

    pub fn set_favorite(&self, photo_id: i64, favorite: bool) -> LibraryResult<bool> {
        let updated = self.conn().execute(
            "UPDATE photos SET is_favorite = ?1 WHERE id = ?2",
            params![favorite, photo_id],
        )?;
        Ok(updated > 0)
    }

    /// Flip the favorite flag. Returns the new value, or None if the photo is gone.
    pub fn toggle_favorite(&self, photo_id: i64) -> LibraryResult<Option<bool>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE photos SET is_favorite = 1 - is_favorite WHERE id = ?1",
            [photo_id],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        let value = tx.query_row(
            "SELECT is_favorite FROM photos WHERE id = ?1",
            [photo_id],
            |row| row.get::<_, bool>(0),
        )?;
        tx.commit()?;
        Ok(Some(value))
    }

    /// Photo-level writes embed the rating, so a changed rating leaves the
    /// file stale.
    pub fn update_rating(&self, photo_id: i64, rating: u8) -> LibraryResult<bool> {
        if rating > 5 {
            return Err(LibraryError::Validation(format!(
                "rating {rating} out of range 0-5"
            )));
        }
        let updated = self.conn().execute(
            "UPDATE photos SET rating = ?1,
                    exif_synced = CASE WHEN rating = ?1 THEN exif_synced ELSE 0 END,
                    exif_generation = exif_generation + (rating <> ?1)
             WHERE id = ?2",
            params![rating, photo_id],
        )?;
        Ok(updated > 0)
    }

    /// Set or clear a photo's own location override.
    ///
    /// Clears the sync flag when the effective location changes.
    pub fn set_photo_location(
        &self,
        photo_id: i64,
        location: Option<&Location>,
    ) -> LibraryResult<bool> {
        if let Some(location) = location {
            location.validate()?;
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let Some(photo) = query_photo(&tx, photo_id)? else {
            return Ok(false);
        };
        let roll_location = query_roll(&tx, photo.roll_id)?.and_then(|roll| roll.location);

        let before = effective_location(roll_location.as_ref(), photo.own_location()).cloned();
        let after = effective_location(roll_location.as_ref(), location).cloned();

        let (lat, lon, city, country) = location_params(location);
        tx.execute(
            "UPDATE photos SET lat = ?1, lon = ?2, city = ?3, country = ?4, location_inherited = 0
             WHERE id = ?5",
            params![lat, lon, city, country, photo_id],
        )?;
        if before != after {
            tx.execute(
                "UPDATE photos SET exif_synced = 0, exif_generation = exif_generation + 1
                 WHERE id = ?1",
                [photo_id],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }

    /// Remove one photo row, reassigning the cover if it was the cover.
    /// Returns the removed record so the caller can clean up its files.
    pub fn delete_photo(&self, photo_id: i64) -> LibraryResult<Option<Photo>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let Some(photo) = query_photo(&tx, photo_id)? else {
            return Ok(None);
        };
        tx.execute("DELETE FROM photos WHERE id = ?1", [photo_id])?;
        if photo.is_cover {
            ensure_cover_in(&tx, photo.roll_id)?;
        }
        tx.commit()?;
        Ok(Some(photo))
    }

    /// Remove many photo rows, continuing past individual failures.
    pub fn delete_photos(&self, photo_ids: &[i64]) -> PhotoBatchDelete {
        let mut outcome = PhotoBatchDelete::default();
        for &id in photo_ids {
            match self.delete_photo(id) {
                Ok(Some(photo)) => outcome.deleted.push(photo),
                Ok(None) => outcome.missing.push(id),
                Err(e) => {
                    tracing::warn!(photo_id = id, error = %e, "Failed to delete photo row");
                    outcome.failed.push((id, e.to_string()));
                }
            }
        }
        outcome
    }

    /// Record a successful write, unless the photo was edited after the
    /// payload was built (its generation moved on). Returns whether the
    /// flag was set.
    pub fn mark_exif_synced(&self, photo_id: i64, generation: i64) -> LibraryResult<bool> {
        let updated = self.conn().execute(
            "UPDATE photos SET exif_synced = 1, exif_written_at = CURRENT_TIMESTAMP
             WHERE id = ?1 AND exif_generation = ?2",
            params![photo_id, generation],
        )?;
        Ok(updated > 0)
    }

    pub fn mark_exif_unsynced(&self, photo_id: i64) -> LibraryResult<bool> {
        let updated = self.conn().execute(
            "UPDATE photos SET exif_synced = 0, exif_generation = exif_generation + 1
             WHERE id = ?1",
            [photo_id],
        )?;
        Ok(updated > 0)
    }

    pub fn invalidate_roll_exif(&self, roll_id: i64) -> LibraryResult<usize> {
        Ok(super::rolls::invalidate_roll_photos(&self.conn(), roll_id)?)
    }

    /// Cache the user-supplied comment and description for a photo-level
    /// write. The file is now stale; returns the generation the pending write
    /// must carry, or None if the photo is gone.
    pub fn update_photo_exif_text(
        &self,
        photo_id: i64,
        user_comment: Option<&str>,
        description: Option<&str>,
    ) -> LibraryResult<Option<i64>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE photos SET exif_user_comment = ?1, exif_description = ?2,
                    exif_synced = 0, exif_generation = exif_generation + 1
             WHERE id = ?3",
            params![user_comment, description, photo_id],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        let generation = tx.query_row(
            "SELECT exif_generation FROM photos WHERE id = ?1",
            [photo_id],
            |row| row.get::<_, i64>(0),
        )?;
        tx.commit()?;
        Ok(Some(generation))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn covers(db: &Database, roll_id: i64) -> Vec<i64> {
        db.list_photos_by_roll(roll_id)
            .unwrap()
            .into_iter()
            .filter(|p| p.is_cover)
            .map(|p| p.id)
            .collect()
    }

    #[test]
    fn test_first_photo_becomes_cover() {
        let db = memory_db();
        let roll = db.create_roll(&new_roll("a")).unwrap();
        let first = db.create_photo(&new_photo(&roll, "1.jpg")).unwrap();
        let second = db.create_photo(&new_photo(&roll, "2.jpg")).unwrap();

        assert!(first.is_cover);
        assert!(!second.is_cover);
        assert_eq!(db.get_roll_cover(roll.id).unwrap().unwrap().id, first.id);
    }

    #[test]
    fn test_set_cover_keeps_exactly_one() {
        let db = memory_db();
        let roll = db.create_roll(&new_roll("a")).unwrap();
        let photos: Vec<_> = ["1.jpg", "2.jpg", "3.jpg"]
            .iter()
            .map(|name| db.create_photo(&new_photo(&roll, name)).unwrap())
            .collect();

        assert!(db.set_cover(roll.id, photos[2].id).unwrap());
        assert_eq!(covers(&db, roll.id), vec![photos[2].id]);
        assert!(db.set_cover(roll.id, photos[1].id).unwrap());
        assert_eq!(covers(&db, roll.id), vec![photos[1].id]);
    }

    #[test]
    fn test_set_cover_rejects_photo_from_other_roll() {
        let db = memory_db();
        let a = db.create_roll(&new_roll("a")).unwrap();
        let b = db.create_roll(&new_roll("b")).unwrap();
        let in_a = db.create_photo(&new_photo(&a, "1.jpg")).unwrap();
        let in_b = db.create_photo(&new_photo(&b, "1.jpg")).unwrap();

        assert!(!db.set_cover(a.id, in_b.id).unwrap());
        assert_eq!(covers(&db, a.id), vec![in_a.id]);
        assert_eq!(covers(&db, b.id), vec![in_b.id]);
    }

    #[test]
    fn test_deleting_cover_promotes_first_remaining() {
        let db = memory_db();
        let roll = db.create_roll(&new_roll("a")).unwrap();
        let c = db.create_photo(&new_photo(&roll, "c.jpg")).unwrap();
        let b = db.create_photo(&new_photo(&roll, "b.jpg")).unwrap();
        db.create_photo(&new_photo(&roll, "d.jpg")).unwrap();
        assert!(c.is_cover);

        let removed = db.delete_photo(c.id).unwrap().unwrap();
        assert_eq!(removed.filename, "c.jpg");
        assert_eq!(covers(&db, roll.id), vec![b.id]);
    }

    #[test]
    fn test_delete_photos_reports_missing_ids() {
        let db = memory_db();
        let roll = db.create_roll(&new_roll("a")).unwrap();
        let p1 = db.create_photo(&new_photo(&roll, "1.jpg")).unwrap();
        let p2 = db.create_photo(&new_photo(&roll, "2.jpg")).unwrap();

        let outcome = db.delete_photos(&[p1.id, 999, p2.id]);
        assert_eq!(outcome.deleted.len(), 2);
        assert_eq!(outcome.missing, vec![999]);
        assert!(outcome.failed.is_empty());
        assert!(db.get_roll_cover(roll.id).unwrap().is_none());
    }

    #[test]
    fn test_favorites_and_rating() {
        let db = memory_db();
        let roll = db.create_roll(&new_roll("a")).unwrap();
        let photo = db.create_photo(&new_photo(&roll, "1.jpg")).unwrap();

        assert_eq!(db.toggle_favorite(photo.id).unwrap(), Some(true));
        assert_eq!(db.list_favorites_by_roll(roll.id).unwrap().len(), 1);
        assert_eq!(db.toggle_favorite(photo.id).unwrap(), Some(false));
        assert!(db.list_favorites_by_roll(roll.id).unwrap().is_empty());
        assert_eq!(db.toggle_favorite(999).unwrap(), None);

        assert!(db.update_rating(photo.id, 4).unwrap());
        assert_eq!(db.get_photo(photo.id).unwrap().unwrap().rating, 4);
        assert!(db.update_rating(photo.id, 6).is_err());
        assert!(!db.update_rating(999, 3).unwrap());
    }

    #[test]
    fn test_rating_change_resets_sync() {
        let db = memory_db();
        let roll = db.create_roll(&new_roll("a")).unwrap();
        let photo = db.create_photo(&new_photo(&roll, "1.jpg")).unwrap();
        db.mark_exif_synced(photo.id, photo.exif_generation).unwrap();

        // Same value: nothing to re-embed
        assert!(db.update_rating(photo.id, photo.rating).unwrap());
        let same = db.get_photo(photo.id).unwrap().unwrap();
        assert!(same.exif_synced);
        assert_eq!(same.exif_generation, photo.exif_generation);

        assert!(db.update_rating(photo.id, 3).unwrap());
        let changed = db.get_photo(photo.id).unwrap().unwrap();
        assert!(!changed.exif_synced);
        assert_eq!(changed.exif_generation, photo.exif_generation + 1);
    }

    #[test]
    fn test_photo_location_override_resets_sync() {
        let db = memory_db();
        let roll = db.create_roll(&new_roll("a")).unwrap();
        let photo = db.create_photo(&new_photo(&roll, "1.jpg")).unwrap();
        db.mark_exif_synced(photo.id, photo.exif_generation).unwrap();

        assert!(db.set_photo_location(photo.id, Some(&paris())).unwrap());
        let reloaded = db.get_photo(photo.id).unwrap().unwrap();
        assert!(!reloaded.exif_synced);
        assert_eq!(reloaded.own_location(), Some(&paris()));
        assert!(!db.set_photo_location(999, None).unwrap());
    }

    #[test]
    fn test_stale_write_does_not_mark_synced() {
        let db = memory_db();
        let roll = db.create_roll(&new_roll("a")).unwrap();
        let photo = db.create_photo(&new_photo(&roll, "1.jpg")).unwrap();
        let generation = photo.exif_generation;

        // Edit lands while the write is in flight
        db.mark_exif_unsynced(photo.id).unwrap();
        assert!(!db.mark_exif_synced(photo.id, generation).unwrap());
        assert!(!db.get_photo(photo.id).unwrap().unwrap().exif_synced);

        let current = db.get_photo(photo.id).unwrap().unwrap().exif_generation;
        assert!(db.mark_exif_synced(photo.id, current).unwrap());
        let synced = db.get_photo(photo.id).unwrap().unwrap();
        assert!(synced.exif_synced);
        assert!(synced.exif_written_at.is_some());
    }

    #[test]
    fn test_update_photo_exif_text_caches_and_invalidates() {
        let db = memory_db();
        let roll = db.create_roll(&new_roll("a")).unwrap();
        let photo = db.create_photo(&new_photo(&roll, "1.jpg")).unwrap();

        let generation = db
            .update_photo_exif_text(photo.id, Some("Pushed one stop"), Some("Harbour"))
            .unwrap()
            .unwrap();
        let reloaded = db.get_photo(photo.id).unwrap().unwrap();
        assert_eq!(reloaded.exif_generation, generation);
        assert_eq!(reloaded.exif_user_comment.as_deref(), Some("Pushed one stop"));
        assert_eq!(reloaded.exif_description.as_deref(), Some("Harbour"));
        assert_eq!(db.update_photo_exif_text(999, None, None).unwrap(), None);
    }

    #[test]
    fn test_invalidate_roll_exif_counts_photos() {
        let db = memory_db();
        let roll = db.create_roll(&new_roll("a")).unwrap();
        db.create_photo(&new_photo(&roll, "1.jpg")).unwrap();
        db.create_photo(&new_photo(&roll, "2.jpg")).unwrap();
        assert_eq!(db.invalidate_roll_exif(roll.id).unwrap(), 2);
    }
}
