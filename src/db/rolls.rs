//! Roll records and the roll-wide invariants that hang off them.

use rusqlite::{params, Connection};
use std::collections::HashMap;

use super::models::{roll_from_row, NewRoll, Roll, RollEdit, ROLL_COLUMNS};
use super::Database;
use crate::error::{LibraryError, LibraryResult};
use crate::location::Location;

/// Photos whose effective location is the roll's: no override, or an
/// override that is only an inherited copy.
pub(super) const NO_OWN_LOCATION: &str = "(location_inherited = 1 OR lat IS NULL OR lon IS NULL \
     OR city IS NULL OR country IS NULL OR city = '' OR country = '')";

pub(super) fn location_params(
    location: Option<&Location>,
) -> (Option<f64>, Option<f64>, Option<&str>, Option<&str>) {
    match location {
        Some(loc) => (
            Some(loc.lat),
            Some(loc.lon),
            Some(loc.city.as_str()),
            Some(loc.country.as_str()),
        ),
        None => (None, None, None, None),
    }
}

pub(super) fn query_roll(conn: &Connection, id: i64) -> rusqlite::Result<Option<Roll>> {
    let result = conn.query_row(
        &format!("SELECT {ROLL_COLUMNS} FROM rolls WHERE id = ?1"),
        [id],
        roll_from_row,
    );
    match result {
        Ok(roll) => Ok(Some(roll)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Mark every photo of a roll as needing a rewrite.
pub(super) fn invalidate_roll_photos(conn: &Connection, roll_id: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE photos SET exif_synced = 0, exif_generation = exif_generation + 1
         WHERE roll_id = ?1",
        [roll_id],
    )
}

fn invalidate_location_followers(conn: &Connection, roll_id: i64) -> rusqlite::Result<usize> {
    conn.execute(
        &format!(
            "UPDATE photos SET exif_synced = 0, exif_generation = exif_generation + 1
             WHERE roll_id = ?1 AND {NO_OWN_LOCATION}"
        ),
        [roll_id],
    )
}

fn write_roll_location(
    conn: &Connection,
    roll_id: i64,
    location: Option<&Location>,
) -> rusqlite::Result<usize> {
    let (lat, lon, city, country) = location_params(location);
    conn.execute(
        "UPDATE rolls SET lat = ?1, lon = ?2, city = ?3, country = ?4,
                updated_at = CURRENT_TIMESTAMP
         WHERE id = ?5",
        params![lat, lon, city, country, roll_id],
    )
}

impl Database {
    pub fn create_roll(&self, roll: &NewRoll) -> LibraryResult<Roll> {
        if let Some(location) = &roll.location {
            location.validate()?;
        }
        let (lat, lon, city, country) = location_params(roll.location.as_ref());

        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO rolls (name, path, film_stock, camera, lens, shoot_date,
                               lab_info, notes, lat, lon, city, country)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                roll.name,
                roll.path.to_string_lossy(),
                roll.film_stock,
                roll.camera,
                roll.lens,
                roll.shoot_date,
                roll.lab_info,
                roll.notes,
                lat,
                lon,
                city,
                country,
            ],
        )?;
        let id = conn.last_insert_rowid();
        query_roll(&conn, id)?.ok_or_else(|| LibraryError::roll_not_found(id))
    }

    pub fn get_roll(&self, id: i64) -> LibraryResult<Option<Roll>> {
        Ok(query_roll(&self.conn(), id)?)
    }

    pub fn require_roll(&self, id: i64) -> LibraryResult<Roll> {
        self.get_roll(id)?
            .ok_or_else(|| LibraryError::roll_not_found(id))
    }

    /// Newest shoot first.
    pub fn list_rolls(&self) -> LibraryResult<Vec<Roll>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ROLL_COLUMNS} FROM rolls ORDER BY shoot_date DESC, id DESC"
        ))?;
        let rolls = stmt
            .query_map([], roll_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rolls)
    }

    /// Apply an edit. Returns false when the roll does not exist.
    ///
    /// Any change to a field that ends up in the files clears the sync flag
    /// of every photo in the roll, inside the same transaction.
    pub fn update_roll(&self, edit: &RollEdit) -> LibraryResult<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let Some(current) = query_roll(&tx, edit.id)? else {
            return Ok(false);
        };

        tx.execute(
            r#"
            UPDATE rolls
            SET name = ?1, film_stock = ?2, camera = ?3, lens = ?4, shoot_date = ?5,
                lab_info = ?6, notes = ?7, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?8
            "#,
            params![
                edit.name,
                edit.film_stock,
                edit.camera,
                edit.lens,
                edit.shoot_date,
                edit.lab_info,
                edit.notes,
                edit.id,
            ],
        )?;

        if edit.changes_embedded_fields(&current) {
            let invalidated = invalidate_roll_photos(&tx, edit.id)?;
            tracing::debug!(roll_id = edit.id, invalidated, "Roll edit invalidated EXIF");
        }

        tx.commit()?;
        Ok(true)
    }

    /// Set or clear the roll location. Inherited photo copies follow the roll;
    /// photo overrides are untouched.
    pub fn set_roll_location(
        &self,
        roll_id: i64,
        location: Option<&Location>,
    ) -> LibraryResult<bool> {
        if let Some(location) = location {
            location.validate()?;
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let Some(current) = query_roll(&tx, roll_id)? else {
            return Ok(false);
        };

        write_roll_location(&tx, roll_id, location)?;

        match location {
            Some(loc) => {
                tx.execute(
                    "UPDATE photos SET lat = ?1, lon = ?2, city = ?3, country = ?4
                     WHERE roll_id = ?5 AND location_inherited = 1",
                    params![loc.lat, loc.lon, loc.city, loc.country, roll_id],
                )?;
            }
            None => {
                tx.execute(
                    "UPDATE photos SET lat = NULL, lon = NULL, city = NULL, country = NULL,
                            location_inherited = 0
                     WHERE roll_id = ?1 AND location_inherited = 1",
                    [roll_id],
                )?;
            }
        }

        if current.location.as_ref() != location {
            invalidate_location_followers(&tx, roll_id)?;
        }

        tx.commit()?;
        Ok(true)
    }

    /// Store `location` on the roll and copy it onto every photo that has no
    /// location of its own, flagging the copies as inherited.
    ///
    /// Returns the number of photos written. Repeating the call with the same
    /// location writes the same photos again with no other effect.
    pub fn apply_roll_location(&self, roll_id: i64, location: &Location) -> LibraryResult<usize> {
        location.validate()?;

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let current =
            query_roll(&tx, roll_id)?.ok_or_else(|| LibraryError::roll_not_found(roll_id))?;

        write_roll_location(&tx, roll_id, Some(location))?;
        if current.location.as_ref() != Some(location) {
            invalidate_location_followers(&tx, roll_id)?;
        }

        let updated = tx.execute(
            &format!(
                "UPDATE photos SET lat = ?1, lon = ?2, city = ?3, country = ?4,
                        location_inherited = 1
                 WHERE roll_id = ?5 AND {NO_OWN_LOCATION}"
            ),
            params![location.lat, location.lon, location.city, location.country, roll_id],
        )?;

        tx.commit()?;
        Ok(updated)
    }

    /// Remove a roll and all of its photo rows. Returns false if it was
    /// already gone.
    pub fn delete_roll(&self, roll_id: i64) -> LibraryResult<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM photos WHERE roll_id = ?1", [roll_id])?;
        let removed = tx.execute("DELETE FROM rolls WHERE id = ?1", [roll_id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    /// Favorite count per roll; rolls without favorites are absent.
    pub fn favorite_counts(&self) -> LibraryResult<HashMap<i64, usize>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT roll_id, COUNT(*) FROM photos WHERE is_favorite = 1 GROUP BY roll_id",
        )?;
        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(counts)
    }

    pub fn distinct_film_stocks(&self) -> LibraryResult<Vec<String>> {
        self.distinct_roll_column("film_stock")
    }

    pub fn distinct_cameras(&self) -> LibraryResult<Vec<String>> {
        self.distinct_roll_column("camera")
    }

    fn distinct_roll_column(&self, column: &'static str) -> LibraryResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT {column} FROM rolls WHERE {column} != ''
             ORDER BY {column} COLLATE NOCASE"
        ))?;
        let values = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(values)
    }
}
