mod models;
mod photos;
mod rolls;
mod schema;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{LibraryError, LibraryResult};

pub use models::{
    NewPhoto, NewRoll, Photo, Roll, RollEdit, RollWithPhotos, PREVIEWS_DIR, THUMBNAILS_DIR,
};
pub use photos::PhotoBatchDelete;
pub use schema::{MIGRATIONS, SCHEMA};

/// The metadata store.
///
/// One SQLite connection behind a mutex, so a `Database` can be shared across
/// background workers through an `Arc`. Every multi-row change (cover swap,
/// roll removal, location propagation) runs in a single transaction.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> LibraryResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| LibraryError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> LibraryResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> LibraryResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn initialize(&self) -> LibraryResult<()> {
        let conn = self.conn();
        conn.execute_batch(SCHEMA)?;
        for migration in MIGRATIONS {
            // Fails harmlessly when the column already exists
            let _ = conn.execute(migration, []);
        }
        Ok(())
    }

    /// A poisoned lock only means another thread panicked mid-query; SQLite
    /// has already rolled back any open transaction, so the connection is reusable.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn roll_count(&self) -> LibraryResult<i64> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM rolls", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn photo_count(&self) -> LibraryResult<i64> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM photos", [], |row| row.get(0))?;
        Ok(count)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_initialize_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/film_vault.db");
        let db = Database::open(&path).unwrap();
        db.initialize().unwrap();
        db.initialize().unwrap();
        assert!(path.exists());
        assert_eq!(db.roll_count().unwrap(), 0);
    }

    #[test]
    fn test_counts() {
        let db = memory_db();
        let roll = db.create_roll(&new_roll("a")).unwrap();
        db.create_photo(&new_photo(&roll, "1.jpg")).unwrap();
        db.create_photo(&new_photo(&roll, "2.jpg")).unwrap();
        assert_eq!(db.roll_count().unwrap(), 1);
        assert_eq!(db.photo_count().unwrap(), 2);
    }
}
