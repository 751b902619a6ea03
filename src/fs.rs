//! Filesystem capability used by import and deletion.
//!
//! Every call reports not-found and permission-denied distinctly from other
//! I/O failures so callers can decide what is tolerable.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FsError {
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => FsError::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => FsError::PermissionDenied(path.to_path_buf()),
            _ => FsError::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            FsError::NotFound(path) | FsError::PermissionDenied(path) => path,
            FsError::Io { path, .. } => path,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }
}

pub type FsResult<T> = Result<T, FsError>;

pub trait Filesystem: Send + Sync {
    fn copy(&self, src: &Path, dst: &Path) -> FsResult<()>;

    /// Move a file, falling back to copy + remove across filesystems.
    fn move_file(&self, src: &Path, dst: &Path) -> FsResult<()>;

    fn delete_file(&self, path: &Path) -> FsResult<()>;

    /// Remove a directory and everything below it.
    fn delete_dir(&self, path: &Path) -> FsResult<()>;

    fn create_dir_all(&self, path: &Path) -> FsResult<()>;

    fn exists(&self, path: &Path) -> bool;

    /// Image files directly inside `dir` (not recursive), sorted by path.
    fn list_images(&self, dir: &Path, extensions: &[String]) -> FsResult<Vec<PathBuf>>;
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl Filesystem for LocalFs {
    /// Errors name whichever side failed.
    fn copy(&self, src: &Path, dst: &Path) -> FsResult<()> {
        let mut reader = File::open(src).map_err(|e| FsError::from_io(src, e))?;
        let meta = reader.metadata().map_err(|e| FsError::from_io(src, e))?;
        if !meta.is_file() {
            return Err(FsError::Io {
                path: src.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            });
        }
        let mut writer = File::create(dst).map_err(|e| FsError::from_io(dst, e))?;
        io::copy(&mut reader, &mut writer).map_err(|e| FsError::from_io(dst, e))?;
        writer
            .set_permissions(meta.permissions())
            .map_err(|e| FsError::from_io(dst, e))
    }

    fn move_file(&self, src: &Path, dst: &Path) -> FsResult<()> {
        if std::fs::rename(src, dst).is_ok() {
            return Ok(());
        }
        self.copy(src, dst)?;
        std::fs::remove_file(src).map_err(|e| FsError::from_io(src, e))
    }

    fn delete_file(&self, path: &Path) -> FsResult<()> {
        std::fs::remove_file(path).map_err(|e| FsError::from_io(path, e))
    }

    fn delete_dir(&self, path: &Path) -> FsResult<()> {
        std::fs::remove_dir_all(path).map_err(|e| FsError::from_io(path, e))
    }

    fn create_dir_all(&self, path: &Path) -> FsResult<()> {
        std::fs::create_dir_all(path).map_err(|e| FsError::from_io(path, e))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn list_images(&self, dir: &Path, extensions: &[String]) -> FsResult<Vec<PathBuf>> {
        let meta = std::fs::metadata(dir).map_err(|e| FsError::from_io(dir, e))?;
        if !meta.is_dir() {
            return Err(FsError::Io {
                path: dir.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
            });
        }

        let mut images = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .into_iter()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    // The root itself being unreadable is fatal, a single entry is not
                    if e.depth() == 0 {
                        let source = e
                            .into_io_error()
                            .unwrap_or_else(|| io::Error::other("walk failed"));
                        return Err(FsError::from_io(dir, source));
                    }
                    tracing::debug!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            let path = entry.path();
            if entry.file_type().is_file() && has_image_extension(path, extensions) {
                images.push(path.to_path_buf());
            }
        }

        images.sort();
        Ok(images)
    }
}

pub fn has_image_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::tempdir;

    fn extensions() -> Vec<String> {
        vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()]
    }

    #[test]
    fn test_list_images_is_flat_and_sorted() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("b.JPG")).unwrap();
        File::create(dir.path().join("a.png")).unwrap();
        File::create(dir.path().join("notes.txt")).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        File::create(dir.path().join("nested/c.jpeg")).unwrap();

        let images = LocalFs.list_images(dir.path(), &extensions()).unwrap();
        let names: Vec<_> = images
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.png", "b.JPG"]);
    }

    #[test]
    fn test_list_images_missing_dir_is_not_found() {
        let dir = tempdir().unwrap();
        let err = LocalFs
            .list_images(&dir.path().join("gone"), &extensions())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_move_file_removes_source() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.jpg");
        let dst = dir.path().join("b.jpg");
        fs::write(&src, b"data").unwrap();

        LocalFs.move_file(&src, &dst).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(&dst).unwrap(), b"data");
    }

    #[test]
    fn test_copy_errors_name_the_failing_side() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.jpg");
        let dst = dir.path().join("missing_dir").join("a.jpg");

        let err = LocalFs.copy(&src, &dir.path().join("b.jpg")).unwrap_err();
        assert_eq!(err.path(), src);

        fs::write(&src, b"data").unwrap();
        let err = LocalFs.copy(&src, &dst).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.path(), dst);

        let err = LocalFs.copy(dir.path(), &dir.path().join("c.jpg")).unwrap_err();
        assert_eq!(err.path(), dir.path());
    }

    #[test]
    fn test_delete_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = LocalFs.delete_file(&dir.path().join("nope.jpg")).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.path(), dir.path().join("nope.jpg"));
    }
}
