#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use filmvault::assets::ImageDerivatives;
use filmvault::config::Config;
use filmvault::db::Database;
use filmvault::exif::{ExifTool, ExifToolError, TagMap, WriteMode};
use filmvault::fs::{Filesystem, FsError, FsResult, LocalFs};
use filmvault::import::ImportOptions;
use filmvault::Library;
use tempfile::TempDir;

/// Keeps tags per path in memory, merging like exiftool does.
#[derive(Default)]
pub struct FakeExifTool {
    pub unavailable: bool,
    pub locked: Mutex<HashSet<PathBuf>>,
    pub files: Mutex<HashMap<PathBuf, TagMap>>,
}

impl FakeExifTool {
    pub fn lock(&self, path: &Path) {
        self.locked.lock().unwrap().insert(path.to_path_buf());
    }

    pub fn tags(&self, path: &Path) -> TagMap {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_default()
    }
}

impl ExifTool for FakeExifTool {
    fn is_available(&self) -> bool {
        !self.unavailable
    }

    fn read_tags(&self, path: &Path) -> Result<TagMap, ExifToolError> {
        Ok(self.tags(path))
    }

    fn write_tags(&self, path: &Path, tags: &TagMap, mode: WriteMode) -> Result<(), ExifToolError> {
        if self.locked.lock().unwrap().contains(path) {
            return Err(ExifToolError::FileLocked(path.to_path_buf()));
        }
        let mut files = self.files.lock().unwrap();
        let entry = files.entry(path.to_path_buf()).or_default();
        if mode == WriteMode::Overwrite {
            entry.clear();
        }
        entry.extend(tags.clone());
        Ok(())
    }

    fn clear_tags(&self, path: &Path) -> Result<(), ExifToolError> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }
}

/// The real filesystem, except for copies and deletes of named files.
#[derive(Default)]
pub struct FlakyFs {
    pub fail_copy: HashSet<String>,
    pub fail_delete: HashSet<String>,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

impl Filesystem for FlakyFs {
    fn copy(&self, src: &Path, dst: &Path) -> FsResult<()> {
        if self.fail_copy.contains(&file_name(src)) {
            return Err(FsError::PermissionDenied(src.to_path_buf()));
        }
        LocalFs.copy(src, dst)
    }

    fn move_file(&self, src: &Path, dst: &Path) -> FsResult<()> {
        LocalFs.move_file(src, dst)
    }

    fn delete_file(&self, path: &Path) -> FsResult<()> {
        if self.fail_delete.contains(&file_name(path)) {
            return Err(FsError::PermissionDenied(path.to_path_buf()));
        }
        LocalFs.delete_file(path)
    }

    fn delete_dir(&self, path: &Path) -> FsResult<()> {
        LocalFs.delete_dir(path)
    }

    fn create_dir_all(&self, path: &Path) -> FsResult<()> {
        LocalFs.create_dir_all(path)
    }

    fn exists(&self, path: &Path) -> bool {
        LocalFs.exists(path)
    }

    fn list_images(&self, dir: &Path, extensions: &[String]) -> FsResult<Vec<PathBuf>> {
        LocalFs.list_images(dir, extensions)
    }
}

pub struct TestLibrary {
    pub dir: TempDir,
    pub source: PathBuf,
    pub library_root: PathBuf,
    pub tool: Arc<FakeExifTool>,
    pub library: Library,
}

impl TestLibrary {
    pub fn new(fs: FlakyFs) -> Self {
        Self::with_tool(fs, FakeExifTool::default())
    }

    pub fn with_tool(fs: FlakyFs, tool: FakeExifTool) -> Self {
        Self::build(fs, tool, false)
    }

    /// Library with `auto_write_exif` switched on.
    pub fn auto_writing(fs: FlakyFs) -> Self {
        Self::build(fs, FakeExifTool::default(), true)
    }

    fn build(fs: FlakyFs, tool: FakeExifTool, auto_write_exif: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("scans");
        let library_root = dir.path().join("library");
        std::fs::create_dir_all(&source).unwrap();

        let mut config = Config::default();
        config.db_path = dir.path().join("film_vault.db");
        config.library.root = Some(library_root.clone());
        config.import.auto_write_exif = auto_write_exif;

        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let tool = Arc::new(tool);
        let fs: Arc<dyn Filesystem> = Arc::new(fs);
        let library = Library::with_parts(
            Arc::new(db),
            fs.clone(),
            Arc::new(ImageDerivatives::new(fs, 32, 64)),
            tool.clone(),
            config,
        );

        Self {
            dir,
            source,
            library_root,
            tool,
            library,
        }
    }

    /// Write small PNG scans into the source folder.
    pub fn add_scans(&self, names: &[&str]) {
        for name in names {
            image::RgbImage::new(48, 32)
                .save(self.source.join(name))
                .unwrap();
        }
    }

    pub fn options(&self) -> ImportOptions {
        self.library
            .import_options(&self.source, "Kodak Portra 400", "Canon AE-1", "2024-01-15")
            .unwrap()
    }
}
