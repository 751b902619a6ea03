use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::ImportConfig;
use crate::db::{PREVIEWS_DIR, THUMBNAILS_DIR};
use crate::error::{LibraryError, LibraryResult};
use crate::fs::Filesystem;

/// Produces the derived files that live next to a roll's originals.
pub trait DerivativeGenerator: Send + Sync {
    /// Write `<roll_dir>/thumbnails/<stem>.jpg` and return its path.
    fn generate_thumbnail(&self, original: &Path, roll_dir: &Path) -> LibraryResult<PathBuf>;

    /// Write `<roll_dir>/previews/<stem>.jpg` and return its path.
    fn generate_preview(&self, original: &Path, roll_dir: &Path) -> LibraryResult<PathBuf>;
}

/// JPEG derivatives rendered with the `image` crate. Output folders are
/// created through the same [`Filesystem`] the rest of the roll uses.
#[derive(Clone)]
pub struct ImageDerivatives {
    fs: Arc<dyn Filesystem>,
    thumbnail_width: u32,
    preview_width: u32,
}

impl ImageDerivatives {
    pub fn new(fs: Arc<dyn Filesystem>, thumbnail_width: u32, preview_width: u32) -> Self {
        Self {
            fs,
            thumbnail_width: thumbnail_width.max(1),
            preview_width: preview_width.max(1),
        }
    }

    pub fn from_config(fs: Arc<dyn Filesystem>, config: &ImportConfig) -> Self {
        Self::new(fs, config.thumbnail_width, config.preview_width)
    }

    fn render(
        &self,
        original: &Path,
        dest_dir: &Path,
        width: u32,
        upscale: bool,
    ) -> LibraryResult<PathBuf> {
        self.fs.create_dir_all(dest_dir)?;

        let img = image::open(original).map_err(|e| image_error(original, e))?;
        let resized = if upscale || img.width() > width {
            let height = scaled_height(img.width(), img.height(), width);
            img.resize_exact(width, height, FilterType::Lanczos3)
        } else {
            img
        };

        let dest = dest_dir.join(derivative_name(original));
        // JPEG has no alpha channel
        DynamicImage::ImageRgb8(resized.to_rgb8())
            .save_with_format(&dest, ImageFormat::Jpeg)
            .map_err(|e| image_error(&dest, e))?;
        Ok(dest)
    }
}

impl DerivativeGenerator for ImageDerivatives {
    fn generate_thumbnail(&self, original: &Path, roll_dir: &Path) -> LibraryResult<PathBuf> {
        self.render(original, &roll_dir.join(THUMBNAILS_DIR), self.thumbnail_width, true)
    }

    fn generate_preview(&self, original: &Path, roll_dir: &Path) -> LibraryResult<PathBuf> {
        self.render(original, &roll_dir.join(PREVIEWS_DIR), self.preview_width, false)
    }
}

/// `scan_012.tif` becomes `scan_012.jpg`.
pub fn derivative_name(original: &Path) -> String {
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "image".to_string());
    format!("{stem}.jpg")
}

fn scaled_height(width: u32, height: u32, target_width: u32) -> u32 {
    if width == 0 {
        return height.max(1);
    }
    let scaled = (height as f64 * target_width as f64 / width as f64).round() as u32;
    scaled.max(1)
}

fn image_error(path: &Path, err: image::ImageError) -> LibraryError {
    match err {
        image::ImageError::IoError(source) => LibraryError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => LibraryError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, other.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FsError, FsResult, LocalFs};
    use image::{GenericImageView, RgbImage};
    use tempfile::tempdir;

    #[test]
    fn test_scaled_height_keeps_aspect() {
        assert_eq!(scaled_height(3000, 2000, 300), 200);
        assert_eq!(scaled_height(1000, 1, 300), 1);
    }

    #[test]
    fn test_thumbnail_and_preview_sizes() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("frame_01.png");
        RgbImage::new(600, 400).save(&original).unwrap();

        let generator = ImageDerivatives::new(Arc::new(LocalFs), 300, 1920);
        let thumb = generator.generate_thumbnail(&original, dir.path()).unwrap();
        let preview = generator.generate_preview(&original, dir.path()).unwrap();

        assert_eq!(thumb, dir.path().join("thumbnails/frame_01.jpg"));
        assert_eq!(image::open(&thumb).unwrap().dimensions(), (300, 200));
        // Smaller than the preview width: re-encoded at the original size
        assert_eq!(image::open(&preview).unwrap().dimensions(), (600, 400));
    }

    /// Refuses to create directories; everything else is the real disk.
    struct NoNewDirs;

    impl Filesystem for NoNewDirs {
        fn copy(&self, src: &Path, dst: &Path) -> FsResult<()> {
            LocalFs.copy(src, dst)
        }
        fn move_file(&self, src: &Path, dst: &Path) -> FsResult<()> {
            LocalFs.move_file(src, dst)
        }
        fn delete_file(&self, path: &Path) -> FsResult<()> {
            LocalFs.delete_file(path)
        }
        fn delete_dir(&self, path: &Path) -> FsResult<()> {
            LocalFs.delete_dir(path)
        }
        fn create_dir_all(&self, path: &Path) -> FsResult<()> {
            Err(FsError::PermissionDenied(path.to_path_buf()))
        }
        fn exists(&self, path: &Path) -> bool {
            LocalFs.exists(path)
        }
        fn list_images(&self, dir: &Path, extensions: &[String]) -> FsResult<Vec<PathBuf>> {
            LocalFs.list_images(dir, extensions)
        }
    }

    #[test]
    fn test_output_folder_goes_through_filesystem() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("frame_01.png");
        RgbImage::new(60, 40).save(&original).unwrap();

        let generator = ImageDerivatives::new(Arc::new(NoNewDirs), 30, 60);
        assert!(generator.generate_thumbnail(&original, dir.path()).is_err());
        assert!(!dir.path().join("thumbnails").exists());
    }

    #[test]
    fn test_unreadable_original_is_an_error() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("broken.jpg");
        std::fs::write(&original, b"not an image").unwrap();
        let generator = ImageDerivatives::new(Arc::new(LocalFs), 300, 1920);
        assert!(generator.generate_thumbnail(&original, dir.path()).is_err());
    }
}
