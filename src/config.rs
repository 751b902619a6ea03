use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub library: LibraryConfig,

    #[serde(default)]
    pub import: ImportConfig,

    #[serde(default)]
    pub exif: ExifConfig,

    #[serde(default)]
    pub geocoding: GeocodingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LibraryConfig {
    /// Root folder that receives one sub-folder per imported roll.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

impl LibraryConfig {
    /// The configured root, or `None` when unset or blank.
    pub fn root(&self) -> Option<&Path> {
        self.root
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

/// How source files reach the roll folder. One choice per import.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlacementMode {
    #[default]
    Copy,
    Move,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    #[serde(default = "default_thumbnail_width")]
    pub thumbnail_width: u32,

    #[serde(default = "default_preview_width")]
    pub preview_width: u32,

    #[serde(default)]
    pub default_mode: PlacementMode,

    /// Write roll EXIF to every photo once the import has placed its files.
    #[serde(default)]
    pub auto_write_exif: bool,
}

fn default_image_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "webp", "tif", "tiff", "bmp"]
        .iter()
        .map(|e| e.to_string())
        .collect()
}

fn default_thumbnail_width() -> u32 {
    300
}

fn default_preview_width() -> u32 {
    1920
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            image_extensions: default_image_extensions(),
            thumbnail_width: default_thumbnail_width(),
            preview_width: default_preview_width(),
            default_mode: PlacementMode::default(),
            auto_write_exif: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExifConfig {
    /// Name or path of the exiftool executable.
    #[serde(default = "default_exif_binary")]
    pub binary: String,

    /// Concurrent file writes during a roll-wide write (1-8).
    #[serde(default = "default_exif_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_exif_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_exif_binary() -> String {
    "exiftool".to_string()
}

fn default_exif_concurrency() -> usize {
    4
}

fn default_exif_timeout_secs() -> u64 {
    30
}

impl ExifConfig {
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, 8)
    }
}

impl Default for ExifConfig {
    fn default() -> Self {
        Self {
            binary: default_exif_binary(),
            concurrency: default_exif_concurrency(),
            timeout_secs: default_exif_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodingConfig {
    #[serde(default = "default_geocoding_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_geocoding_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_geocoding_limit")]
    pub result_limit: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_geocoding_endpoint() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_geocoding_timeout_secs() -> u64 {
    10
}

fn default_geocoding_limit() -> usize {
    5
}

fn default_user_agent() -> String {
    format!("FilmVault/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_geocoding_endpoint(),
            timeout_secs: default_geocoding_timeout_secs(),
            result_limit: default_geocoding_limit(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filmvault")
        .join("film_vault.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            library: LibraryConfig::default(),
            import: ImportConfig::default(),
            exif: ExifConfig::default(),
            geocoding: GeocodingConfig::default(),
        }
    }
}

impl Config {
    /// Load from `FILMVAULT_CONFIG` or the default location, writing defaults
    /// when no file exists yet.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os("FILMVAULT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(Self::config_path);
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Invalid config {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("filmvault")
    }

    fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}
