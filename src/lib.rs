//! FilmVault: a catalogue of scanned film rolls.
//!
//! Rolls are imported from a folder into `<library>/<year>/<roll>`, tracked
//! in SQLite, and their catalogue metadata is embedded into the image files
//! with exiftool.

pub mod assets;
pub mod config;
pub mod db;
pub mod error;
pub mod exif;
pub mod filter;
pub mod fs;
pub mod geocoding;
pub mod import;
pub mod library;
pub mod location;
pub mod logging;
pub mod tasks;

pub use config::Config;
pub use error::{LibraryError, LibraryResult};
pub use library::Library;
pub use location::Location;
