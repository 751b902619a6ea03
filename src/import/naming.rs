use chrono::NaiveDate;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{LibraryError, LibraryResult};
use crate::fs::Filesystem;

/// Replace characters that are unsafe in folder names with `_`.
pub fn sanitize_filename(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}

/// Validate a `YYYY-MM-DD` shoot date.
pub fn parse_shoot_date(value: &str) -> LibraryResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        LibraryError::Validation(format!("invalid shoot date {value:?}, use YYYY-MM-DD"))
    })
}

/// `2024-01-15_Kodak_Portra_400_Canon_AE-1`
pub fn roll_dir_name(date: NaiveDate, film_stock: &str, camera: &str) -> String {
    format!(
        "{}_{}_{}",
        date.format("%Y-%m-%d"),
        sanitize_filename(film_stock),
        sanitize_filename(camera)
    )
}

/// First free `<root>/<YYYY>/<name>`, `<name>_1`, `<name>_2`, ...
pub fn unique_roll_dir(
    fs: &dyn Filesystem,
    root: &Path,
    date: NaiveDate,
    name: &str,
) -> (PathBuf, String) {
    let year_dir = root.join(date.format("%Y").to_string());
    let mut candidate = name.to_string();
    let mut counter = 1;
    while fs.exists(&year_dir.join(&candidate)) {
        candidate = format!("{name}_{counter}");
        counter += 1;
    }
    (year_dir.join(&candidate), candidate)
}

/// Keep file stems unique inside a roll, since derived files are named by stem.
/// `used` holds lowercase stems already taken.
pub fn unique_target_name(source: &Path, used: &mut HashSet<String>) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "image".to_string());
    let extension = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut candidate = stem.clone();
    let mut counter = 1;
    while used.contains(&candidate.to_lowercase()) {
        candidate = format!("{stem}_{counter}");
        counter += 1;
    }
    used.insert(candidate.to_lowercase());
    format!("{candidate}{extension}")
}
