//! In-memory roll filtering for list views.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::db::Roll;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollFilters {
    /// Case-insensitive substring over name, camera, film stock, notes and lens.
    #[serde(default)]
    pub search_term: Option<String>,
    /// Exact film stock. `None` matches every roll.
    #[serde(default)]
    pub film_stock: Option<String>,
    #[serde(default)]
    pub camera: Option<String>,
    /// Inclusive `YYYY-MM-DD` bounds.
    #[serde(default)]
    pub date_from: Option<String>,
    #[serde(default)]
    pub date_to: Option<String>,
    /// Only rolls with at least one favorite photo.
    #[serde(default)]
    pub has_favorites: bool,
}

impl RollFilters {
    pub fn is_active(&self) -> bool {
        self.search_term().is_some()
            || self.film_stock.is_some()
            || self.camera.is_some()
            || self.date_from.is_some()
            || self.date_to.is_some()
            || self.has_favorites
    }

    fn search_term(&self) -> Option<String> {
        self.search_term
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
    }

    pub fn matches(&self, roll: &Roll, favorite_count: usize) -> bool {
        if let Some(term) = self.search_term() {
            let haystack = [
                roll.name.as_str(),
                roll.camera.as_str(),
                roll.film_stock.as_str(),
                roll.notes.as_deref().unwrap_or(""),
                roll.lens.as_deref().unwrap_or(""),
            ]
            .join(" ")
            .to_lowercase();
            if !haystack.contains(&term) {
                return false;
            }
        }

        if self.film_stock.as_ref().is_some_and(|f| *f != roll.film_stock) {
            return false;
        }
        if self.camera.as_ref().is_some_and(|c| *c != roll.camera) {
            return false;
        }

        // ISO dates compare correctly as strings
        if self.date_from.as_deref().is_some_and(|from| roll.shoot_date.as_str() < from) {
            return false;
        }
        if self.date_to.as_deref().is_some_and(|to| roll.shoot_date.as_str() > to) {
            return false;
        }

        !self.has_favorites || favorite_count > 0
    }
}

/// Rolls matching `filters`, in their original order.
///
/// `favorite_counts` maps roll id to favorite photo count, see
/// [`crate::db::Database::favorite_counts`].
pub fn filter_rolls<'a>(
    rolls: &'a [Roll],
    filters: &RollFilters,
    favorite_counts: &HashMap<i64, usize>,
) -> Vec<&'a Roll> {
    rolls
        .iter()
        .filter(|roll| filters.matches(roll, favorite_counts.get(&roll.id).copied().unwrap_or(0)))
        .collect()
}

pub fn unique_film_stocks(rolls: &[Roll]) -> Vec<String> {
    unique(rolls.iter().map(|r| r.film_stock.as_str()))
}

pub fn unique_cameras(rolls: &[Roll]) -> Vec<String> {
    unique(rolls.iter().map(|r| r.camera.as_str()))
}

fn unique<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    values
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn roll(id: i64, name: &str, film: &str, camera: &str, date: &str) -> Roll {
        Roll {
            id,
            name: name.to_string(),
            path: PathBuf::from(format!("/library/{name}")),
            film_stock: film.to_string(),
            camera: camera.to_string(),
            lens: None,
            shoot_date: date.to_string(),
            lab_info: None,
            notes: None,
            location: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn sample() -> Vec<Roll> {
        let mut tokyo = roll(1, "Tokyo walk", "Kodak Portra 400", "Canon AE-1", "2024-01-15");
        tokyo.notes = Some("Shinjuku at night".into());
        let mut coast = roll(2, "Coast", "Ilford HP5", "Nikon FM2", "2023-08-02");
        coast.lens = Some("Nikkor 28mm".into());
        let park = roll(3, "Park", "Kodak Portra 400", "Nikon FM2", "2024-05-20");
        vec![tokyo, coast, park]
    }

    fn ids(rolls: Vec<&Roll>) -> Vec<i64> {
        rolls.into_iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_default_filters_match_everything() {
        let rolls = sample();
        let filters = RollFilters::default();
        assert!(!filters.is_active());
        assert_eq!(ids(filter_rolls(&rolls, &filters, &HashMap::new())), vec![1, 2, 3]);
    }

    #[test]
    fn test_search_covers_notes_and_lens() {
        let rolls = sample();
        let by_notes = RollFilters {
            search_term: Some("SHINJUKU".into()),
            ..Default::default()
        };
        assert_eq!(ids(filter_rolls(&rolls, &by_notes, &HashMap::new())), vec![1]);

        let by_lens = RollFilters {
            search_term: Some("nikkor".into()),
            ..Default::default()
        };
        assert_eq!(ids(filter_rolls(&rolls, &by_lens, &HashMap::new())), vec![2]);
    }

    #[test]
    fn test_exact_fields_and_date_range() {
        let rolls = sample();
        let filters = RollFilters {
            film_stock: Some("Kodak Portra 400".into()),
            date_from: Some("2024-02-01".into()),
            ..Default::default()
        };
        assert_eq!(ids(filter_rolls(&rolls, &filters, &HashMap::new())), vec![3]);

        let filters = RollFilters {
            camera: Some("Nikon FM2".into()),
            date_to: Some("2023-12-31".into()),
            ..Default::default()
        };
        assert_eq!(ids(filter_rolls(&rolls, &filters, &HashMap::new())), vec![2]);
    }

    #[test]
    fn test_has_favorites_uses_counts() {
        let rolls = sample();
        let counts = HashMap::from([(2, 3), (3, 0)]);
        let filters = RollFilters {
            has_favorites: true,
            ..Default::default()
        };
        assert_eq!(ids(filter_rolls(&rolls, &filters, &counts)), vec![2]);
    }

    #[test]
    fn test_unique_values_are_sorted() {
        let rolls = sample();
        assert_eq!(unique_film_stocks(&rolls), vec!["Ilford HP5", "Kodak Portra 400"]);
        assert_eq!(unique_cameras(&rolls), vec!["Canon AE-1", "Nikon FM2"]);
    }
}
