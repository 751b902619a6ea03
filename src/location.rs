//! Location precedence between rolls and photos.
//!
//! A location is all-or-nothing: latitude, longitude, city and country are
//! either all present or the location is absent.

use serde::{Deserialize, Serialize};

use crate::error::{LibraryError, LibraryResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    pub city: String,
    pub country: String,
}

impl Location {
    /// Build a validated location.
    pub fn new(
        lat: f64,
        lon: f64,
        city: impl Into<String>,
        country: impl Into<String>,
    ) -> LibraryResult<Self> {
        let location = Self {
            lat,
            lon,
            city: city.into().trim().to_string(),
            country: country.into().trim().to_string(),
        };
        location.validate()?;
        Ok(location)
    }

    pub fn validate(&self) -> LibraryResult<()> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(LibraryError::Validation(format!(
                "latitude {} out of range",
                self.lat
            )));
        }
        if !self.lon.is_finite() || !(-180.0..=180.0).contains(&self.lon) {
            return Err(LibraryError::Validation(format!(
                "longitude {} out of range",
                self.lon
            )));
        }
        if self.city.is_empty() || self.country.is_empty() {
            return Err(LibraryError::Validation(
                "location needs both city and country".to_string(),
            ));
        }
        Ok(())
    }

    /// Rebuild from nullable storage columns. Any missing part means no location.
    pub fn from_parts(
        lat: Option<f64>,
        lon: Option<f64>,
        city: Option<String>,
        country: Option<String>,
    ) -> Option<Self> {
        match (lat, lon, city, country) {
            (Some(lat), Some(lon), Some(city), Some(country))
                if !city.is_empty() && !country.is_empty() =>
            {
                Some(Self {
                    lat,
                    lon,
                    city,
                    country,
                })
            }
            _ => None,
        }
    }

    /// `"{city}, {country}"`, the form embedded in UserComment.
    pub fn label(&self) -> String {
        format!("{}, {}", self.city, self.country)
    }
}

/// Photo-overrides-roll precedence.
///
/// `photo` must be the photo's own override (not a copy inherited from the
/// roll), see [`crate::db::Photo::own_location`].
pub fn effective_location<'a>(
    roll: Option<&'a Location>,
    photo: Option<&'a Location>,
) -> Option<&'a Location> {
    photo.or(roll)
}
