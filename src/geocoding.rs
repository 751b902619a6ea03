//! City lookup for roll and photo locations (OpenStreetMap Nominatim).

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::GeocodingConfig;
use crate::error::{LibraryError, LibraryResult};
use crate::location::Location;

/// Queries shorter than this never reach the network.
pub const MIN_QUERY_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitySuggestion {
    pub lat: f64,
    pub lon: f64,
    pub city: String,
    pub country: String,
    pub display_name: String,
}

impl CitySuggestion {
    /// Fails when the place has no recognisable city or country.
    pub fn to_location(&self) -> LibraryResult<Location> {
        Location::new(self.lat, self.lon, self.city.clone(), self.country.clone())
    }
}

pub trait Geocoder: Send + Sync {
    fn search_cities(&self, query: &str) -> LibraryResult<Vec<CitySuggestion>>;

    fn reverse_geocode(&self, _lat: f64, _lon: f64) -> LibraryResult<Option<CitySuggestion>> {
        Ok(None)
    }
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    address: NominatimAddress,
}

#[derive(Debug, Default, Deserialize)]
struct NominatimAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    suburb: Option<String>,
    county: Option<String>,
    country: Option<String>,
}

impl NominatimAddress {
    fn city(&self) -> String {
        [&self.city, &self.town, &self.village, &self.suburb, &self.county]
            .into_iter()
            .flatten()
            .find(|v| !v.is_empty())
            .cloned()
            .unwrap_or_default()
    }
}

impl NominatimPlace {
    fn into_suggestion(self) -> Option<CitySuggestion> {
        let lat = self.lat.trim().parse().ok()?;
        let lon = self.lon.trim().parse().ok()?;
        Some(CitySuggestion {
            lat,
            lon,
            city: self.address.city(),
            country: self.address.country.clone().unwrap_or_default(),
            display_name: self.display_name,
        })
    }
}

pub struct NominatimGeocoder {
    agent: ureq::Agent,
    endpoint: String,
    limit: usize,
    timeout: Duration,
}

impl NominatimGeocoder {
    pub fn new(config: &GeocodingConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(&config.user_agent)
            .build();
        Self {
            agent,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            limit: config.result_limit.max(1),
            timeout,
        }
    }

    fn map_error(&self, operation: &str, err: ureq::Error) -> LibraryError {
        match err {
            ureq::Error::Status(code, _) => {
                LibraryError::Network(format!("{operation}: Nominatim returned HTTP {code}"))
            }
            ureq::Error::Transport(transport) => {
                if is_timeout(&transport) {
                    LibraryError::Timeout {
                        operation: operation.to_string(),
                        seconds: self.timeout.as_secs(),
                    }
                } else {
                    LibraryError::Network(format!("{operation}: {transport}"))
                }
            }
        }
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    let mut source = std::error::Error::source(transport);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ) {
                return true;
            }
        }
        source = err.source();
    }
    false
}

impl Geocoder for NominatimGeocoder {
    fn search_cities(&self, query: &str) -> LibraryResult<Vec<CitySuggestion>> {
        let query = query.trim();
        if query.chars().count() < MIN_QUERY_LEN {
            return Ok(Vec::new());
        }

        tracing::debug!(query, "Searching cities");
        let response = self
            .agent
            .get(&format!("{}/search", self.endpoint))
            .query("format", "json")
            .query("q", query)
            .query("limit", &self.limit.to_string())
            .query("addressdetails", "1")
            .call()
            .map_err(|e| self.map_error("city search", e))?;

        let places: Vec<NominatimPlace> = response
            .into_json()
            .map_err(|e| LibraryError::Network(format!("invalid city search response: {e}")))?;
        Ok(parse_places(places))
    }

    fn reverse_geocode(&self, lat: f64, lon: f64) -> LibraryResult<Option<CitySuggestion>> {
        let result = self
            .agent
            .get(&format!("{}/reverse", self.endpoint))
            .query("format", "json")
            .query("lat", &lat.to_string())
            .query("lon", &lon.to_string())
            .query("addressdetails", "1")
            .call();

        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => return Ok(None),
            Err(e) => return Err(self.map_error("reverse geocode", e)),
        };

        let value: serde_json::Value = response
            .into_json()
            .map_err(|e| LibraryError::Network(format!("invalid reverse geocode response: {e}")))?;
        if value.get("address").is_none() {
            return Ok(None);
        }
        let place: NominatimPlace = serde_json::from_value(value)
            .map_err(|e| LibraryError::Network(format!("invalid reverse geocode response: {e}")))?;
        Ok(place.into_suggestion().map(|mut s| {
            s.lat = lat;
            s.lon = lon;
            s
        }))
    }
}

fn parse_places(places: Vec<NominatimPlace>) -> Vec<CitySuggestion> {
    places
        .into_iter()
        .filter_map(NominatimPlace::into_suggestion)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Results(Vec<CitySuggestion>),
    /// A newer search started while this one was in flight.
    Superseded,
}

/// Type-ahead city search: only the newest query's results are delivered.
pub struct CitySearch<G> {
    geocoder: G,
    latest: AtomicU64,
}

impl<G: Geocoder> CitySearch<G> {
    pub fn new(geocoder: G) -> Self {
        Self {
            geocoder,
            latest: AtomicU64::new(0),
        }
    }

    pub fn search(&self, query: &str) -> LibraryResult<SearchOutcome> {
        let ticket = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self.geocoder.search_cities(query);

        if self.latest.load(Ordering::SeqCst) != ticket {
            tracing::debug!(query, "Discarding superseded city search");
            return Ok(SearchOutcome::Superseded);
        }
        result.map(SearchOutcome::Results)
    }

    pub fn geocoder(&self) -> &G {
        &self.geocoder
    }
}
