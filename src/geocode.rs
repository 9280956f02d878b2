//! # Geocoding Module
//!
//! Thin client for the Nominatim search API, used by the street-name search.
//! Lookups are restricted to one country and paced to at least one second
//! apart, per the service's usage policy.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::GEOCODER_MIN_INTERVAL;
use crate::geo::Coordinate;

const NOMINATIM_SEARCH_URL: &str = "https://nominatim.openstreetmap.org/search";
const USER_AGENT: &str = concat!("landmarks-bot/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors surfaced by the geocoder
#[derive(Debug)]
pub enum GeocodeError {
    /// The geocoding service did not answer in time
    Timeout,
    /// The geocoding service is unreachable or answered with an error status
    Unavailable(String),
    /// The service answered with a body we could not make sense of
    InvalidResponse(String),
}

impl std::fmt::Display for GeocodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeocodeError::Timeout => write!(f, "Geocoder timed out"),
            GeocodeError::Unavailable(msg) => write!(f, "Geocoder unavailable: {msg}"),
            GeocodeError::InvalidResponse(msg) => write!(f, "Geocoder response invalid: {msg}"),
        }
    }
}

impl std::error::Error for GeocodeError {}

/// A successfully geocoded query.
#[derive(Debug, Clone)]
pub struct GeocodedPlace {
    pub coordinate: Coordinate,
    /// Human-readable resolved address, echoed back to the user
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
struct NominatimRow {
    lat: String,
    lon: String,
    display_name: String,
}

/// Street-name geocoder with built-in call pacing.
pub struct Geocoder {
    http: reqwest::Client,
    country_codes: String,
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl Geocoder {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            country_codes: "ru".to_string(),
            min_interval: GEOCODER_MIN_INTERVAL,
            last_call: Mutex::new(None),
        }
    }

    /// Resolve a free-text address to a coordinate.
    ///
    /// Returns `Ok(None)` when the service found nothing for the query.
    pub async fn geocode(&self, query: &str) -> Result<Option<GeocodedPlace>, GeocodeError> {
        self.pace().await;

        let response = self
            .http
            .get(NOMINATIM_SEARCH_URL)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("limit", "1"),
                ("countrycodes", self.country_codes.as_str()),
            ])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GeocodeError::Timeout
                } else {
                    GeocodeError::Unavailable(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(GeocodeError::Unavailable(format!(
                "status {}",
                response.status()
            )));
        }

        let rows: Vec<NominatimRow> = response
            .json()
            .await
            .map_err(|e| GeocodeError::InvalidResponse(e.to_string()))?;

        debug!(query, hits = rows.len(), "Geocoder query finished");
        rows.into_iter().next().map(parse_row).transpose()
    }

    /// Hold the caller until at least `min_interval` has passed since the
    /// previous call. The lock spans the wait, so concurrent callers queue.
    async fn pace(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}

impl Default for Geocoder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_row(row: NominatimRow) -> Result<GeocodedPlace, GeocodeError> {
    let lat: f64 = row
        .lat
        .parse()
        .map_err(|_| GeocodeError::InvalidResponse(format!("bad latitude: {}", row.lat)))?;
    let lon: f64 = row
        .lon
        .parse()
        .map_err(|_| GeocodeError::InvalidResponse(format!("bad longitude: {}", row.lon)))?;

    Ok(GeocodedPlace {
        coordinate: Coordinate::new(lat, lon),
        display_name: row.display_name,
    })
}
