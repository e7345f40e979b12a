//! Reverse geocoding: coordinates to a city name.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/geocode/json";

const CITY_COMPONENT_TYPES: [&str; 2] = ["locality", "administrative_area_level_2"];

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("geocoding transport error: {0}")]
    Transport(String),

    #[error("geocoding API returned HTTP {0}")]
    Status(u16),

    #[error("unreadable geocoding response: {0}")]
    Decode(String),
}

/// Abstraction over reverse-geocoding APIs.
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    /// `Ok(None)` when the API answers but yields no usable city.
    async fn city_for(&self, latitude: f64, longitude: f64)
        -> Result<Option<String>, GeocodeError>;
}

/// Google Geocoding API client.
#[derive(Clone)]
pub struct GoogleGeocoder {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl GoogleGeocoder {
    pub fn new(endpoint: &str, api_key: Option<String>) -> Result<Self, GeocodeError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GeocodeError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    #[serde(default)]
    address_components: Vec<AddressComponent>,
}

#[derive(Debug, Deserialize)]
struct AddressComponent {
    long_name: String,
    #[serde(default)]
    types: Vec<String>,
}

impl GeocodeResponse {
    /// First component of the first result typed as a city-level area.
    fn city(self) -> Option<String> {
        if self.status != "OK" {
            return None;
        }
        self.results
            .into_iter()
            .next()?
            .address_components
            .into_iter()
            .find(|c| {
                c.types
                    .iter()
                    .any(|t| CITY_COMPONENT_TYPES.contains(&t.as_str()))
            })
            .map(|c| c.long_name)
    }
}

#[async_trait]
impl ReverseGeocoder for GoogleGeocoder {
    async fn city_for(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Option<String>, GeocodeError> {
        let Some(key) = self.api_key.as_deref() else {
            warn!("GEOCODING_API_KEY not set, cannot reverse geocode");
            return Ok(None);
        };

        let resp = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("latlng", format!("{},{}", latitude, longitude)),
                ("key", key.to_string()),
            ])
            .send()
            .await
            .map_err(|e| GeocodeError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(GeocodeError::Status(resp.status().as_u16()));
        }

        let body: GeocodeResponse = resp
            .json()
            .await
            .map_err(|e| GeocodeError::Decode(e.to_string()))?;
        let status = body.status.clone();
        let city = body.city();
        debug!(latitude, longitude, status = %status, city = ?city, "reverse geocoded");
        Ok(city)
    }
}
