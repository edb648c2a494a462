//! Geocoding over the maps geocode endpoint

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::cache::GeocodeResult;
use crate::domain::geocoding::GeocodingProvider;
use crate::domain::DomainError;

const PROVIDER: &str = "geocoding";

#[derive(Debug, Clone)]
pub struct HttpGeocodingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeCandidate>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeCandidate {
    formatted_address: String,
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

impl HttpGeocodingProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DomainError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
        })
    }
}

#[async_trait]
impl GeocodingProvider for HttpGeocodingProvider {
    async fn lookup(&self, address: &str) -> Result<GeocodeResult, DomainError> {
        let mut request = self.client.get(&self.base_url).query(&[("address", address)]);
        if let Some(api_key) = &self.api_key {
            request = request.query(&[("key", api_key.as_str())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DomainError::upstream_lookup(PROVIDER, format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DomainError::upstream_lookup(
                PROVIDER,
                format!("HTTP {}: {}", status, body),
            ));
        }

        let body: GeocodeResponse = response.json().await.map_err(|e| {
            DomainError::upstream_lookup(PROVIDER, format!("Failed to parse response: {}", e))
        })?;

        if body.status != "OK" {
            let message = match body.error_message {
                Some(detail) => format!("{}: {}", body.status, detail),
                None => body.status,
            };
            return Err(DomainError::upstream_lookup(PROVIDER, message));
        }

        let candidate = body.results.into_iter().next().ok_or_else(|| {
            DomainError::upstream_lookup(PROVIDER, format!("No results for '{}'", address))
        })?;

        Ok(GeocodeResult::new(
            candidate.formatted_address,
            candidate.geometry.location.lat,
            candidate.geometry.location.lng,
        ))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn provider(server: &MockServer) -> HttpGeocodingProvider {
        HttpGeocodingProvider::new(server.uri(), Some("maps-key".into()), Duration::from_secs(5))
            .unwrap()
    }

    #[tokio::test]
    async fn test_lookup_takes_first_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("address", "02139"))
            .and(query_param("key", "maps-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "OK",
                "results": [
                    {
                        "formatted_address": "Cambridge, MA 02139, USA",
                        "geometry": { "location": { "lat": 42.3647, "lng": -71.1042 } }
                    },
                    {
                        "formatted_address": "Somewhere else",
                        "geometry": { "location": { "lat": 0.0, "lng": 0.0 } }
                    }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = provider(&server).lookup("02139").await.unwrap();

        assert_eq!(result.formatted_address, "Cambridge, MA 02139, USA");
        assert_eq!(result.latitude, 42.3647);
        assert_eq!(result.longitude, -71.1042);
    }

    #[tokio::test]
    async fn test_zero_results_is_upstream_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "ZERO_RESULTS",
                "results": []
            })))
            .mount(&server)
            .await;

        match provider(&server).lookup("nowhere at all").await {
            Err(DomainError::UpstreamLookup { provider, message }) => {
                assert_eq!(provider, "geocoding");
                assert!(message.contains("ZERO_RESULTS"));
            }
            other => panic!("expected upstream failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_denied_request_carries_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "REQUEST_DENIED",
                "error_message": "The provided API key is invalid."
            })))
            .mount(&server)
            .await;

        match provider(&server).lookup("02139").await {
            Err(DomainError::UpstreamLookup { message, .. }) => {
                assert!(message.contains("REQUEST_DENIED"));
                assert!(message.contains("API key is invalid"));
            }
            other => panic!("expected upstream failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_upstream_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = provider(&server).lookup("02139").await;
        assert!(matches!(result, Err(DomainError::UpstreamLookup { .. })));
    }
}
