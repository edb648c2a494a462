//! Geocoding providers

mod http_provider;

pub use http_provider::HttpGeocodingProvider;
