//! Server time over HTTP.
//!
//! The endpoint answers with the current server time in milliseconds, either
//! as a bare number (JSON or plain text) or as `{"timestamp": <ms>}`.

use crate::{ClockError, TimeSourceFactory, TimeSourceInterface, TimeSourceRegistry};
use async_trait::async_trait;
use guild_types::{ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, ValidationError};
use serde_json::Value;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

/// Time source that asks a platform endpoint for its clock.
pub struct HttpTimeSource {
	client: reqwest::Client,
	url: String,
}

impl HttpTimeSource {
	pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ClockError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| ClockError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
		Ok(Self {
			client,
			url: url.into(),
		})
	}
}

/// Extracts milliseconds from a time endpoint response body.
fn parse_server_time(body: &str) -> Result<i64, ClockError> {
	let trimmed = body.trim();
	if let Ok(ms) = trimmed.parse::<i64>() {
		return Ok(ms);
	}

	let value: Value = serde_json::from_str(trimmed)
		.map_err(|_| ClockError::InvalidResponse(format!("Unrecognized time body: {}", trimmed)))?;
	let number = match &value {
		Value::Object(map) => map.get("timestamp"),
		other => Some(other),
	};
	number
		.and_then(|n| n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)))
		.ok_or_else(|| ClockError::InvalidResponse(format!("Unrecognized time body: {}", trimmed)))
}

#[async_trait]
impl TimeSourceInterface for HttpTimeSource {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(HttpTimeSourceSchema)
	}

	async fn server_time_ms(&self) -> Result<i64, ClockError> {
		let response = self
			.client
			.get(&self.url)
			.send()
			.await
			.map_err(|e| ClockError::Network(e.to_string()))?;

		let status = response.status();
		let body = response
			.text()
			.await
			.map_err(|e| ClockError::Network(e.to_string()))?;
		if !status.is_success() {
			return Err(ClockError::Network(format!(
				"Time endpoint returned {}: {}",
				status, body
			)));
		}

		parse_server_time(&body)
	}
}

/// Configuration schema for [`HttpTimeSource`].
pub struct HttpTimeSourceSchema;

impl ConfigSchema for HttpTimeSourceSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(
			vec![Field::new("url", FieldType::String).with_validator(|v| match v.as_str() {
				Some(url) if url.starts_with("http://") || url.starts_with("https://") => Ok(()),
				_ => Err("url must be an http(s) URL".to_string()),
			})],
			vec![Field::new(
				"timeout_seconds",
				FieldType::Integer {
					min: Some(1),
					max: Some(120),
				},
			)],
		)
		.validate(config)
	}
}

/// Creates an HTTP time source.
///
/// Configuration parameters:
/// - `url`: time endpoint
/// - `timeout_seconds`: request timeout (default: 10)
pub fn create_time_source(
	config: &toml::Value,
) -> Result<Box<dyn TimeSourceInterface>, ClockError> {
	HttpTimeSourceSchema
		.validate(config)
		.map_err(|e| ClockError::Configuration(e.to_string()))?;

	let url = config
		.get("url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| ClockError::Configuration("url is required".to_string()))?;
	let timeout = config
		.get("timeout_seconds")
		.and_then(|v| v.as_integer())
		.map(|t| t as u64)
		.unwrap_or(DEFAULT_TIMEOUT_SECONDS);

	Ok(Box::new(HttpTimeSource::new(url, Duration::from_secs(timeout))?))
}

/// Registry for the HTTP time source.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "http";
	type Factory = TimeSourceFactory;

	fn factory() -> Self::Factory {
		create_time_source
	}
}

impl TimeSourceRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use wiremock::matchers::{method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	#[test]
	fn test_parse_body_shapes() {
		assert_eq!(parse_server_time("1700000000000").unwrap(), 1_700_000_000_000);
		assert_eq!(parse_server_time(" 42\n").unwrap(), 42);
		assert_eq!(parse_server_time(r#"{"timestamp":1234}"#).unwrap(), 1234);
		assert_eq!(parse_server_time("1234.0").unwrap(), 1234);
		assert!(matches!(
			parse_server_time("soon"),
			Err(ClockError::InvalidResponse(_))
		));
		assert!(parse_server_time(r#"{"time":1}"#).is_err());
	}

	#[tokio::test]
	async fn test_fetches_server_time() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/api/timestamp"))
			.respond_with(ResponseTemplate::new(200).set_body_string("1700000000123"))
			.mount(&server)
			.await;

		let source = HttpTimeSource::new(
			format!("{}/api/timestamp", server.uri()),
			Duration::from_secs(5),
		)
		.unwrap();
		assert_eq!(source.server_time_ms().await.unwrap(), 1_700_000_000_123);
	}

	#[tokio::test]
	async fn test_error_status_is_network_error() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.respond_with(ResponseTemplate::new(503).set_body_string("down"))
			.mount(&server)
			.await;

		let source = HttpTimeSource::new(server.uri(), Duration::from_secs(5)).unwrap();
		let err = source.server_time_ms().await.unwrap_err();
		assert!(matches!(err, ClockError::Network(msg) if msg.contains("down")));
	}

	#[test]
	fn test_factory_validates_url() {
		let config: toml::Value = toml::from_str("url = \"ftp://example\"").unwrap();
		assert!(create_time_source(&config).is_err());
		let config: toml::Value = toml::from_str("timeout_seconds = 5").unwrap();
		assert!(create_time_source(&config).is_err());
		let config: toml::Value =
			toml::from_str("url = \"https://guild.xyz/api/timestamp\"").unwrap();
		assert!(create_time_source(&config).is_ok());
	}
}
