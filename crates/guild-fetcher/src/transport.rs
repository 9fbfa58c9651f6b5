//! Transport and response classification.
//!
//! The transport executes one framed request, with no retries. [`classify`]
//! then decides what the response means without side effects; the client
//! applies recovery and diagnostics on top of the result.

use crate::diagnostics::correlation_id;
use crate::framer::FramedRequest;
use crate::recovery::is_stale_timestamp;
use crate::FetchError;
use async_trait::async_trait;
use guild_types::{ApiError, ErrorEntry};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// A response as received, before interpretation.
#[derive(Debug, Clone)]
pub struct RawResponse {
	pub status: StatusCode,
	pub headers: HeaderMap,
	pub body: String,
}

/// Executes framed requests.
#[async_trait]
pub trait TransportInterface: Send + Sync {
	async fn send(&self, request: FramedRequest) -> Result<RawResponse, FetchError>;
}

/// [`TransportInterface`] over `reqwest`.
pub struct HttpTransport {
	client: reqwest::Client,
}

impl HttpTransport {
	pub fn new(timeout: Duration) -> Result<Self, FetchError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| FetchError::Network(format!("Failed to build HTTP client: {}", e)))?;
		Ok(Self { client })
	}
}

#[async_trait]
impl TransportInterface for HttpTransport {
	async fn send(&self, request: FramedRequest) -> Result<RawResponse, FetchError> {
		let mut builder = self
			.client
			.request(request.method, &request.url)
			.headers(request.headers);
		if let Some(body) = request.body {
			builder = builder.body(body);
		}

		let response = builder
			.send()
			.await
			.map_err(|e| FetchError::Network(e.to_string()))?;
		let status = response.status();
		let headers = response.headers().clone();
		let body = response
			.text()
			.await
			.map_err(|e| FetchError::Network(e.to_string()))?;

		Ok(RawResponse {
			status,
			headers,
			body,
		})
	}
}

/// A parsed response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
	Json(Value),
	Text(String),
}

impl ResponseBody {
	pub fn as_json(&self) -> Option<&Value> {
		match self {
			ResponseBody::Json(value) => Some(value),
			ResponseBody::Text(_) => None,
		}
	}

	pub fn as_text(&self) -> Option<&str> {
		match self {
			ResponseBody::Text(text) => Some(text),
			ResponseBody::Json(_) => None,
		}
	}
}

impl fmt::Display for ResponseBody {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ResponseBody::Json(value) => write!(f, "{}", value),
			ResponseBody::Text(text) => f.write_str(text),
		}
	}
}

/// Parses `body` as JSON when the content type says so, as text otherwise.
pub fn parse_body(headers: &HeaderMap, body: &str) -> Result<ResponseBody, FetchError> {
	let is_json = headers
		.get(CONTENT_TYPE)
		.and_then(|v| v.to_str().ok())
		.is_some_and(|content_type| content_type.contains("json"));
	if !is_json {
		return Ok(ResponseBody::Text(body.to_string()));
	}
	if body.trim().is_empty() {
		return Ok(ResponseBody::Json(Value::Null));
	}
	serde_json::from_str(body)
		.map(ResponseBody::Json)
		.map_err(|e| FetchError::MalformedResponse(format!("JSON content type but {}", e)))
}

/// What a response means for the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
	Success(ResponseBody),
	/// The backend rejected the signature timestamp.
	StaleTimestamp(ApiError),
	/// Normalized platform API rejection.
	Api(ApiError),
	/// Rejection from outside the platform API, body untouched.
	Rejected { status: StatusCode, body: ResponseBody },
}

/// Message for a platform error body that does not follow the `errors` convention.
fn fallback_message(body: &ResponseBody) -> String {
	match body {
		ResponseBody::Text(text) => text.clone(),
		ResponseBody::Json(Value::String(text)) => text.clone(),
		ResponseBody::Json(value) => match value.get("message") {
			Some(Value::String(message)) => message.clone(),
			Some(message) => message.to_string(),
			None => value.to_string(),
		},
	}
}

/// Interprets `response` to a request that was (or was not) addressed to the
/// platform API.
pub fn classify(response: &RawResponse, platform: bool) -> Result<Classification, FetchError> {
	let body = parse_body(&response.headers, &response.body)?;
	if response.status.is_success() {
		return Ok(Classification::Success(body));
	}

	let first = body.as_json().and_then(ErrorEntry::first_of);
	let correlation = correlation_id(&response.headers);

	if let Some(entry) = first.as_ref().filter(|entry| is_stale_timestamp(&entry.msg)) {
		return Ok(Classification::StaleTimestamp(
			ApiError::from(entry).with_correlation_id(correlation),
		));
	}

	if !platform {
		return Ok(Classification::Rejected {
			status: response.status,
			body,
		});
	}

	let error = match &first {
		Some(entry) => ApiError::from(entry),
		None => ApiError::new(fallback_message(&body)),
	};
	Ok(Classification::Api(error.with_correlation_id(correlation)))
}
