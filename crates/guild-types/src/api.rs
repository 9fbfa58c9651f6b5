//! Error shapes of the platform API.
//!
//! The backend answers failed requests with `{"errors": [{"msg", "param"?}]}`.
//! Some validators answer with a bare `{"message": ...}` instead, and proxies
//! in front of the API may answer with plain text.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Canonical failure surfaced to callers of the platform API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct ApiError {
	/// `msg` of the first structured error (suffixed with `: param`), or the
	/// raw response body when the response does not follow the convention.
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub param: Option<String>,
	/// Server-issued id tying the failure to server-side logs.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub correlation_id: Option<String>,
}

impl ApiError {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			param: None,
			correlation_id: None,
		}
	}

	pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
		self.correlation_id = correlation_id;
		self
	}
}

impl From<&ErrorEntry> for ApiError {
	fn from(entry: &ErrorEntry) -> Self {
		Self {
			message: entry.display_message(),
			param: entry.param.clone(),
			correlation_id: None,
		}
	}
}

/// One entry of the structured `errors` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
	pub msg: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub param: Option<String>,
}

impl ErrorEntry {
	/// The first entry of the `errors` array in `body`, if it follows the
	/// convention. Later entries are not inspected.
	pub fn first_of(body: &Value) -> Option<Self> {
		let first = body.get("errors")?.as_array()?.first()?;
		serde_json::from_value(first.clone()).ok()
	}

	/// `msg`, or `msg: param` when a parameter is named.
	pub fn display_message(&self) -> String {
		match &self.param {
			Some(param) => format!("{}: {}", self.msg, param),
			None => self.msg.clone(),
		}
	}
}
