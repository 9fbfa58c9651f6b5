//! Support diagnostics.
//!
//! The platform tags failed requests with an `X-Correlation-ID` header. The
//! id is handed to a diagnostics collaborator under the key `correlationId`
//! so that it can be quoted in support conversations.

use guild_types::ApiError;
use reqwest::header::HeaderMap;
use std::sync::{Arc, Mutex};

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
pub const CORRELATION_ID_KEY: &str = "correlationId";

/// Reads the correlation id from response headers.
pub fn correlation_id(headers: &HeaderMap) -> Option<String> {
	headers
		.get(CORRELATION_ID_HEADER)
		.and_then(|value| value.to_str().ok())
		.map(str::trim)
		.filter(|id| !id.is_empty())
		.map(str::to_string)
}

/// Receives support context entries.
pub trait DiagnosticsInterface: Send + Sync {
	fn push_context(&self, key: &str, value: &str);
}

/// Logs context entries.
#[derive(Debug, Default)]
pub struct TracingDiagnostics;

impl DiagnosticsInterface for TracingDiagnostics {
	fn push_context(&self, key: &str, value: &str) {
		tracing::info!(target: "guild::diagnostics", key = %key, value = %value, "Support context updated");
	}
}

/// Keeps context entries in memory.
#[derive(Debug, Default)]
pub struct MemoryDiagnostics {
	entries: Mutex<Vec<(String, String)>>,
}

impl MemoryDiagnostics {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn entries(&self) -> Vec<(String, String)> {
		self.entries
			.lock()
			.map(|entries| entries.clone())
			.unwrap_or_default()
	}

	/// Latest value pushed under `key`.
	pub fn get(&self, key: &str) -> Option<String> {
		self.entries()
			.into_iter()
			.rev()
			.find(|(k, _)| k == key)
			.map(|(_, v)| v)
	}
}

impl DiagnosticsInterface for MemoryDiagnostics {
	fn push_context(&self, key: &str, value: &str) {
		if let Ok(mut entries) = self.entries.lock() {
			entries.push((key.to_string(), value.to_string()));
		}
	}
}

/// Forwards correlation ids of normalized errors.
pub struct CorrelationTracker {
	sink: Arc<dyn DiagnosticsInterface>,
}

impl CorrelationTracker {
	pub fn new(sink: Arc<dyn DiagnosticsInterface>) -> Self {
		Self { sink }
	}

	pub fn track(&self, error: &ApiError) {
		if let Some(id) = &error.correlation_id {
			self.sink.push_context(CORRELATION_ID_KEY, id);
		}
	}
}
