//! Authenticated request layer for the Guild platform API.
//!
//! [`GuildClient`] signs a request body with the connected wallet at a
//! skew-adjusted timestamp, frames the signature into headers or the body
//! depending on the HTTP method, sends it, and turns the response into either
//! the parsed body or a [`FetchError`]. A rejected timestamp schedules a clock
//! resync before the error reaches the caller.

use guild_account::AccountError;
use guild_types::ApiError;
use thiserror::Error;

pub mod builder;
pub mod client;
pub mod diagnostics;
pub mod framer;
pub mod recovery;
pub mod transport;

pub use builder::{BuilderError, ClientBuilder, ClientFactories};
pub use client::{FetchOptions, GuildClient, SignOptions};
pub use diagnostics::{CorrelationTracker, DiagnosticsInterface, MemoryDiagnostics, TracingDiagnostics};
pub use framer::{AuthLocation, Endpoint, EndpointResolver, FramedRequest};
pub use recovery::AuthRecovery;
pub use transport::{HttpTransport, RawResponse, ResponseBody, TransportInterface};

/// Errors surfaced by [`GuildClient`].
#[derive(Debug, Error)]
pub enum FetchError {
	/// The wallet declined or is not connected.
	#[error(transparent)]
	Account(#[from] AccountError),
	/// The backend rejected the signature timestamp.
	///
	/// `resync_scheduled` is false once the consecutive resync limit is spent.
	#[error("Invalid or expired signature timestamp (resync scheduled: {resync_scheduled})")]
	StaleTimestamp { resync_scheduled: bool },
	/// Normalized rejection from the platform API.
	#[error(transparent)]
	Api(#[from] ApiError),
	/// Rejection from an endpoint outside the platform API, body untouched.
	#[error("Request to {url} failed with status {status}: {body}")]
	Transport {
		url: String,
		status: u16,
		body: ResponseBody,
	},
	/// The body does not match its declared content type.
	#[error("Malformed response: {0}")]
	MalformedResponse(String),
	#[error("Network error: {0}")]
	Network(String),
	#[error("Invalid request: {0}")]
	InvalidRequest(String),
}

impl FetchError {
	/// Correlation id to quote in support requests, if the backend sent one.
	pub fn correlation_id(&self) -> Option<&str> {
		match self {
			FetchError::Api(error) => error.correlation_id.as_deref(),
			_ => None,
		}
	}
}
