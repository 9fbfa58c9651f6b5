//! The request client.

use crate::diagnostics::{CorrelationTracker, DiagnosticsInterface};
use crate::framer::{frame, EndpointResolver};
use crate::recovery::AuthRecovery;
use crate::transport::{classify, Classification, ResponseBody, TransportInterface};
use crate::FetchError;
use guild_account::SignerService;
use guild_clock::ClockSkewEstimator;
use guild_types::{Identity, SignatureBundle};
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
	/// Overrides the default method (POST with a body, GET without).
	pub method: Option<Method>,
	/// JSON body. For signed requests this is the payload that gets signed.
	pub body: Option<Value>,
	/// Extra headers, applied over the defaults.
	pub headers: HeaderMap,
}

impl FetchOptions {
	pub fn method(mut self, method: Method) -> Self {
		self.method = Some(method);
		self
	}

	pub fn body(mut self, body: Value) -> Self {
		self.body = Some(body);
		self
	}
}

/// Signing options.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignOptions {
	/// Always ask the wallet for a fresh signature.
	pub force_prompt: bool,
}

/// Authenticated client for the platform API.
pub struct GuildClient {
	resolver: EndpointResolver,
	transport: Box<dyn TransportInterface>,
	clock: Arc<ClockSkewEstimator>,
	signer: Arc<SignerService>,
	recovery: AuthRecovery,
	correlation: CorrelationTracker,
}

impl GuildClient {
	pub fn new(
		resolver: EndpointResolver,
		transport: Box<dyn TransportInterface>,
		clock: Arc<ClockSkewEstimator>,
		signer: Arc<SignerService>,
		diagnostics: Arc<dyn DiagnosticsInterface>,
		max_consecutive_resyncs: u32,
	) -> Self {
		Self {
			resolver,
			transport,
			recovery: AuthRecovery::new(clock.clone(), signer.clone(), max_consecutive_resyncs),
			clock,
			signer,
			correlation: CorrelationTracker::new(diagnostics),
		}
	}

	pub fn clock(&self) -> &Arc<ClockSkewEstimator> {
		&self.clock
	}

	pub fn signer(&self) -> &Arc<SignerService> {
		&self.signer
	}

	pub fn recovery(&self) -> &AuthRecovery {
		&self.recovery
	}

	/// Identity of the connected wallet, if any.
	pub async fn identity(&self) -> Option<Identity> {
		self.signer.identity().await
	}

	/// Sends an unsigned request.
	pub async fn fetch(&self, resource: &str, options: FetchOptions) -> Result<ResponseBody, FetchError> {
		self.send(resource, options.method, options.body.as_ref(), None, &options.headers)
			.await
	}

	/// Signs the body (an empty object when absent) and sends the request.
	///
	/// The timestamp is taken right before signing. Nothing is retried: after
	/// a [`FetchError::StaleTimestamp`] the caller decides whether to call
	/// again, and the next call signs with a recomputed skew.
	pub async fn fetch_with_sign(
		&self,
		resource: &str,
		options: FetchOptions,
		sign: SignOptions,
	) -> Result<ResponseBody, FetchError> {
		self.recovery.ensure_fresh_clock().await?;

		let payload = options
			.body
			.unwrap_or_else(|| Value::Object(Default::default()))
			.to_string();
		let timestamp = self.clock.adjusted_now().await;
		let bundle = self
			.signer
			.sign(&payload, timestamp, sign.force_prompt)
			.await?;

		let body = self
			.send(resource, options.method, None, Some(&bundle), &options.headers)
			.await?;
		self.recovery.record_success();
		Ok(body)
	}

	async fn send(
		&self,
		resource: &str,
		method: Option<Method>,
		body: Option<&Value>,
		signature: Option<&SignatureBundle>,
		headers: &HeaderMap,
	) -> Result<ResponseBody, FetchError> {
		let endpoint = self.resolver.resolve(resource)?;
		let request = frame(endpoint, method, body, signature, headers)?;
		let url = request.url.clone();
		let platform = request.platform;

		tracing::debug!(
			component = "fetcher",
			method = %request.method,
			url = %url,
			auth_location = ?request.auth_location,
			"Sending request"
		);
		let response = self.transport.send(request).await?;
		tracing::debug!(component = "fetcher", url = %url, status = %response.status, "Received response");

		match classify(&response, platform)? {
			Classification::Success(body) => Ok(body),
			Classification::StaleTimestamp(error) => {
				self.correlation.track(&error);
				Err(self.recovery.handle_stale_timestamp(&url).await)
			},
			Classification::Api(error) => {
				self.correlation.track(&error);
				Err(FetchError::Api(error))
			},
			Classification::Rejected { status, body } => Err(FetchError::Transport {
				url,
				status: status.as_u16(),
				body,
			}),
		}
	}
}
