//! Wallet signing for authenticated platform requests.
//!
//! A signer backend turns a [`SignRequest`] into a [`SignatureBundle`]. The
//! [`SignerService`] owns the connected wallet, asks the [`SignaturePrompt`]
//! before every fresh signature and keeps a short signing session so that an
//! identical payload signed moments ago is not signed again.

use async_trait::async_trait;
use guild_types::{
	with_0x_prefix, ConfigSchema, Identity, ImplementationRegistry, SignRequest, SignatureBundle,
	SignerBackend, ValidationParams,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

/// Re-export implementations
pub mod implementations {
	pub mod evm;
	pub mod fuel;
}

/// Text shown above the attested fields when the configuration sets none.
pub const DEFAULT_SIGN_MESSAGE: &str = "Please sign this message";

/// Errors that can occur during signing.
#[derive(Debug, Error)]
pub enum AccountError {
	/// The user declined the signature prompt.
	#[error("User rejected the signature request")]
	UserRejected,
	/// No wallet is connected, or it cannot be reached.
	#[error("Wallet unavailable: {0}")]
	WalletUnavailable(String),
	#[error("Signing failed: {0}")]
	SigningFailed(String),
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	#[error("Implementation error: {0}")]
	Implementation(String),
}

/// A wallet backend able to sign platform requests.
#[async_trait]
pub trait SignerInterface: Send + Sync {
	/// Returns the configuration schema for this signer implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	fn backend(&self) -> SignerBackend;

	/// Identity of the wallet held by this signer.
	fn identity(&self) -> Identity;

	/// Produces a signature bundle for `request`.
	///
	/// The request identity must be this signer's identity.
	async fn sign(&self, request: &SignRequest) -> Result<SignatureBundle, AccountError>;
}

/// Type alias for signer factory functions.
pub type SignerFactory = fn(&toml::Value) -> Result<Box<dyn SignerInterface>, AccountError>;

/// Registry trait for signer implementations.
pub trait SignerRegistry: ImplementationRegistry<Factory = SignerFactory> {}

/// Get all registered signer implementations.
pub fn get_all_implementations() -> Vec<(&'static str, SignerFactory)> {
	use implementations::{evm, fuel};

	vec![
		(evm::Registry::NAME, evm::Registry::factory()),
		(fuel::Registry::NAME, fuel::Registry::factory()),
	]
}

/// Rejects requests addressed to another wallet.
pub(crate) fn ensure_identity(expected: &Identity, request: &SignRequest) -> Result<(), AccountError> {
	if &request.identity != expected || request.backend != expected.backend() {
		return Err(AccountError::SigningFailed(format!(
			"Request for {} cannot be signed by {}",
			request.identity, expected
		)));
	}
	Ok(())
}

/// Builds the attested parameters for `request` with a fresh random nonce.
pub(crate) fn validation_params(request: &SignRequest, hash: String, msg: &str) -> ValidationParams {
	let nonce: [u8; 32] = rand::random();
	ValidationParams {
		addr: request.identity.address().to_string(),
		method: request.backend.validation_method(),
		chain_id: request.identity.chain_id().map(|id| id.to_string()),
		hash,
		nonce: with_0x_prefix(&hex::encode(nonce)),
		ts: request.timestamp.to_string(),
		msg: msg.to_string(),
	}
}

/// Reads the optional `message` of an implementation table.
pub(crate) fn configured_message(config: &toml::Value) -> String {
	config
		.get("message")
		.and_then(|v| v.as_str())
		.unwrap_or(DEFAULT_SIGN_MESSAGE)
		.to_string()
}

/// Asked before a fresh signature is produced.
#[async_trait]
pub trait SignaturePrompt: Send + Sync {
	/// Returns `false` to decline signing `request`.
	async fn confirm(&self, request: &SignRequest) -> bool;
}

/// Prompt that approves every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

#[async_trait]
impl SignaturePrompt for AutoApprove {
	async fn confirm(&self, _request: &SignRequest) -> bool {
		true
	}
}

struct SessionEntry {
	identity: Identity,
	payload: String,
	timestamp: i64,
	bundle: SignatureBundle,
}

/// Owns the connected wallet and the signing session.
pub struct SignerService {
	signer: RwLock<Option<Box<dyn SignerInterface>>>,
	prompt: Arc<dyn SignaturePrompt>,
	reuse_window_ms: i64,
	session: Mutex<Option<SessionEntry>>,
}

impl SignerService {
	/// Creates a service without a connected wallet.
	///
	/// A zero `reuse_window` disables signature reuse.
	pub fn new(prompt: Arc<dyn SignaturePrompt>, reuse_window: Duration) -> Self {
		Self {
			signer: RwLock::new(None),
			prompt,
			reuse_window_ms: i64::try_from(reuse_window.as_millis()).unwrap_or(i64::MAX),
			session: Mutex::new(None),
		}
	}

	/// Connects `signer`, replacing any previous wallet.
	pub async fn connect(&self, signer: Box<dyn SignerInterface>) -> Identity {
		let identity = signer.identity();
		*self.signer.write().await = Some(signer);
		self.clear_session().await;
		tracing::info!(component = "signer", identity = %identity, "Wallet connected");
		identity
	}

	pub async fn disconnect(&self) {
		if let Some(signer) = self.signer.write().await.take() {
			tracing::info!(component = "signer", identity = %signer.identity(), "Wallet disconnected");
		}
		self.clear_session().await;
	}

	/// Identity of the connected wallet, if any.
	pub async fn identity(&self) -> Option<Identity> {
		self.signer.read().await.as_ref().map(|signer| signer.identity())
	}

	/// Signs `payload` at `timestamp` with the connected wallet.
	///
	/// Without `force_prompt`, a session signature for the same identity and
	/// payload made within the reuse window is returned instead of prompting.
	pub async fn sign(
		&self,
		payload: &str,
		timestamp: i64,
		force_prompt: bool,
	) -> Result<SignatureBundle, AccountError> {
		let guard = self.signer.read().await;
		let signer = guard
			.as_ref()
			.ok_or_else(|| AccountError::WalletUnavailable("No wallet connected".to_string()))?;
		let identity = signer.identity();

		if !force_prompt && self.reuse_window_ms > 0 {
			if let Some(entry) = self.session.lock().await.as_ref() {
				let age = timestamp - entry.timestamp;
				if entry.identity == identity
					&& entry.payload == payload
					&& (0..=self.reuse_window_ms).contains(&age)
				{
					tracing::debug!(component = "signer", age_ms = age, "Reusing session signature");
					return Ok(entry.bundle.clone());
				}
			}
		}

		let request = SignRequest::new(identity.clone(), payload, timestamp, force_prompt);
		if !self.prompt.confirm(&request).await {
			tracing::info!(component = "signer", identity = %identity, "Signature request declined");
			return Err(AccountError::UserRejected);
		}

		let bundle = signer.sign(&request).await?;
		tracing::debug!(component = "signer", backend = %request.backend, ts = timestamp, "Payload signed");

		if self.reuse_window_ms > 0 {
			*self.session.lock().await = Some(SessionEntry {
				identity,
				payload: payload.to_string(),
				timestamp,
				bundle: bundle.clone(),
			});
		}
		Ok(bundle)
	}

	/// Forgets any reusable signature.
	pub async fn clear_session(&self) {
		self.session.lock().await.take();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use guild_types::{Schema, SignedPayload, Validation, ValidationError};
	use std::sync::atomic::{AtomicUsize, Ordering};

	struct CountingSigner {
		calls: Arc<AtomicUsize>,
	}

	struct NoSchema;

	impl ConfigSchema for NoSchema {
		fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
			Schema::new(vec![], vec![]).validate(config)
		}
	}

	#[async_trait]
	impl SignerInterface for CountingSigner {
		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			Box::new(NoSchema)
		}

		fn backend(&self) -> SignerBackend {
			SignerBackend::Fuel
		}

		fn identity(&self) -> Identity {
			Identity::Fuel {
				address: "0xfeed".to_string(),
			}
		}

		async fn sign(&self, request: &SignRequest) -> Result<SignatureBundle, AccountError> {
			ensure_identity(&self.identity(), request)?;
			let n = self.calls.fetch_add(1, Ordering::SeqCst);
			let params = validation_params(request, "0x00".to_string(), DEFAULT_SIGN_MESSAGE);
			Ok(SignatureBundle {
				signed_payload: SignedPayload::bind(&request.payload, request.timestamp),
				validation: Validation::new(&params, format!("0x{:02x}", n)).unwrap(),
			})
		}
	}

	struct Decline;

	#[async_trait]
	impl SignaturePrompt for Decline {
		async fn confirm(&self, _request: &SignRequest) -> bool {
			false
		}
	}

	async fn connected_service(window: Duration) -> (SignerService, Arc<AtomicUsize>) {
		let calls = Arc::new(AtomicUsize::new(0));
		let service = SignerService::new(Arc::new(AutoApprove), window);
		service
			.connect(Box::new(CountingSigner {
				calls: calls.clone(),
			}))
			.await;
		(service, calls)
	}

	#[tokio::test]
	async fn test_no_wallet_is_unavailable() {
		let service = SignerService::new(Arc::new(AutoApprove), Duration::ZERO);
		assert!(service.identity().await.is_none());
		assert!(matches!(
			service.sign("{}", 1, false).await,
			Err(AccountError::WalletUnavailable(_))
		));
	}

	#[tokio::test]
	async fn test_declined_prompt_is_user_rejected() {
		let service = SignerService::new(Arc::new(Decline), Duration::ZERO);
		service
			.connect(Box::new(CountingSigner {
				calls: Arc::new(AtomicUsize::new(0)),
			}))
			.await;
		assert!(matches!(
			service.sign("{}", 1, true).await,
			Err(AccountError::UserRejected)
		));
	}

	#[tokio::test]
	async fn test_session_reuse_within_window() {
		let (service, calls) = connected_service(Duration::from_secs(60)).await;
		let first = service.sign("{\"a\":1}", 1_000, false).await.unwrap();
		let second = service.sign("{\"a\":1}", 30_000, false).await.unwrap();
		assert_eq!(first, second);
		assert_eq!(calls.load(Ordering::SeqCst), 1);

		// outside the window, different payload, or forced: fresh signatures
		service.sign("{\"a\":1}", 120_000, false).await.unwrap();
		service.sign("{\"a\":2}", 120_000, false).await.unwrap();
		service.sign("{\"a\":2}", 120_000, true).await.unwrap();
		assert_eq!(calls.load(Ordering::SeqCst), 4);
	}

	#[tokio::test]
	async fn test_oversized_window_saturates() {
		let (service, calls) = connected_service(Duration::from_secs(u64::MAX)).await;
		let first = service.sign("{}", 1_000, false).await.unwrap();
		let second = service.sign("{}", 1_000 + 365 * 86_400_000, false).await.unwrap();
		assert_eq!(first, second);
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_no_reuse_without_window_or_after_clear() {
		let (service, calls) = connected_service(Duration::ZERO).await;
		service.sign("{}", 1_000, false).await.unwrap();
		service.sign("{}", 1_000, false).await.unwrap();
		assert_eq!(calls.load(Ordering::SeqCst), 2);

		let (service, calls) = connected_service(Duration::from_secs(60)).await;
		service.sign("{}", 1_000, false).await.unwrap();
		service.clear_session().await;
		service.sign("{}", 1_000, false).await.unwrap();
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn test_disconnect() {
		let (service, _) = connected_service(Duration::ZERO).await;
		assert_eq!(service.identity().await.map(|i| i.backend()), Some(SignerBackend::Fuel));
		service.disconnect().await;
		assert!(service.identity().await.is_none());
	}

	#[test]
	fn test_validation_params_fields() {
		let request = SignRequest::new(
			Identity::Evm {
				address: "0xabc".to_string(),
				chain_id: 10,
			},
			"{}",
			1_700_000_000_000,
			false,
		);
		let a = validation_params(&request, "0x11".to_string(), "hi");
		let b = validation_params(&request, "0x11".to_string(), "hi");
		assert_eq!(a.method, 1);
		assert_eq!(a.chain_id.as_deref(), Some("10"));
		assert_eq!(a.ts, "1700000000000");
		assert_eq!(a.nonce.len(), 66);
		assert_ne!(a.nonce, b.nonce);
	}

	#[test]
	fn test_identity_mismatch_rejected() {
		let request = SignRequest::new(
			Identity::Fuel {
				address: "0x01".to_string(),
			},
			"{}",
			1,
			false,
		);
		let other = Identity::Fuel {
			address: "0x02".to_string(),
		};
		assert!(matches!(
			ensure_identity(&other, &request),
			Err(AccountError::SigningFailed(_))
		));
	}
}
