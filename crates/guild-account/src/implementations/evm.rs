//! EVM wallet signer.
//!
//! Signs the validation message as an EIP-191 personal message with a local
//! secp256k1 key. The attested hash is keccak256 of the signed payload.

use crate::{
	configured_message, ensure_identity, validation_params, AccountError, SignerFactory,
	SignerInterface, SignerRegistry,
};
use alloy_primitives::keccak256;
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use guild_types::{
	with_0x_prefix, ConfigSchema, Field, FieldType, Identity, ImplementationRegistry, Schema,
	SecretString, SignRequest, SignatureBundle, SignedPayload, SignerBackend, Validation,
	ValidationError,
};

/// Chain used when the configuration does not name one.
pub const DEFAULT_CHAIN_ID: u64 = 1;

/// Signer holding an externally-owned account key.
pub struct EvmSigner {
	signer: PrivateKeySigner,
	chain_id: u64,
	message: String,
}

impl EvmSigner {
	pub fn new(private_key: &SecretString, chain_id: u64, message: String) -> Result<Self, AccountError> {
		let signer: PrivateKeySigner = private_key.with_exposed(|key| {
			key.parse()
				.map_err(|_| AccountError::InvalidKey("Invalid EVM private key format".to_string()))
		})?;
		Ok(Self {
			signer,
			chain_id,
			message,
		})
	}
}

#[async_trait]
impl SignerInterface for EvmSigner {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(EvmSignerSchema)
	}

	fn backend(&self) -> SignerBackend {
		SignerBackend::Evm
	}

	fn identity(&self) -> Identity {
		Identity::Evm {
			address: self.signer.address().to_checksum(None),
			chain_id: self.chain_id,
		}
	}

	async fn sign(&self, request: &SignRequest) -> Result<SignatureBundle, AccountError> {
		ensure_identity(&self.identity(), request)?;

		let signed_payload = SignedPayload::bind(&request.payload, request.timestamp);
		let hash = keccak256(signed_payload.as_bytes());
		let params = validation_params(request, with_0x_prefix(&hex::encode(hash)), &self.message);

		let signature = self
			.signer
			.sign_message(params.message().as_bytes())
			.await
			.map_err(|e| AccountError::SigningFailed(e.to_string()))?;
		let sig = with_0x_prefix(&hex::encode(signature.as_bytes()));

		let validation =
			Validation::new(&params, sig).map_err(|e| AccountError::SigningFailed(e.to_string()))?;
		Ok(SignatureBundle {
			signed_payload,
			validation,
		})
	}
}

/// Configuration schema for [`EvmSigner`].
pub struct EvmSignerSchema;

impl ConfigSchema for EvmSignerSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(
			vec![Field::new("private_key", FieldType::String).with_validator(|v| {
				let key = v.as_str().unwrap_or("");
				let hex_part = key.strip_prefix("0x").unwrap_or(key);
				if hex_part.len() != 64 {
					return Err("Private key must be 64 hex characters (32 bytes)".to_string());
				}
				if hex::decode(hex_part).is_err() {
					return Err("Private key must be valid hexadecimal".to_string());
				}
				Ok(())
			})],
			vec![
				Field::new(
					"chain_id",
					FieldType::Integer {
						min: Some(1),
						max: None,
					},
				),
				Field::new("message", FieldType::String),
			],
		)
		.validate(config)
	}
}

/// Creates an EVM signer.
///
/// Configuration parameters:
/// - `private_key`: hex-encoded secp256k1 key
/// - `chain_id`: chain attested in the validation (default: 1)
/// - `message`: text shown above the attested fields
pub fn create_signer(config: &toml::Value) -> Result<Box<dyn SignerInterface>, AccountError> {
	EvmSignerSchema
		.validate(config)
		.map_err(|e| AccountError::InvalidKey(format!("Invalid configuration: {}", e)))?;

	let private_key = config
		.get("private_key")
		.and_then(|v| v.as_str())
		.map(SecretString::from)
		.ok_or_else(|| AccountError::InvalidKey("Private key is required".to_string()))?;
	let chain_id = config
		.get("chain_id")
		.and_then(|v| v.as_integer())
		.map(|id| id as u64)
		.unwrap_or(DEFAULT_CHAIN_ID);

	Ok(Box::new(EvmSigner::new(
		&private_key,
		chain_id,
		configured_message(config),
	)?))
}

/// Registry for the EVM signer.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "evm";
	type Factory = SignerFactory;

	fn factory() -> Self::Factory {
		create_signer
	}
}

impl SignerRegistry for Registry {}
