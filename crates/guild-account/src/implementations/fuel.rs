//! Fuel wallet signer.
//!
//! The wallet is an ed25519 key. Its address is sha256 of the public key, and
//! it signs sha256 of the validation message. There is no chain identifier.

use crate::{
	configured_message, ensure_identity, validation_params, AccountError, SignerFactory,
	SignerInterface, SignerRegistry,
};
use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use guild_types::{
	with_0x_prefix, without_0x_prefix, ConfigSchema, Field, FieldType, Identity,
	ImplementationRegistry, Schema, SecretString, SignRequest, SignatureBundle, SignedPayload,
	SignerBackend, Validation, ValidationError,
};
use sha2::{Digest, Sha256};

/// Signer holding an ed25519 wallet key.
pub struct FuelSigner {
	key: SigningKey,
	address: String,
	message: String,
}

impl FuelSigner {
	/// Loads the wallet from a hex-encoded 32-byte seed.
	pub fn new(seed: &SecretString, message: String) -> Result<Self, AccountError> {
		let seed: [u8; 32] = seed.with_exposed(|seed| {
			hex::decode(without_0x_prefix(seed))
				.ok()
				.and_then(|bytes| bytes.try_into().ok())
				.ok_or_else(|| AccountError::InvalidKey("Fuel key must be 32 bytes of hex".to_string()))
		})?;
		Ok(Self::from_key(SigningKey::from_bytes(&seed), message))
	}

	#[cfg(test)]
	pub(crate) fn generate(message: String) -> Self {
		let mut rng = rand::thread_rng();
		Self::from_key(SigningKey::generate(&mut rng), message)
	}

	fn from_key(key: SigningKey, message: String) -> Self {
		let address = with_0x_prefix(&hex::encode(Sha256::digest(key.verifying_key().as_bytes())));
		Self {
			key,
			address,
			message,
		}
	}
}

#[async_trait]
impl SignerInterface for FuelSigner {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FuelSignerSchema)
	}

	fn backend(&self) -> SignerBackend {
		SignerBackend::Fuel
	}

	fn identity(&self) -> Identity {
		Identity::Fuel {
			address: self.address.clone(),
		}
	}

	async fn sign(&self, request: &SignRequest) -> Result<SignatureBundle, AccountError> {
		ensure_identity(&self.identity(), request)?;

		let signed_payload = SignedPayload::bind(&request.payload, request.timestamp);
		let hash = Sha256::digest(signed_payload.as_bytes());
		let params = validation_params(request, with_0x_prefix(&hex::encode(hash)), &self.message);

		let digest = Sha256::digest(params.message().as_bytes());
		let signature = self.key.sign(&digest);
		let sig = with_0x_prefix(&hex::encode(signature.to_bytes()));

		let validation =
			Validation::new(&params, sig).map_err(|e| AccountError::SigningFailed(e.to_string()))?;
		Ok(SignatureBundle {
			signed_payload,
			validation,
		})
	}
}

/// Configuration schema for [`FuelSigner`].
pub struct FuelSignerSchema;

impl ConfigSchema for FuelSignerSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(
			vec![Field::new("private_key", FieldType::String).with_validator(|v| {
				let key = without_0x_prefix(v.as_str().unwrap_or(""));
				match hex::decode(key) {
					Ok(bytes) if bytes.len() == 32 => Ok(()),
					_ => Err("Private key must be 32 bytes of hex".to_string()),
				}
			})],
			vec![Field::new("message", FieldType::String)],
		)
		.validate(config)
	}
}

/// Creates a Fuel signer.
///
/// Configuration parameters:
/// - `private_key`: hex-encoded 32-byte ed25519 seed
/// - `message`: text shown above the attested fields
pub fn create_signer(config: &toml::Value) -> Result<Box<dyn SignerInterface>, AccountError> {
	FuelSignerSchema
		.validate(config)
		.map_err(|e| AccountError::InvalidKey(format!("Invalid configuration: {}", e)))?;

	let private_key = config
		.get("private_key")
		.and_then(|v| v.as_str())
		.map(SecretString::from)
		.ok_or_else(|| AccountError::InvalidKey("Private key is required".to_string()))?;

	Ok(Box::new(FuelSigner::new(&private_key, configured_message(config))?))
}

/// Registry for the Fuel signer.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "fuel";
	type Factory = SignerFactory;

	fn factory() -> Self::Factory {
		create_signer
	}
}

impl SignerRegistry for Registry {}
