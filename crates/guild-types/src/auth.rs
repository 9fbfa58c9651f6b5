//! Signing inputs and outputs.
//!
//! A [`SignRequest`] is turned by a signer backend into a [`SignatureBundle`]:
//! the [`SignedPayload`] that binds the request payload to its timestamp, and
//! the [`Validation`] (parameters plus signature) the backend verifies.

use crate::utils::without_0x_prefix;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Signing backend family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerBackend {
	/// Account-based chain; personal-message signatures from an EOA.
	Evm,
	/// Wallet-object based chain without a chain identifier.
	Fuel,
}

impl SignerBackend {
	/// Validation method code sent in `params.method`.
	pub fn validation_method(&self) -> u8 {
		match self {
			SignerBackend::Evm => 1,
			SignerBackend::Fuel => 4,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			SignerBackend::Evm => "evm",
			SignerBackend::Fuel => "fuel",
		}
	}
}

impl fmt::Display for SignerBackend {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Identity of the connected wallet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum Identity {
	/// Externally-owned account on a given chain.
	Evm { address: String, chain_id: u64 },
	/// Wallet handle addressed with the chain's native 32-byte encoding.
	Fuel { address: String },
}

impl Identity {
	pub fn backend(&self) -> SignerBackend {
		match self {
			Identity::Evm { .. } => SignerBackend::Evm,
			Identity::Fuel { .. } => SignerBackend::Fuel,
		}
	}

	pub fn address(&self) -> &str {
		match self {
			Identity::Evm { address, .. } | Identity::Fuel { address } => address,
		}
	}

	pub fn chain_id(&self) -> Option<u64> {
		match self {
			Identity::Evm { chain_id, .. } => Some(*chain_id),
			Identity::Fuel { .. } => None,
		}
	}
}

impl fmt::Display for Identity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Identity::Evm { address, chain_id } => write!(f, "evm:{}@{}", address, chain_id),
			Identity::Fuel { address } => write!(f, "fuel:{}", address),
		}
	}
}

/// Input of a single signing operation. Built per call, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
	pub backend: SignerBackend,
	pub identity: Identity,
	/// Serialized request body being authenticated.
	pub payload: String,
	/// Skew-adjusted milliseconds since the epoch, taken at sign time.
	pub timestamp: i64,
	/// Skip session reuse and always ask the wallet for a fresh signature.
	pub force_prompt: bool,
}

impl SignRequest {
	pub fn new(identity: Identity, payload: impl Into<String>, timestamp: i64, force_prompt: bool) -> Self {
		Self {
			backend: identity.backend(),
			identity,
			payload: payload.into(),
			timestamp,
			force_prompt,
		}
	}
}

/// The exact document that was signed: payload and timestamp bound together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignedPayload(String);

impl SignedPayload {
	/// Binds `payload` to `timestamp` as `{"data": ..., "timestamp": ...}`.
	///
	/// JSON payloads are embedded as JSON; anything else is embedded as a
	/// string.
	pub fn bind(payload: &str, timestamp: i64) -> Self {
		let data = serde_json::from_str::<Value>(payload)
			.unwrap_or_else(|_| Value::String(payload.to_string()));
		Self(json!({ "data": data, "timestamp": timestamp }).to_string())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn as_bytes(&self) -> &[u8] {
		self.0.as_bytes()
	}
}

impl fmt::Display for SignedPayload {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Parameters attested by a signature, in the platform's wire naming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationParams {
	pub addr: String,
	pub method: u8,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub chain_id: Option<String>,
	/// Hex digest of the signed payload.
	pub hash: String,
	pub nonce: String,
	pub ts: String,
	pub msg: String,
}

impl ValidationParams {
	/// Human-readable text presented to the wallet and signed.
	pub fn message(&self) -> String {
		let mut lines = vec![
			format!("{}\n", self.msg),
			format!("Address: {}", self.addr),
			format!("Method: {}", self.method),
		];
		if let Some(chain_id) = &self.chain_id {
			lines.push(format!("ChainId: {}", chain_id));
		}
		lines.push(format!("Hash: {}", self.hash));
		lines.push(format!("Nonce: {}", self.nonce));
		lines.push(format!("Timestamp: {}", self.ts));
		lines.join("\n")
	}
}

/// Signature plus the parameters it attests to. Single use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validation {
	pub params: Value,
	/// 0x-prefixed hex of the raw signature bytes.
	pub sig: String,
}

impl Validation {
	pub fn new(params: &ValidationParams, sig: String) -> Result<Self, serde_json::Error> {
		Ok(Self {
			params: serde_json::to_value(params)?,
			sig,
		})
	}

	/// Raw signature bytes decoded from `sig`.
	pub fn signature_bytes(&self) -> Result<Vec<u8>, hex::FromHexError> {
		hex::decode(without_0x_prefix(&self.sig))
	}

	/// Signing timestamp recorded in the parameters.
	pub fn timestamp(&self) -> Option<i64> {
		self.params.get("ts").and_then(|ts| match ts {
			Value::String(s) => s.parse().ok(),
			other => other.as_i64(),
		})
	}
}

/// A validation together with the one payload it was produced for.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureBundle {
	pub signed_payload: SignedPayload,
	pub validation: Validation,
}

impl SignatureBundle {
	/// Body document carried by mutating requests:
	/// `{ "payload": <signed payload>, "params": ..., "sig": ... }`.
	pub fn body(&self) -> Value {
		json!({
			"payload": self.signed_payload.as_str(),
			"params": self.validation.params,
			"sig": self.validation.sig,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn params(chain_id: Option<&str>) -> ValidationParams {
		ValidationParams {
			addr: "0xabc".to_string(),
			method: 1,
			chain_id: chain_id.map(str::to_string),
			hash: "0x1234".to_string(),
			nonce: "0x99".to_string(),
			ts: "1700000000000".to_string(),
			msg: "Please sign this message".to_string(),
		}
	}

	#[test]
	fn test_bind_embeds_payload_and_timestamp() {
		let signed = SignedPayload::bind(r#"{"guildId":5}"#, 1_700_000_000_000);
		let doc: Value = serde_json::from_str(signed.as_str()).unwrap();
		assert_eq!(doc["data"]["guildId"], 5);
		assert_eq!(doc["timestamp"], 1_700_000_000_000i64);
	}

	#[test]
	fn test_bind_changes_with_payload_or_timestamp() {
		let base = SignedPayload::bind(r#"{"a":1}"#, 1000);
		assert_ne!(base, SignedPayload::bind(r#"{"a":2}"#, 1000));
		assert_ne!(base, SignedPayload::bind(r#"{"a":1}"#, 1001));
		assert_eq!(base, SignedPayload::bind(r#"{"a":1}"#, 1000));
	}

	#[test]
	fn test_bind_non_json_payload_as_string() {
		let signed = SignedPayload::bind("hello", 7);
		assert_eq!(signed.as_str(), r#"{"data":"hello","timestamp":7}"#);
	}

	#[test]
	fn test_message_includes_chain_id_only_when_present() {
		let evm = params(Some("1")).message();
		assert!(evm.starts_with("Please sign this message\n\nAddress: 0xabc\n"));
		assert!(evm.contains("\nChainId: 1\n"));
		assert!(evm.ends_with("Timestamp: 1700000000000"));

		let fuel = params(None).message();
		assert!(!fuel.contains("ChainId"));
	}

	#[test]
	fn test_params_serialization() {
		let value = serde_json::to_value(params(None)).unwrap();
		assert!(value.get("chainId").is_none());
		let value = serde_json::to_value(params(Some("10"))).unwrap();
		assert_eq!(value["chainId"], "10");
		assert_eq!(value["ts"], "1700000000000");
	}

	#[test]
	fn test_validation_helpers() {
		let validation = Validation::new(&params(None), "0x0aff".to_string()).unwrap();
		assert_eq!(validation.signature_bytes().unwrap(), vec![0x0a, 0xff]);
		assert_eq!(validation.timestamp(), Some(1_700_000_000_000));
	}

	#[test]
	fn test_bundle_body_shape() {
		let bundle = SignatureBundle {
			signed_payload: SignedPayload::bind("{}", 1),
			validation: Validation::new(&params(None), "0x01".to_string()).unwrap(),
		};
		let body = bundle.body();
		assert_eq!(body["payload"], r#"{"data":{},"timestamp":1}"#);
		assert_eq!(body["sig"], "0x01");
		assert_eq!(body["params"]["addr"], "0xabc");
	}

	#[test]
	fn test_identity_accessors() {
		let evm = Identity::Evm {
			address: "0xabc".into(),
			chain_id: 137,
		};
		assert_eq!(evm.backend(), SignerBackend::Evm);
		assert_eq!(evm.chain_id(), Some(137));
		let fuel = Identity::Fuel {
			address: "0xdef".into(),
		};
		assert_eq!(fuel.backend().validation_method(), 4);
		assert_eq!(fuel.address(), "0xdef");
		assert_eq!(fuel.chain_id(), None);
	}
}
