//! Persistence for client state that must survive a restart.
//!
//! The request layer keeps very little state: the `shouldFetchTimestamp` flag
//! raised by stale-timestamp recovery. It lives behind [`StorageService`],
//! which stores JSON values in a pluggable key-value backend.

use async_trait::async_trait;
use guild_types::{ConfigSchema, ImplementationRegistry};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	#[error("Not found")]
	NotFound,
	#[error("Serialization error: {0}")]
	Serialization(String),
	#[error("Backend error: {0}")]
	Backend(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Low-level byte store.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Returns the stored bytes, or `NotFound` if absent.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores bytes, replacing any previous value.
	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

	/// Removes a key. Removing an absent key is not an error.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	fn config_schema(&self) -> Box<dyn ConfigSchema>;
}

/// Type alias for storage factory functions.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// All built-in storage implementations as `(name, factory)` pairs.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// Typed JSON storage on top of a [`StorageInterface`] backend.
///
/// Keys are formed as `namespace:id`.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	fn key(namespace: &str, id: &str) -> String {
		format!("{}:{}", namespace, id)
	}

	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend.set_bytes(&Self::key(namespace, id), bytes).await
	}

	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&Self::key(namespace, id)).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Like [`retrieve`](Self::retrieve) but maps `NotFound` to `None`.
	pub async fn try_retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Option<T>, StorageError> {
		match self.retrieve(namespace, id).await {
			Ok(value) => Ok(Some(value)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&Self::key(namespace, id)).await
	}

	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&Self::key(namespace, id)).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use implementations::memory::MemoryStorage;
	use serde::Deserialize;

	#[derive(Debug, PartialEq, Serialize, Deserialize)]
	struct Session {
		address: String,
	}

	#[tokio::test]
	async fn test_typed_round_trip_and_namespacing() {
		let service = StorageService::new(Box::new(MemoryStorage::new()));
		let session = Session {
			address: "0xabc".to_string(),
		};
		service.store("session", "wallet", &session).await.unwrap();

		let restored: Session = service.retrieve("session", "wallet").await.unwrap();
		assert_eq!(restored, session);
		assert!(!service.exists("other", "wallet").await.unwrap());
	}

	#[tokio::test]
	async fn test_try_retrieve_and_remove() {
		let service = StorageService::new(Box::new(MemoryStorage::new()));
		assert_eq!(
			service.try_retrieve::<String>("session", "flag").await.unwrap(),
			None
		);

		service.store("session", "flag", &"true").await.unwrap();
		assert_eq!(
			service.try_retrieve::<String>("session", "flag").await.unwrap(),
			Some("true".to_string())
		);

		service.remove("session", "flag").await.unwrap();
		assert!(!service.exists("session", "flag").await.unwrap());
	}

	#[tokio::test]
	async fn test_type_mismatch_is_serialization_error() {
		let service = StorageService::new(Box::new(MemoryStorage::new()));
		service.store("session", "flag", &"true").await.unwrap();
		let result = service.retrieve::<i64>("session", "flag").await;
		assert!(matches!(result, Err(StorageError::Serialization(_))));
	}

	#[test]
	fn test_registered_implementations() {
		let names: Vec<_> = get_all_implementations().into_iter().map(|(n, _)| n).collect();
		assert_eq!(names, vec!["file", "memory"]);
	}
}
