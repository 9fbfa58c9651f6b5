//! Registry of every implementation factory known to the binary.
//!
//! Configuration names implementations by string; the registry maps those
//! names to factory functions so that the client can be assembled without the
//! binary hard-coding which backends exist.

use guild_account::{SignaturePrompt, SignerFactory};
use guild_clock::TimeSourceFactory;
use guild_config::Config;
use guild_fetcher::{ClientBuilder, ClientFactories, GuildClient};
use guild_storage::StorageFactory;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Global registry for all implementation factories
pub struct FactoryRegistry {
	pub storage: HashMap<String, StorageFactory>,
	pub clock: HashMap<String, TimeSourceFactory>,
	pub signer: HashMap<String, SignerFactory>,
}

impl FactoryRegistry {
	pub fn new() -> Self {
		Self {
			storage: HashMap::new(),
			clock: HashMap::new(),
			signer: HashMap::new(),
		}
	}

	pub fn register_storage(&mut self, name: impl Into<String>, factory: StorageFactory) {
		self.storage.insert(name.into(), factory);
	}

	pub fn register_clock(&mut self, name: impl Into<String>, factory: TimeSourceFactory) {
		self.clock.insert(name.into(), factory);
	}

	pub fn register_signer(&mut self, name: impl Into<String>, factory: SignerFactory) {
		self.signer.insert(name.into(), factory);
	}
}

impl Default for FactoryRegistry {
	fn default() -> Self {
		Self::new()
	}
}

static REGISTRY: OnceLock<FactoryRegistry> = OnceLock::new();

/// Returns the global registry, populating it on first use.
pub fn get_registry() -> &'static FactoryRegistry {
	REGISTRY.get_or_init(|| {
		let mut registry = FactoryRegistry::new();

		for (name, factory) in guild_storage::get_all_implementations() {
			tracing::debug!("Registering storage implementation: {}", name);
			registry.register_storage(name, factory);
		}

		for (name, factory) in guild_clock::get_all_implementations() {
			tracing::debug!("Registering clock implementation: {}", name);
			registry.register_clock(name, factory);
		}

		for (name, factory) in guild_account::get_all_implementations() {
			tracing::debug!("Registering signer implementation: {}", name);
			registry.register_signer(name, factory);
		}

		registry
	})
}

/// Picks the factories for the implementations named in a config section.
macro_rules! build_factories {
	($registry:expr, $config_impls:expr, $registry_field:ident, $type_name:literal) => {{
		let mut factories = HashMap::new();
		for name in $config_impls.keys() {
			if let Some(factory) = $registry.$registry_field.get(name) {
				factories.insert(name.clone(), *factory);
			} else {
				let mut available: Vec<_> = $registry.$registry_field.keys().cloned().collect();
				available.sort();
				return Err(format!(
					"Unknown {} implementation '{}'. Available: [{}]",
					$type_name,
					name,
					available.join(", ")
				)
				.into());
			}
		}
		factories
	}};
}

/// Builds a client for `config` from the registered factories.
pub async fn build_client_from_config(
	config: Config,
	prompt: Arc<dyn SignaturePrompt>,
) -> Result<GuildClient, Box<dyn std::error::Error>> {
	let registry = get_registry();

	let storage_factories =
		build_factories!(registry, config.storage.implementations, storage, "storage");
	let clock_factories = build_factories!(registry, config.clock.implementations, clock, "clock");
	let signer_factories =
		build_factories!(registry, config.signer.implementations, signer, "signer");

	let factories = ClientFactories {
		storage_factories,
		clock_factories,
		signer_factories,
	};

	Ok(ClientBuilder::new(config)
		.with_prompt(prompt)
		.build(factories)
		.await?)
}
