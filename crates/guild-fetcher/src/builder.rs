//! Builder for [`GuildClient`].
//!
//! Resolves the configured storage, time source and signer implementations
//! through factory functions and wires them into a client.

use crate::diagnostics::{DiagnosticsInterface, TracingDiagnostics};
use crate::framer::EndpointResolver;
use crate::transport::{HttpTransport, TransportInterface};
use crate::GuildClient;
use guild_account::{AccountError, AutoApprove, SignaturePrompt, SignerInterface, SignerService};
use guild_clock::{ClockError, ClockSkewEstimator, TimeSourceInterface};
use guild_config::Config;
use guild_storage::{StorageError, StorageInterface, StorageService};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during client construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions for each pluggable component, keyed by implementation name.
pub struct ClientFactories<SF, TF, AF> {
	pub storage_factories: HashMap<String, SF>,
	pub clock_factories: HashMap<String, TF>,
	pub signer_factories: HashMap<String, AF>,
}

/// Instantiates every configured implementation that has a factory.
fn load_implementations<F, T, E>(
	component: &str,
	primary: Option<&str>,
	configs: &HashMap<String, toml::Value>,
	factories: &HashMap<String, F>,
) -> Result<HashMap<String, T>, BuilderError>
where
	F: Fn(&toml::Value) -> Result<T, E>,
	E: Display,
{
	let mut loaded = HashMap::new();
	for (name, config) in configs {
		let Some(factory) = factories.get(name) else {
			continue;
		};
		match factory(config) {
			Ok(implementation) => {
				let is_primary = primary == Some(name.as_str());
				tracing::info!(component = component, implementation = %name, enabled = %is_primary, "Loaded");
				loaded.insert(name.clone(), implementation);
			},
			Err(e) => {
				tracing::error!(
					component = component,
					implementation = %name,
					error = %e,
					"Failed to create implementation"
				);
				return Err(BuilderError::Config(format!(
					"Failed to create {} implementation '{}': {}",
					component, name, e
				)));
			},
		}
	}
	Ok(loaded)
}

fn take_primary<T>(
	component: &str,
	primary: &str,
	mut loaded: HashMap<String, T>,
) -> Result<T, BuilderError> {
	loaded.remove(primary).ok_or_else(|| {
		BuilderError::MissingComponent(format!(
			"Primary {} '{}' failed to load or has no registered factory",
			component, primary
		))
	})
}

/// Builder for constructing a [`GuildClient`] with pluggable implementations.
pub struct ClientBuilder {
	config: Config,
	prompt: Arc<dyn SignaturePrompt>,
	diagnostics: Arc<dyn DiagnosticsInterface>,
	transport: Option<Box<dyn TransportInterface>>,
}

impl ClientBuilder {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			prompt: Arc::new(AutoApprove),
			diagnostics: Arc::new(TracingDiagnostics),
			transport: None,
		}
	}

	/// Replaces the signature prompt (default: approve everything).
	pub fn with_prompt(mut self, prompt: Arc<dyn SignaturePrompt>) -> Self {
		self.prompt = prompt;
		self
	}

	/// Replaces the diagnostics collaborator (default: log entries).
	pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticsInterface>) -> Self {
		self.diagnostics = diagnostics;
		self
	}

	/// Replaces the HTTP transport.
	pub fn with_transport(mut self, transport: Box<dyn TransportInterface>) -> Self {
		self.transport = Some(transport);
		self
	}

	pub async fn build<SF, TF, AF>(
		self,
		factories: ClientFactories<SF, TF, AF>,
	) -> Result<GuildClient, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
		TF: Fn(&toml::Value) -> Result<Box<dyn TimeSourceInterface>, ClockError>,
		AF: Fn(&toml::Value) -> Result<Box<dyn SignerInterface>, AccountError>,
	{
		let config = &self.config;

		// Storage
		let storage_impls = load_implementations(
			"storage",
			Some(config.storage.primary.as_str()),
			&config.storage.implementations,
			&factories.storage_factories,
		)?;
		let storage = Arc::new(StorageService::new(take_primary(
			"storage",
			&config.storage.primary,
			storage_impls,
		)?));

		// Clock
		let clock_impls = load_implementations(
			"clock",
			Some(config.clock.primary.as_str()),
			&config.clock.implementations,
			&factories.clock_factories,
		)?;
		let source = take_primary("clock", &config.clock.primary, clock_impls)?;
		let clock = Arc::new(ClockSkewEstimator::new(source, Some(storage.clone())));
		clock
			.initialize()
			.await
			.map_err(|e| BuilderError::Config(format!("Failed to restore clock state: {}", e)))?;

		// Signer
		let signer = Arc::new(SignerService::new(
			self.prompt.clone(),
			Duration::from_secs(config.signer.reuse_window_seconds),
		));
		let signer_impls = load_implementations(
			"signer",
			config.signer.primary.as_deref(),
			&config.signer.implementations,
			&factories.signer_factories,
		)?;
		match &config.signer.primary {
			Some(primary) => {
				signer
					.connect(take_primary("signer", primary, signer_impls)?)
					.await;
			},
			None => {
				tracing::warn!(component = "signer", "No wallet configured - signed requests will fail");
			},
		}

		let transport = match self.transport {
			Some(transport) => transport,
			None => Box::new(
				HttpTransport::new(Duration::from_secs(config.api.timeout_seconds))
					.map_err(|e| BuilderError::Config(e.to_string()))?,
			),
		};

		tracing::info!(
			component = "fetcher",
			base_url = %config.api.base_url,
			max_consecutive_resyncs = config.recovery.max_consecutive_resyncs,
			"Client ready"
		);

		Ok(GuildClient::new(
			EndpointResolver::from_config(&config.api),
			transport,
			clock,
			signer,
			self.diagnostics,
			config.recovery.max_consecutive_resyncs,
		))
	}
}
