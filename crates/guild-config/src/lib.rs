//! Configuration for the Guild request client.
//!
//! Configuration is read from a TOML file. `${VAR}` and `${VAR:-default}`
//! placeholders are substituted from the environment before parsing, so
//! private keys never have to be written into the file itself. The parsed
//! configuration is validated before it is handed out.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Configuration error: {0}")]
	Parse(String),
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// The default rendering repeats the whole input; keep only the message.
		ConfigError::Parse(err.message().to_string())
	}
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Platform API location and transport settings.
	pub api: ApiConfig,
	/// Server-time sources for clock-skew estimation.
	pub clock: ClockConfig,
	/// Wallet backends used to sign requests.
	#[serde(default)]
	pub signer: SignerConfig,
	/// Persistence for the resync flag.
	pub storage: StorageConfig,
	/// Stale-timestamp recovery policy.
	#[serde(default)]
	pub recovery: RecoveryConfig,
}

/// Platform API settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	/// Base URL prefixed to relative platform resources, e.g.
	/// `https://api.guild.xyz/v1`.
	pub base_url: String,
	/// Base URL for `/api/...` resources served by the web application.
	#[serde(default)]
	pub app_url: Option<String>,
	/// Per-request timeout in seconds.
	#[serde(default = "default_timeout_seconds")]
	pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
	30
}

/// Server-time source selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClockConfig {
	/// Which time source implementation to use.
	pub primary: String,
	/// Time source implementation tables keyed by name.
	#[serde(default)]
	pub implementations: HashMap<String, toml::Value>,
}

/// Signer selection.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SignerConfig {
	/// Backend connected at start-up. `None` starts without a wallet.
	pub primary: Option<String>,
	/// Window in which a prior signature for the same payload may be reused
	/// when the caller does not force a prompt. 0 disables reuse.
	#[serde(default)]
	pub reuse_window_seconds: u64,
	/// Signer implementation tables keyed by name.
	#[serde(default)]
	pub implementations: HashMap<String, toml::Value>,
}

/// Storage backend selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	pub primary: String,
	pub implementations: HashMap<String, toml::Value>,
}

/// Stale-timestamp recovery policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecoveryConfig {
	/// Consecutive stale-timestamp rejections that schedule a clock resync.
	/// Further rejections fail without scheduling another one until a signed
	/// request succeeds.
	#[serde(default = "default_max_consecutive_resyncs")]
	pub max_consecutive_resyncs: u32,
}

fn default_max_consecutive_resyncs() -> u32 {
	3
}

impl Default for RecoveryConfig {
	fn default() -> Self {
		Self {
			max_consecutive_resyncs: default_max_consecutive_resyncs(),
		}
	}
}

/// Upper bound for `signer.reuse_window_seconds` (one day).
pub const MAX_REUSE_WINDOW_SECONDS: u64 = 86_400;

/// Substitutes `${VAR}` and `${VAR:-default}` placeholders outside of
/// full-line `#` comments.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	// Bounded so a hostile file cannot make the regex scan arbitrarily large input.
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut output = String::with_capacity(input.len());
	for line in input.split_inclusive('\n') {
		// Commented-out lines keep their placeholders verbatim.
		if line.trim_start().starts_with('#') {
			output.push_str(line);
			continue;
		}

		let mut last = 0;
		for caps in re.captures_iter(line) {
			let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
				continue;
			};
			let value = match (std::env::var(name.as_str()), caps.get(2)) {
				(Ok(value), _) => value,
				(Err(_), Some(default)) => default.as_str().to_string(),
				(Err(_), None) => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						name.as_str()
					)))
				},
			};
			output.push_str(&line[last..whole.start()]);
			output.push_str(&value);
			last = whole.end();
		}
		output.push_str(&line[last..]);
	}

	Ok(output)
}

fn require_primary(
	section: &str,
	primary: &str,
	implementations: &HashMap<String, toml::Value>,
) -> Result<(), ConfigError> {
	if primary.is_empty() {
		return Err(ConfigError::Validation(format!(
			"{} primary implementation cannot be empty",
			section
		)));
	}
	if !implementations.contains_key(primary) {
		return Err(ConfigError::Validation(format!(
			"Primary {} '{}' not found in implementations",
			section, primary
		)));
	}
	Ok(())
}

impl Config {
	/// Loads and validates configuration from a TOML file.
	pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let content = tokio::fs::read_to_string(path).await.map_err(|e| {
			ConfigError::Io(std::io::Error::new(
				e.kind(),
				format!("Cannot read {}: {}", path.display(), e),
			))
		})?;
		tracing::debug!(path = %path.display(), "Read configuration file");
		content.parse()
	}

	fn validate(&self) -> Result<(), ConfigError> {
		let base_url = self.api.base_url.trim();
		if base_url.is_empty() {
			return Err(ConfigError::Validation("api.base_url cannot be empty".into()));
		}
		if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
			return Err(ConfigError::Validation(format!(
				"api.base_url must be an http(s) URL, got '{}'",
				base_url
			)));
		}
		if let Some(app_url) = &self.api.app_url {
			if !app_url.starts_with("http://") && !app_url.starts_with("https://") {
				return Err(ConfigError::Validation(format!(
					"api.app_url must be an http(s) URL, got '{}'",
					app_url
				)));
			}
		}
		if self.api.timeout_seconds == 0 || self.api.timeout_seconds > 300 {
			return Err(ConfigError::Validation(
				"api.timeout_seconds must be between 1 and 300".into(),
			));
		}

		require_primary("clock", &self.clock.primary, &self.clock.implementations)?;
		require_primary("storage", &self.storage.primary, &self.storage.implementations)?;
		if let Some(primary) = &self.signer.primary {
			require_primary("signer", primary, &self.signer.implementations)?;
		}

		if self.signer.reuse_window_seconds > MAX_REUSE_WINDOW_SECONDS {
			return Err(ConfigError::Validation(format!(
				"signer.reuse_window_seconds must be at most {}",
				MAX_REUSE_WINDOW_SECONDS
			)));
		}

		let max = self.recovery.max_consecutive_resyncs;
		if max == 0 || max > 100 {
			return Err(ConfigError::Validation(
				"recovery.max_consecutive_resyncs must be between 1 and 100".into(),
			));
		}

		Ok(())
	}
}

/// Parses a TOML string: environment placeholders are resolved first and the
/// result is validated.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
