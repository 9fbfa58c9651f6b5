//! Local time source.
//!
//! Reports the local clock as server time, which yields a zero skew. Meant for
//! development against a backend on the same machine.

use crate::{ClockError, TimeSourceFactory, TimeSourceInterface, TimeSourceRegistry};
use async_trait::async_trait;
use guild_types::{current_timestamp_ms, ConfigSchema, ImplementationRegistry, Schema, ValidationError};

pub struct LocalTimeSource;

#[async_trait]
impl TimeSourceInterface for LocalTimeSource {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LocalTimeSourceSchema)
	}

	async fn server_time_ms(&self) -> Result<i64, ClockError> {
		Ok(current_timestamp_ms())
	}
}

pub struct LocalTimeSourceSchema;

impl ConfigSchema for LocalTimeSourceSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

pub fn create_time_source(
	config: &toml::Value,
) -> Result<Box<dyn TimeSourceInterface>, ClockError> {
	LocalTimeSourceSchema
		.validate(config)
		.map_err(|e| ClockError::Configuration(e.to_string()))?;
	Ok(Box::new(LocalTimeSource))
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "local";
	type Factory = TimeSourceFactory;

	fn factory() -> Self::Factory {
		create_time_source
	}
}

impl TimeSourceRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ClockSkewEstimator;

	#[tokio::test]
	async fn test_local_source_has_near_zero_skew() {
		let config = toml::Value::Table(toml::map::Map::new());
		let estimator = ClockSkewEstimator::new(create_time_source(&config).unwrap(), None);
		assert!(estimator.current_skew().await.abs() < 1_000);
	}
}
