//! Clock-skew estimation for signed requests.
//!
//! Signatures carry a timestamp that the backend checks for freshness. The
//! local clock of a client can be off by minutes, so every signing timestamp
//! is `local now + skew`, where the skew is estimated once against a
//! server-trusted time source and then cached.
//!
//! The skew lives only as long as the process. What survives a restart is the
//! `shouldFetchTimestamp` flag raised by stale-timestamp recovery, which makes
//! the next start recompute the skew immediately instead of on first use.

use async_trait::async_trait;
use guild_storage::StorageService;
use guild_types::{current_timestamp_ms, ConfigSchema, ImplementationRegistry};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Re-export implementations
pub mod implementations {
	pub mod http;
	pub mod local;
}

/// Storage namespace of the persistent resync flag.
pub const RESYNC_NAMESPACE: &str = "session";
/// Name of the persistent resync flag.
pub const RESYNC_FLAG: &str = "shouldFetchTimestamp";

/// Errors that can occur while estimating the clock skew.
#[derive(Debug, Error)]
pub enum ClockError {
	#[error("Network error: {0}")]
	Network(String),
	#[error("Invalid time response: {0}")]
	InvalidResponse(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
	#[error("Storage error: {0}")]
	Storage(String),
}

/// A source of server-trusted time.
#[async_trait]
pub trait TimeSourceInterface: Send + Sync {
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Current server time in milliseconds since the epoch.
	async fn server_time_ms(&self) -> Result<i64, ClockError>;
}

/// Type alias for time source factory functions.
pub type TimeSourceFactory =
	fn(&toml::Value) -> Result<Box<dyn TimeSourceInterface>, ClockError>;

/// Registry trait for time source implementations.
pub trait TimeSourceRegistry: ImplementationRegistry<Factory = TimeSourceFactory> {}

/// All built-in time sources as `(name, factory)` pairs.
pub fn get_all_implementations() -> Vec<(&'static str, TimeSourceFactory)> {
	use implementations::{http, local};

	vec![
		(http::Registry::NAME, http::Registry::factory()),
		(local::Registry::NAME, local::Registry::factory()),
	]
}

/// The local wall clock.
pub trait LocalClock: Send + Sync {
	fn now_ms(&self) -> i64;
}

/// [`LocalClock`] backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl LocalClock for SystemClock {
	fn now_ms(&self) -> i64 {
		current_timestamp_ms()
	}
}

/// Estimates and caches `server time - local time`.
///
/// Owned by the client and shared with whoever needs skew-adjusted
/// timestamps. Concurrent recomputations are tolerated; the last one wins.
pub struct ClockSkewEstimator {
	/// `None` for a fixed offset.
	source: Option<Box<dyn TimeSourceInterface>>,
	local: Arc<dyn LocalClock>,
	storage: Option<Arc<StorageService>>,
	cached: RwLock<Option<i64>>,
	resync_pending: AtomicBool,
}

impl ClockSkewEstimator {
	/// Creates an estimator over `source`. With `storage`, the resync flag is
	/// persisted.
	pub fn new(
		source: Box<dyn TimeSourceInterface>,
		storage: Option<Arc<StorageService>>,
	) -> Self {
		Self {
			source: Some(source),
			local: Arc::new(SystemClock),
			storage,
			cached: RwLock::new(None),
			resync_pending: AtomicBool::new(false),
		}
	}

	/// An estimator that always reports `offset_ms` and never fetches.
	pub fn fixed(offset_ms: i64) -> Self {
		Self {
			source: None,
			local: Arc::new(SystemClock),
			storage: None,
			cached: RwLock::new(Some(offset_ms)),
			resync_pending: AtomicBool::new(false),
		}
	}

	/// Replaces the local clock.
	pub fn with_local_clock(mut self, local: Arc<dyn LocalClock>) -> Self {
		self.local = local;
		self
	}

	/// Consumes the persisted resync flag at process start.
	///
	/// If the flag is set, the skew is recomputed right away. Otherwise nothing
	/// is fetched until first use.
	pub async fn initialize(&self) -> Result<(), ClockError> {
		let Some(storage) = &self.storage else {
			return Ok(());
		};

		let flag = storage
			.try_retrieve::<String>(RESYNC_NAMESPACE, RESYNC_FLAG)
			.await
			.map_err(|e| ClockError::Storage(e.to_string()))?;

		if flag.as_deref() == Some("true") {
			tracing::info!(component = "clock", "Resync flag set, recomputing clock skew");
			self.resync_pending.store(true, Ordering::SeqCst);
			if let Err(e) = self.resync().await {
				tracing::warn!(component = "clock", error = %e, "Clock resync at start-up failed");
			}
		}
		Ok(())
	}

	/// Current skew in milliseconds.
	///
	/// Computed on first use and cached. If the time source is unreachable the
	/// result is 0 and nothing is cached, so the next call tries again.
	pub async fn current_skew(&self) -> i64 {
		if let Some(skew) = *self.cached.read().await {
			return skew;
		}
		match self.resync().await {
			Ok(skew) => skew,
			Err(e) => {
				tracing::warn!(component = "clock", error = %e, "Clock skew unavailable, using 0");
				0
			},
		}
	}

	/// Skew-adjusted current time in milliseconds.
	pub async fn adjusted_now(&self) -> i64 {
		let skew = self.current_skew().await;
		self.local.now_ms() + skew
	}

	/// Recomputes the skew from the time source.
	///
	/// On success the skew is cached and the resync flag is cleared.
	pub async fn resync(&self) -> Result<i64, ClockError> {
		let skew = match &self.source {
			Some(source) => {
				let before = self.local.now_ms();
				let server = source.server_time_ms().await?;
				let after = self.local.now_ms();
				server - (before + (after - before) / 2)
			},
			None => self.cached.read().await.unwrap_or(0),
		};

		*self.cached.write().await = Some(skew);
		self.resync_pending.store(false, Ordering::SeqCst);
		tracing::debug!(component = "clock", skew_ms = skew, "Clock skew computed");

		if let Some(storage) = &self.storage {
			if let Err(e) = storage.remove(RESYNC_NAMESPACE, RESYNC_FLAG).await {
				tracing::warn!(component = "clock", error = %e, "Failed to clear resync flag");
			}
		}

		Ok(skew)
	}

	/// Forgets the cached skew and raises the persistent resync flag so the
	/// next signing operation, or the next process start, recomputes it.
	pub async fn schedule_resync(&self) -> Result<(), ClockError> {
		if self.source.is_some() {
			*self.cached.write().await = None;
		}
		self.resync_pending.store(true, Ordering::SeqCst);

		if let Some(storage) = &self.storage {
			storage
				.store(RESYNC_NAMESPACE, RESYNC_FLAG, &"true")
				.await
				.map_err(|e| ClockError::Storage(e.to_string()))?;
		}
		Ok(())
	}

	/// Whether a resync was scheduled and has not completed yet.
	pub fn resync_pending(&self) -> bool {
		self.resync_pending.load(Ordering::SeqCst)
	}

	/// The cached skew, without fetching.
	pub async fn cached_skew(&self) -> Option<i64> {
		*self.cached.read().await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use guild_storage::implementations::memory::MemoryStorage;
	use guild_types::{Schema, ValidationError};
	use std::sync::atomic::{AtomicI64, AtomicUsize};

	struct ManualClock(AtomicI64);

	impl LocalClock for ManualClock {
		fn now_ms(&self) -> i64 {
			self.0.load(Ordering::SeqCst)
		}
	}

	struct StubSource {
		server_ms: Option<i64>,
		calls: Arc<AtomicUsize>,
	}

	struct NoSchema;

	impl ConfigSchema for NoSchema {
		fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
			Schema::new(vec![], vec![]).validate(config)
		}
	}

	#[async_trait]
	impl TimeSourceInterface for StubSource {
		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			Box::new(NoSchema)
		}

		async fn server_time_ms(&self) -> Result<i64, ClockError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			self.server_ms
				.ok_or_else(|| ClockError::Network("unreachable".to_string()))
		}
	}

	fn estimator(
		server_ms: Option<i64>,
		local_ms: i64,
		storage: Option<Arc<StorageService>>,
	) -> (ClockSkewEstimator, Arc<AtomicUsize>) {
		let calls = Arc::new(AtomicUsize::new(0));
		let source = StubSource {
			server_ms,
			calls: calls.clone(),
		};
		let estimator = ClockSkewEstimator::new(Box::new(source), storage)
			.with_local_clock(Arc::new(ManualClock(AtomicI64::new(local_ms))));
		(estimator, calls)
	}

	fn memory_storage() -> Arc<StorageService> {
		Arc::new(StorageService::new(Box::new(MemoryStorage::new())))
	}

	#[tokio::test]
	async fn test_skew_is_server_minus_local() {
		let (estimator, _) = estimator(Some(10_500), 10_000, None);
		assert_eq!(estimator.current_skew().await, 500);
		assert_eq!(estimator.adjusted_now().await, 10_500);
	}

	#[tokio::test]
	async fn test_repeated_calls_return_cached_offset() {
		let (estimator, calls) = estimator(Some(9_000), 10_000, None);
		let first = estimator.current_skew().await;
		let second = estimator.current_skew().await;
		let third = estimator.current_skew().await;
		assert_eq!(first, -1_000);
		assert_eq!(first, second);
		assert_eq!(second, third);
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_unreachable_source_falls_back_to_zero_uncached() {
		let (estimator, calls) = estimator(None, 10_000, None);
		assert_eq!(estimator.current_skew().await, 0);
		assert_eq!(estimator.current_skew().await, 0);
		assert_eq!(calls.load(Ordering::SeqCst), 2);
		assert!(estimator.cached_skew().await.is_none());
		assert!(estimator.resync().await.is_err());
	}

	#[tokio::test]
	async fn test_schedule_resync_forces_recompute() {
		let storage = memory_storage();
		let (estimator, calls) = estimator(Some(10_200), 10_000, Some(storage.clone()));
		assert_eq!(estimator.current_skew().await, 200);

		estimator.schedule_resync().await.unwrap();
		assert!(estimator.resync_pending());
		assert!(estimator.cached_skew().await.is_none());
		assert_eq!(
			storage
				.try_retrieve::<String>(RESYNC_NAMESPACE, RESYNC_FLAG)
				.await
				.unwrap()
				.as_deref(),
			Some("true")
		);

		assert_eq!(estimator.current_skew().await, 200);
		assert_eq!(calls.load(Ordering::SeqCst), 2);
		assert!(!estimator.resync_pending());
		assert!(!storage.exists(RESYNC_NAMESPACE, RESYNC_FLAG).await.unwrap());
	}

	#[tokio::test]
	async fn test_new_process_fetches_on_first_use() {
		let storage = memory_storage();
		let (previous_run, _) = estimator(Some(130_000), 10_000, Some(storage.clone()));
		assert_eq!(previous_run.current_skew().await, 120_000);

		// the local clock was corrected between runs
		let (estimator, calls) = estimator(Some(130_000), 130_000, Some(storage));
		estimator.initialize().await.unwrap();
		assert_eq!(calls.load(Ordering::SeqCst), 0);
		assert_eq!(estimator.current_skew().await, 0);
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_initialize_consumes_resync_flag() {
		let storage = memory_storage();
		storage
			.store(RESYNC_NAMESPACE, RESYNC_FLAG, &"true")
			.await
			.unwrap();

		let (estimator, calls) = estimator(Some(10_100), 10_000, Some(storage.clone()));
		estimator.initialize().await.unwrap();

		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert_eq!(estimator.cached_skew().await, Some(100));
		assert!(!storage.exists(RESYNC_NAMESPACE, RESYNC_FLAG).await.unwrap());
	}

	#[tokio::test]
	async fn test_initialize_keeps_pending_when_source_down() {
		let storage = memory_storage();
		storage
			.store(RESYNC_NAMESPACE, RESYNC_FLAG, &"true")
			.await
			.unwrap();

		let (estimator, _) = estimator(None, 10_000, Some(storage.clone()));
		estimator.initialize().await.unwrap();
		assert!(estimator.resync_pending());
		assert!(storage.exists(RESYNC_NAMESPACE, RESYNC_FLAG).await.unwrap());
	}

	#[tokio::test]
	async fn test_fixed_offset() {
		let estimator = ClockSkewEstimator::fixed(-42)
			.with_local_clock(Arc::new(ManualClock(AtomicI64::new(1_000))));
		assert_eq!(estimator.current_skew().await, -42);
		assert_eq!(estimator.adjusted_now().await, 958);

		estimator.schedule_resync().await.unwrap();
		assert_eq!(estimator.resync().await.unwrap(), -42);
		assert!(!estimator.resync_pending());
	}
}
