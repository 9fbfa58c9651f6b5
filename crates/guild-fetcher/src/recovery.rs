//! Stale-timestamp recovery.
//!
//! When the backend rejects a signature timestamp, the cached clock skew is
//! wrong. Recovery raises the persistent resync flag, invalidates the skew and
//! the signing session, and fails the call; the caller retries. Signed calls
//! made while the resync is pending recompute the skew before signing.
//!
//! Consecutive recoveries are bounded so that a backend whose clock cannot be
//! matched does not cause an endless resync loop. A successful signed call
//! resets the count.

use crate::FetchError;
use guild_account::SignerService;
use guild_clock::ClockSkewEstimator;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Backend error messages that mean the signature timestamp was rejected.
pub const STALE_TIMESTAMP_MESSAGES: [&str; 2] = [
	"Invalid or expired timestamp!",
	"Invalid timestamp! The creation of timestamp too far in future!",
];

pub fn is_stale_timestamp(msg: &str) -> bool {
	STALE_TIMESTAMP_MESSAGES.contains(&msg)
}

pub struct AuthRecovery {
	clock: Arc<ClockSkewEstimator>,
	signer: Arc<SignerService>,
	max_consecutive_resyncs: u32,
	consecutive_resyncs: AtomicU32,
}

impl AuthRecovery {
	pub fn new(
		clock: Arc<ClockSkewEstimator>,
		signer: Arc<SignerService>,
		max_consecutive_resyncs: u32,
	) -> Self {
		Self {
			clock,
			signer,
			max_consecutive_resyncs,
			consecutive_resyncs: AtomicU32::new(0),
		}
	}

	/// Reacts to a rejected timestamp and returns the error for the caller.
	pub async fn handle_stale_timestamp(&self, url: &str) -> FetchError {
		let attempt = self.consecutive_resyncs.fetch_add(1, Ordering::SeqCst) + 1;
		if attempt > self.max_consecutive_resyncs {
			tracing::error!(
				component = "recovery",
				url = %url,
				attempts = attempt,
				limit = self.max_consecutive_resyncs,
				"Timestamp still rejected after clock resyncs; not scheduling another"
			);
			return FetchError::StaleTimestamp {
				resync_scheduled: false,
			};
		}

		if let Err(e) = self.clock.schedule_resync().await {
			// the in-memory skew is already invalidated; only persistence failed
			tracing::warn!(component = "recovery", error = %e, "Failed to persist resync flag");
		}
		self.signer.clear_session().await;

		tracing::warn!(
			component = "recovery",
			url = %url,
			attempt = attempt,
			"Signature timestamp rejected, clock resync scheduled"
		);
		FetchError::StaleTimestamp {
			resync_scheduled: true,
		}
	}

	/// Recomputes the skew if a resync is pending.
	///
	/// Fails with [`FetchError::StaleTimestamp`] when the time source cannot
	/// be reached, since signing with the old skew would be rejected again.
	pub async fn ensure_fresh_clock(&self) -> Result<(), FetchError> {
		if !self.clock.resync_pending() {
			return Ok(());
		}
		match self.clock.resync().await {
			Ok(skew) => {
				tracing::info!(component = "recovery", skew_ms = skew, "Clock resynced");
				Ok(())
			},
			Err(e) => {
				tracing::warn!(component = "recovery", error = %e, "Clock resync failed");
				Err(FetchError::StaleTimestamp {
					resync_scheduled: true,
				})
			},
		}
	}

	/// Records an accepted signed request.
	pub fn record_success(&self) {
		self.consecutive_resyncs.store(0, Ordering::SeqCst);
	}

	pub fn consecutive_resyncs(&self) -> u32 {
		self.consecutive_resyncs.load(Ordering::SeqCst)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use guild_account::AutoApprove;
	use std::time::Duration;

	fn recovery(max: u32) -> (AuthRecovery, Arc<ClockSkewEstimator>) {
		let clock = Arc::new(ClockSkewEstimator::fixed(250));
		let signer = Arc::new(SignerService::new(Arc::new(AutoApprove), Duration::ZERO));
		(AuthRecovery::new(clock.clone(), signer, max), clock)
	}

	#[test]
	fn test_stale_messages() {
		assert!(is_stale_timestamp("Invalid or expired timestamp!"));
		assert!(is_stale_timestamp(
			"Invalid timestamp! The creation of timestamp too far in future!"
		));
		assert!(!is_stale_timestamp("Invalid or expired timestamp"));
		assert!(!is_stale_timestamp("X"));
	}

	#[tokio::test]
	async fn test_bounded_resyncs() {
		let (recovery, clock) = recovery(2);
		for _ in 0..2 {
			assert!(matches!(
				recovery.handle_stale_timestamp("u").await,
				FetchError::StaleTimestamp {
					resync_scheduled: true
				}
			));
		}
		assert!(clock.resync_pending());
		assert!(matches!(
			recovery.handle_stale_timestamp("u").await,
			FetchError::StaleTimestamp {
				resync_scheduled: false
			}
		));

		recovery.record_success();
		assert_eq!(recovery.consecutive_resyncs(), 0);
		assert!(matches!(
			recovery.handle_stale_timestamp("u").await,
			FetchError::StaleTimestamp {
				resync_scheduled: true
			}
		));
	}

	#[tokio::test]
	async fn test_ensure_fresh_clock_clears_pending() {
		let (recovery, clock) = recovery(3);
		recovery.ensure_fresh_clock().await.unwrap();
		recovery.handle_stale_timestamp("u").await;
		assert!(clock.resync_pending());
		recovery.ensure_fresh_clock().await.unwrap();
		assert!(!clock.resync_pending());
		assert_eq!(clock.current_skew().await, 250);
	}
}
