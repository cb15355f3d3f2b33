// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for refresh-token rotations.
#[derive(Debug, Default)]
pub struct RotationMetrics {
	attempts: AtomicU64,
	success: AtomicU64,
	failure: AtomicU64,
	replays: AtomicU64,
}
impl RotationMetrics {
	/// Returns the total number of rotation attempts.
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Returns the number of rotations that issued a replacement token.
	pub fn successes(&self) -> u64 {
		self.success.load(Ordering::Relaxed)
	}

	/// Returns the number of rejected rotations (replays included).
	pub fn failures(&self) -> u64 {
		self.failure.load(Ordering::Relaxed)
	}

	/// Returns how many rotations presented an already-rotated or revoked token.
	pub fn replays(&self) -> u64 {
		self.replays.load(Ordering::Relaxed)
	}

	pub(crate) fn record_attempt(&self) {
		self.attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_success(&self) {
		self.success.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failure.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_replay(&self) {
		self.replays.fetch_add(1, Ordering::Relaxed);
	}
}
