//! Per-client token-bucket throttling for auth endpoints.
//!
//! Each [`ClientKey`] owns an independent bucket. The registry lock is only held to find or
//! create a bucket; refill and consumption happen under the bucket's own lock, so unrelated
//! clients never serialize through one critical section. This is advisory backpressure: a
//! rejection is a `false`/[`RateLimitDecision::Delay`], never an error.

// std
use std::net::{IpAddr, SocketAddr};
// self
use crate::{
	_prelude::*,
	clock::{Clock, SystemClock},
	config::{self, AuthConfig},
	error::ConfigError,
	sweep::{Sweep, SweepFuture},
};

/// Normalized client identifier (usually an IP address without port or zone).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientKey(String);
impl ClientKey {
	/// Normalizes a raw peer address or forwarded-for value.
	///
	/// Ports, brackets, and IPv6 zone suffixes are stripped and IPv4-mapped IPv6 addresses
	/// collapse to IPv4. Non-IP values are trimmed and lower-cased.
	pub fn from_addr(raw: &str) -> Self {
		let trimmed = raw.trim();

		if let Ok(addr) = trimmed.parse::<SocketAddr>() {
			return addr.ip().into();
		}

		let host = match trimmed.strip_prefix('[') {
			Some(rest) => rest.split(']').next().unwrap_or(rest),
			None => trimmed,
		};
		let host = host.split('%').next().unwrap_or(host);

		if let Ok(ip) = host.parse::<IpAddr>() {
			return ip.into();
		}

		let host = match host.rsplit_once(':') {
			Some((name, port)) if !name.contains(':') && port.parse::<u16>().is_ok() => name,
			_ => host,
		};

		Self(host.to_ascii_lowercase())
	}

	/// Returns the normalized key.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl From<IpAddr> for ClientKey {
	fn from(ip: IpAddr) -> Self {
		Self(ip.to_canonical().to_string())
	}
}
impl From<SocketAddr> for ClientKey {
	fn from(addr: SocketAddr) -> Self {
		addr.ip().into()
	}
}
impl Debug for ClientKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "ClientKey({})", self.0)
	}
}
impl Display for ClientKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}

/// Result of a rate-limit evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
	/// The request may proceed immediately.
	Allow,
	/// The request should be rejected and retried later.
	Delay(RetryDirective),
}
impl RateLimitDecision {
	/// Returns `true` for [`RateLimitDecision::Allow`].
	pub fn is_allowed(&self) -> bool {
		matches!(self, RateLimitDecision::Allow)
	}
}

/// Advises callers when to retry after a [`RateLimitDecision::Delay`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryDirective {
	/// Instant when enough tokens will have accumulated.
	pub earliest_retry_at: OffsetDateTime,
	/// Suggested backoff duration (suitable for `Retry-After`).
	pub recommended_backoff: Duration,
}

/// Token bucket state for one client.
#[derive(Clone, Debug, PartialEq)]
pub struct RateBucket {
	capacity: f64,
	tokens: f64,
	refill_per_sec: f64,
	last_refill: OffsetDateTime,
}
impl RateBucket {
	/// Creates a full bucket.
	pub fn new(capacity: f64, refill_per_sec: f64, now: OffsetDateTime) -> Self {
		Self { capacity, tokens: capacity, refill_per_sec, last_refill: now }
	}

	/// Tokens currently available (as of the last refill).
	pub fn tokens(&self) -> f64 {
		self.tokens
	}

	/// Tops the bucket up for the time elapsed since the last touch.
	pub fn refill(&mut self, now: OffsetDateTime) {
		let elapsed = (now - self.last_refill).as_seconds_f64();

		if elapsed > 0.0 {
			self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
			self.last_refill = now;
		}
	}

	/// Refills, then deducts `cost` if enough tokens are available.
	pub fn try_consume(&mut self, cost: f64, now: OffsetDateTime) -> RateLimitDecision {
		self.refill(now);

		if cost.is_finite() && cost >= 0.0 && self.tokens >= cost {
			self.tokens -= cost;

			return RateLimitDecision::Allow;
		}

		let deficit = if cost.is_finite() && cost <= self.capacity {
			(cost - self.tokens).max(0.0)
		} else {
			// Unsatisfiable; advise a full refill period.
			self.capacity
		};
		// Tiny refill rates push the quotient past what `Duration` can hold.
		let backoff = Duration::saturating_seconds_f64(deficit / self.refill_per_sec);

		RateLimitDecision::Delay(RetryDirective {
			earliest_retry_at: now.saturating_add(backoff),
			recommended_backoff: backoff,
		})
	}

	fn is_idle(&self, now: OffsetDateTime, idle_ttl: Duration) -> bool {
		let mut topped = self.clone();

		topped.refill(now);

		topped.tokens >= topped.capacity && now - self.last_refill >= idle_ttl
	}
}

type Buckets = HashMap<ClientKey, Arc<Mutex<RateBucket>>>;

/// Keyed collection of token buckets.
pub struct TokenBucketLimiter {
	buckets: RwLock<Buckets>,
	capacity: f64,
	refill_per_sec: f64,
	idle_ttl: Duration,
	clock: Arc<dyn Clock>,
}
impl TokenBucketLimiter {
	/// Creates a limiter with the given bucket shape and the system clock.
	///
	/// Both parameters must be finite and strictly positive.
	pub fn new(capacity: f64, refill_per_sec: f64) -> Result<Self, ConfigError> {
		Self::with_clock(capacity, refill_per_sec, Arc::new(SystemClock))
	}

	/// Creates a limiter driven by a custom clock.
	pub fn with_clock(
		capacity: f64,
		refill_per_sec: f64,
		clock: Arc<dyn Clock>,
	) -> Result<Self, ConfigError> {
		config::validate_rate_limit(capacity, refill_per_sec)?;

		Ok(Self::from_parts(capacity, refill_per_sec, clock))
	}

	/// Creates a limiter from validated configuration.
	pub fn from_config(config: &AuthConfig, clock: Arc<dyn Clock>) -> Self {
		Self::from_parts(config.rate_limit_capacity, config.rate_limit_refill_per_sec, clock)
			.with_idle_ttl(config.rate_limit_idle_ttl)
	}

	/// Overrides how long a full bucket may sit untouched before the sweep drops it.
	pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
		self.idle_ttl = idle_ttl;

		self
	}

	/// Admits a request of `cost` tokens for `key`.
	pub fn allow(&self, key: &ClientKey, cost: f64) -> bool {
		self.evaluate(key, cost).is_allowed()
	}

	/// Admits a single-token request for `key`.
	pub fn check(&self, key: &ClientKey) -> bool {
		self.allow(key, 1.0)
	}

	/// Like [`TokenBucketLimiter::allow`] but reports when to retry on rejection.
	pub fn evaluate(&self, key: &ClientKey, cost: f64) -> RateLimitDecision {
		let now = self.clock.now();
		let bucket = self.bucket(key, now);
		let decision = bucket.lock().try_consume(cost, now);

		#[cfg(feature = "tracing")]
		{
			if let RateLimitDecision::Delay(directive) = &decision {
				tracing::debug!(
					client = %key,
					backoff_ms = directive.recommended_backoff.whole_milliseconds() as u64,
					"Rate limit exceeded."
				);
			}
		}

		decision
	}

	/// Drops buckets that are full and have not been touched for the idle TTL.
	pub fn purge_idle(&self) -> usize {
		let now = self.clock.now();
		let mut buckets = self.buckets.write();
		let before = buckets.len();

		buckets.retain(|_, bucket| {
			Arc::strong_count(bucket) > 1 || !bucket.lock().is_idle(now, self.idle_ttl)
		});

		before - buckets.len()
	}

	/// Number of tracked clients.
	pub fn len(&self) -> usize {
		self.buckets.read().len()
	}

	/// Returns `true` when no client is tracked.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn from_parts(capacity: f64, refill_per_sec: f64, clock: Arc<dyn Clock>) -> Self {
		Self {
			buckets: RwLock::new(HashMap::new()),
			capacity,
			refill_per_sec,
			idle_ttl: AuthConfig::DEFAULT_RATE_LIMIT_IDLE_TTL,
			clock,
		}
	}

	fn bucket(&self, key: &ClientKey, now: OffsetDateTime) -> Arc<Mutex<RateBucket>> {
		if let Some(bucket) = self.buckets.read().get(key) {
			return bucket.clone();
		}

		self.buckets
			.write()
			.entry(key.clone())
			.or_insert_with(|| {
				Arc::new(Mutex::new(RateBucket::new(self.capacity, self.refill_per_sec, now)))
			})
			.clone()
	}
}
impl Debug for TokenBucketLimiter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenBucketLimiter")
			.field("clients", &self.len())
			.field("capacity", &self.capacity)
			.field("refill_per_sec", &self.refill_per_sec)
			.field("idle_ttl", &self.idle_ttl)
			.finish()
	}
}
impl Sweep for TokenBucketLimiter {
	fn label(&self) -> &'static str {
		"rate_limit"
	}

	fn sweep(&self) -> SweepFuture<'_> {
		Box::pin(async move { Ok(self.purge_idle()) })
	}
}
