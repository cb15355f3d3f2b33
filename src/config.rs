//! Startup configuration for the auth core, with builder-time validation and environment
//! loading.
//!
//! Configuration is read once at startup. Every problem surfaces as a [`ConfigError`] from
//! [`AuthConfigBuilder::build`] so a misconfigured process fails fast instead of issuing
//! tokens it cannot later verify.

// crates.io
use base64::{
	Engine as _,
	engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD},
};
// self
use crate::{
	_prelude::*,
	auth::{HmacKey, KeyId, KeyRing, SecretBytes},
	error::ConfigError,
};

/// Minimum accepted signing-secret length (HS256 key size).
pub const MIN_SIGNING_SECRET_LEN: usize = 32;

/// Longest accepted lifetime, interval, or skew (roughly ten years).
pub const MAX_DURATION: Duration = Duration::days(3_660);

/// What to do when a refresh token that is no longer active is presented again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayPolicy {
	/// Treat the replay as a compromise signal and revoke every session of the user.
	#[default]
	RevokeAll,
	/// Reject the request without touching other sessions.
	Reject,
}

/// Validated configuration consumed by the token services, stores, and guards.
#[derive(Clone, Debug)]
pub struct AuthConfig {
	/// Access-token lifetime.
	pub access_ttl: Duration,
	/// Refresh-token lifetime.
	pub refresh_ttl: Duration,
	/// Tolerance applied when checking access-token expiry.
	pub clock_skew: Duration,
	/// Issuer embedded in and required from access tokens.
	pub issuer: Option<String>,
	/// Audience embedded in and required from access tokens.
	pub audience: Option<String>,
	/// HS256 signing secret.
	pub signing_secret: SecretBytes,
	/// Refresh-token fingerprinting keys.
	pub key_ring: KeyRing,
	/// Reaction to refresh-token replay.
	pub replay_policy: ReplayPolicy,
	/// Lifetime of an OAuth state value.
	pub csrf_timeout: Duration,
	/// Period of the background sweeps for OAuth states and idle rate buckets.
	pub sweep_interval: Duration,
	/// Token-bucket capacity per client.
	pub rate_limit_capacity: f64,
	/// Token-bucket refill rate per client, in tokens per second.
	pub rate_limit_refill_per_sec: f64,
	/// Idle time after which a full bucket is dropped by the sweep.
	pub rate_limit_idle_ttl: Duration,
}
impl AuthConfig {
	/// Default access-token lifetime.
	pub const DEFAULT_ACCESS_TTL: Duration = Duration::minutes(15);
	/// Default refresh-token lifetime.
	pub const DEFAULT_REFRESH_TTL: Duration = Duration::days(30);
	/// Default access-token expiry tolerance.
	pub const DEFAULT_CLOCK_SKEW: Duration = Duration::seconds(60);
	/// Default OAuth state lifetime.
	pub const DEFAULT_CSRF_TIMEOUT: Duration = Duration::minutes(10);
	/// Default background sweep period.
	pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::minutes(5);
	/// Default token-bucket capacity.
	pub const DEFAULT_RATE_LIMIT_CAPACITY: f64 = 10.0;
	/// Default token-bucket refill rate.
	pub const DEFAULT_RATE_LIMIT_REFILL_PER_SEC: f64 = 1.0;
	/// Default idle TTL for rate buckets.
	pub const DEFAULT_RATE_LIMIT_IDLE_TTL: Duration = Duration::minutes(10);

	/// Returns a builder pre-populated with defaults.
	pub fn builder() -> AuthConfigBuilder {
		AuthConfigBuilder::default()
	}

	/// Loads configuration from the process environment.
	///
	/// | Variable                            | Required | Default |
	/// |-------------------------------------|----------|---------|
	/// | `AUTHKEEP_SIGNING_SECRET` (base64)  | yes      |         |
	/// | `AUTHKEEP_FINGERPRINT_KEYS`         | yes      |         |
	/// | `AUTHKEEP_FINGERPRINT_CURRENT_KEY`  | no       | last key listed |
	/// | `AUTHKEEP_ISSUER`                   | no       |         |
	/// | `AUTHKEEP_AUDIENCE`                 | no       |         |
	/// | `AUTHKEEP_ACCESS_TTL_SECS`          | no       | `900`   |
	/// | `AUTHKEEP_REFRESH_TTL_SECS`         | no       | `2592000` |
	/// | `AUTHKEEP_CLOCK_SKEW_SECS`          | no       | `60`    |
	/// | `AUTHKEEP_CSRF_TIMEOUT_SECS`        | no       | `600`   |
	/// | `AUTHKEEP_RATE_LIMIT_CAPACITY`      | no       | `10`    |
	/// | `AUTHKEEP_RATE_LIMIT_REFILL_PER_SEC`| no       | `1`     |
	/// | `AUTHKEEP_REPLAY_POLICY`            | no       | `revoke-all` |
	///
	/// Fingerprint keys are a comma-separated list of `id:base64secret` pairs.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Loads configuration through an arbitrary variable lookup.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
		let mut builder = Self::builder();

		if let Some(secret) = var("AUTHKEEP_SIGNING_SECRET") {
			let secret = decode_env_base64("AUTHKEEP_SIGNING_SECRET", &secret)?;

			builder = builder.signing_secret(secret);
		}
		if let Some(raw) = var("AUTHKEEP_FINGERPRINT_KEYS") {
			let keys = parse_key_list(&raw)?;
			let current = match var("AUTHKEEP_FINGERPRINT_CURRENT_KEY") {
				Some(id) => parse_env("AUTHKEEP_FINGERPRINT_CURRENT_KEY", &id)?,
				None => keys.last().map(HmacKey::id).ok_or(ConfigError::MissingFingerprintKeys)?,
			};

			builder = builder.key_ring(KeyRing::new(keys, current)?);
		}
		if let Some(issuer) = var("AUTHKEEP_ISSUER") {
			builder = builder.issuer(issuer);
		}
		if let Some(audience) = var("AUTHKEEP_AUDIENCE") {
			builder = builder.audience(audience);
		}
		if let Some(secs) = var("AUTHKEEP_ACCESS_TTL_SECS") {
			builder =
				builder.access_ttl(Duration::seconds(parse_env("AUTHKEEP_ACCESS_TTL_SECS", &secs)?));
		}
		if let Some(secs) = var("AUTHKEEP_REFRESH_TTL_SECS") {
			builder =
				builder.refresh_ttl(Duration::seconds(parse_env("AUTHKEEP_REFRESH_TTL_SECS", &secs)?));
		}
		if let Some(secs) = var("AUTHKEEP_CLOCK_SKEW_SECS") {
			builder =
				builder.clock_skew(Duration::seconds(parse_env("AUTHKEEP_CLOCK_SKEW_SECS", &secs)?));
		}
		if let Some(secs) = var("AUTHKEEP_CSRF_TIMEOUT_SECS") {
			builder = builder
				.csrf_timeout(Duration::seconds(parse_env("AUTHKEEP_CSRF_TIMEOUT_SECS", &secs)?));
		}
		if let Some(capacity) = var("AUTHKEEP_RATE_LIMIT_CAPACITY") {
			builder =
				builder.rate_limit_capacity(parse_env("AUTHKEEP_RATE_LIMIT_CAPACITY", &capacity)?);
		}
		if let Some(rate) = var("AUTHKEEP_RATE_LIMIT_REFILL_PER_SEC") {
			builder = builder
				.rate_limit_refill_per_sec(parse_env("AUTHKEEP_RATE_LIMIT_REFILL_PER_SEC", &rate)?);
		}
		if let Some(policy) = var("AUTHKEEP_REPLAY_POLICY") {
			let policy = match policy.trim() {
				"revoke-all" => ReplayPolicy::RevokeAll,
				"reject" => ReplayPolicy::Reject,
				other => {
					return Err(ConfigError::InvalidEnv {
						name: "AUTHKEEP_REPLAY_POLICY",
						reason: format!("unknown policy `{other}`"),
					});
				},
			};

			builder = builder.replay_policy(policy);
		}

		builder.build()
	}
}

/// Builder for [`AuthConfig`].
#[derive(Clone, Debug)]
pub struct AuthConfigBuilder {
	access_ttl: Duration,
	refresh_ttl: Duration,
	clock_skew: Duration,
	issuer: Option<String>,
	audience: Option<String>,
	signing_secret: Option<SecretBytes>,
	key_ring: Option<KeyRing>,
	replay_policy: ReplayPolicy,
	csrf_timeout: Duration,
	sweep_interval: Duration,
	rate_limit_capacity: f64,
	rate_limit_refill_per_sec: f64,
	rate_limit_idle_ttl: Duration,
}
impl AuthConfigBuilder {
	/// Sets the access-token lifetime.
	pub fn access_ttl(mut self, ttl: Duration) -> Self {
		self.access_ttl = ttl;

		self
	}

	/// Sets the refresh-token lifetime.
	pub fn refresh_ttl(mut self, ttl: Duration) -> Self {
		self.refresh_ttl = ttl;

		self
	}

	/// Sets the access-token expiry tolerance. Negative values clamp to zero.
	pub fn clock_skew(mut self, skew: Duration) -> Self {
		self.clock_skew = if skew.is_negative() { Duration::ZERO } else { skew };

		self
	}

	/// Sets the issuer claim.
	pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
		self.issuer = Some(issuer.into());

		self
	}

	/// Sets the audience claim.
	pub fn audience(mut self, audience: impl Into<String>) -> Self {
		self.audience = Some(audience.into());

		self
	}

	/// Provides the HS256 signing secret.
	pub fn signing_secret(mut self, secret: impl Into<SecretBytes>) -> Self {
		self.signing_secret = Some(secret.into());

		self
	}

	/// Provides the fingerprint key ring.
	pub fn key_ring(mut self, ring: KeyRing) -> Self {
		self.key_ring = Some(ring);

		self
	}

	/// Sets the refresh-token replay policy.
	pub fn replay_policy(mut self, policy: ReplayPolicy) -> Self {
		self.replay_policy = policy;

		self
	}

	/// Sets the OAuth state lifetime.
	pub fn csrf_timeout(mut self, timeout: Duration) -> Self {
		self.csrf_timeout = timeout;

		self
	}

	/// Sets the background sweep period.
	pub fn sweep_interval(mut self, interval: Duration) -> Self {
		self.sweep_interval = interval;

		self
	}

	/// Sets the token-bucket capacity.
	pub fn rate_limit_capacity(mut self, capacity: f64) -> Self {
		self.rate_limit_capacity = capacity;

		self
	}

	/// Sets the token-bucket refill rate (tokens per second).
	pub fn rate_limit_refill_per_sec(mut self, rate: f64) -> Self {
		self.rate_limit_refill_per_sec = rate;

		self
	}

	/// Sets the idle TTL after which full buckets are dropped.
	pub fn rate_limit_idle_ttl(mut self, ttl: Duration) -> Self {
		self.rate_limit_idle_ttl = ttl;

		self
	}

	/// Validates the settings and produces an [`AuthConfig`].
	pub fn build(self) -> Result<AuthConfig, ConfigError> {
		let signing_secret = self.signing_secret.ok_or(ConfigError::MissingSigningSecret)?;

		if signing_secret.is_empty() {
			return Err(ConfigError::MissingSigningSecret);
		}
		if signing_secret.len() < MIN_SIGNING_SECRET_LEN {
			return Err(ConfigError::WeakSigningSecret { min: MIN_SIGNING_SECRET_LEN });
		}

		let key_ring = self.key_ring.ok_or(ConfigError::MissingFingerprintKeys)?;

		for (field, value) in [
			("access_ttl", self.access_ttl),
			("refresh_ttl", self.refresh_ttl),
			("csrf_timeout", self.csrf_timeout),
			("sweep_interval", self.sweep_interval),
			("rate_limit_idle_ttl", self.rate_limit_idle_ttl),
		] {
			if !value.is_positive() {
				return Err(ConfigError::NonPositiveDuration { field });
			}
			if value > MAX_DURATION {
				return Err(ConfigError::DurationOutOfRange { field, max: MAX_DURATION });
			}
		}
		if self.clock_skew.is_negative() || self.clock_skew > MAX_DURATION {
			return Err(ConfigError::DurationOutOfRange { field: "clock_skew", max: MAX_DURATION });
		}

		validate_rate_limit(self.rate_limit_capacity, self.rate_limit_refill_per_sec)?;

		Ok(AuthConfig {
			access_ttl: self.access_ttl,
			refresh_ttl: self.refresh_ttl,
			clock_skew: self.clock_skew,
			issuer: self.issuer,
			audience: self.audience,
			signing_secret,
			key_ring,
			replay_policy: self.replay_policy,
			csrf_timeout: self.csrf_timeout,
			sweep_interval: self.sweep_interval,
			rate_limit_capacity: self.rate_limit_capacity,
			rate_limit_refill_per_sec: self.rate_limit_refill_per_sec,
			rate_limit_idle_ttl: self.rate_limit_idle_ttl,
		})
	}
}
impl Default for AuthConfigBuilder {
	fn default() -> Self {
		Self {
			access_ttl: AuthConfig::DEFAULT_ACCESS_TTL,
			refresh_ttl: AuthConfig::DEFAULT_REFRESH_TTL,
			clock_skew: AuthConfig::DEFAULT_CLOCK_SKEW,
			issuer: None,
			audience: None,
			signing_secret: None,
			key_ring: None,
			replay_policy: ReplayPolicy::default(),
			csrf_timeout: AuthConfig::DEFAULT_CSRF_TIMEOUT,
			sweep_interval: AuthConfig::DEFAULT_SWEEP_INTERVAL,
			rate_limit_capacity: AuthConfig::DEFAULT_RATE_LIMIT_CAPACITY,
			rate_limit_refill_per_sec: AuthConfig::DEFAULT_RATE_LIMIT_REFILL_PER_SEC,
			rate_limit_idle_ttl: AuthConfig::DEFAULT_RATE_LIMIT_IDLE_TTL,
		}
	}
}

/// Checks token-bucket parameters; both must be finite and strictly positive.
pub(crate) fn validate_rate_limit(capacity: f64, refill_per_sec: f64) -> Result<(), ConfigError> {
	for (field, value) in [("capacity", capacity), ("refill_per_sec", refill_per_sec)] {
		if !value.is_finite() || value <= 0.0 {
			return Err(ConfigError::InvalidRateLimit { field });
		}
	}

	Ok(())
}

fn parse_env<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
	T: FromStr,
	T::Err: Display,
{
	raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv { name, reason: e.to_string() })
}

fn decode_env_base64(name: &'static str, raw: &str) -> Result<Vec<u8>, ConfigError> {
	let raw = raw.trim();

	[STANDARD, URL_SAFE, URL_SAFE_NO_PAD]
		.iter()
		.find_map(|engine| engine.decode(raw).ok())
		.ok_or_else(|| ConfigError::InvalidEnv { name, reason: "value is not base64".into() })
}

fn parse_key_list(raw: &str) -> Result<Vec<HmacKey>, ConfigError> {
	const NAME: &str = "AUTHKEEP_FINGERPRINT_KEYS";

	raw.split(',')
		.map(str::trim)
		.filter(|entry| !entry.is_empty())
		.map(|entry| {
			let (id, secret) = entry.split_once(':').ok_or_else(|| ConfigError::InvalidEnv {
				name: NAME,
				reason: "expected `id:base64secret` entries".into(),
			})?;
			let id: KeyId = parse_env(NAME, id)?;

			HmacKey::new(id, decode_env_base64(NAME, secret)?)
		})
		.collect()
}
