//! Crate-level error types shared across token services, stores, and flows.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Canonical error exposed by public APIs.
///
/// Validation failures are deliberately coarse: every access-token failure maps to
/// [`Error::InvalidToken`] and every refresh-token failure maps to
/// [`Error::InvalidRefreshToken`], so callers cannot distinguish "unknown" from "expired"
/// from "revoked".
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure; the durable store could not be reached or rejected the call.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),

	/// Access token is malformed, expired, wrongly signed, or carries mismatched claims.
	#[error("Access token is invalid.")]
	InvalidToken,
	/// Refresh token is unknown, expired, revoked, or already rotated.
	#[error("Refresh token is invalid.")]
	InvalidRefreshToken,
	/// Credentials were rejected by the identity provider.
	#[error("Credentials are invalid.")]
	InvalidCredentials,
	/// Access token could not be signed.
	#[error("Access token could not be signed.")]
	Signing {
		/// Underlying encoder failure.
		#[source]
		source: jsonwebtoken::errors::Error,
	},
	/// The operating system random source failed.
	#[error("Random source failed: {message}.")]
	Entropy {
		/// Human-readable error payload.
		message: String,
	},
	/// The identity provider could not answer.
	#[error("Identity provider is unavailable: {message}.")]
	IdentityUnavailable {
		/// Human-readable error payload.
		message: String,
	},
}

/// Configuration and validation failures raised while assembling the auth core.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ConfigError {
	/// No access-token signing secret was configured.
	#[error("Signing secret is missing.")]
	MissingSigningSecret,
	/// The signing secret is shorter than the supported minimum.
	#[error("Signing secret must be at least {min} bytes.")]
	WeakSigningSecret {
		/// Minimum accepted length in bytes.
		min: usize,
	},
	/// No refresh-token fingerprint keys were configured.
	#[error("At least one fingerprint key is required.")]
	MissingFingerprintKeys,
	/// A fingerprint key has an empty secret.
	#[error("Fingerprint key {id} has an empty secret.")]
	EmptyFingerprintKey {
		/// Offending key identifier.
		id: u32,
	},
	/// Two fingerprint keys share the same identifier.
	#[error("Fingerprint key id {id} is declared more than once.")]
	DuplicateKeyId {
		/// Offending key identifier.
		id: u32,
	},
	/// The current fingerprint key id does not name a configured key.
	#[error("Current fingerprint key {id} is not configured.")]
	UnknownCurrentKey {
		/// Requested key identifier.
		id: u32,
	},
	/// A duration setting must be strictly positive.
	#[error("The {field} duration must be positive.")]
	NonPositiveDuration {
		/// Setting name.
		field: &'static str,
	},
	/// A duration setting exceeds the supported maximum.
	#[error("The {field} duration must be between zero and {max}.")]
	DurationOutOfRange {
		/// Setting name.
		field: &'static str,
		/// Largest accepted value.
		max: Duration,
	},
	/// Rate limiter parameters are unusable.
	#[error("Rate limiter {field} must be a finite positive number.")]
	InvalidRateLimit {
		/// Setting name.
		field: &'static str,
	},
	/// An environment variable could not be parsed.
	#[error("Environment variable {name} is invalid: {reason}.")]
	InvalidEnv {
		/// Variable name.
		name: &'static str,
		/// Parsing failure summary.
		reason: String,
	},
}
