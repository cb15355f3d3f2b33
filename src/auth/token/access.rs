//! Short-lived HS256 access tokens: claim model, issuance, and verification.

// crates.io
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;
// self
use crate::{
	_prelude::*,
	auth::{TokenSecret, UserId},
	clock::Clock,
	config::AuthConfig,
};

/// Only algorithm accepted for access tokens; anything else is an algorithm-substitution
/// attempt.
pub const ACCESS_TOKEN_ALGORITHM: Algorithm = Algorithm::HS256;

/// Claims carried by every access token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
	/// Subject user identifier.
	pub sub: UserId,
	/// Email address of the subject at issue time.
	pub email: String,
	/// Issuer, when configured.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub iss: Option<String>,
	/// Audience, when configured.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub aud: Option<String>,
	/// Issued-at, UTC Unix seconds.
	pub iat: i64,
	/// Expiry, UTC Unix seconds.
	pub exp: i64,
	/// Unique token identifier for audit trails.
	pub jti: String,
}

/// Signed access token together with the claims it carries.
#[derive(Clone, Debug)]
pub struct IssuedAccessToken {
	/// Compact JWS string.
	pub token: TokenSecret,
	/// Claims embedded in `token`.
	pub claims: AccessTokenClaims,
	/// Expiry instant (`issued_at + access_ttl`).
	pub expires_at: OffsetDateTime,
}

/// Stateless signer/verifier for access tokens.
///
/// Safe for unlimited concurrent use; the only shared state is the immutable key material.
#[derive(Clone)]
pub struct AccessTokenService {
	encoding: EncodingKey,
	decoding: DecodingKey,
	validation: Validation,
	ttl: Duration,
	clock_skew: Duration,
	issuer: Option<String>,
	audience: Option<String>,
	clock: Arc<dyn Clock>,
}
impl AccessTokenService {
	/// Builds the service from validated configuration.
	pub fn new(config: &AuthConfig, clock: Arc<dyn Clock>) -> Self {
		let secret = config.signing_secret.expose();
		let mut validation = Validation::new(ACCESS_TOKEN_ALGORITHM);
		let mut required = vec!["exp", "iat", "sub"];

		// Expiry is checked against the injected clock instead of the system time.
		validation.validate_exp = false;
		validation.validate_nbf = false;
		validation.leeway = 0;

		match &config.issuer {
			Some(issuer) => {
				validation.set_issuer(&[issuer]);
				required.push("iss");
			},
			None => validation.iss = None,
		}
		match &config.audience {
			Some(audience) => {
				validation.set_audience(&[audience]);
				required.push("aud");
			},
			None => validation.validate_aud = false,
		}

		validation.set_required_spec_claims(required.as_slice());

		Self {
			encoding: EncodingKey::from_secret(secret),
			decoding: DecodingKey::from_secret(secret),
			validation,
			ttl: config.access_ttl,
			clock_skew: config.clock_skew,
			issuer: config.issuer.clone(),
			audience: config.audience.clone(),
			clock,
		}
	}

	/// Signs a new access token for `user_id`.
	pub fn issue(&self, user_id: &UserId, email: &str) -> Result<IssuedAccessToken> {
		let issued_at = self.clock.now();
		let expires_at = issued_at + self.ttl;
		let claims = AccessTokenClaims {
			sub: user_id.clone(),
			email: email.to_owned(),
			iss: self.issuer.clone(),
			aud: self.audience.clone(),
			iat: issued_at.unix_timestamp(),
			exp: expires_at.unix_timestamp(),
			jti: Uuid::new_v4().to_string(),
		};
		let token =
			jsonwebtoken::encode(&Header::new(ACCESS_TOKEN_ALGORITHM), &claims, &self.encoding)
				.map_err(|source| Error::Signing { source })?;

		Ok(IssuedAccessToken { token: TokenSecret::new(token), claims, expires_at })
	}

	/// Verifies signature, algorithm, issuer/audience, and expiry, returning the claims.
	///
	/// Every failure collapses to [`Error::InvalidToken`].
	pub fn verify(&self, token: &str) -> Result<AccessTokenClaims> {
		let data = jsonwebtoken::decode::<AccessTokenClaims>(token, &self.decoding, &self.validation)
			.map_err(|_e| {
				#[cfg(feature = "tracing")]
				tracing::debug!(kind = ?_e.kind(), "Rejected access token.");

				Error::InvalidToken
			})?;
		let claims = data.claims;
		let now = self.clock.now().unix_timestamp();
		let skew = self.clock_skew.whole_seconds();

		if now > claims.exp.saturating_add(skew) {
			#[cfg(feature = "tracing")]
			tracing::debug!(sub = %claims.sub, "Rejected expired access token.");

			return Err(Error::InvalidToken);
		}
		if claims.iat > now.saturating_add(skew) {
			#[cfg(feature = "tracing")]
			tracing::debug!(sub = %claims.sub, "Rejected access token issued in the future.");

			return Err(Error::InvalidToken);
		}

		Ok(claims)
	}

	/// Configured access-token lifetime.
	pub fn ttl(&self) -> Duration {
		self.ttl
	}
}
impl Debug for AccessTokenService {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AccessTokenService")
			.field("ttl", &self.ttl)
			.field("clock_skew", &self.clock_skew)
			.field("issuer", &self.issuer)
			.field("audience", &self.audience)
			.finish()
	}
}
