//! Persisted refresh-token records, lifecycle helpers, and raw-secret encoding.

// crates.io
use base64::{
	Engine as _,
	engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD},
};
// self
use crate::{
	_prelude::*,
	auth::{
		RefreshTokenId, UserId,
		token::{
			fingerprint::{Fingerprint, KeyId},
			secret::{self, TokenSecret},
		},
	},
};

/// Byte length of a raw refresh-token secret (256 bits).
pub const REFRESH_SECRET_LEN: usize = 32;

/// Current lifecycle status for a refresh-token record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshTokenStatus {
	/// Token may be exchanged.
	Active,
	/// Token reached its expiry instant.
	Expired,
	/// Token was rotated, logged out, or revoked in bulk.
	Revoked,
}

/// Durable record describing one issued refresh token.
///
/// The raw secret is never stored; `fingerprint` is its keyed digest under `key_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
	/// Opaque record identifier.
	pub id: RefreshTokenId,
	/// Owner of the session.
	pub user_id: UserId,
	/// Keyed digest of the raw secret.
	pub fingerprint: Fingerprint,
	/// Key that produced `fingerprint`.
	pub key_id: KeyId,
	/// Issue instant.
	pub issued_at: OffsetDateTime,
	/// Expiry instant; the token is unusable at or after this instant.
	pub expires_at: OffsetDateTime,
	/// Revocation instant, if revoked.
	pub revoked_at: Option<OffsetDateTime>,
}
impl RefreshTokenRecord {
	/// Computes the lifecycle status at a given instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> RefreshTokenStatus {
		if self.revoked_at.is_some() {
			return RefreshTokenStatus::Revoked;
		}
		if instant >= self.expires_at {
			return RefreshTokenStatus::Expired;
		}

		RefreshTokenStatus::Active
	}

	/// Returns `true` if the record is active at the provided instant.
	pub fn is_active_at(&self, instant: OffsetDateTime) -> bool {
		matches!(self.status_at(instant), RefreshTokenStatus::Active)
	}

	/// Returns `true` if the record has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		instant >= self.expires_at
	}

	/// Returns `true` if the record has been revoked.
	pub fn is_revoked(&self) -> bool {
		self.revoked_at.is_some()
	}

	/// Marks the record as revoked, keeping the earliest revocation instant.
	pub fn revoke(&mut self, instant: OffsetDateTime) {
		if self.revoked_at.is_none() {
			self.revoked_at = Some(instant);
		}
	}
}

/// Refresh token handed to a client right after issuance.
#[derive(Clone, Debug)]
pub struct IssuedRefreshToken {
	/// Record identifier (used for single-session logout).
	pub id: RefreshTokenId,
	/// Base64url-encoded raw secret; never persisted.
	pub token: TokenSecret,
	/// Expiry instant of the record.
	pub expires_at: OffsetDateTime,
}

/// Raw refresh-token secret bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshSecret([u8; REFRESH_SECRET_LEN]);
impl RefreshSecret {
	/// Draws a new secret from the operating system CSPRNG.
	pub fn generate() -> Result<Self> {
		secret::random_bytes().map(Self)
	}

	/// Decodes a presented token, accepting standard, URL-safe, and unpadded URL-safe base64.
	///
	/// Returns `None` for anything that is not exactly [`REFRESH_SECRET_LEN`] bytes.
	pub fn decode(presented: &str) -> Option<Self> {
		let presented = presented.trim();

		[URL_SAFE_NO_PAD, URL_SAFE, STANDARD]
			.iter()
			.find_map(|engine| engine.decode(presented).ok())
			.and_then(|bytes| <[u8; REFRESH_SECRET_LEN]>::try_from(bytes).ok())
			.map(Self)
	}

	/// Encodes the secret for transport (URL-safe base64 without padding).
	pub fn encode(&self) -> TokenSecret {
		TokenSecret::new(URL_SAFE_NO_PAD.encode(self.0))
	}

	/// Returns the raw bytes.
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}
}
impl Debug for RefreshSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("RefreshSecret(<redacted>)")
	}
}
