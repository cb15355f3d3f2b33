//! Storage contract and built-in backends for refresh-token records.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{Fingerprint, RefreshTokenId, RefreshTokenRecord, UserId},
};

/// Boxed future returned by every [`RefreshTokenStore`] call.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Durable repository of refresh-token records.
///
/// Implementations must make [`RefreshTokenStore::rotate`] atomic: the conditional revoke of
/// the presented record and the insert of its replacement commit together or not at all.
pub trait RefreshTokenStore
where
	Self: Send + Sync,
{
	/// Persists a new record. Fails if the fingerprint is already present.
	fn create(&self, record: RefreshTokenRecord) -> StoreFuture<'_, ()>;

	/// Fetches the record holding `fingerprint`, if any.
	fn find_by_fingerprint<'a>(
		&'a self,
		fingerprint: &'a Fingerprint,
	) -> StoreFuture<'a, Option<RefreshTokenRecord>>;

	/// Fetches a record by identifier, if any.
	fn find_by_id<'a>(&'a self, id: &'a RefreshTokenId)
	-> StoreFuture<'a, Option<RefreshTokenRecord>>;

	/// Revokes every not-yet-revoked record of `user_id`, returning how many changed.
	fn revoke_by_user_id<'a>(
		&'a self,
		user_id: &'a UserId,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, usize>;

	/// Revokes one record. Returns `false` when it was missing or already revoked.
	fn revoke_by_id<'a>(
		&'a self,
		id: &'a RefreshTokenId,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, bool>;

	/// Deletes records whose expiry is at or before `now`, returning how many were removed.
	fn delete_expired(&self, now: OffsetDateTime) -> StoreFuture<'_, usize>;

	/// Revokes `current` only if it is active at `instant`, then inserts `replacement`.
	fn rotate<'a>(
		&'a self,
		current: &'a RefreshTokenId,
		instant: OffsetDateTime,
		replacement: RefreshTokenRecord,
	) -> StoreFuture<'a, RotateOutcome>;
}

/// Result of a conditional rotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotateOutcome {
	/// The presented record was active; it is now revoked and the replacement is stored.
	Rotated,
	/// The presented record was missing, revoked, or expired; nothing changed.
	NotActive,
}

/// Error type produced by [`RefreshTokenStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// A uniqueness constraint was violated.
	#[error("Conflict: {message}.")]
	Conflict {
		/// Human-readable error payload.
		message: String,
	},
}
