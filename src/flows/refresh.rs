//! Refresh-token issuance, validation, and one-time rotation.
//!
//! Raw secrets leave this module exactly once, inside an [`IssuedRefreshToken`]; the store
//! only ever sees their keyed fingerprint. Rotation relies on
//! [`RefreshTokenStore::rotate`] being an atomic conditional update, so two concurrent
//! rotations of the same token yield one replacement and one
//! [`Error::InvalidRefreshToken`]. Presenting a token that was already revoked is treated
//! according to the configured [`ReplayPolicy`].

mod metrics;

pub use metrics::RotationMetrics;

// self
use crate::{
	_prelude::*,
	auth::{
		IssuedRefreshToken, KeyRing, RefreshSecret, RefreshTokenId, RefreshTokenRecord,
		RefreshTokenStatus, UserId,
	},
	clock::Clock,
	config::{AuthConfig, ReplayPolicy},
	store::{RefreshTokenStore, RotateOutcome},
	sweep::{Sweep, SweepFuture},
};

/// Owns the refresh-token state machine on top of a [`RefreshTokenStore`].
pub struct RefreshTokenLifecycle {
	store: Arc<dyn RefreshTokenStore>,
	key_ring: KeyRing,
	ttl: Duration,
	replay_policy: ReplayPolicy,
	clock: Arc<dyn Clock>,
	metrics: Arc<RotationMetrics>,
}
impl RefreshTokenLifecycle {
	/// Creates a lifecycle over `store` using the key ring, TTL, and replay policy of `config`.
	pub fn new(
		config: &AuthConfig,
		store: Arc<dyn RefreshTokenStore>,
		clock: Arc<dyn Clock>,
	) -> Self {
		Self {
			store,
			key_ring: config.key_ring.clone(),
			ttl: config.refresh_ttl,
			replay_policy: config.replay_policy,
			clock,
			metrics: Default::default(),
		}
	}

	/// Shared rotation counters.
	pub fn metrics(&self) -> &Arc<RotationMetrics> {
		&self.metrics
	}

	/// Underlying store.
	pub fn store(&self) -> &Arc<dyn RefreshTokenStore> {
		&self.store
	}

	/// Issues and persists a new refresh token for `user_id`.
	pub async fn issue(&self, user_id: &UserId) -> Result<IssuedRefreshToken> {
		let (issued, record) = self.mint(user_id, self.clock.now())?;

		self.store.create(record).await?;

		Ok(issued)
	}

	/// Resolves a presented token to its active record.
	///
	/// Unknown, malformed, expired, and revoked tokens all fail with the same
	/// [`Error::InvalidRefreshToken`]; a revoked token additionally triggers the replay policy.
	pub async fn validate(&self, presented: &str) -> Result<RefreshTokenRecord> {
		let now = self.clock.now();
		let Some(record) = self.lookup(presented).await? else {
			return Err(Error::InvalidRefreshToken);
		};

		match record.status_at(now) {
			RefreshTokenStatus::Active => Ok(record),
			RefreshTokenStatus::Expired => Err(Error::InvalidRefreshToken),
			RefreshTokenStatus::Revoked => {
				self.on_replay(&record, now).await;

				Err(Error::InvalidRefreshToken)
			},
		}
	}

	/// Revokes `current` and issues its replacement as one atomic store update.
	///
	/// Fails with [`Error::InvalidRefreshToken`] when `current` is no longer active, e.g. when
	/// a concurrent rotation of the same token won.
	pub async fn rotate(&self, current: &RefreshTokenRecord) -> Result<IssuedRefreshToken> {
		let now = self.clock.now();
		let (issued, replacement) = self.mint(&current.user_id, now)?;

		match self.store.rotate(&current.id, now, replacement).await? {
			RotateOutcome::Rotated => Ok(issued),
			RotateOutcome::NotActive => {
				let latest = self.store.find_by_id(&current.id).await?;

				if latest.as_ref().is_some_and(RefreshTokenRecord::is_revoked) {
					self.on_replay(current, now).await;
				}

				Err(Error::InvalidRefreshToken)
			},
		}
	}

	/// Validates `presented` and rotates it, returning the consumed record and its replacement.
	pub async fn validate_and_rotate(
		&self,
		presented: &str,
	) -> Result<(RefreshTokenRecord, IssuedRefreshToken)> {
		self.validate_and_rotate_with(presented, |record| async move { Ok(record) }).await
	}

	/// Validates `presented`, runs `prepare` on its record, and only then rotates it.
	///
	/// The rotation is the last fallible step: if `prepare` fails, the presented token stays
	/// active and nothing new is stored, so the caller can retry with the same token.
	pub async fn validate_and_rotate_with<F, Fut, T>(
		&self,
		presented: &str,
		prepare: F,
	) -> Result<(T, IssuedRefreshToken)>
	where
		F: FnOnce(RefreshTokenRecord) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		self.metrics.record_attempt();

		let result = async {
			let record = self.validate(presented).await?;
			let current = record.clone();
			let prepared = prepare(record).await?;
			let issued = self.rotate(&current).await?;

			Ok::<_, Error>((prepared, issued))
		}
		.await;

		match &result {
			Ok(_) => self.metrics.record_success(),
			Err(_) => self.metrics.record_failure(),
		}

		result
	}

	/// Revokes one session. Returns `false` if it was unknown or already revoked.
	pub async fn revoke(&self, id: &RefreshTokenId) -> Result<bool> {
		Ok(self.store.revoke_by_id(id, self.clock.now()).await?)
	}

	/// Revokes the session presenting `presented`, without applying the replay policy.
	///
	/// Returns `false` for tokens that do not resolve to an unrevoked record.
	pub async fn revoke_token(&self, presented: &str) -> Result<bool> {
		match self.lookup(presented).await? {
			Some(record) => self.revoke(&record.id).await,
			None => Ok(false),
		}
	}

	/// Revokes every outstanding session of `user_id`, returning how many changed.
	pub async fn revoke_all(&self, user_id: &UserId) -> Result<usize> {
		Ok(self.store.revoke_by_user_id(user_id, self.clock.now()).await?)
	}

	/// Deletes expired records, returning how many rows were removed.
	pub async fn sweep_expired(&self) -> Result<usize> {
		Ok(self.store.delete_expired(self.clock.now()).await?)
	}

	fn mint(
		&self,
		user_id: &UserId,
		now: OffsetDateTime,
	) -> Result<(IssuedRefreshToken, RefreshTokenRecord)> {
		let secret = RefreshSecret::generate()?;
		let key = self.key_ring.current();
		let record = RefreshTokenRecord {
			id: RefreshTokenId::generate(),
			user_id: user_id.clone(),
			fingerprint: key.fingerprint(secret.as_bytes()),
			key_id: key.id(),
			issued_at: now,
			expires_at: now + self.ttl,
			revoked_at: None,
		};
		let issued = IssuedRefreshToken {
			id: record.id,
			token: secret.encode(),
			expires_at: record.expires_at,
		};

		Ok((issued, record))
	}

	// Tries the current key first, then retired keys still in the ring.
	async fn lookup(&self, presented: &str) -> Result<Option<RefreshTokenRecord>> {
		let Some(secret) = RefreshSecret::decode(presented) else {
			#[cfg(feature = "tracing")]
			tracing::debug!("Rejected undecodable refresh token.");

			return Ok(None);
		};

		for key in self.key_ring.candidates() {
			let fingerprint = key.fingerprint(secret.as_bytes());
			let Some(record) = self.store.find_by_fingerprint(&fingerprint).await? else {
				continue;
			};

			if record.key_id == key.id() && record.fingerprint.ct_eq(&fingerprint) {
				return Ok(Some(record));
			}
		}

		Ok(None)
	}

	// Failures here are logged, never returned, so a replayed token is indistinguishable from
	// an unknown one.
	async fn on_replay(&self, record: &RefreshTokenRecord, now: OffsetDateTime) {
		self.metrics.record_replay();

		#[cfg(feature = "tracing")]
		tracing::warn!(
			user_id = %record.user_id,
			token_id = %record.id,
			policy = ?self.replay_policy,
			"Refresh token replay detected."
		);

		if self.replay_policy != ReplayPolicy::RevokeAll {
			return;
		}
		if let Err(_e) = self.store.revoke_by_user_id(&record.user_id, now).await {
			#[cfg(feature = "tracing")]
			tracing::error!(
				user_id = %record.user_id,
				error = %_e,
				"Failed to revoke sessions after a refresh token replay."
			);
		}
	}
}
impl Debug for RefreshTokenLifecycle {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshTokenLifecycle")
			.field("key_ring", &self.key_ring)
			.field("ttl", &self.ttl)
			.field("replay_policy", &self.replay_policy)
			.field("metrics", &self.metrics)
			.finish()
	}
}
impl Sweep for RefreshTokenLifecycle {
	fn label(&self) -> &'static str {
		"refresh_tokens"
	}

	fn sweep(&self) -> SweepFuture<'_> {
		Box::pin(self.sweep_expired())
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use base64::{
		Engine as _,
		engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD},
	};
	use time::macros;
	// self
	use super::*;
	use crate::{
		auth::{Fingerprint, HmacKey},
		clock::ManualClock,
		store::{MemoryStore, StoreError, StoreFuture},
	};

	struct Fixture {
		lifecycle: RefreshTokenLifecycle,
		store: Arc<MemoryStore>,
		clock: Arc<ManualClock>,
	}

	/// Memory store whose bulk revocation always fails.
	struct RevokeAllUnavailable(MemoryStore);
	impl RefreshTokenStore for RevokeAllUnavailable {
		fn create(&self, record: RefreshTokenRecord) -> StoreFuture<'_, ()> {
			self.0.create(record)
		}

		fn find_by_fingerprint<'a>(
			&'a self,
			fingerprint: &'a Fingerprint,
		) -> StoreFuture<'a, Option<RefreshTokenRecord>> {
			self.0.find_by_fingerprint(fingerprint)
		}

		fn find_by_id<'a>(
			&'a self,
			id: &'a RefreshTokenId,
		) -> StoreFuture<'a, Option<RefreshTokenRecord>> {
			self.0.find_by_id(id)
		}

		fn revoke_by_user_id<'a>(
			&'a self,
			_: &'a UserId,
			_: OffsetDateTime,
		) -> StoreFuture<'a, usize> {
			Box::pin(async { Err(StoreError::Backend { message: "primary unreachable".into() }) })
		}

		fn revoke_by_id<'a>(
			&'a self,
			id: &'a RefreshTokenId,
			instant: OffsetDateTime,
		) -> StoreFuture<'a, bool> {
			self.0.revoke_by_id(id, instant)
		}

		fn delete_expired(&self, now: OffsetDateTime) -> StoreFuture<'_, usize> {
			self.0.delete_expired(now)
		}

		fn rotate<'a>(
			&'a self,
			current: &'a RefreshTokenId,
			instant: OffsetDateTime,
			replacement: RefreshTokenRecord,
		) -> StoreFuture<'a, RotateOutcome> {
			self.0.rotate(current, instant, replacement)
		}
	}

	fn key(id: u32) -> HmacKey {
		HmacKey::new(id, vec![id as u8 + 1; 32]).expect("Building a key should succeed.")
	}

	fn fixture_with(ring: KeyRing, policy: ReplayPolicy, store: Arc<MemoryStore>) -> Fixture {
		let config = AuthConfig::builder()
			.signing_secret(vec![9; 32])
			.key_ring(ring)
			.replay_policy(policy)
			.build()
			.expect("Building the config fixture should succeed.");
		let clock = Arc::new(ManualClock::new(macros::datetime!(2025-03-01 12:00 UTC)));
		let lifecycle = RefreshTokenLifecycle::new(&config, store.clone(), clock.clone());

		Fixture { lifecycle, store, clock }
	}

	fn fixture(policy: ReplayPolicy) -> Fixture {
		fixture_with(KeyRing::single(key(1)), policy, Arc::new(MemoryStore::default()))
	}

	fn user(value: &str) -> UserId {
		UserId::new(value).expect("Building a user id should succeed.")
	}

	#[tokio::test]
	async fn issued_token_validates_and_is_not_stored_raw() {
		let fx = fixture(ReplayPolicy::RevokeAll);
		let alice = user("alice");
		let issued = fx.lifecycle.issue(&alice).await.expect("Issuing should succeed.");
		let record = fx
			.lifecycle
			.validate(issued.token.expose())
			.await
			.expect("Fresh token should validate.");

		assert_eq!(record.id, issued.id);
		assert_eq!(record.user_id, alice);
		assert_eq!(record.expires_at, record.issued_at + AuthConfig::DEFAULT_REFRESH_TTL);
		assert_eq!(issued.token.expose().len(), 43);

		let raw = URL_SAFE_NO_PAD.decode(issued.token.expose()).expect("Token should decode.");

		assert_ne!(record.fingerprint.as_bytes().as_slice(), raw.as_slice());
	}

	#[tokio::test]
	async fn every_tolerated_encoding_resolves_to_the_same_record() {
		let fx = fixture(ReplayPolicy::RevokeAll);
		let issued = fx.lifecycle.issue(&user("alice")).await.expect("Issuing should succeed.");
		let raw = URL_SAFE_NO_PAD.decode(issued.token.expose()).expect("Token should decode.");

		for encoded in [STANDARD.encode(&raw), URL_SAFE.encode(&raw), URL_SAFE_NO_PAD.encode(&raw)] {
			let record =
				fx.lifecycle.validate(&encoded).await.expect("Every variant should validate.");

			assert_eq!(record.id, issued.id);
		}
	}

	#[tokio::test]
	async fn malformed_and_unknown_tokens_are_rejected_identically() {
		let fx = fixture(ReplayPolicy::RevokeAll);
		let unknown = URL_SAFE_NO_PAD.encode([5_u8; 32]);
		let short = URL_SAFE_NO_PAD.encode([5_u8; 16]);

		for presented in ["", "not base64!", short.as_str(), unknown.as_str()] {
			assert!(matches!(
				fx.lifecycle.validate(presented).await,
				Err(Error::InvalidRefreshToken)
			));
		}
	}

	#[tokio::test]
	async fn rotation_is_one_time() {
		let fx = fixture(ReplayPolicy::Reject);
		let issued = fx.lifecycle.issue(&user("alice")).await.expect("Issuing should succeed.");
		let (old, next) = fx
			.lifecycle
			.validate_and_rotate(issued.token.expose())
			.await
			.expect("First rotation should succeed.");

		assert_eq!(old.id, issued.id);
		assert_ne!(next.id, issued.id);
		assert!(matches!(
			fx.lifecycle.validate_and_rotate(issued.token.expose()).await,
			Err(Error::InvalidRefreshToken)
		));
		assert!(fx.lifecycle.validate(next.token.expose()).await.is_ok());

		let metrics = fx.lifecycle.metrics();

		assert_eq!(metrics.attempts(), 2);
		assert_eq!(metrics.successes(), 1);
		assert_eq!(metrics.failures(), 1);
		assert_eq!(metrics.replays(), 1);
	}

	#[tokio::test]
	async fn replay_revokes_every_session_under_the_default_policy() {
		let fx = fixture(ReplayPolicy::RevokeAll);
		let alice = user("alice");
		let stolen = fx.lifecycle.issue(&alice).await.expect("Issuing should succeed.");
		let other = fx.lifecycle.issue(&alice).await.expect("Issuing should succeed.");
		let (_, rotated) = fx
			.lifecycle
			.validate_and_rotate(stolen.token.expose())
			.await
			.expect("Rotation should succeed.");

		assert!(fx.lifecycle.validate(stolen.token.expose()).await.is_err());
		assert!(fx.lifecycle.validate(rotated.token.expose()).await.is_err());
		assert!(fx.lifecycle.validate(other.token.expose()).await.is_err());
		assert!(fx.store.records_for(&alice).iter().all(RefreshTokenRecord::is_revoked));
	}

	#[tokio::test]
	async fn replay_reports_an_invalid_token_even_when_revoke_all_fails() {
		let store = Arc::new(RevokeAllUnavailable(MemoryStore::default()));
		let config = AuthConfig::builder()
			.signing_secret(vec![9; 32])
			.key_ring(KeyRing::single(key(1)))
			.build()
			.expect("Building the config fixture should succeed.");
		let clock = Arc::new(ManualClock::new(macros::datetime!(2025-03-01 12:00 UTC)));
		let lifecycle = RefreshTokenLifecycle::new(&config, store, clock);
		let issued = lifecycle.issue(&user("alice")).await.expect("Issuing should succeed.");

		lifecycle
			.validate_and_rotate(issued.token.expose())
			.await
			.expect("Rotation should succeed.");

		assert!(matches!(
			lifecycle.validate(issued.token.expose()).await,
			Err(Error::InvalidRefreshToken)
		));
		assert!(matches!(
			lifecycle.validate_and_rotate(issued.token.expose()).await,
			Err(Error::InvalidRefreshToken)
		));
		assert_eq!(lifecycle.metrics().replays(), 2);
	}

	#[tokio::test]
	async fn failed_preparation_leaves_the_token_active() {
		let fx = fixture(ReplayPolicy::RevokeAll);
		let issued = fx.lifecycle.issue(&user("alice")).await.expect("Issuing should succeed.");
		let outcome = fx
			.lifecycle
			.validate_and_rotate_with(issued.token.expose(), |_| async {
				Err::<(), _>(Error::IdentityUnavailable { message: "offline".into() })
			})
			.await;

		assert!(matches!(outcome, Err(Error::IdentityUnavailable { .. })));
		assert_eq!(fx.store.len(), 1);
		assert!(fx.lifecycle.validate_and_rotate(issued.token.expose()).await.is_ok());
		assert_eq!(fx.lifecycle.metrics().replays(), 0);
	}

	#[tokio::test]
	async fn stale_rotation_loses_and_leaves_no_partial_state() {
		let fx = fixture(ReplayPolicy::Reject);
		let issued = fx.lifecycle.issue(&user("alice")).await.expect("Issuing should succeed.");
		let record =
			fx.lifecycle.validate(issued.token.expose()).await.expect("Token should validate.");

		fx.lifecycle.rotate(&record).await.expect("First rotation should succeed.");

		assert!(matches!(fx.lifecycle.rotate(&record).await, Err(Error::InvalidRefreshToken)));
		assert_eq!(fx.store.len(), 2, "A losing rotation must not insert a replacement.");
	}

	#[tokio::test]
	async fn expired_tokens_fail_without_triggering_replay() {
		let fx = fixture(ReplayPolicy::RevokeAll);
		let alice = user("alice");
		let expiring = fx.lifecycle.issue(&alice).await.expect("Issuing should succeed.");

		fx.clock.advance(Duration::days(29));

		let fresh = fx.lifecycle.issue(&alice).await.expect("Issuing should succeed.");

		fx.clock.advance(Duration::days(1));

		assert!(fx.lifecycle.validate(expiring.token.expose()).await.is_err());
		assert!(fx.lifecycle.validate(fresh.token.expose()).await.is_ok());
		assert_eq!(fx.lifecycle.metrics().replays(), 0);
		assert_eq!(fx.lifecycle.sweep_expired().await.expect("Sweep should succeed."), 1);
	}

	#[tokio::test]
	async fn revocation_is_idempotent() {
		let fx = fixture(ReplayPolicy::RevokeAll);
		let alice = user("alice");
		let first = fx.lifecycle.issue(&alice).await.expect("Issuing should succeed.");
		let second = fx.lifecycle.issue(&alice).await.expect("Issuing should succeed.");

		assert!(fx.lifecycle.revoke(&first.id).await.expect("Revoke should succeed."));
		assert!(!fx.lifecycle.revoke(&first.id).await.expect("Revoke should succeed."));
		assert!(
			!fx.lifecycle
				.revoke(&RefreshTokenId::generate())
				.await
				.expect("Revoke should succeed.")
		);
		assert!(
			fx.lifecycle.revoke_token(second.token.expose()).await.expect("Revoke should succeed.")
		);
		assert!(!fx.lifecycle.revoke_token("garbage").await.expect("Revoke should succeed."));
		assert_eq!(fx.lifecycle.revoke_all(&alice).await.expect("Revoke-all should succeed."), 0);
	}

	#[tokio::test]
	async fn tokens_minted_under_a_retired_key_still_validate() {
		let store = Arc::new(MemoryStore::default());
		let before = fixture_with(KeyRing::single(key(1)), ReplayPolicy::RevokeAll, store.clone());
		let old = before.lifecycle.issue(&user("alice")).await.expect("Issuing should succeed.");
		let ring = KeyRing::new(vec![key(1), key(2)], 2).expect("Key ring should build.");
		let after = fixture_with(ring, ReplayPolicy::RevokeAll, store);
		let record =
			after.lifecycle.validate(old.token.expose()).await.expect("Old token should validate.");

		assert_eq!(record.key_id, 1);

		let next = after.lifecycle.rotate(&record).await.expect("Rotation should succeed.");
		let next_record =
			after.lifecycle.validate(next.token.expose()).await.expect("New token should validate.");

		assert_eq!(next_record.key_id, 2);
	}
}
