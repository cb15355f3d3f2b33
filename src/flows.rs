//! Facade composing token services, the OAuth state store, and the rate limiter.

pub mod identity;
pub mod refresh;

pub use identity::*;
pub use refresh::*;

// self
use crate::{
	_prelude::*,
	auth::{
		AccessTokenClaims, AccessTokenService, IssuedAccessToken, IssuedRefreshToken,
		RefreshTokenId, TokenSecret, UserId,
	},
	clock::{Clock, SystemClock},
	config::AuthConfig,
	csrf::CsrfStateStore,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	rate_limit::{ClientKey, TokenBucketLimiter},
	store::RefreshTokenStore,
	sweep::SweepHandle,
};

/// Access/refresh token pair returned by login and refresh.
#[derive(Clone, Debug)]
pub struct TokenPair {
	/// Signed access token.
	pub access_token: TokenSecret,
	/// Access-token expiry instant.
	pub access_expires_at: OffsetDateTime,
	/// Opaque refresh token (base64url).
	pub refresh_token: TokenSecret,
	/// Identifier of the refresh-token record, for single-session logout.
	pub refresh_token_id: RefreshTokenId,
	/// Refresh-token expiry instant.
	pub refresh_expires_at: OffsetDateTime,
}
impl TokenPair {
	fn new(access: IssuedAccessToken, refresh: IssuedRefreshToken) -> Self {
		Self {
			access_token: access.token,
			access_expires_at: access.expires_at,
			refresh_token: refresh.token,
			refresh_token_id: refresh.id,
			refresh_expires_at: refresh.expires_at,
		}
	}
}

/// Counts removed by one [`Authenticator::sweep_expired`] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
	/// Expired refresh-token rows deleted from the store.
	pub refresh_tokens: usize,
	/// Expired OAuth state values dropped.
	pub oauth_states: usize,
	/// Idle rate-limit buckets dropped.
	pub rate_buckets: usize,
}

/// Background sweepers started by [`Authenticator::spawn_sweepers`].
#[derive(Debug)]
pub struct SweeperSet {
	/// Expired OAuth state compaction.
	pub oauth_states: SweepHandle,
	/// Idle rate-limit bucket compaction.
	pub rate_buckets: SweepHandle,
	/// Expired refresh-token row deletion.
	pub refresh_tokens: SweepHandle,
}
impl SweeperSet {
	/// Stops every sweeper and waits for them to exit.
	pub async fn shutdown(self) {
		self.oauth_states.shutdown().await;
		self.rate_buckets.shutdown().await;
		self.refresh_tokens.shutdown().await;
	}
}

/// Entry point for HTTP handlers: login, refresh, logout, verification, OAuth state, and
/// rate limiting.
///
/// Every component is shared behind an [`Arc`], so cloning the facade is cheap and clones
/// observe the same state.
#[derive(Clone)]
pub struct Authenticator {
	access: Arc<AccessTokenService>,
	sessions: Arc<RefreshTokenLifecycle>,
	oauth_states: Arc<CsrfStateStore>,
	limiter: Arc<TokenBucketLimiter>,
	identity: Arc<dyn IdentityProvider>,
	sweep_interval: Duration,
}
impl Authenticator {
	/// Assembles the facade from validated configuration using the system clock.
	pub fn new(
		config: &AuthConfig,
		store: Arc<dyn RefreshTokenStore>,
		identity: Arc<dyn IdentityProvider>,
	) -> Self {
		Self::with_clock(config, store, identity, Arc::new(SystemClock))
	}

	/// Assembles the facade with every component sharing `clock`.
	pub fn with_clock(
		config: &AuthConfig,
		store: Arc<dyn RefreshTokenStore>,
		identity: Arc<dyn IdentityProvider>,
		clock: Arc<dyn Clock>,
	) -> Self {
		Self {
			access: Arc::new(AccessTokenService::new(config, clock.clone())),
			sessions: Arc::new(RefreshTokenLifecycle::new(config, store, clock.clone())),
			oauth_states: Arc::new(CsrfStateStore::with_clock(config.csrf_timeout, clock.clone())),
			limiter: Arc::new(TokenBucketLimiter::from_config(config, clock)),
			identity,
			sweep_interval: config.sweep_interval,
		}
	}

	/// Access-token signer/verifier.
	pub fn access_tokens(&self) -> &Arc<AccessTokenService> {
		&self.access
	}

	/// Refresh-token lifecycle.
	pub fn sessions(&self) -> &Arc<RefreshTokenLifecycle> {
		&self.sessions
	}

	/// OAuth state store.
	pub fn oauth_states(&self) -> &Arc<CsrfStateStore> {
		&self.oauth_states
	}

	/// Per-client rate limiter.
	pub fn limiter(&self) -> &Arc<TokenBucketLimiter> {
		&self.limiter
	}

	/// Authenticates `credentials` and opens a new session.
	///
	/// Unknown users and wrong passwords both fail with [`Error::InvalidCredentials`].
	pub async fn login(&self, credentials: &Credentials) -> Result<TokenPair> {
		const KIND: FlowKind = FlowKind::Login;

		let span = FlowSpan::new(KIND, "login");
		let flow = &span;

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let user = self
					.identity
					.authenticate(credentials)
					.await?
					.ok_or(Error::InvalidCredentials)?;

				flow.record_user(&user.id);

				let access = self.access.issue(&user.id, &user.email)?;
				let refresh = self.sessions.issue(&user.id).await?;

				flow.record_token(&refresh.id);

				#[cfg(feature = "tracing")]
				tracing::info!(user_id = %user.id, token_id = %refresh.id, "Session opened.");

				Ok(TokenPair::new(access, refresh))
			})
			.await;

		obs::record_result(KIND, result)
	}

	/// Exchanges a refresh token for a new pair, consuming the presented token.
	///
	/// The user is resolved and the access token signed before the refresh token rotates, so
	/// an identity outage leaves the presented token usable for a retry. If the user no longer
	/// exists the presented token is revoked and the call fails with
	/// [`Error::InvalidRefreshToken`].
	pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "refresh");
		let flow = &span;

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let (access, refresh) = self
					.sessions
					.validate_and_rotate_with(refresh_token, |record| async move {
						flow.record_user(&record.user_id);

						let Some(user) = self.identity.find_user(&record.user_id).await? else {
							self.sessions.revoke(&record.id).await?;

							return Err(Error::InvalidRefreshToken);
						};

						self.access.issue(&user.id, &user.email)
					})
					.await?;

				flow.record_token(&refresh.id);

				Ok(TokenPair::new(access, refresh))
			})
			.await;

		obs::record_result(KIND, result)
	}

	/// Ends one session. Unknown or already revoked sessions are not an error.
	pub async fn logout(&self, refresh_token_id: &RefreshTokenId) -> Result<()> {
		const KIND: FlowKind = FlowKind::Logout;

		let span = FlowSpan::new(KIND, "logout");

		span.record_token(refresh_token_id);
		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.sessions.revoke(refresh_token_id)).await.map(|_| ());

		obs::record_result(KIND, result)
	}

	/// Ends the session presenting `refresh_token`. Invalid tokens are ignored.
	pub async fn logout_token(&self, refresh_token: &str) -> Result<()> {
		const KIND: FlowKind = FlowKind::Logout;

		let span = FlowSpan::new(KIND, "logout_token");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.sessions.revoke_token(refresh_token)).await.map(|_| ());

		obs::record_result(KIND, result)
	}

	/// Ends every session of `user_id`, returning how many were revoked.
	pub async fn logout_all(&self, user_id: &UserId) -> Result<usize> {
		const KIND: FlowKind = FlowKind::LogoutAll;

		let span = FlowSpan::new(KIND, "logout_all");

		span.record_user(user_id);
		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.sessions.revoke_all(user_id)).await;

		#[cfg(feature = "tracing")]
		{
			if let Ok(revoked) = &result {
				tracing::info!(user_id = %user_id, revoked, "Revoked every session.");
			}
		}

		obs::record_result(KIND, result)
	}

	/// Verifies an access token and returns its claims.
	pub fn verify_access_token(&self, token: &str) -> Result<AccessTokenClaims> {
		const KIND: FlowKind = FlowKind::VerifyAccess;

		let span = FlowSpan::new(KIND, "verify_access_token");
		let _guard = span.entered();

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = self.access.verify(token);

		if let Ok(claims) = &result {
			span.record_user(&claims.sub);
		}

		obs::record_result(KIND, result)
	}

	/// Generates a one-time OAuth `state` value.
	pub fn new_oauth_state(&self) -> Result<String> {
		self.oauth_states.generate()
	}

	/// Consumes an OAuth `state` value; `true` only for the first use of an unexpired value.
	pub fn consume_oauth_state(&self, state: &str) -> bool {
		self.oauth_states.verify(state)
	}

	/// Admits one request for the raw client address or key.
	pub fn check_rate_limit(&self, client: &str) -> bool {
		self.limiter.check(&ClientKey::from_addr(client))
	}

	/// Runs every compaction once, for deployments driving sweeps from an external scheduler.
	pub async fn sweep_expired(&self) -> Result<SweepReport> {
		const KIND: FlowKind = FlowKind::Sweep;

		let span = FlowSpan::new(KIND, "sweep_expired");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let oauth_states = self.oauth_states.purge_expired();
				let rate_buckets = self.limiter.purge_idle();
				let refresh_tokens = self.sessions.sweep_expired().await?;

				Ok(SweepReport { refresh_tokens, oauth_states, rate_buckets })
			})
			.await;

		obs::record_result(KIND, result)
	}

	/// Starts periodic background sweeps on the current Tokio runtime.
	///
	/// The sweepers stop when the returned set is dropped or shut down.
	pub fn spawn_sweepers(&self) -> SweeperSet {
		SweeperSet {
			oauth_states: SweepHandle::spawn(&self.oauth_states, self.sweep_interval),
			rate_buckets: SweepHandle::spawn(&self.limiter, self.sweep_interval),
			refresh_tokens: SweepHandle::spawn(&self.sessions, self.sweep_interval),
		}
	}
}
impl Debug for Authenticator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Authenticator")
			.field("access", &self.access)
			.field("sessions", &self.sessions)
			.field("oauth_states", &self.oauth_states)
			.field("limiter", &self.limiter)
			.field("sweep_interval", &self.sweep_interval)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicBool, Ordering};
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{
		auth::{HmacKey, KeyRing},
		clock::ManualClock,
		store::MemoryStore,
	};

	#[derive(Default)]
	struct Directory {
		users: Mutex<HashMap<String, (String, AuthenticatedUser)>>,
		offline: AtomicBool,
	}
	impl Directory {
		fn add(&self, id: &str, email: &str, password: &str) {
			let user = AuthenticatedUser {
				id: UserId::new(id).expect("Building a user id should succeed."),
				email: email.into(),
			};

			self.users.lock().insert(email.into(), (password.into(), user));
		}

		fn remove(&self, email: &str) {
			self.users.lock().remove(email);
		}

		fn set_offline(&self, offline: bool) {
			self.offline.store(offline, Ordering::SeqCst);
		}
	}
	impl IdentityProvider for Directory {
		fn authenticate<'a>(
			&'a self,
			credentials: &'a Credentials,
		) -> IdentityFuture<'a, Option<AuthenticatedUser>> {
			Box::pin(async move {
				Ok(self
					.users
					.lock()
					.get(&credentials.email)
					.filter(|(password, _)| password == credentials.password.expose())
					.map(|(_, user)| user.clone()))
			})
		}

		fn find_user<'a>(
			&'a self,
			user_id: &'a UserId,
		) -> IdentityFuture<'a, Option<AuthenticatedUser>> {
			Box::pin(async move {
				if self.offline.load(Ordering::SeqCst) {
					return Err(Error::IdentityUnavailable { message: "directory offline".into() });
				}

				Ok(self
					.users
					.lock()
					.values()
					.find(|(_, user)| &user.id == user_id)
					.map(|(_, user)| user.clone()))
			})
		}
	}

	fn facade() -> (Authenticator, Arc<Directory>, Arc<ManualClock>) {
		let key = HmacKey::new(1, vec![3; 32]).expect("Building a key should succeed.");
		let config = AuthConfig::builder()
			.signing_secret(vec![4; 32])
			.key_ring(KeyRing::single(key))
			.issuer("authkeep-tests")
			.build()
			.expect("Building the config fixture should succeed.");
		let directory = Arc::new(Directory::default());
		let clock = Arc::new(ManualClock::new(macros::datetime!(2025-04-01 10:00 UTC)));
		let facade = Authenticator::with_clock(
			&config,
			Arc::new(MemoryStore::default()),
			directory.clone(),
			clock.clone(),
		);

		directory.add("u-ada", "ada@example.com", "hunter22");

		(facade, directory, clock)
	}

	#[tokio::test]
	async fn login_issues_a_verifiable_pair() {
		let (facade, _, clock) = facade();
		let pair = facade
			.login(&Credentials::new("ada@example.com", "hunter22"))
			.await
			.expect("Login should succeed.");
		let claims =
			facade.verify_access_token(pair.access_token.expose()).expect("Token should verify.");

		assert_eq!(claims.sub.as_ref(), "u-ada");
		assert_eq!(claims.email, "ada@example.com");
		assert_eq!(claims.iss.as_deref(), Some("authkeep-tests"));
		assert_eq!(pair.access_expires_at, clock.now() + Duration::minutes(15));
		assert_eq!(pair.refresh_expires_at, clock.now() + Duration::days(30));
	}

	#[tokio::test]
	async fn bad_credentials_are_indistinguishable() {
		let (facade, _, _) = facade();

		for (email, password) in [("ada@example.com", "wrong"), ("nobody@example.com", "hunter22")]
		{
			assert!(matches!(
				facade.login(&Credentials::new(email, password)).await,
				Err(Error::InvalidCredentials)
			));
		}
	}

	#[tokio::test]
	async fn refresh_rotates_the_presented_token() {
		let (facade, _, _) = facade();
		let first = facade
			.login(&Credentials::new("ada@example.com", "hunter22"))
			.await
			.expect("Login should succeed.");
		let second =
			facade.refresh(first.refresh_token.expose()).await.expect("Refresh should succeed.");

		assert_ne!(first.refresh_token, second.refresh_token);
		assert!(matches!(
			facade.refresh(first.refresh_token.expose()).await,
			Err(Error::InvalidRefreshToken)
		));
	}

	#[tokio::test]
	async fn identity_outage_during_refresh_keeps_the_presented_token() {
		let (facade, directory, _) = facade();
		let pair = facade
			.login(&Credentials::new("ada@example.com", "hunter22"))
			.await
			.expect("Login should succeed.");

		directory.set_offline(true);

		assert!(matches!(
			facade.refresh(pair.refresh_token.expose()).await,
			Err(Error::IdentityUnavailable { .. })
		));

		directory.set_offline(false);

		let rotated = facade
			.refresh(pair.refresh_token.expose())
			.await
			.expect("Retrying after the outage should succeed.");

		assert!(facade.verify_access_token(rotated.access_token.expose()).is_ok());
		assert_eq!(facade.sessions().metrics().replays(), 0);

		let user = UserId::new("u-ada").expect("Building a user id should succeed.");

		assert_eq!(
			facade.logout_all(&user).await.expect("Logout-all should succeed."),
			1,
			"Only the replacement may be active; the outage must not leave an orphan session."
		);
	}

	#[tokio::test]
	async fn logout_is_idempotent() {
		let (facade, _, _) = facade();
		let pair = facade
			.login(&Credentials::new("ada@example.com", "hunter22"))
			.await
			.expect("Login should succeed.");

		facade.logout(&pair.refresh_token_id).await.expect("Logout should succeed.");
		facade.logout(&pair.refresh_token_id).await.expect("Repeated logout should succeed.");

		assert!(facade.refresh(pair.refresh_token.expose()).await.is_err());
	}

	#[tokio::test]
	async fn refresh_fails_once_the_user_is_gone() {
		let (facade, directory, _) = facade();
		let pair = facade
			.login(&Credentials::new("ada@example.com", "hunter22"))
			.await
			.expect("Login should succeed.");

		directory.remove("ada@example.com");

		assert!(matches!(
			facade.refresh(pair.refresh_token.expose()).await,
			Err(Error::InvalidRefreshToken)
		));

		let user = UserId::new("u-ada").expect("Building a user id should succeed.");

		assert_eq!(facade.logout_all(&user).await.expect("Logout-all should succeed."), 0);
	}

	#[tokio::test]
	async fn logout_all_revokes_every_session() {
		let (facade, _, _) = facade();
		let credentials = Credentials::new("ada@example.com", "hunter22");
		let a = facade.login(&credentials).await.expect("Login should succeed.");
		let b = facade.login(&credentials).await.expect("Login should succeed.");
		let user = UserId::new("u-ada").expect("Building a user id should succeed.");

		assert_eq!(facade.logout_all(&user).await.expect("Logout-all should succeed."), 2);
		assert!(facade.refresh(a.refresh_token.expose()).await.is_err());
		assert!(facade.refresh(b.refresh_token.expose()).await.is_err());
	}

	#[tokio::test]
	async fn logout_token_ignores_garbage() {
		let (facade, _, _) = facade();
		let pair = facade
			.login(&Credentials::new("ada@example.com", "hunter22"))
			.await
			.expect("Login should succeed.");

		facade.logout_token("garbage").await.expect("Invalid tokens should be ignored.");
		facade.logout_token(pair.refresh_token.expose()).await.expect("Logout should succeed.");

		assert!(facade.refresh(pair.refresh_token.expose()).await.is_err());
	}

	#[tokio::test]
	async fn sweep_reports_each_store() {
		let (facade, _, clock) = facade();

		facade
			.login(&Credentials::new("ada@example.com", "hunter22"))
			.await
			.expect("Login should succeed.");
		facade.new_oauth_state().expect("Generating a state should succeed.");

		assert!(facade.check_rate_limit("192.0.2.1:5000"));

		clock.advance(Duration::days(31));

		let report = facade.sweep_expired().await.expect("Sweep should succeed.");

		assert_eq!(report, SweepReport { refresh_tokens: 1, oauth_states: 1, rate_buckets: 1 });
	}

	#[tokio::test]
	async fn oauth_state_and_rate_limit_pass_through() {
		let (facade, _, _) = facade();
		let state = facade.new_oauth_state().expect("Generating a state should succeed.");

		assert!(facade.consume_oauth_state(&state));
		assert!(!facade.consume_oauth_state(&state));

		for _ in 0..10 {
			assert!(facade.check_rate_limit("198.51.100.7:443"));
		}

		assert!(!facade.check_rate_limit("198.51.100.7:8080"), "Ports must share one bucket.");
		assert!(facade.check_rate_limit("198.51.100.8"));
	}
}
