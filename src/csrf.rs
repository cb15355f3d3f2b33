//! One-time OAuth `state` values guarding third-party redirects against request forgery.
//!
//! Each value is 32 random bytes, base64url-encoded without padding (43 characters, never
//! `+` or `/`), and is consumed by the first [`CsrfStateStore::verify`] call regardless of
//! outcome. Expired values are rejected inline, so the background sweep is only compaction.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
// self
use crate::{
	_prelude::*,
	auth,
	clock::{Clock, SystemClock},
	sweep::{Sweep, SweepFuture},
};

/// Random bytes drawn per state value.
pub const STATE_BYTES: usize = 32;

/// In-memory store of outstanding OAuth state values.
pub struct CsrfStateStore {
	states: Mutex<HashMap<String, OffsetDateTime>>,
	timeout: Duration,
	clock: Arc<dyn Clock>,
}
impl CsrfStateStore {
	/// Creates a store whose values live for `timeout`.
	pub fn new(timeout: Duration) -> Self {
		Self::with_clock(timeout, Arc::new(SystemClock))
	}

	/// Creates a store driven by a custom clock.
	pub fn with_clock(timeout: Duration, clock: Arc<dyn Clock>) -> Self {
		Self { states: Mutex::new(HashMap::new()), timeout, clock }
	}

	/// Generates and remembers a new state value.
	pub fn generate(&self) -> Result<String> {
		let state = URL_SAFE_NO_PAD.encode(auth::random_bytes::<STATE_BYTES>()?);
		let expires_at = self.clock.now() + self.timeout;

		self.states.lock().insert(state.clone(), expires_at);

		Ok(state)
	}

	/// Consumes `state`, returning `true` only if it was outstanding and unexpired.
	///
	/// Among concurrent callers presenting the same value, exactly one can observe `true`.
	pub fn verify(&self, state: &str) -> bool {
		let now = self.clock.now();
		let Some(expires_at) = self.states.lock().remove(state) else {
			return false;
		};

		now <= expires_at
	}

	/// Drops every expired value, returning how many were removed.
	pub fn purge_expired(&self) -> usize {
		let now = self.clock.now();
		let mut states = self.states.lock();
		let before = states.len();

		states.retain(|_, expires_at| now <= *expires_at);

		before - states.len()
	}

	/// Number of outstanding values (including expired ones not yet swept).
	pub fn len(&self) -> usize {
		self.states.lock().len()
	}

	/// Returns `true` when no values are outstanding.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Configured lifetime of a state value.
	pub fn timeout(&self) -> Duration {
		self.timeout
	}
}
impl Debug for CsrfStateStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CsrfStateStore")
			.field("outstanding", &self.len())
			.field("timeout", &self.timeout)
			.finish()
	}
}
impl Sweep for CsrfStateStore {
	fn label(&self) -> &'static str {
		"csrf_state"
	}

	fn sweep(&self) -> SweepFuture<'_> {
		Box::pin(async move { Ok(self.purge_expired()) })
	}
}
