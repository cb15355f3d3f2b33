//! Identity collaborator consulted by the facade at login and refresh time.

// self
use crate::{
	_prelude::*,
	auth::{TokenSecret, UserId},
};

/// Boxed future returned by [`IdentityProvider`] calls.
pub type IdentityFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Source of truth for user accounts (password store, directory, upstream IdP).
///
/// Implementations report unknown users and wrong passwords alike as `Ok(None)` so the facade
/// can answer with a single [`Error::InvalidCredentials`]. Backend outages should surface as
/// [`Error::IdentityUnavailable`].
pub trait IdentityProvider
where
	Self: Send + Sync,
{
	/// Checks `credentials`, returning the matching user when they are valid.
	fn authenticate<'a>(
		&'a self,
		credentials: &'a Credentials,
	) -> IdentityFuture<'a, Option<AuthenticatedUser>>;

	/// Looks up a user that already holds a session.
	fn find_user<'a>(
		&'a self,
		user_id: &'a UserId,
	) -> IdentityFuture<'a, Option<AuthenticatedUser>>;
}

/// Login credentials as received from the client.
#[derive(Clone, Debug)]
pub struct Credentials {
	/// Login email address.
	pub email: String,
	/// Plaintext password; redacted in `Debug`.
	pub password: TokenSecret,
}
impl Credentials {
	/// Wraps an email/password pair.
	pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
		Self { email: email.into(), password: TokenSecret::new(password) }
	}
}

/// User resolved by an [`IdentityProvider`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
	/// Stable user identifier (access-token subject).
	pub id: UserId,
	/// Email address embedded in access tokens.
	pub email: String,
}
