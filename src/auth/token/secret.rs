//! Secret wrappers that redact sensitive material, plus the shared random source.

// crates.io
use rand::{TryRngCore, rngs::OsRng};
// self
use crate::_prelude::*;

/// Redacted token string wrapper keeping bearer material out of logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl AsRef<str> for TokenSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&"<redacted>").finish()
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Redacted byte-string wrapper for signing secrets and HMAC keys.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretBytes(Vec<u8>);
impl SecretBytes {
	/// Wraps raw key material.
	pub fn new(value: impl Into<Vec<u8>>) -> Self {
		Self(value.into())
	}

	/// Returns the raw bytes. Callers must avoid logging them.
	pub fn expose(&self) -> &[u8] {
		&self.0
	}

	/// Number of bytes held.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns `true` when no key material is held.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}
impl From<Vec<u8>> for SecretBytes {
	fn from(value: Vec<u8>) -> Self {
		Self(value)
	}
}
impl From<&[u8]> for SecretBytes {
	fn from(value: &[u8]) -> Self {
		Self(value.to_vec())
	}
}
impl Debug for SecretBytes {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "SecretBytes(<redacted; {} bytes>)", self.0.len())
	}
}

/// Fills an array from the operating system CSPRNG.
pub(crate) fn random_bytes<const N: usize>() -> Result<[u8; N]> {
	let mut buf = [0_u8; N];

	OsRng.try_fill_bytes(&mut buf).map_err(|e| Error::Entropy { message: e.to_string() })?;

	Ok(buf)
}
