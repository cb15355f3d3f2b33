//! Keyed refresh-token fingerprints and the rotating HMAC key ring that produces them.
//!
//! A fingerprint is `HMAC-SHA256(key, raw_token_bytes)`. Only fingerprints are persisted,
//! so a leaked store cannot be replayed without the key material. Every record remembers
//! the [`KeyId`] that produced its fingerprint; the [`KeyRing`] keeps older keys around so
//! outstanding tokens stay verifiable after a rotation.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
// self
use crate::{_prelude::*, auth::SecretBytes, error::ConfigError};

type HmacSha256 = Hmac<Sha256>;

/// Identifier of an HMAC fingerprinting key.
pub type KeyId = u32;

/// Byte length of a fingerprint digest.
pub const FINGERPRINT_LEN: usize = 32;

/// Error raised when decoding a serialized fingerprint.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Fingerprint must be {FINGERPRINT_LEN} base64url-encoded bytes.")]
pub struct FingerprintDecodeError;

/// 32-byte keyed digest of a refresh-token secret.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);
impl Fingerprint {
	/// Wraps raw digest bytes.
	pub const fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
		Self(bytes)
	}

	/// Returns the digest bytes.
	pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
		&self.0
	}

	/// Compares two fingerprints without data-dependent early exits.
	pub fn ct_eq(&self, other: &Fingerprint) -> bool {
		self.0[..].ct_eq(&other.0[..]).into()
	}
}
impl From<Fingerprint> for String {
	fn from(value: Fingerprint) -> Self {
		URL_SAFE_NO_PAD.encode(value.0)
	}
}
impl TryFrom<String> for Fingerprint {
	type Error = FingerprintDecodeError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		let bytes = URL_SAFE_NO_PAD.decode(value.as_bytes()).map_err(|_| FingerprintDecodeError)?;
		let bytes: [u8; FINGERPRINT_LEN] =
			bytes.try_into().map_err(|_| FingerprintDecodeError)?;

		Ok(Self(bytes))
	}
}
impl Debug for Fingerprint {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		// First 8 bytes are enough to correlate log lines.
		let prefix = URL_SAFE_NO_PAD.encode(&self.0[..8]);

		write!(f, "Fingerprint({prefix}..)")
	}
}

/// HMAC-SHA256 key used to fingerprint refresh tokens.
#[derive(Clone)]
pub struct HmacKey {
	id: KeyId,
	mac: HmacSha256,
}
impl HmacKey {
	/// Builds a key from its identifier and secret bytes.
	pub fn new(id: KeyId, secret: impl Into<SecretBytes>) -> Result<Self, ConfigError> {
		let secret = secret.into();

		if secret.is_empty() {
			return Err(ConfigError::EmptyFingerprintKey { id });
		}

		let mac = <HmacSha256 as Mac>::new_from_slice(secret.expose())
			.map_err(|_| ConfigError::EmptyFingerprintKey { id })?;

		Ok(Self { id, mac })
	}

	/// Identifier recorded alongside every fingerprint this key produces.
	pub fn id(&self) -> KeyId {
		self.id
	}

	/// Computes `HMAC-SHA256(key, raw)`.
	pub fn fingerprint(&self, raw: &[u8]) -> Fingerprint {
		let mut mac = self.mac.clone();

		mac.update(raw);

		let digest = mac.finalize().into_bytes();
		let mut bytes = [0_u8; FINGERPRINT_LEN];

		bytes.copy_from_slice(&digest);

		Fingerprint(bytes)
	}
}
impl Debug for HmacKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("HmacKey").field("id", &self.id).field("secret", &"<redacted>").finish()
	}
}

/// Ordered set of active fingerprint keys with one designated current key.
///
/// New tokens are always fingerprinted with the current key. Verification selects the key by
/// the id stored on the record, so retired-but-still-listed keys keep older tokens valid
/// until they expire naturally.
#[derive(Clone, Debug)]
pub struct KeyRing {
	keys: Vec<HmacKey>,
	current: usize,
}
impl KeyRing {
	/// Builds a ring from `keys`, designating `current_id` for new fingerprints.
	pub fn new(keys: Vec<HmacKey>, current_id: KeyId) -> Result<Self, ConfigError> {
		if keys.is_empty() {
			return Err(ConfigError::MissingFingerprintKeys);
		}

		let mut seen = HashSet::with_capacity(keys.len());

		for key in &keys {
			if !seen.insert(key.id) {
				return Err(ConfigError::DuplicateKeyId { id: key.id });
			}
		}

		let current = keys
			.iter()
			.position(|key| key.id == current_id)
			.ok_or(ConfigError::UnknownCurrentKey { id: current_id })?;

		Ok(Self { keys, current })
	}

	/// Builds a ring holding a single key, which becomes current.
	pub fn single(key: HmacKey) -> Self {
		Self { keys: vec![key], current: 0 }
	}

	/// Key used for newly issued tokens.
	pub fn current(&self) -> &HmacKey {
		&self.keys[self.current]
	}

	/// Looks up a key by identifier.
	pub fn get(&self, id: KeyId) -> Option<&HmacKey> {
		self.keys.iter().find(|key| key.id == id)
	}

	/// Iterates keys with the current key first, then the rest in declaration order.
	pub fn candidates(&self) -> impl Iterator<Item = &HmacKey> {
		let current = self.current;

		std::iter::once(&self.keys[current])
			.chain(
				self.keys
					.iter()
					.enumerate()
					.filter(move |(i, _)| *i != current)
					.map(|(_, k)| k),
			)
	}

	/// Number of keys in the ring.
	pub fn len(&self) -> usize {
		self.keys.len()
	}

	/// Always `false`; a ring cannot be constructed empty.
	pub fn is_empty(&self) -> bool {
		self.keys.is_empty()
	}
}
