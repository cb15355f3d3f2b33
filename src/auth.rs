//! Identity types, redacted secrets, access-token claims, fingerprints, and refresh records.

pub mod id;
pub mod token;

pub use id::*;
pub use token::{access::*, fingerprint::*, record::*, secret::*};
