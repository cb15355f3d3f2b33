//! Token models: signed access tokens, keyed fingerprints, and persisted refresh records.

pub mod access;
pub mod fingerprint;
pub mod record;
pub mod secret;
