//! Session-security core: signed access tokens, fingerprinted rotating refresh tokens,
//! one-time OAuth state values, and per-client token-bucket rate limiting.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod clock;
pub mod config;
pub mod csrf;
pub mod error;
pub mod flows;
pub mod obs;
pub mod rate_limit;
pub mod store;
pub mod sweep;

mod _prelude {
	pub use std::{
		collections::{HashMap, HashSet},
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::{Arc, Weak},
	};

	pub use parking_lot::{Mutex, RwLock};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};

	pub use crate::error::{Error, Result};
}
