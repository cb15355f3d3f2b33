//! Optional observability helpers for auth flows.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `authkeep.flow` with the `flow` (facade
//!   operation) and `stage` (call site) fields.
//! - Enable `metrics` to increment the `authkeep_flow_total` counter for every
//!   attempt/success/failure, labeled by `flow` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Facade operations observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Credential login issuing a fresh token pair.
	Login,
	/// Refresh-token rotation.
	Refresh,
	/// Single-session logout.
	Logout,
	/// Logout of every session of a user.
	LogoutAll,
	/// Access-token verification.
	VerifyAccess,
	/// Expired-row compaction.
	Sweep,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::Login => "login",
			FlowKind::Refresh => "refresh",
			FlowKind::Logout => "logout",
			FlowKind::LogoutAll => "logout_all",
			FlowKind::VerifyAccess => "verify_access",
			FlowKind::Sweep => "sweep",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a facade operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn labels_are_stable() {
		assert_eq!(FlowKind::LogoutAll.to_string(), "logout_all");
		assert_eq!(FlowKind::VerifyAccess.as_str(), "verify_access");
		assert_eq!(FlowOutcome::Failure.to_string(), "failure");
	}
}
