// self
use crate::{
	_prelude::*,
	auth::{RefreshTokenId, UserId},
	obs::FlowKind,
};

/// Future returned by [`FlowSpan::instrument`]; a plain passthrough without `tracing`.
#[cfg(feature = "tracing")]
pub type InstrumentedFlow<F> = tracing::instrument::Instrumented<F>;
/// Future returned by [`FlowSpan::instrument`]; a plain passthrough without `tracing`.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedFlow<F> = F;

/// Span wrapping one facade call.
///
/// `user_id` and `token_id` start empty and are filled in once the call has resolved them,
/// so credentials never appear in the span before they are verified.
#[derive(Clone, Debug)]
pub struct FlowSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl FlowSpan {
	/// Opens an `authkeep.flow` span for `kind` at `stage`.
	pub fn new(kind: FlowKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!(
				"authkeep.flow",
				flow = kind.as_str(),
				stage,
				user_id = tracing::field::Empty,
				token_id = tracing::field::Empty,
			);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Records the user the call acts on.
	pub fn record_user(&self, user_id: &UserId) {
		#[cfg(feature = "tracing")]
		self.span.record("user_id", tracing::field::display(user_id));
		#[cfg(not(feature = "tracing"))]
		let _ = user_id;
	}

	/// Records the session the call acts on.
	pub fn record_token(&self, token_id: &RefreshTokenId) {
		#[cfg(feature = "tracing")]
		self.span.record("token_id", tracing::field::display(token_id));
		#[cfg(not(feature = "tracing"))]
		let _ = token_id;
	}

	/// Enters the span for synchronous sections.
	pub fn entered(&self) -> FlowSpanGuard {
		#[cfg(feature = "tracing")]
		{
			FlowSpanGuard { guard: self.span.clone().entered() }
		}
		#[cfg(not(feature = "tracing"))]
		{
			FlowSpanGuard {}
		}
	}

	/// Instruments `fut` so every poll runs inside the span.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedFlow<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Guard returned by [`FlowSpan::entered`]; the span is exited on drop.
pub struct FlowSpanGuard {
	#[cfg(feature = "tracing")]
	#[allow(dead_code)]
	guard: tracing::span::EnteredSpan,
}
impl Debug for FlowSpanGuard {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("FlowSpanGuard(..)")
	}
}
