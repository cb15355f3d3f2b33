//! Cancellable background compaction for volatile stores.
//!
//! A [`SweepHandle`] owns a Tokio task that periodically calls [`Sweep::sweep`] on a target.
//! The task holds only a weak reference, so dropping the target ends the loop; dropping or
//! shutting down the handle stops it as well. Correctness never depends on a sweep having
//! run: every target also checks expiry inline on reads.

// crates.io
use tokio::{
	sync::oneshot,
	task::JoinHandle,
	time::{self, MissedTickBehavior},
};
// self
use crate::_prelude::*;

/// Boxed future returned by [`Sweep::sweep`].
pub type SweepFuture<'a> = Pin<Box<dyn Future<Output = Result<usize>> + 'a + Send>>;

/// Something that can drop its own stale entries.
pub trait Sweep
where
	Self: 'static + Send + Sync,
{
	/// Stable label used in logs.
	fn label(&self) -> &'static str;

	/// Removes stale entries, returning how many were dropped.
	fn sweep(&self) -> SweepFuture<'_>;
}

/// Handle to a running sweep task.
#[derive(Debug)]
pub struct SweepHandle {
	shutdown: Option<oneshot::Sender<()>>,
	task: JoinHandle<()>,
}
impl SweepHandle {
	/// Spawns a sweep of `target` every `every` on the current Tokio runtime.
	///
	/// The first sweep runs one full period after spawning. Must be called from within a
	/// Tokio runtime.
	pub fn spawn<T>(target: &Arc<T>, every: Duration) -> Self
	where
		T: Sweep,
	{
		let period = every.unsigned_abs().max(std::time::Duration::from_millis(1));
		let target = Arc::downgrade(target);
		let (shutdown, mut stop) = oneshot::channel();
		let task = tokio::spawn(async move {
			let mut ticker = time::interval_at(time::Instant::now() + period, period);

			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

			loop {
				tokio::select! {
					_ = &mut stop => break,
					_ = ticker.tick() => {
						let Some(target) = Weak::upgrade(&target) else { break };

						run_once(target.as_ref()).await;
					},
				}
			}
		});

		Self { shutdown: Some(shutdown), task }
	}

	/// Stops scheduling further sweeps and waits for the task to exit.
	pub async fn shutdown(mut self) {
		if let Some(tx) = self.shutdown.take() {
			let _ = tx.send(());
		}

		let _ = (&mut self.task).await;
	}

	/// Returns `true` once the task has exited.
	pub fn is_finished(&self) -> bool {
		self.task.is_finished()
	}
}
impl Drop for SweepHandle {
	fn drop(&mut self) {
		self.task.abort();
	}
}

/// Runs one sweep, logging the result. Failures never stop the schedule.
pub async fn run_once<T>(target: &T) -> Option<usize>
where
	T: ?Sized + Sweep,
{
	match target.sweep().await {
		Ok(removed) => {
			#[cfg(feature = "tracing")]
			{
				if removed > 0 {
					tracing::debug!(target_name = target.label(), removed, "Sweep removed entries.");
				}
			}

			Some(removed)
		},
		Err(_e) => {
			#[cfg(feature = "tracing")]
			tracing::warn!(target_name = target.label(), error = %_e, "Sweep failed.");

			None
		},
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// self
	use super::*;

	#[derive(Default)]
	struct Counter(AtomicUsize);
	impl Sweep for Counter {
		fn label(&self) -> &'static str {
			"counter"
		}

		fn sweep(&self) -> SweepFuture<'_> {
			Box::pin(async move { Ok(self.0.fetch_add(1, Ordering::SeqCst) + 1) })
		}
	}

	struct Failing;
	impl Sweep for Failing {
		fn label(&self) -> &'static str {
			"failing"
		}

		fn sweep(&self) -> SweepFuture<'_> {
			Box::pin(async move { Err(Error::InvalidToken) })
		}
	}

	#[tokio::test(start_paused = true)]
	async fn sweeps_run_periodically_until_shutdown() {
		let target = Arc::new(Counter::default());
		let handle = SweepHandle::spawn(&target, Duration::minutes(5));

		time::sleep(std::time::Duration::from_secs(5 * 60 * 3 + 1)).await;

		assert_eq!(target.0.load(Ordering::SeqCst), 3);

		handle.shutdown().await;
		time::sleep(std::time::Duration::from_secs(5 * 60 * 3)).await;

		assert_eq!(target.0.load(Ordering::SeqCst), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn dropping_the_target_ends_the_task() {
		let target = Arc::new(Counter::default());
		let handle = SweepHandle::spawn(&target, Duration::seconds(1));

		drop(target);
		time::sleep(std::time::Duration::from_millis(1_500)).await;
		tokio::task::yield_now().await;

		assert!(handle.is_finished());
	}

	#[tokio::test]
	async fn failures_are_reported_as_none() {
		assert_eq!(run_once(&Failing).await, None);
		assert_eq!(run_once(&Counter::default()).await, Some(1));
	}
}
