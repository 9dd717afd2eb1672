use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio::runtime::Runtime;

use crate::config::SchedulerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::id::WorkId;
use crate::spawn::background_runtime;
use crate::work::{self, WorkItem, WorkOutcome, WorkTicket};

/// Runs execute phases off the consumer thread and routes completions back to
/// the [`Dispatcher`] they were submitted through.
///
/// The scheduler keeps no queue of its own: items wait in the blocking pool's
/// queue until one of `workers` threads picks them up. Dropping the scheduler
/// waits for running execute phases; items still queued at that point complete
/// as cancelled.
pub struct WorkScheduler {
	runtime: Runtime,
	workers: usize,
}

impl WorkScheduler {
	/// Creates a caller-scoped scheduler.
	pub fn new(config: &SchedulerConfig) -> Result<Self> {
		config.validate()?;
		let runtime = background_runtime(config.workers, &config.thread_name).map_err(Error::Runtime)?;
		Ok(Self {
			runtime,
			workers: config.workers,
		})
	}

	/// Returns the process-wide scheduler, created with default settings on first use.
	pub fn shared() -> Result<&'static Self> {
		static SHARED: OnceLock<WorkScheduler> = OnceLock::new();
		if let Some(scheduler) = SHARED.get() {
			return Ok(scheduler);
		}
		let scheduler = Self::new(&SchedulerConfig::default())?;
		Ok(SHARED.get_or_init(|| scheduler))
	}

	/// Returns the maximum number of concurrently running execute phases.
	pub fn workers(&self) -> usize {
		self.workers
	}

	/// Submits one work item.
	///
	/// `execute` runs once on a pool thread with mutable access to `context`
	/// unless the item is cancelled first. `complete` runs once on the
	/// dispatcher's consumer thread with the context and the outcome.
	pub fn submit<C, R, E, X, F>(&self, dispatcher: &mut Dispatcher, execute: X, complete: F, context: C) -> WorkItem
	where
		C: Send + 'static,
		R: Send + 'static,
		E: fmt::Display,
		X: FnOnce(&mut C) -> Result<R, E> + Send + 'static,
		F: FnOnce(C, WorkOutcome<R>) + 'static,
	{
		let ticket = Arc::new(WorkTicket::new(WorkId::next()));
		let (job, pending) = work::split(
			&ticket,
			dispatcher.wakeup(),
			context,
			Box::new(move |ctx: &mut C| execute(ctx).map_err(|e| e.to_string())),
			Box::new(complete),
		);
		dispatcher.register_work(ticket.id(), pending);
		tracing::debug!(work = %ticket.id(), workers = self.workers, "bridge.work.submit");
		self.runtime.spawn_blocking(move || job.run());
		WorkItem::new(ticket)
	}
}

impl fmt::Debug for WorkScheduler {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WorkScheduler").field("workers", &self.workers).finish_non_exhaustive()
	}
}
