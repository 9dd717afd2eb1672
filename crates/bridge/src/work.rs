//! One-shot background work items.
//!
//! An item's execute phase runs on the scheduler's pool; its completion runs
//! on the consumer thread exactly once, whether the item finished, failed, or
//! was cancelled while still queued.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;

use crate::error::ContractViolation;
use crate::id::WorkId;
use crate::panic::panic_message;
use crate::wakeup::Wakeup;

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const COMPLETED: u8 = 2;
const CANCELLED: u8 = 3;

/// Lifecycle of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkState {
	Queued,
	Running,
	Completed,
	Cancelled,
}

impl WorkState {
	fn from_raw(raw: u8) -> Self {
		match raw {
			QUEUED => Self::Queued,
			RUNNING => Self::Running,
			COMPLETED => Self::Completed,
			_ => Self::Cancelled,
		}
	}
}

/// Completion status without the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
	Ok,
	Cancelled,
	Error,
}

/// What the completion phase receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome<R> {
	/// Execute phase returned a result.
	Ok(R),
	/// Cancelled while queued. Execute never ran.
	Cancelled,
	/// Execute phase returned an error or panicked.
	Error(String),
}

impl<R> WorkOutcome<R> {
	pub fn status(&self) -> WorkStatus {
		match self {
			Self::Ok(_) => WorkStatus::Ok,
			Self::Cancelled => WorkStatus::Cancelled,
			Self::Error(_) => WorkStatus::Error,
		}
	}

	/// Returns the result, if the execute phase produced one.
	pub fn ok(self) -> Option<R> {
		match self {
			Self::Ok(result) => Some(result),
			_ => None,
		}
	}
}

/// State shared by the caller's [`WorkItem`], the background job, and the
/// pending completion.
#[derive(Debug)]
pub(crate) struct WorkTicket {
	id: WorkId,
	state: AtomicU8,
}

impl WorkTicket {
	pub fn new(id: WorkId) -> Self {
		Self {
			id,
			state: AtomicU8::new(QUEUED),
		}
	}

	pub fn id(&self) -> WorkId {
		self.id
	}

	pub fn state(&self) -> WorkState {
		WorkState::from_raw(self.state.load(Ordering::Acquire))
	}

	fn transition(&self, from: u8, to: u8) -> Result<(), u8> {
		self.state.compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire).map(|_| ())
	}

	fn cancel(&self) -> Result<(), ContractViolation> {
		match self.transition(QUEUED, CANCELLED) {
			Ok(()) | Err(CANCELLED) => Ok(()),
			Err(_) => Err(ContractViolation::CancelAfterStart),
		}
	}
}

/// Caller-side handle to a submitted work item.
#[derive(Debug, Clone)]
pub struct WorkItem {
	ticket: Arc<WorkTicket>,
}

impl WorkItem {
	pub(crate) fn new(ticket: Arc<WorkTicket>) -> Self {
		Self { ticket }
	}

	pub fn id(&self) -> WorkId {
		self.ticket.id()
	}

	pub fn state(&self) -> WorkState {
		self.ticket.state()
	}

	/// Cancels the item if it has not started.
	///
	/// The completion still runs once, with [`WorkOutcome::Cancelled`].
	/// Cancelling an already cancelled item is a no-op; cancelling a running or
	/// completed item is a [`ContractViolation::CancelAfterStart`].
	pub fn cancel(&self) -> Result<(), ContractViolation> {
		self.ticket.cancel()?;
		tracing::debug!(work = %self.ticket.id(), "bridge.work.cancel");
		Ok(())
	}
}

type Finished<C, R> = Arc<Mutex<Option<(C, WorkOutcome<R>)>>>;
pub(crate) type Execute<C, R> = Box<dyn FnOnce(&mut C) -> Result<R, String> + Send>;
pub(crate) type Complete<C, R> = Box<dyn FnOnce(C, WorkOutcome<R>)>;

/// Background half of a work item. Runs on a pool thread.
///
/// A job dropped without running, e.g. by pool shutdown, counts as cancelled
/// so the completion still fires.
pub(crate) struct BackgroundJob<C, R> {
	ticket: Arc<WorkTicket>,
	finished: Finished<C, R>,
	wakeup: Arc<Wakeup>,
	input: Option<(C, Execute<C, R>)>,
}

impl<C, R> BackgroundJob<C, R> {
	pub fn run(mut self) {
		let Some((mut context, execute)) = self.input.take() else {
			return;
		};
		if self.ticket.transition(QUEUED, RUNNING).is_err() {
			self.post(context, WorkOutcome::Cancelled);
			return;
		}
		let outcome = match panic::catch_unwind(AssertUnwindSafe(|| execute(&mut context))) {
			Ok(Ok(result)) => WorkOutcome::Ok(result),
			Ok(Err(message)) => WorkOutcome::Error(message),
			Err(payload) => WorkOutcome::Error(panic_message(&*payload)),
		};
		let _ = self.ticket.transition(RUNNING, COMPLETED);
		self.post(context, outcome);
	}

	fn post(&self, context: C, outcome: WorkOutcome<R>) {
		tracing::trace!(work = %self.ticket.id(), status = ?outcome.status(), "bridge.work.finished");
		*self.finished.lock() = Some((context, outcome));
		self.wakeup.post_finished(self.ticket.id());
	}
}

impl<C, R> Drop for BackgroundJob<C, R> {
	fn drop(&mut self) {
		if let Some((context, _)) = self.input.take() {
			let _ = self.ticket.transition(QUEUED, CANCELLED);
			tracing::warn!(work = %self.ticket.id(), "bridge.work.dropped");
			self.post(context, WorkOutcome::Cancelled);
		}
	}
}

/// Consumer half of a work item, held by the dispatcher until the background
/// job posts its outcome.
pub(crate) trait PendingWork {
	/// Runs the completion. Consumer thread only.
	fn complete(self: Box<Self>) -> Result<(), String>;
}

struct PendingCompletion<C, R> {
	finished: Finished<C, R>,
	complete: Complete<C, R>,
}

impl<C, R> PendingWork for PendingCompletion<C, R> {
	fn complete(self: Box<Self>) -> Result<(), String> {
		let Some((context, outcome)) = self.finished.lock().take() else {
			return Err("completion posted without an outcome".to_string());
		};
		let complete = self.complete;
		panic::catch_unwind(AssertUnwindSafe(move || complete(context, outcome))).map_err(|payload| panic_message(&*payload))
	}
}

/// Splits one submission into its background job and pending completion.
pub(crate) fn split<C, R>(
	ticket: &Arc<WorkTicket>,
	wakeup: &Arc<Wakeup>,
	context: C,
	execute: Execute<C, R>,
	complete: Complete<C, R>,
) -> (BackgroundJob<C, R>, Box<dyn PendingWork>)
where
	C: 'static,
	R: 'static,
{
	let finished: Finished<C, R> = Arc::new(Mutex::new(None));
	let job = BackgroundJob {
		ticket: Arc::clone(ticket),
		finished: Arc::clone(&finished),
		wakeup: Arc::clone(wakeup),
		input: Some((context, execute)),
	};
	(job, Box::new(PendingCompletion { finished, complete }))
}

impl fmt::Display for WorkState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Queued => "queued",
			Self::Running => "running",
			Self::Completed => "completed",
			Self::Cancelled => "cancelled",
		})
	}
}

#[cfg(test)]
mod tests {
	use std::cell::RefCell;
	use std::rc::Rc;

	use super::*;

	type Seen = Rc<RefCell<Vec<(u32, WorkOutcome<String>)>>>;

	fn submission(context: u32, execute: Execute<u32, String>) -> (Arc<WorkTicket>, Arc<Wakeup>, BackgroundJob<u32, String>, Box<dyn PendingWork>, Seen) {
		let ticket = Arc::new(WorkTicket::new(WorkId::next()));
		let wakeup = Arc::new(Wakeup::new());
		let seen: Seen = Rc::default();
		let sink = Rc::clone(&seen);
		let complete: Complete<u32, String> = Box::new(move |ctx, outcome| sink.borrow_mut().push((ctx, outcome)));
		let (job, pending) = split(&ticket, &wakeup, context, execute, complete);
		(ticket, wakeup, job, pending, seen)
	}

	#[test]
	fn run_posts_result_and_completes() {
		let (ticket, wakeup, job, pending, seen) = submission(
			1,
			Box::new(|ctx| {
				*ctx += 1;
				Ok("done".to_string())
			}),
		);
		job.run();
		assert_eq!(ticket.state(), WorkState::Completed);
		assert_eq!(wakeup.begin_turn(), vec![ticket.id()]);
		pending.complete().unwrap();
		assert_eq!(*seen.borrow(), vec![(2, WorkOutcome::Ok("done".to_string()))]);
	}

	#[test]
	fn cancel_before_run_skips_execute() {
		let ran = Arc::new(AtomicU8::new(0));
		let flag = Arc::clone(&ran);
		let (ticket, _wakeup, job, pending, seen) = submission(
			7,
			Box::new(move |_| {
				flag.store(1, Ordering::SeqCst);
				Ok(String::new())
			}),
		);
		let item = WorkItem::new(Arc::clone(&ticket));
		item.cancel().unwrap();
		item.cancel().unwrap();
		job.run();
		pending.complete().unwrap();
		assert_eq!(ran.load(Ordering::SeqCst), 0);
		assert_eq!(item.state(), WorkState::Cancelled);
		assert_eq!(*seen.borrow(), vec![(7, WorkOutcome::Cancelled)]);
	}

	#[test]
	fn cancel_after_completion_is_violation() {
		let (ticket, _wakeup, job, _pending, _seen) = submission(0, Box::new(|_| Ok(String::new())));
		job.run();
		assert_eq!(WorkItem::new(ticket).cancel(), Err(ContractViolation::CancelAfterStart));
	}

	#[test]
	fn execute_error_and_panic_become_error_outcomes() {
		let (_ticket, _wakeup, job, pending, seen) = submission(0, Box::new(|_| Err("disk full".to_string())));
		job.run();
		pending.complete().unwrap();
		assert_eq!(seen.borrow()[0].1, WorkOutcome::Error("disk full".to_string()));

		let (ticket, _wakeup, job, pending, seen) = submission(0, Box::new(|_| panic!("exploded")));
		job.run();
		pending.complete().unwrap();
		assert_eq!(ticket.state(), WorkState::Completed);
		assert!(matches!(&seen.borrow()[0].1, WorkOutcome::Error(msg) if msg.contains("exploded")));
	}

	#[test]
	fn dropped_job_completes_as_cancelled() {
		let (ticket, wakeup, job, pending, seen) = submission(3, Box::new(|_| Ok(String::new())));
		drop(job);
		assert_eq!(ticket.state(), WorkState::Cancelled);
		assert_eq!(wakeup.begin_turn(), vec![ticket.id()]);
		pending.complete().unwrap();
		assert_eq!(*seen.borrow(), vec![(3, WorkOutcome::Cancelled)]);
	}

	#[test]
	fn completion_panic_is_reported() {
		let ticket = Arc::new(WorkTicket::new(WorkId::next()));
		let wakeup = Arc::new(Wakeup::new());
		let (job, pending) = split::<u32, u32>(&ticket, &wakeup, 0, Box::new(|_| Ok(1)), Box::new(|_, _| panic!("bad completion")));
		job.run();
		let err = pending.complete().unwrap_err();
		assert!(err.contains("bad completion"));
	}
}
