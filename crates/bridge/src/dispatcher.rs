//! Consumer-thread loop that invokes registered callbacks and completions.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::error::{FailedTarget, InvocationFailure};
use crate::handle::{CallbackHandle, Finalizer, HandleShared, HandleSpec, Target};
use crate::id::{HandleId, WorkId};
use crate::panic::panic_message;
use crate::record::HandleRecord;
use crate::role::ThreadRole;
use crate::wakeup::Wakeup;
use crate::work::PendingWork;

type ErrorSink = Box<dyn FnMut(&InvocationFailure)>;

/// Bounds for one [`Dispatcher::drain`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainBudget {
	/// Wall-clock limit, including time spent parked.
	pub duration: Duration,
	/// Maximum callback invocations plus completions.
	pub max_events: usize,
}

impl Default for DrainBudget {
	fn default() -> Self {
		Self {
			duration: Duration::from_millis(100),
			max_events: usize::MAX,
		}
	}
}

/// Work done by one dispatcher call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
	pub invocations: usize,
	pub completions: usize,
	pub finalized: usize,
	pub failures: usize,
	/// Handles not yet finalized when the call returned.
	pub pending_handles: usize,
	/// Work items whose completion has not run yet.
	pub pending_work: usize,
	pub budget_exhausted: bool,
}

impl DrainReport {
	/// Invocations plus completions.
	pub fn events(&self) -> usize {
		self.invocations + self.completions
	}

	fn is_idle(&self) -> bool {
		self.events() == 0 && self.finalized == 0
	}

	fn absorb(&mut self, step: &Self) {
		self.invocations += step.invocations;
		self.completions += step.completions;
		self.finalized += step.finalized;
		self.failures += step.failures;
	}
}

#[derive(Debug, Clone, Copy, Default)]
struct SlotTurn {
	invoked: usize,
	failed: usize,
	finalized: bool,
}

/// Consumer-side half of a callback handle.
trait Slot {
	fn keeps_alive(&self) -> bool;
	fn service(&mut self, limit: usize, sink: &mut dyn FnMut(&InvocationFailure)) -> SlotTurn;
	fn finalize(self: Box<Self>) -> Result<(), InvocationFailure>;
	fn abort(&self);
	fn record(&self) -> HandleRecord;
}

struct HandleSlot<T> {
	shared: Arc<HandleShared<T>>,
	target: Target<T>,
	finalizer: Option<Finalizer>,
	delivered: u64,
	failures: u64,
}

impl<T> Slot for HandleSlot<T> {
	fn keeps_alive(&self) -> bool {
		self.shared.keeps_alive()
	}

	fn service(&mut self, limit: usize, sink: &mut dyn FnMut(&InvocationFailure)) -> SlotTurn {
		let mut turn = SlotTurn::default();
		// Payloads that arrive while this runs wait for the next turn.
		let ready = self.shared.pending().min(limit);
		while turn.invoked < ready {
			let Some(payload) = self.shared.pop() else {
				break;
			};
			turn.invoked += 1;
			self.delivered += 1;
			let message = match panic::catch_unwind(AssertUnwindSafe(|| (self.target)(payload))) {
				Ok(Ok(())) => continue,
				Ok(Err(message)) => message,
				Err(payload) => panic_message(&*payload),
			};
			turn.failed += 1;
			self.failures += 1;
			sink(&InvocationFailure {
				target: FailedTarget::Callback(self.shared.id()),
				name: self.shared.name().to_string(),
				message,
			});
		}
		turn.finalized = self.shared.try_finalize();
		turn
	}

	fn finalize(self: Box<Self>) -> Result<(), InvocationFailure> {
		let Self {
			shared, target, finalizer, ..
		} = *self;
		// The target is released before the finalizer observes the handle as gone.
		drop(target);
		tracing::debug!(handle = %shared.id(), name = %shared.name(), "bridge.handle.finalize");
		let Some(finalizer) = finalizer else {
			return Ok(());
		};
		panic::catch_unwind(AssertUnwindSafe(finalizer)).map_err(|payload| InvocationFailure {
			target: FailedTarget::Finalizer(shared.id()),
			name: shared.name().to_string(),
			message: panic_message(&*payload),
		})
	}

	fn abort(&self) {
		self.shared.abort();
	}

	fn record(&self) -> HandleRecord {
		HandleRecord {
			id: self.shared.id(),
			name: self.shared.name().to_string(),
			state: self.shared.state(),
			refs: self.shared.refs(),
			pending: self.shared.pending(),
			peak_pending: self.shared.peak(),
			capacity: self.shared.capacity(),
			delivered: self.delivered,
			failures: self.failures,
			keep_alive: self.shared.keeps_alive(),
		}
	}
}

/// Single-threaded loop owned by the consumer thread.
///
/// Every callback registered through [`Dispatcher::create`] and every
/// completion submitted through [`WorkScheduler::submit`](crate::WorkScheduler::submit)
/// runs here, one at a time, on the thread that created the dispatcher. The
/// dispatcher is `!Send`, so it cannot migrate to another thread.
///
/// Dropping the dispatcher closes every remaining handle without delivering
/// its queue; blocked producers return [`EnqueueError::Closed`](crate::EnqueueError::Closed).
pub struct Dispatcher {
	consumer: ThreadId,
	wakeup: Arc<Wakeup>,
	slots: Vec<Box<dyn Slot>>,
	work: HashMap<WorkId, Box<dyn PendingWork>>,
	ready: VecDeque<WorkId>,
	sink: ErrorSink,
}

impl Default for Dispatcher {
	fn default() -> Self {
		Self::new()
	}
}

impl Dispatcher {
	/// Creates a dispatcher bound to the current thread.
	pub fn new() -> Self {
		let current = thread::current();
		tracing::trace!(thread_role = ThreadRole::Consumer.as_str(), thread = ?current.name(), "bridge.dispatcher.bind");
		Self {
			consumer: current.id(),
			wakeup: Arc::new(Wakeup::new()),
			slots: Vec::new(),
			work: HashMap::new(),
			ready: VecDeque::new(),
			sink: Box::new(|failure| {
				tracing::error!(failed = %failure.target, name = %failure.name, error = %failure.message, "bridge.invoke.failed");
			}),
		}
	}

	/// Returns the consumer thread.
	pub fn consumer(&self) -> ThreadId {
		self.consumer
	}

	/// Replaces the sink receiving callback, finalizer, and completion failures.
	pub fn set_error_sink(&mut self, sink: impl FnMut(&InvocationFailure) + 'static) {
		self.sink = Box::new(sink);
	}

	/// Registers a callback and returns the creator's reference to it.
	pub fn create<T>(&mut self, spec: HandleSpec<T>) -> CallbackHandle<T>
	where
		T: Send + 'static,
	{
		let shared = Arc::new(HandleShared::new(HandleId::next(), &spec, self.consumer, Arc::clone(&self.wakeup)));
		tracing::debug!(
			handle = %shared.id(),
			name = %shared.name(),
			capacity = spec.capacity,
			mode = ?spec.mode,
			keep_alive = spec.keep_alive,
			"bridge.handle.create"
		);
		self.slots.push(Box::new(HandleSlot {
			shared: Arc::clone(&shared),
			target: spec.target,
			finalizer: spec.finalizer,
			delivered: 0,
			failures: 0,
		}));
		CallbackHandle::from_shared(shared)
	}

	pub(crate) fn wakeup(&self) -> &Arc<Wakeup> {
		&self.wakeup
	}

	pub(crate) fn register_work(&mut self, id: WorkId, pending: Box<dyn PendingWork>) {
		self.work.insert(id, pending);
	}

	/// Runs one pass over every handle and every posted completion without parking.
	pub fn turn(&mut self) -> DrainReport {
		let mut report = self.step(usize::MAX);
		self.fill_pending(&mut report);
		report
	}

	/// Runs turns until the budget is spent or nothing keeps the loop alive,
	/// parking while idle.
	pub fn drain(&mut self, budget: DrainBudget) -> DrainReport {
		// `None` when the duration overflows: the event limit alone bounds the call.
		let deadline = Instant::now().checked_add(budget.duration);
		let expired = || deadline.is_some_and(|deadline| Instant::now() >= deadline);
		let mut report = DrainReport::default();
		while report.events() < budget.max_events {
			let step = self.step(budget.max_events - report.events());
			report.absorb(&step);
			if !self.is_live() || expired() {
				break;
			}
			if step.is_idle() && self.ready.is_empty() && !self.wakeup.park(deadline) {
				break;
			}
		}
		self.fill_pending(&mut report);
		report.budget_exhausted = report.events() >= budget.max_events || expired();
		report
	}

	/// Runs until no keep-alive handle and no outstanding work remain.
	///
	/// Parks only while nothing is pending. Must not be waited on by the
	/// producers it is draining.
	pub fn run(&mut self) -> DrainReport {
		let mut report = DrainReport::default();
		loop {
			let step = self.step(usize::MAX);
			report.absorb(&step);
			if !self.is_live() {
				break;
			}
			if step.is_idle() && self.ready.is_empty() {
				self.wakeup.park(None);
			}
		}
		self.fill_pending(&mut report);
		report
	}

	/// Returns snapshots of live handles sorted by name.
	pub fn snapshots(&self) -> Vec<HandleRecord> {
		let mut records: Vec<_> = self.slots.iter().map(|slot| slot.record()).collect();
		records.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
		records
	}

	/// Returns the number of handles not yet finalized.
	pub fn live_handles(&self) -> usize {
		self.slots.len()
	}

	/// Returns the number of submitted items whose completion has not run.
	pub fn pending_work(&self) -> usize {
		self.work.len()
	}

	fn is_live(&self) -> bool {
		!self.work.is_empty() || self.slots.iter().any(|slot| slot.keeps_alive())
	}

	fn fill_pending(&self, report: &mut DrainReport) {
		report.pending_handles = self.slots.len();
		report.pending_work = self.work.len();
	}

	fn step(&mut self, limit: usize) -> DrainReport {
		let mut report = DrainReport::default();
		self.ready.extend(self.wakeup.begin_turn());

		let mut index = 0;
		while index < self.slots.len() {
			let remaining = limit.saturating_sub(report.events());
			let turn = self.slots[index].service(remaining, &mut *self.sink);
			report.invocations += turn.invoked;
			report.failures += turn.failed;
			if !turn.finalized {
				index += 1;
				continue;
			}
			let slot = self.slots.remove(index);
			report.finalized += 1;
			if let Err(failure) = slot.finalize() {
				report.failures += 1;
				(self.sink)(&failure);
			}
		}

		while report.events() < limit {
			let Some(id) = self.ready.pop_front() else {
				break;
			};
			let Some(pending) = self.work.remove(&id) else {
				tracing::warn!(work = %id, "bridge.work.unknown");
				continue;
			};
			report.completions += 1;
			tracing::trace!(work = %id, "bridge.work.complete");
			if let Err(message) = pending.complete() {
				report.failures += 1;
				(self.sink)(&InvocationFailure {
					target: FailedTarget::Completion(id),
					name: id.to_string(),
					message,
				});
			}
		}
		report
	}
}

impl Drop for Dispatcher {
	fn drop(&mut self) {
		if self.slots.is_empty() && self.work.is_empty() {
			return;
		}
		tracing::debug!(handles = self.slots.len(), "bridge.dispatcher.drop");
		for slot in &self.slots {
			slot.abort();
		}
		for id in self.work.keys() {
			tracing::warn!(work = %id, "bridge.work.abandoned");
		}
	}
}

#[cfg(test)]
mod tests {
	use std::cell::{Cell, RefCell};
	use std::rc::Rc;

	use super::*;
	use crate::handle::{EnqueueMode, HandleState};

	#[test]
	fn delivers_in_order_then_finalizes_once() {
		let mut dispatcher = Dispatcher::new();
		let seen = Rc::new(RefCell::new(Vec::new()));
		let finalized = Rc::new(Cell::new(0));
		let sink = Rc::clone(&seen);
		let fin = Rc::clone(&finalized);
		let handle = dispatcher.create(
			HandleSpec::new("ordered", move |n: u32| sink.borrow_mut().push(n)).on_finalize(move || fin.set(fin.get() + 1)),
		);
		for n in 0..10 {
			handle.enqueue(n).unwrap();
		}
		handle.release().unwrap();
		let report = dispatcher.run();
		assert_eq!(*seen.borrow(), (0..10).collect::<Vec<_>>());
		assert_eq!(finalized.get(), 1);
		assert_eq!(report.invocations, 10);
		assert_eq!(report.finalized, 1);
		assert_eq!(dispatcher.live_handles(), 0);
		dispatcher.turn();
		assert_eq!(finalized.get(), 1);
	}

	#[test]
	fn failures_are_reported_and_loop_continues() {
		let mut dispatcher = Dispatcher::new();
		let failures = Rc::new(RefCell::new(Vec::new()));
		let sink = Rc::clone(&failures);
		dispatcher.set_error_sink(move |failure| sink.borrow_mut().push(failure.clone()));

		let delivered = Rc::new(Cell::new(0));
		let count = Rc::clone(&delivered);
		let handle = dispatcher.create(HandleSpec::fallible("flaky", move |n: u32| {
			count.set(count.get() + 1);
			match n {
				1 => Err("odd payload"),
				2 => panic!("payload two"),
				_ => Ok(()),
			}
		}));
		for n in 0..4 {
			handle.enqueue(n).unwrap();
		}
		let report = dispatcher.turn();
		assert_eq!(report.invocations, 4);
		assert_eq!(report.failures, 2);
		assert_eq!(delivered.get(), 4);

		let failures = failures.borrow();
		assert_eq!(failures.len(), 2);
		assert_eq!(failures[0].target, FailedTarget::Callback(handle.id()));
		assert_eq!(failures[0].message, "odd payload");
		assert!(failures[1].message.contains("payload two"));
		assert_eq!(handle.state(), HandleState::Active);
		assert_eq!(dispatcher.snapshots()[0].failures, 2);
	}

	#[test]
	fn finalizer_panic_is_reported() {
		let mut dispatcher = Dispatcher::new();
		let failures = Rc::new(Cell::new(0));
		let sink = Rc::clone(&failures);
		dispatcher.set_error_sink(move |failure| {
			assert!(matches!(failure.target, FailedTarget::Finalizer(_)));
			sink.set(sink.get() + 1);
		});
		let handle = dispatcher.create(HandleSpec::new("fin", |_: ()| {}).on_finalize(|| panic!("finalizer boom")));
		handle.release().unwrap();
		let report = dispatcher.turn();
		assert_eq!(report.finalized, 1);
		assert_eq!(failures.get(), 1);
	}

	#[test]
	fn turn_budget_leaves_remaining_payloads_queued() {
		let mut dispatcher = Dispatcher::new();
		let seen = Rc::new(Cell::new(0));
		let count = Rc::clone(&seen);
		let handle = dispatcher.create(HandleSpec::new("budget", move |_: u8| count.set(count.get() + 1)));
		for n in 0..5 {
			handle.enqueue(n).unwrap();
		}
		let report = dispatcher.drain(DrainBudget {
			duration: Duration::from_secs(1),
			max_events: 3,
		});
		assert_eq!(report.invocations, 3);
		assert!(report.budget_exhausted);
		assert_eq!(handle.pending(), 2);

		let report = dispatcher.drain(DrainBudget {
			duration: Duration::from_millis(20),
			max_events: 0,
		});
		assert_eq!(report.invocations, 0);
		assert_eq!(report.pending_handles, 1);
		assert_eq!(seen.get(), 3);
	}

	#[test]
	fn unref_handle_does_not_keep_run_alive() {
		let mut dispatcher = Dispatcher::new();
		let handle = dispatcher.create(HandleSpec::new("background", |_: u8| {}).keep_alive(false));
		let report = dispatcher.run();
		assert_eq!(report.pending_handles, 1);
		assert_eq!(handle.state(), HandleState::Active);

		handle.set_keep_alive(true);
		let snapshot = dispatcher.snapshots();
		assert!(snapshot[0].keep_alive);
		assert_eq!(snapshot[0].state_label(), "active");
	}

	#[test]
	fn consumer_may_enqueue_to_itself_without_blocking() {
		let mut dispatcher = Dispatcher::new();
		let slot: Rc<RefCell<Option<CallbackHandle<u32>>>> = Rc::default();
		let inner = Rc::clone(&slot);
		let seen = Rc::new(RefCell::new(Vec::new()));
		let sink = Rc::clone(&seen);
		let handle = dispatcher.create(
			HandleSpec::new("echo", move |n: u32| {
				sink.borrow_mut().push(n);
				if n < 3
					&& let Some(handle) = inner.borrow().as_ref()
				{
					handle.enqueue_with(n + 1, EnqueueMode::NonBlocking).unwrap();
				}
			})
			.capacity(1),
		);
		*slot.borrow_mut() = Some(handle.acquire().unwrap());
		handle.enqueue(0).unwrap();
		handle.release().unwrap();

		for _ in 0..4 {
			dispatcher.turn();
		}
		assert_eq!(*seen.borrow(), vec![0, 1, 2, 3]);
		// Releasing the last reference lets the handle finalize.
		slot.borrow_mut().take();
		dispatcher.run();
		assert_eq!(dispatcher.live_handles(), 0);
	}

	#[test]
	fn drop_closes_remaining_handles() {
		let mut dispatcher = Dispatcher::new();
		let handle = dispatcher.create(HandleSpec::new("orphan", |_: u8| {}).mode(EnqueueMode::NonBlocking));
		handle.enqueue(1).unwrap();
		drop(dispatcher);
		assert_eq!(handle.state(), HandleState::Closing);
		assert!(handle.enqueue(2).unwrap_err().is_closed());
	}

	#[test]
	fn drop_abandons_pending_completions() {
		let mut dispatcher = Dispatcher::new();
		let ticket = Arc::new(crate::work::WorkTicket::new(WorkId::next()));
		let completed = Rc::new(Cell::new(false));
		let flag = Rc::clone(&completed);
		let (job, pending) = crate::work::split::<u8, u8>(
			&ticket,
			dispatcher.wakeup(),
			0,
			Box::new(|_| Ok(1)),
			Box::new(move |_, _| flag.set(true)),
		);
		dispatcher.register_work(ticket.id(), pending);
		assert_eq!(dispatcher.pending_work(), 1);
		drop(dispatcher);
		// The job still finishes; its outcome has nowhere to go.
		job.run();
		assert!(!completed.get());
	}

	#[test]
	fn unbounded_drain_duration_is_limited_by_events() {
		let mut dispatcher = Dispatcher::new();
		let handle = dispatcher.create(HandleSpec::new("forever", |_: u8| {}));
		for n in 0..4 {
			handle.enqueue(n).unwrap();
		}
		let report = dispatcher.drain(DrainBudget {
			duration: Duration::MAX,
			max_events: 4,
		});
		assert_eq!(report.invocations, 4);
		assert!(report.budget_exhausted);
		assert_eq!(handle.pending(), 0);
	}
}
