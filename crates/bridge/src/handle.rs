//! Reference-counted producer side of a registered callback.
//!
//! A [`CallbackHandle`] is one counted reference to a FIFO of pending
//! payloads. The callback itself stays on the consumer side inside the
//! [`Dispatcher`](crate::Dispatcher); producers only ever touch the queue.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use serde::Deserialize;

use crate::config::HandleConfig;
use crate::error::{ContractViolation, EnqueueError};
use crate::id::HandleId;
use crate::refcount::{RefCount, Released};
use crate::wakeup::Wakeup;

/// Behavior of an enqueue against a full bounded queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueMode {
	/// Wait for space or for the handle to close.
	#[default]
	Blocking,
	/// Return [`EnqueueError::WouldBlock`] immediately.
	NonBlocking,
}

/// Lifecycle of a callback handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
	/// Accepting payloads.
	Active,
	/// No longer accepting payloads; the dispatcher is draining what is queued.
	Closing,
	/// Drained and finalized. No further invocations happen.
	Finalized,
}

impl HandleState {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Active => "active",
			Self::Closing => "closing",
			Self::Finalized => "finalized",
		}
	}
}

pub(crate) type Target<T> = Box<dyn FnMut(T) -> Result<(), String>>;
pub(crate) type Finalizer = Box<dyn FnOnce()>;

/// Consumer-side description of a callback handle, passed to
/// [`Dispatcher::create`](crate::Dispatcher::create).
///
/// The target and finalizer never leave the consumer thread, so they need not
/// be `Send`.
pub struct HandleSpec<T> {
	pub(crate) name: String,
	pub(crate) capacity: usize,
	pub(crate) mode: EnqueueMode,
	pub(crate) keep_alive: bool,
	pub(crate) target: Target<T>,
	pub(crate) finalizer: Option<Finalizer>,
}

impl<T> HandleSpec<T>
where
	T: Send + 'static,
{
	/// Creates a spec for a callback that cannot fail.
	pub fn new(name: impl Into<String>, mut target: impl FnMut(T) + 'static) -> Self {
		Self::from_target(
			name.into(),
			Box::new(move |payload| {
				target(payload);
				Ok(())
			}),
		)
	}

	/// Creates a spec for a callback whose errors are reported to the
	/// dispatcher's error sink.
	pub fn fallible<E>(name: impl Into<String>, mut target: impl FnMut(T) -> Result<(), E> + 'static) -> Self
	where
		E: fmt::Display,
	{
		Self::from_target(name.into(), Box::new(move |payload| target(payload).map_err(|e| e.to_string())))
	}

	fn from_target(name: String, target: Target<T>) -> Self {
		Self {
			name,
			capacity: 0,
			mode: EnqueueMode::default(),
			keep_alive: true,
			target,
			finalizer: None,
		}
	}

	/// Bounds the queue. `0` means unbounded.
	#[must_use]
	pub fn capacity(mut self, capacity: usize) -> Self {
		self.capacity = capacity;
		self
	}

	/// Sets the default full-queue behavior of [`CallbackHandle::enqueue`].
	#[must_use]
	pub fn mode(mut self, mode: EnqueueMode) -> Self {
		self.mode = mode;
		self
	}

	/// Takes capacity and mode from configuration.
	#[must_use]
	pub fn with_config(self, config: &HandleConfig) -> Self {
		self.capacity(config.capacity).mode(config.mode)
	}

	/// Whether [`Dispatcher::run`](crate::Dispatcher::run) waits for this handle.
	#[must_use]
	pub fn keep_alive(mut self, keep_alive: bool) -> Self {
		self.keep_alive = keep_alive;
		self
	}

	/// Runs `finalizer` once on the consumer thread after the handle drains.
	#[must_use]
	pub fn on_finalize(mut self, finalizer: impl FnOnce() + 'static) -> Self {
		self.finalizer = Some(Box::new(finalizer));
		self
	}
}

struct QueueState<T> {
	queue: VecDeque<T>,
	state: HandleState,
	peak: usize,
}

pub(crate) struct HandleShared<T> {
	id: HandleId,
	name: String,
	capacity: usize,
	mode: EnqueueMode,
	consumer: ThreadId,
	refs: RefCount,
	keep_alive: AtomicBool,
	queue: Mutex<QueueState<T>>,
	not_full: Condvar,
	wakeup: Arc<Wakeup>,
}

impl<T> HandleShared<T> {
	pub fn new(id: HandleId, spec: &HandleSpec<T>, consumer: ThreadId, wakeup: Arc<Wakeup>) -> Self {
		Self {
			id,
			name: spec.name.clone(),
			capacity: spec.capacity,
			mode: spec.mode,
			consumer,
			refs: RefCount::new(1),
			keep_alive: AtomicBool::new(spec.keep_alive),
			queue: Mutex::new(QueueState {
				queue: VecDeque::new(),
				state: HandleState::Active,
				peak: 0,
			}),
			not_full: Condvar::new(),
			wakeup,
		}
	}

	pub fn id(&self) -> HandleId {
		self.id
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub fn refs(&self) -> usize {
		self.refs.get()
	}

	pub fn keeps_alive(&self) -> bool {
		self.keep_alive.load(Ordering::Acquire)
	}

	pub fn state(&self) -> HandleState {
		self.queue.lock().state
	}

	pub fn pending(&self) -> usize {
		self.queue.lock().queue.len()
	}

	pub fn peak(&self) -> usize {
		self.queue.lock().peak
	}

	fn push(&self, payload: T, mode: EnqueueMode) -> Result<(), EnqueueError<T>> {
		let mut state = self.queue.lock();
		loop {
			if state.state != HandleState::Active {
				return Err(EnqueueError::Closed(payload));
			}
			if self.capacity == 0 || state.queue.len() < self.capacity {
				state.queue.push_back(payload);
				state.peak = state.peak.max(state.queue.len());
				drop(state);
				self.wakeup.notify();
				return Ok(());
			}
			match mode {
				EnqueueMode::NonBlocking => {
					tracing::trace!(handle = %self.id, name = %self.name, capacity = self.capacity, "bridge.enqueue.full");
					return Err(EnqueueError::WouldBlock(payload));
				}
				EnqueueMode::Blocking => {
					// Only the consumer drains, so waiting here would never wake.
					if thread::current().id() == self.consumer {
						return Err(EnqueueError::Violation(ContractViolation::BlockingEnqueueOnConsumer, payload));
					}
					self.not_full.wait(&mut state);
				}
			}
		}
	}

	/// Pops the head payload. Consumer thread only.
	pub fn pop(&self) -> Option<T> {
		let mut state = self.queue.lock();
		let payload = state.queue.pop_front();
		drop(state);
		if payload.is_some() && self.capacity > 0 {
			self.not_full.notify_one();
		}
		payload
	}

	/// Moves an active handle to `Closing`, waking blocked producers and the consumer.
	pub fn close(&self, reason: &'static str) {
		let mut state = self.queue.lock();
		if state.state != HandleState::Active {
			return;
		}
		state.state = HandleState::Closing;
		let pending = state.queue.len();
		drop(state);
		tracing::debug!(handle = %self.id, name = %self.name, pending, reason, "bridge.handle.close");
		self.not_full.notify_all();
		self.wakeup.notify();
	}

	/// Closes immediately regardless of outstanding references.
	pub fn abort(&self) {
		self.refs.close();
		self.close("aborted");
	}

	/// Moves a drained `Closing` handle to `Finalized`. Returns `true` on the transition.
	pub fn try_finalize(&self) -> bool {
		let mut state = self.queue.lock();
		if state.state == HandleState::Closing && state.queue.is_empty() {
			state.state = HandleState::Finalized;
			true
		} else {
			false
		}
	}

	fn release_ref(&self) -> Result<(), ContractViolation> {
		match self.refs.release()? {
			Released::Remaining(_) => Ok(()),
			Released::Last => {
				self.close("released");
				Ok(())
			}
		}
	}
}

/// One counted reference to a registered callback's queue.
///
/// Producers obtain their own reference with [`CallbackHandle::acquire`]
/// before producing and give it back with [`CallbackHandle::release`].
/// Dropping a handle releases it. When the last reference is released the
/// handle closes, the dispatcher delivers everything already queued, then runs
/// the finalizer.
pub struct CallbackHandle<T>
where
	T: Send + 'static,
{
	shared: Arc<HandleShared<T>>,
	released: bool,
}

impl<T> CallbackHandle<T>
where
	T: Send + 'static,
{
	pub(crate) fn from_shared(shared: Arc<HandleShared<T>>) -> Self {
		Self { shared, released: false }
	}

	/// Takes another reference for a producer.
	pub fn acquire(&self) -> Result<Self, ContractViolation> {
		self.shared.refs.acquire()?;
		Ok(Self::from_shared(Arc::clone(&self.shared)))
	}

	/// Gives this reference back.
	pub fn release(mut self) -> Result<(), ContractViolation> {
		self.released = true;
		self.shared.release_ref()
	}

	/// Enqueues with the handle's configured [`EnqueueMode`].
	pub fn enqueue(&self, payload: T) -> Result<(), EnqueueError<T>> {
		self.shared.push(payload, self.shared.mode)
	}

	/// Enqueues with an explicit [`EnqueueMode`].
	pub fn enqueue_with(&self, payload: T, mode: EnqueueMode) -> Result<(), EnqueueError<T>> {
		self.shared.push(payload, mode)
	}

	/// Non-blocking enqueue.
	pub fn try_enqueue(&self, payload: T) -> Result<(), EnqueueError<T>> {
		self.shared.push(payload, EnqueueMode::NonBlocking)
	}

	/// Stops accepting payloads now, even with references outstanding.
	///
	/// Blocked producers return [`EnqueueError::Closed`]. Payloads already
	/// queued are still delivered before the finalizer runs.
	pub fn abort(&self) {
		self.shared.abort();
	}

	/// Sets whether [`Dispatcher::run`](crate::Dispatcher::run) waits for this handle.
	pub fn set_keep_alive(&self, keep_alive: bool) {
		self.shared.keep_alive.store(keep_alive, Ordering::Release);
		self.shared.wakeup.notify();
	}

	pub fn id(&self) -> HandleId {
		self.shared.id
	}

	pub fn name(&self) -> &str {
		&self.shared.name
	}

	pub fn state(&self) -> HandleState {
		self.shared.state()
	}

	/// Returns the number of outstanding references.
	pub fn refs(&self) -> usize {
		self.shared.refs()
	}

	/// Returns the number of queued payloads.
	pub fn pending(&self) -> usize {
		self.shared.pending()
	}

	/// Returns the largest queue length observed so far.
	pub fn peak_pending(&self) -> usize {
		self.shared.peak()
	}

	/// Returns the queue bound, `0` when unbounded.
	pub fn capacity(&self) -> usize {
		self.shared.capacity
	}

	pub fn mode(&self) -> EnqueueMode {
		self.shared.mode
	}
}

impl<T> Drop for CallbackHandle<T>
where
	T: Send + 'static,
{
	fn drop(&mut self) {
		if self.released {
			return;
		}
		if let Err(err) = self.shared.release_ref() {
			tracing::error!(handle = %self.shared.id, name = %self.shared.name, %err, "bridge.handle.drop");
		}
	}
}

impl<T> fmt::Debug for CallbackHandle<T>
where
	T: Send + 'static,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CallbackHandle")
			.field("id", &self.shared.id)
			.field("name", &self.shared.name)
			.field("capacity", &self.shared.capacity)
			.field("mode", &self.shared.mode)
			.field("refs", &self.shared.refs())
			.finish_non_exhaustive()
	}
}
