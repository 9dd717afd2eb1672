use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::id::WorkId;

#[derive(Debug, Default)]
struct WakeState {
	notified: bool,
	finished: Vec<WorkId>,
}

/// Park/unpark signal for the consumer thread.
///
/// Producers notify after every successful enqueue and on close; background
/// jobs post their id once a completion is ready.
#[derive(Debug, Default)]
pub(crate) struct Wakeup {
	state: Mutex<WakeState>,
	cond: Condvar,
}

impl Wakeup {
	pub fn new() -> Self {
		Self::default()
	}

	/// Marks work as pending and unparks the consumer.
	pub fn notify(&self) {
		let mut state = self.state.lock();
		state.notified = true;
		drop(state);
		self.cond.notify_one();
	}

	/// Queues a finished work item for completion and unparks the consumer.
	pub fn post_finished(&self, id: WorkId) {
		let mut state = self.state.lock();
		state.finished.push(id);
		state.notified = true;
		drop(state);
		self.cond.notify_one();
	}

	/// Starts one dispatcher turn: clears the pending flag and takes the
	/// finished work ids posted so far.
	///
	/// Anything signalled after this call sets the flag again, so the next
	/// [`Wakeup::park`] returns immediately instead of losing it.
	pub fn begin_turn(&self) -> Vec<WorkId> {
		let mut state = self.state.lock();
		state.notified = false;
		std::mem::take(&mut state.finished)
	}

	/// Parks until notified or until `deadline`. Returns `false` on timeout.
	pub fn park(&self, deadline: Option<Instant>) -> bool {
		let mut state = self.state.lock();
		while !state.notified {
			match deadline {
				None => self.cond.wait(&mut state),
				Some(deadline) => {
					if self.cond.wait_until(&mut state, deadline).timed_out() {
						return state.notified;
					}
				}
			}
		}
		true
	}
}
