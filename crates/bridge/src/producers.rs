use std::thread::{self, JoinHandle};

use crate::ThreadRole;
use crate::spawn::spawn_named_thread;

/// Caller-owned set of producer threads.
///
/// Dropping the set joins every thread still in it, so no early return leaks a
/// running producer. Do not drop it on the consumer thread while its producers
/// may still be blocked on a full queue that only that thread drains.
#[derive(Debug)]
pub struct ProducerSet<T> {
	prefix: String,
	spawned: usize,
	inner: Vec<JoinHandle<T>>,
}

impl<T> ProducerSet<T>
where
	T: Send + 'static,
{
	/// Creates an empty set. Threads are named `{prefix}-{index}`.
	pub fn new(prefix: impl Into<String>) -> Self {
		Self {
			prefix: prefix.into(),
			spawned: 0,
			inner: Vec::new(),
		}
	}

	/// Returns the number of threads not yet joined.
	pub fn len(&self) -> usize {
		self.inner.len()
	}

	/// Returns `true` if every thread has been joined.
	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	/// Spawns one producer thread into the set.
	pub fn spawn<F>(&mut self, f: F) -> std::io::Result<()>
	where
		F: FnOnce() -> T + Send + 'static,
	{
		let name = format!("{}-{}", self.prefix, self.spawned);
		tracing::trace!(pending = self.inner.len(), thread = %name, "bridge.producers.spawn");
		let handle = spawn_named_thread(ThreadRole::Producer, name, f)?;
		self.spawned += 1;
		self.inner.push(handle);
		Ok(())
	}

	/// Joins every thread in spawn order.
	pub fn join_all(&mut self) -> Vec<thread::Result<T>> {
		self.inner.drain(..).map(JoinHandle::join).collect()
	}
}

impl<T> Drop for ProducerSet<T> {
	fn drop(&mut self) {
		for handle in self.inner.drain(..) {
			let name = handle.thread().name().map(str::to_owned);
			if handle.join().is_err() {
				tracing::warn!(thread = ?name, "bridge.producers.panicked");
			}
		}
	}
}
