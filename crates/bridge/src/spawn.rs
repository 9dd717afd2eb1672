use tokio::runtime::Runtime;

use crate::ThreadRole;

/// Spawns a dedicated named OS thread tagged with its bridge role.
pub fn spawn_named_thread<F, R>(role: ThreadRole, name: impl Into<String>, f: F) -> std::io::Result<std::thread::JoinHandle<R>>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	let name = name.into();
	tracing::trace!(thread_role = role.as_str(), thread = %name, "bridge.spawn_thread");
	std::thread::Builder::new().name(name).spawn(f)
}

/// Builds the runtime whose blocking pool runs execute phases.
///
/// At most `workers` execute phases run at once; the rest wait in the pool's
/// own queue, which is where a queued item can still be cancelled.
pub(crate) fn background_runtime(workers: usize, thread_name: &str) -> std::io::Result<Runtime> {
	tracing::trace!(thread_role = ThreadRole::Background.as_str(), workers, thread = thread_name, "bridge.spawn_pool");
	tokio::runtime::Builder::new_multi_thread()
		.worker_threads(1)
		.max_blocking_threads(workers)
		.thread_name(thread_name)
		.build()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn named_thread_carries_name() {
		let handle = spawn_named_thread(ThreadRole::Producer, "bridge-test-producer", || {
			std::thread::current().name().map(str::to_owned)
		})
		.unwrap();
		assert_eq!(handle.join().unwrap().as_deref(), Some("bridge-test-producer"));
	}

	#[test]
	fn background_runtime_caps_blocking_pool() {
		let runtime = background_runtime(2, "bridge-test-pool").unwrap();
		let value = runtime.block_on(runtime.spawn_blocking(|| 21 * 2)).unwrap();
		assert_eq!(value, 42);
	}
}
