//! Cross-thread callback bridge and one-shot background work scheduler.
//!
//! Any number of producer threads deliver payloads to one consumer thread,
//! which alone invokes the registered callbacks:
//! * [`CallbackHandle`]: reference-counted, optionally bounded FIFO bound to one callback
//! * [`Dispatcher`]: the consumer thread's loop that invokes callbacks, finalizers, and completions
//! * [`WorkScheduler`]: runs an execute phase on a background pool and delivers its completion on the consumer thread
//! * [`ProducerSet`]: caller-owned producer threads joined on drop
//!
//! ```no_run
//! use callbridge::{Dispatcher, HandleSpec};
//!
//! let mut dispatcher = Dispatcher::new();
//! let handle = dispatcher.create(HandleSpec::new("events", |n: u32| println!("{n}")));
//! let producer = handle.acquire().unwrap();
//! std::thread::spawn(move || {
//! 	for n in 0..5 {
//! 		let _ = producer.enqueue(n);
//! 	}
//! 	let _ = producer.release();
//! });
//! handle.release().unwrap();
//! dispatcher.run();
//! ```

mod config;
mod dispatcher;
mod error;
mod handle;
mod id;
mod panic;
mod producers;
mod record;
mod refcount;
mod role;
mod scheduler;
mod spawn;
mod wakeup;
mod work;

pub use config::{BridgeConfig, DEFAULT_WORKERS, HandleConfig, SchedulerConfig};
pub use dispatcher::{Dispatcher, DrainBudget, DrainReport};
pub use error::{ConfigError, ContractViolation, EnqueueError, Error, FailedTarget, InvocationFailure, Result};
pub use handle::{CallbackHandle, EnqueueMode, HandleSpec, HandleState};
pub use id::{HandleId, WorkId};
pub use panic::panic_message;
pub use producers::ProducerSet;
pub use record::HandleRecord;
pub use refcount::{RefCount, Released};
pub use role::ThreadRole;
pub use scheduler::WorkScheduler;
pub use spawn::spawn_named_thread;
pub use work::{WorkItem, WorkOutcome, WorkState, WorkStatus};
