//! Error types for the callback bridge.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::id::{HandleId, WorkId};

/// Programmer errors against the bridge contract.
///
/// These are surfaced immediately and never retried by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContractViolation {
	/// `acquire` on a handle that is closing, finalized, or already at zero references.
	#[error("acquire on a handle that is closing or finalized")]
	AcquireAfterClose,
	/// `release` without a matching `acquire`.
	#[error("release without a matching acquire")]
	ReleaseUnderflow,
	/// Blocking enqueue on a full queue from the consumer thread, which is the only drainer.
	#[error("blocking enqueue on a full queue from the consumer thread")]
	BlockingEnqueueOnConsumer,
	/// `cancel` on a work item that is already running or done.
	#[error("cancel on a work item that already left the queue")]
	CancelAfterStart,
}

/// Rejected enqueue. The payload is handed back to the producer, which decides
/// whether to retry or drop it.
#[derive(PartialEq, Eq)]
pub enum EnqueueError<T> {
	/// Bounded queue is full and the enqueue was non-blocking.
	WouldBlock(T),
	/// Handle no longer accepts payloads.
	Closed(T),
	/// Enqueue broke the bridge contract.
	Violation(ContractViolation, T),
}

impl<T> EnqueueError<T> {
	/// Returns the rejected payload.
	pub fn into_inner(self) -> T {
		match self {
			Self::WouldBlock(payload) | Self::Closed(payload) | Self::Violation(_, payload) => payload,
		}
	}

	/// Returns `true` for [`EnqueueError::WouldBlock`].
	pub fn is_would_block(&self) -> bool {
		matches!(self, Self::WouldBlock(_))
	}

	/// Returns `true` for [`EnqueueError::Closed`].
	pub fn is_closed(&self) -> bool {
		matches!(self, Self::Closed(_))
	}
}

impl<T> fmt::Debug for EnqueueError<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::WouldBlock(_) => f.write_str("WouldBlock(..)"),
			Self::Closed(_) => f.write_str("Closed(..)"),
			Self::Violation(violation, _) => write!(f, "Violation({violation:?}, ..)"),
		}
	}
}

impl<T> fmt::Display for EnqueueError<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::WouldBlock(_) => f.write_str("callback queue is full"),
			Self::Closed(_) => f.write_str("callback handle is closing"),
			Self::Violation(violation, _) => write!(f, "contract violation: {violation}"),
		}
	}
}

impl<T> std::error::Error for EnqueueError<T> {}

/// Consumer-side code that failed while the dispatcher ran it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedTarget {
	Callback(HandleId),
	Finalizer(HandleId),
	Completion(WorkId),
}

impl fmt::Display for FailedTarget {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Callback(id) => write!(f, "callback {id}"),
			Self::Finalizer(id) => write!(f, "finalizer {id}"),
			Self::Completion(id) => write!(f, "completion {id}"),
		}
	}
}

/// A registered callback, finalizer, or completion failed on the consumer thread.
///
/// Reported to the dispatcher's error sink; the loop keeps running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{target} `{name}` failed: {message}")]
pub struct InvocationFailure {
	pub target: FailedTarget,
	pub name: String,
	pub message: String,
}

/// Errors that can occur when loading bridge configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// Error parsing TOML.
	#[error("failed to parse bridge config: {0}")]
	Parse(#[from] toml::de::Error),

	/// A value is out of range.
	#[error("invalid bridge config: {0}")]
	Invalid(String),
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
	#[error("contract violation: {0}")]
	Contract(#[from] ContractViolation),

	#[error(transparent)]
	Config(#[from] ConfigError),

	/// The background execution resource could not be started.
	#[error("failed to start background workers: {0}")]
	Runtime(#[source] std::io::Error),
}

/// Result alias for bridge operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
