//! Cross-thread reference count for callback handles.
//!
//! The decrement to zero is the single authoritative close trigger. `acquire`
//! and `release` are the only mutators and neither waits on queue space.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::ContractViolation;

/// Result of one successful [`RefCount::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
	/// Other references are still outstanding.
	Remaining(usize),
	/// This call dropped the count to zero.
	Last,
}

/// Atomic reference count with close tracking.
#[derive(Debug)]
pub struct RefCount {
	count: AtomicUsize,
	closed: AtomicBool,
}

impl RefCount {
	/// Creates a count holding `initial` references.
	pub const fn new(initial: usize) -> Self {
		Self {
			count: AtomicUsize::new(initial),
			closed: AtomicBool::new(initial == 0),
		}
	}

	/// Adds one reference and returns the new count.
	///
	/// Fails once the count reached zero or [`RefCount::close`] was called.
	pub fn acquire(&self) -> Result<usize, ContractViolation> {
		if self.closed.load(Ordering::Acquire) {
			return Err(ContractViolation::AcquireAfterClose);
		}
		let mut current = self.count.load(Ordering::Acquire);
		loop {
			if current == 0 {
				return Err(ContractViolation::AcquireAfterClose);
			}
			match self.count.compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire) {
				Ok(_) => return Ok(current + 1),
				Err(actual) => current = actual,
			}
		}
	}

	/// Drops one reference.
	///
	/// Never decrements below zero: an unmatched release is reported and the
	/// count is left untouched.
	pub fn release(&self) -> Result<Released, ContractViolation> {
		let mut current = self.count.load(Ordering::Acquire);
		loop {
			if current == 0 {
				return Err(ContractViolation::ReleaseUnderflow);
			}
			match self.count.compare_exchange_weak(current, current - 1, Ordering::AcqRel, Ordering::Acquire) {
				Ok(_) if current == 1 => {
					self.closed.store(true, Ordering::Release);
					return Ok(Released::Last);
				}
				Ok(_) => return Ok(Released::Remaining(current - 1)),
				Err(actual) => current = actual,
			}
		}
	}

	/// Refuses further acquires regardless of the count. Returns `true` if this
	/// call closed it.
	pub fn close(&self) -> bool {
		!self.closed.swap(true, Ordering::AcqRel)
	}

	/// Returns `true` once no further acquire can succeed.
	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}

	/// Returns the current count.
	pub fn get(&self) -> usize {
		self.count.load(Ordering::Acquire)
	}
}
