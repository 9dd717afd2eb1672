use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic id clock shared by every dispatcher in the process.
#[derive(Debug, Default)]
pub(crate) struct IdClock {
	next: AtomicU64,
}

impl IdClock {
	/// Creates a new clock whose first id is 1.
	pub const fn new() -> Self {
		Self { next: AtomicU64::new(0) }
	}

	/// Returns the next id.
	pub fn next(&self) -> u64 {
		self.next.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
	}
}

static HANDLE_IDS: IdClock = IdClock::new();
static WORK_IDS: IdClock = IdClock::new();

/// Identifier of one callback handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
	pub(crate) fn next() -> Self {
		Self(HANDLE_IDS.next())
	}

	/// Returns the raw id.
	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for HandleId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "h{}", self.0)
	}
}

/// Identifier of one submitted work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkId(u64);

impl WorkId {
	pub(crate) fn next() -> Self {
		Self(WORK_IDS.next())
	}

	/// Returns the raw id.
	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for WorkId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "w{}", self.0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn clock_starts_at_one_and_increases() {
		let clock = IdClock::new();
		assert_eq!(clock.next(), 1);
		assert_eq!(clock.next(), 2);
		assert_eq!(clock.next(), 3);
	}

	#[test]
	fn ids_are_unique_across_kinds() {
		let a = HandleId::next();
		let b = HandleId::next();
		assert!(b > a);
		assert_eq!(format!("{}", WorkId(7)), "w7");
		assert_eq!(format!("{}", HandleId(3)), "h3");
	}
}
