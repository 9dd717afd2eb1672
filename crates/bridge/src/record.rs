use crate::handle::HandleState;
use crate::id::HandleId;

/// Snapshot of one live callback handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleRecord {
	pub id: HandleId,
	pub name: String,
	pub state: HandleState,
	pub refs: usize,
	pub pending: usize,
	pub peak_pending: usize,
	pub capacity: usize,
	pub delivered: u64,
	pub failures: u64,
	pub keep_alive: bool,
}

impl HandleRecord {
	/// Returns the state as a log-friendly label.
	pub fn state_label(&self) -> &'static str {
		self.state.as_str()
	}
}
