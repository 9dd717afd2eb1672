/// Thread roles used for bridge thread naming and log classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadRole {
	/// The one thread that owns the dispatcher and runs every callback.
	Consumer,
	/// Caller-created threads that enqueue payloads.
	Producer,
	/// Pool threads running execute phases of submitted work.
	Background,
}

impl ThreadRole {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Consumer => "consumer",
			Self::Producer => "producer",
			Self::Background => "background",
		}
	}
}
