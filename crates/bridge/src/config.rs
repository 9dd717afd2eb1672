//! Bridge configuration.
//!
//! Queue capacity, enqueue mode, and background worker count are inputs, not
//! constants. Every field has a default so an empty document is valid.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::handle::EnqueueMode;

/// Default size of the background pool.
pub const DEFAULT_WORKERS: usize = 4;

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
	pub handle: HandleConfig,
	pub scheduler: SchedulerConfig,
}

/// Defaults applied to callback handles created with
/// [`HandleSpec::with_config`](crate::HandleSpec::with_config).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HandleConfig {
	/// Queue bound, `0` for unbounded.
	pub capacity: usize,
	/// Full-queue behavior.
	pub mode: EnqueueMode,
}

/// Background execution resource settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
	/// Maximum number of execute phases running at once.
	pub workers: usize,
	/// Name given to pool threads.
	pub thread_name: String,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			workers: DEFAULT_WORKERS,
			thread_name: "callbridge-work".to_string(),
		}
	}
}

impl BridgeConfig {
	/// Parses and validates a TOML document.
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads, parses, and validates a TOML file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let input = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml_str(&input)
	}

	/// Rejects values the bridge cannot run with.
	pub fn validate(&self) -> Result<(), ConfigError> {
		self.scheduler.validate()
	}
}

impl SchedulerConfig {
	/// Rejects values the scheduler cannot run with.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.workers == 0 {
			return Err(ConfigError::Invalid("scheduler.workers must be > 0".to_string()));
		}
		if self.thread_name.is_empty() {
			return Err(ConfigError::Invalid("scheduler.thread_name must not be empty".to_string()));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use super::*;

	#[test]
	fn empty_document_uses_defaults() {
		let config = BridgeConfig::from_toml_str("").unwrap();
		assert_eq!(config, BridgeConfig::default());
		assert_eq!(config.handle.capacity, 0);
		assert_eq!(config.handle.mode, EnqueueMode::Blocking);
		assert_eq!(config.scheduler.workers, DEFAULT_WORKERS);
	}

	#[test]
	fn parses_all_sections() {
		let config = BridgeConfig::from_toml_str(
			r#"
			[handle]
			capacity = 1
			mode = "non_blocking"

			[scheduler]
			workers = 2
			thread_name = "uv-pool"
			"#,
		)
		.unwrap();
		assert_eq!(config.handle.capacity, 1);
		assert_eq!(config.handle.mode, EnqueueMode::NonBlocking);
		assert_eq!(config.scheduler.workers, 2);
		assert_eq!(config.scheduler.thread_name, "uv-pool");
	}

	#[test]
	fn unknown_field_is_rejected() {
		let err = BridgeConfig::from_toml_str("[handle]\ncapacty = 3\n").unwrap_err();
		assert!(matches!(err, ConfigError::Parse(_)), "got {err}");
	}

	#[test]
	fn zero_workers_is_invalid() {
		let err = BridgeConfig::from_toml_str("[scheduler]\nworkers = 0\n").unwrap_err();
		assert!(matches!(err, ConfigError::Invalid(_)), "got {err}");
	}

	#[test]
	fn load_reads_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "[handle]\ncapacity = 8").unwrap();
		let config = BridgeConfig::load(file.path()).unwrap();
		assert_eq!(config.handle.capacity, 8);
	}

	#[test]
	fn load_reports_missing_file() {
		let dir = tempfile::tempdir().unwrap();
		let err = BridgeConfig::load(dir.path().join("missing.toml")).unwrap_err();
		assert!(matches!(err, ConfigError::Io { .. }), "got {err}");
	}
}
