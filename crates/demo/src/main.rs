//! Callbridge demo harness.
//!
//! Replays two scenarios against the bridge:
//! - producer threads delivering numbered events to one consumer callback
//! - background work reporting progress through a handle before completing

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use callbridge::{BridgeConfig, CallbackHandle, Dispatcher, HandleSpec, ProducerSet, WorkOutcome, WorkScheduler};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use tracing::info;

/// Demo command line arguments.
#[derive(Parser, Debug)]
#[command(name = "callbridge-demo")]
#[command(about = "Drives producer threads and background work through a callback bridge")]
struct Args {
	/// TOML configuration file
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Scenario to run
	#[arg(short, long, value_enum, default_value_t = Scenario::Both)]
	scenario: Scenario,

	/// Number of producer threads
	#[arg(long)]
	producers: Option<usize>,

	/// Events per producer, or progress steps per work item
	#[arg(long)]
	iterations: Option<u32>,

	/// Delay between events in milliseconds
	#[arg(long)]
	interval_ms: Option<u64>,

	/// Queue bound, 0 for unbounded
	#[arg(long)]
	capacity: Option<usize>,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
	Threads,
	Work,
	Both,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DemoConfig {
	bridge: BridgeConfig,
	producers: usize,
	iterations: u32,
	interval_ms: u64,
}

impl Default for DemoConfig {
	fn default() -> Self {
		Self {
			bridge: BridgeConfig::default(),
			producers: 5,
			iterations: 5,
			interval_ms: 10,
		}
	}
}

impl DemoConfig {
	fn load(args: &Args) -> anyhow::Result<Self> {
		let mut config = match &args.config {
			Some(path) => {
				let input = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
				toml::from_str::<Self>(&input).with_context(|| format!("parsing {}", path.display()))?
			}
			None => Self::default(),
		};
		if let Some(producers) = args.producers {
			config.producers = producers;
		}
		if let Some(iterations) = args.iterations {
			config.iterations = iterations;
		}
		if let Some(interval_ms) = args.interval_ms {
			config.interval_ms = interval_ms;
		}
		if let Some(capacity) = args.capacity {
			config.bridge.handle.capacity = capacity;
		}
		config.bridge.validate()?;
		Ok(config)
	}

	fn interval(&self) -> Duration {
		Duration::from_millis(self.interval_ms)
	}
}

#[derive(Debug, Clone)]
struct Event {
	id: u32,
	message: String,
}

impl Event {
	fn new(id: u32, producer: usize) -> Self {
		Self {
			id,
			message: format!("producer {producer}"),
		}
	}
}

fn main() -> anyhow::Result<()> {
	let args = Args::parse();
	setup_tracing(args.verbose);

	let config = DemoConfig::load(&args)?;
	info!(scenario = ?args.scenario, producers = config.producers, iterations = config.iterations, "starting callbridge-demo");

	if matches!(args.scenario, Scenario::Threads | Scenario::Both) {
		run_threads(&config)?;
	}
	if matches!(args.scenario, Scenario::Work | Scenario::Both) {
		run_work(&config)?;
	}
	Ok(())
}

fn run_threads(config: &DemoConfig) -> anyhow::Result<()> {
	let mut dispatcher = Dispatcher::new();
	let handle = dispatcher.create(
		HandleSpec::new("events", |event: Event| info!(id = event.id, message = %event.message, "event"))
			.with_config(&config.bridge.handle)
			.on_finalize(|| info!("finish")),
	);

	let mut producers = ProducerSet::new("demo-producer");
	for producer in 0..config.producers {
		// Acquired here so the handle cannot close before the thread starts.
		let reference = handle.acquire()?;
		let iterations = config.iterations;
		let interval = config.interval();
		producers.spawn(move || {
			for n in 0..iterations {
				let event = Event::new(n, producer);
				if let Err(err) = reference.enqueue(event) {
					tracing::warn!(producer, %err, "enqueue failed");
					break;
				}
				std::thread::sleep(interval);
			}
		})?;
	}
	handle.release()?;

	let report = dispatcher.run();
	info!(
		invocations = report.invocations,
		failures = report.failures,
		finalized = report.finalized,
		"threads scenario done"
	);
	for result in producers.join_all() {
		if result.is_err() {
			anyhow::bail!("producer thread panicked");
		}
	}
	Ok(())
}

struct WorkContext {
	progress: Option<CallbackHandle<u32>>,
	steps: u32,
	interval: Duration,
}

fn run_work(config: &DemoConfig) -> anyhow::Result<()> {
	let scheduler = WorkScheduler::new(&config.bridge.scheduler)?;
	let mut dispatcher = Dispatcher::new();

	let progress = dispatcher.create(
		HandleSpec::new("progress", |step: u32| info!(step, "progress"))
			.with_config(&config.bridge.handle)
			.on_finalize(|| info!("progress finished")),
	);

	let item = scheduler.submit(
		&mut dispatcher,
		|ctx: &mut WorkContext| {
			let Some(progress) = ctx.progress.as_ref() else {
				return Err("progress handle missing".to_string());
			};
			for step in 0..ctx.steps {
				progress.enqueue(step).map_err(|e| e.to_string())?;
				std::thread::sleep(ctx.interval);
			}
			Ok("done")
		},
		|mut ctx: WorkContext, outcome: WorkOutcome<&'static str>| {
			match outcome {
				WorkOutcome::Ok(result) => info!(result, "work completed"),
				WorkOutcome::Cancelled => info!("work cancelled"),
				WorkOutcome::Error(message) => tracing::error!(%message, "work failed"),
			}
			// Releasing the progress reference lets its handle finalize.
			ctx.progress.take();
		},
		WorkContext {
			progress: Some(progress),
			steps: config.iterations,
			interval: config.interval(),
		},
	);
	info!(work = %item.id(), workers = scheduler.workers(), "submitted");

	let report = dispatcher.run();
	info!(
		invocations = report.invocations,
		completions = report.completions,
		state = %item.state(),
		"work scenario done"
	);
	Ok(())
}

fn setup_tracing(verbose: bool) {
	use std::fs::OpenOptions;

	use tracing_subscriber::EnvFilter;
	use tracing_subscriber::prelude::*;

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		if verbose {
			EnvFilter::new("callbridge=trace,debug")
		} else {
			EnvFilter::new("callbridge=debug,info")
		}
	});

	// Support CALLBRIDGE_LOG_DIR for capturing runs to disk
	if let Some(log_dir) = std::env::var("CALLBRIDGE_LOG_DIR").ok().map(PathBuf::from)
		&& std::fs::create_dir_all(&log_dir).is_ok()
	{
		let log_path = log_dir.join(format!("callbridge-demo.{}.log", std::process::id()));
		if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
			let file_layer = tracing_subscriber::fmt::layer().with_writer(file).with_ansi(false).with_target(true);
			tracing_subscriber::registry().with(filter).with(file_layer).init();
			tracing::info!(path = ?log_path, "demo tracing initialized");
			return;
		}
	}

	tracing_subscriber::registry()
		.with(filter)
		.with(tracing_subscriber::fmt::layer().with_thread_names(true))
		.init();
}
