use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static LOGGING_INIT: OnceLock<()> = OnceLock::new();

/// Installs the tracing subscriber (if one is not already active).
///
/// `RUST_LOG` takes precedence over the configured level; `external` adds
/// target and thread information for correlating external tool output.
/// Calling this function multiple times is harmless.
pub fn init_logging(level: &str, external: bool) {
    if LOGGING_INIT.get().is_some() {
        return;
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(external)
        .with_thread_ids(external)
        .try_init();

    let _ = LOGGING_INIT.set(());
}

/// Lightweight rolling counters describing one run.
#[derive(Default, Debug)]
pub struct Telemetry {
    samples_processed: AtomicU64,
    samples_failed: AtomicU64,
    shards_dispatched: AtomicU64,
    outputs_copied: AtomicU64,
}

impl Telemetry {
    pub fn record_samples_processed(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.samples_processed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_samples_failed(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.samples_failed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_shard_dispatched(&self) {
        self.shards_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_output_copied(&self) {
        self.outputs_copied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            samples_processed: self.samples_processed.load(Ordering::Relaxed),
            samples_failed: self.samples_failed.load(Ordering::Relaxed),
            shards_dispatched: self.shards_dispatched.load(Ordering::Relaxed),
            outputs_copied: self.outputs_copied.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the run counters.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub samples_processed: u64,
    pub samples_failed: u64,
    pub shards_dispatched: u64,
    pub outputs_copied: u64,
}
