//! Process-parallel runner dispatch.
//!
//! Shards cross into workers as versioned serialized envelopes so no mutable
//! state is shared with the driver; results merge back in dispatch order.

use crate::cfg::Config;
use crate::checkpoint::Checkpoints;
use crate::cleanup::DeferredCleaner;
use crate::data::collection::UNKNOWN_SPLIT_KEY;
use crate::data::{Output, SampleCollection};
use crate::executors::{ExecutorFactory, ExecutorScope};
use crate::modules::registry::Registry;
use crate::modules::runner::{RunnerDef, RunnerScope};
use crate::runtime::telemetry::Telemetry;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

const ENVELOPE_VERSION: u32 = 1;

/// How long workers get to drain after a shutdown request before the
/// dispatcher abandons them.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Serialized form of a shard shipped into a worker.
#[derive(Serialize, Deserialize)]
struct ShardEnvelope {
    version: u32,
    samples: SampleCollection,
}

/// Serialized form of a worker's result shipped back to the driver.
#[derive(Serialize, Deserialize)]
struct ShardResult {
    version: u32,
    samples: SampleCollection,
    outputs: Vec<Output>,
    cleaner: DeferredCleaner,
}

/// What the dispatch phase hands back to the driver.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub samples: SampleCollection,
    pub outputs: Vec<Output>,
    pub cleaners: Vec<DeferredCleaner>,
    pub interrupted: bool,
}

struct ShardJob {
    runner: RunnerDef,
    split_key: Option<String>,
    workdir: PathBuf,
    envelope: Vec<u8>,
}

/// Fans the collection out over all runners and merges the results.
pub async fn start_runners(
    registry: &Registry,
    samples: SampleCollection,
    config: &Config,
    shutdown: CancellationToken,
    telemetry: Arc<Telemetry>,
) -> Result<DispatchOutcome> {
    if samples.is_empty() {
        return Ok(DispatchOutcome {
            samples,
            outputs: Vec::new(),
            cleaners: Vec::new(),
            interrupted: shutdown.is_cancelled(),
        });
    }
    if registry.runners().is_empty() {
        tracing::warn!("No runners to execute");
        return Ok(DispatchOutcome {
            samples,
            outputs: Vec::new(),
            cleaners: Vec::new(),
            interrupted: shutdown.is_cancelled(),
        });
    }

    let factory = registry.executor_factory(config.executor_name())?;
    let mut jobs = Vec::new();
    for runner in registry.runners() {
        for (split_key, shard) in samples.split_by(runner.split_attr()) {
            let mut workdir = config.tag_workdir().join(runner.label());
            if runner.split_attr().is_some() {
                workdir = workdir.join(split_key.as_deref().unwrap_or(UNKNOWN_SPLIT_KEY));
            }
            let envelope = serde_json::to_vec(&ShardEnvelope {
                version: ENVELOPE_VERSION,
                samples: shard,
            })
            .context("serialize shard")?;
            jobs.push(ShardJob {
                runner: runner.clone(),
                split_key,
                workdir,
                envelope,
            });
        }
    }

    let semaphore = Arc::new(Semaphore::new(config.workers()));
    let mut handles = Vec::with_capacity(jobs.len());
    for job in jobs {
        telemetry.record_shard_dispatched();
        handles.push(tokio::spawn(dispatch_shard(
            job,
            config.clone(),
            factory.clone(),
            semaphore.clone(),
            shutdown.clone(),
        )));
    }

    let all = futures::future::join_all(handles);
    tokio::pin!(all);
    let joined = tokio::select! {
        joined = &mut all => joined,
        _ = shutdown.cancelled() => {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut all).await {
                Ok(joined) => joined,
                Err(_) => {
                    tracing::warn!("Shutdown grace period expired; abandoning unfinished runners");
                    Vec::new()
                }
            }
        }
    };

    let mut master = SampleCollection::default();
    let mut outputs = Vec::new();
    let mut cleaners = Vec::new();
    for result in joined.into_iter().flatten().flatten() {
        master.merge(&result.samples, registry.merger());
        outputs.extend(result.outputs);
        cleaners.push(result.cleaner);
    }

    if master.is_empty() {
        master = samples;
    } else {
        master.adopt_missing(&samples);
    }

    Ok(DispatchOutcome {
        samples: master,
        outputs,
        cleaners,
        interrupted: shutdown.is_cancelled(),
    })
}

/// Runs one shard's worker, containing every failure to the shard.
async fn dispatch_shard(
    job: ShardJob,
    config: Config,
    factory: ExecutorFactory,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
) -> Option<ShardResult> {
    let Ok(_permit) = semaphore.acquire_owned().await else {
        return None;
    };
    if shutdown.is_cancelled() {
        return None;
    }

    let label = job.runner.label().to_string();
    let workdir = job.workdir.clone();
    let backup = job.envelope.clone();
    let joined = tokio::task::spawn_blocking(move || run_worker(job, config, factory, shutdown))
        .await;

    match joined {
        Ok(Ok(bytes)) => match serde_json::from_slice::<ShardResult>(&bytes) {
            Ok(result) => Some(result),
            Err(error) => {
                tracing::error!("Unhandled exception when collecting results: {error:#}");
                Some(failed_shard(&backup, &label, &workdir, &error.to_string()))
            }
        },
        Ok(Err(error)) => {
            tracing::error!("Unhandled exception: {error:#}");
            Some(failed_shard(&backup, &label, &workdir, &error.to_string()))
        }
        Err(join_error) if join_error.is_panic() => {
            let message = panic_message(join_error.into_panic().as_ref());
            tracing::error!("Unhandled exception: {message}");
            Some(failed_shard(&backup, &label, &workdir, &message))
        }
        Err(_) => None,
    }
}

/// The worker body: deserializes the shard, builds the scope, invokes the
/// runner, resolves outputs, and serializes the result.
fn run_worker(
    job: ShardJob,
    config: Config,
    factory: ExecutorFactory,
    shutdown: CancellationToken,
) -> Result<Vec<u8>> {
    let span = tracing::info_span!(
        "runner",
        label = %job.runner.label(),
        split = job.split_key.as_deref().unwrap_or("-"),
    );
    let _enter = span.enter();

    let envelope: ShardEnvelope =
        serde_json::from_slice(&job.envelope).context("deserialize shard")?;
    let mut shard = envelope.samples;

    std::fs::create_dir_all(&job.workdir)
        .with_context(|| format!("create workdir {}", job.workdir.display()))?;
    shard.output.extend(job.runner.outputs().iter().cloned());

    let mut executor = factory(ExecutorScope {
        config: config.clone(),
        workdir_base: job.workdir.clone(),
        shutdown,
    })?;
    let checkpoints = Checkpoints::new(&job.workdir);
    let mut cleaner = DeferredCleaner::new(&job.workdir);

    let run = {
        let mut scope = RunnerScope {
            config: &config,
            workdir: job.workdir.clone(),
            split_key: job.split_key.clone(),
            executor: executor.as_mut(),
            checkpoints: &checkpoints,
            cleaner: &mut cleaner,
        };
        (job.runner.func())(&mut shard, &mut scope)
    };

    match run {
        Ok(()) => {
            for sample in shard.iter_mut() {
                if !sample.is_failed() {
                    sample.mark_processed();
                }
            }
        }
        Err(error) => {
            tracing::error!("Unhandled exception: {error:#}");
            shard.output.clear();
            for sample in shard.iter_mut() {
                sample.output.clear();
                sample.fail(format!(
                    "Unhandled exception in runner '{}': {error}",
                    job.runner.label()
                ));
            }
        }
    }

    if let Err(error) = executor.wait() {
        tracing::warn!("failed to drain executor jobs: {error:#}");
    }

    let outputs = resolve_outputs(&shard, &job.workdir, &config);
    log_sample_states(&shard);

    let result = ShardResult {
        version: ENVELOPE_VERSION,
        samples: shard,
        outputs,
        cleaner,
    };
    serde_json::to_vec(&result).context("serialize shard result")
}

/// Resolves the shard's declared outputs against the workdir, for the
/// driver's copy phase. Only non-failed samples contribute.
fn resolve_outputs(shard: &SampleCollection, workdir: &Path, config: &Config) -> Vec<Output> {
    let complete = shard.complete();
    if complete.is_empty() {
        return Vec::new();
    }

    let mut outputs = Vec::new();
    let specs = shard.output.iter().chain(
        shard
            .iter()
            .filter(|s| !s.is_failed())
            .flat_map(|s| s.output.iter()),
    );
    for spec in specs {
        let resolution = spec.resolve(complete.samples(), workdir, config.resultdir());
        for warning in resolution.warnings {
            tracing::warn!("{warning}");
        }
        outputs.extend(resolution.outputs);
    }
    outputs
}

fn log_sample_states(shard: &SampleCollection) {
    for sample in shard {
        match sample.failure() {
            None => tracing::info!("Sample {} processed successfully", sample.id),
            Some(reason) => tracing::error!("Sample {} failed - {reason}", sample.id),
        }
    }
}

/// Reconstructs a shard from its envelope with every sample failed, used
/// when the worker itself errored or panicked.
fn failed_shard(envelope: &[u8], label: &str, workdir: &Path, reason: &str) -> ShardResult {
    let mut samples = match serde_json::from_slice::<ShardEnvelope>(envelope) {
        Ok(envelope) => envelope.samples,
        Err(_) => SampleCollection::default(),
    };
    samples.output.clear();
    for sample in samples.iter_mut() {
        sample.fail(format!("Unhandled exception in runner '{label}': {reason}"));
    }
    log_sample_states(&samples);
    ShardResult {
        version: ENVELOPE_VERSION,
        samples,
        outputs: Vec::new(),
        cleaner: DeferredCleaner::new(workdir),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
