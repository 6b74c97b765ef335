use crate::cfg::Config;
use crate::cleanup::Cleaner;
use crate::data::{Output, SampleCollection};
use crate::executors::ExecutorScope;
use crate::modules::dispatcher::{start_runners, DispatchOutcome};
use crate::modules::hook::{Hook, HookScope};
use crate::modules::registry::{Module, Registry};
use crate::runtime::manifest;
use crate::runtime::telemetry::{init_logging, Telemetry};
use anyhow::Result;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_INTERRUPT: i32 = 130;

/// Marker error distinguishing an interrupt from a framework failure.
#[derive(Debug)]
pub struct Interrupted;

impl std::fmt::Display for Interrupted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run interrupted")
    }
}

impl std::error::Error for Interrupted {}

/// The main driver: composes module loading, hook scheduling, runner
/// dispatch, output staging, and cleanup into one run-to-completion pass.
#[derive(Debug)]
pub struct Pipeline {
    label: String,
    config: Config,
    registry: Registry,
    shutdown: CancellationToken,
    telemetry: Arc<Telemetry>,
}

impl Pipeline {
    /// Loads the modules and freezes the registry.
    ///
    /// Fails on any module-load conflict, an unresolvable hook graph, or an
    /// `executor.name` no backend was registered for.
    pub fn new(
        label: impl Into<String>,
        config: Config,
        modules: impl IntoIterator<Item = Module>,
    ) -> Result<Self> {
        let registry = Registry::load(modules)?;
        registry.executor_factory(config.executor_name())?;
        Ok(Self {
            label: label.into(),
            config,
            registry,
            shutdown: CancellationToken::new(),
            telemetry: Arc::new(Telemetry::default()),
        })
    }

    /// Returns a clone of the root shutdown token so external callers can
    /// integrate their own cancellation strategies.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs the pipeline to completion and returns the final collection.
    ///
    /// User-code failures (hooks, runners, merges, cleanup) are contained and
    /// logged; only framework-structural errors and interrupts surface here.
    pub async fn run(self) -> Result<SampleCollection> {
        init_logging(self.config.log_level(), self.config.log_external());
        let started = Instant::now();
        tracing::info!("Starting {} ({})", self.label, self.config.tag());

        let tag_workdir = self.config.tag_workdir();
        std::fs::create_dir_all(&tag_workdir)?;
        std::fs::create_dir_all(self.config.logdir())?;

        let watcher = {
            let token = self.shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::error!("Received SIGINT, telling runners to shut down...");
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            })
        };

        let mut cleaner = Cleaner::new(&tag_workdir);
        cleaner.register(&tag_workdir);

        tracing::debug!(
            "Found {} hooks",
            self.registry.pre_hooks().len() + self.registry.post_hooks().len()
        );
        tracing::debug!("Found {} runners", self.registry.runners().len());

        let mut samples = match self.config.samples_file() {
            Some(path) => {
                tracing::debug!("Loading samples from {}", path.display());
                manifest::read_samples(path, &self.registry)?
            }
            None => {
                tracing::debug!("No samples file specified, creating an empty collection");
                manifest::empty_samples(&self.registry)?
            }
        };

        for hook in self.registry.pre_hooks() {
            self.run_hook(hook, &mut samples, &mut cleaner);
        }

        for dropped in samples.retain_with_files() {
            tracing::warn!("Sample {} will be skipped as it has no files", dropped.id);
        }
        if samples.is_empty() {
            tracing::info!("No samples to process");
        }

        let DispatchOutcome {
            mut samples,
            outputs,
            cleaners,
            interrupted,
        } = start_runners(
            &self.registry,
            samples,
            &self.config,
            self.shutdown.clone(),
            self.telemetry.clone(),
        )
        .await?;
        for deferred in &cleaners {
            cleaner.absorb(deferred);
        }

        for hook in self.registry.post_hooks() {
            if !hook.run_condition().should_run(&samples) {
                continue;
            }
            self.run_hook(hook, &mut samples, &mut cleaner);
        }

        copy_outputs(&outputs, self.config.resultdir(), &self.telemetry);

        let processed = samples.complete().len();
        let failed = samples.failed().len();
        self.telemetry.record_samples_processed(processed as u64);
        self.telemetry.record_samples_failed(failed as u64);
        if failed > 0 {
            tracing::warn!("{failed} samples failed");
        }

        cleaner.clean();
        watcher.abort();

        if interrupted {
            return Err(Interrupted.into());
        }
        tracing::info!("Execution complete in {:.2?}", started.elapsed());
        Ok(samples)
    }

    /// Runs the pipeline and maps the result to a process exit code, logging
    /// fatal errors the way the run log reports everything else.
    pub async fn execute(self) -> i32 {
        match self.run().await {
            Ok(_) => EXIT_SUCCESS,
            Err(error) if error.is::<Interrupted>() => EXIT_INTERRUPT,
            Err(error) => {
                tracing::error!("Unhandled exception: {error:#}");
                EXIT_FAILURE
            }
        }
    }

    /// Runs one hook in-process, containing any failure to the hook.
    fn run_hook(&self, hook: &Hook, samples: &mut SampleCollection, cleaner: &mut Cleaner) {
        tracing::debug!("Running {} hook", hook.label());
        let span = tracing::info_span!("hook", label = %hook.label());
        let _enter = span.enter();

        let factory = match self.registry.executor_factory(self.config.executor_name()) {
            Ok(factory) => factory,
            Err(error) => {
                tracing::error!("Unhandled exception: {error:#}");
                return;
            }
        };
        let mut executor = match factory(ExecutorScope {
            config: self.config.clone(),
            workdir_base: self.config.tag_workdir(),
            shutdown: self.shutdown.clone(),
        }) {
            Ok(executor) => executor,
            Err(error) => {
                tracing::error!("Unhandled exception: {error:#}");
                return;
            }
        };

        let run = {
            let mut scope = HookScope {
                config: &self.config,
                workdir: self.config.tag_workdir(),
                executor: executor.as_mut(),
                cleaner,
            };
            (hook.func())(samples, &mut scope)
        };
        if let Err(error) = run {
            tracing::error!("Unhandled exception: {error:#}");
        }
        if let Err(error) = executor.wait() {
            tracing::warn!("failed to drain executor jobs: {error:#}");
        }
    }
}

/// Validates and performs the output copy phase.
///
/// Violations (missing source, destination outside the result directory,
/// destination already claimed) are warnings that skip the output; the
/// remainder is copied byte-for-byte, directories recursively.
fn copy_outputs(outputs: &[Output], resultdir: &Path, telemetry: &Telemetry) -> usize {
    let mut pending = Vec::new();
    let mut claimed: BTreeSet<&Path> = BTreeSet::new();
    for output in outputs {
        if !output.src.exists() {
            tracing::warn!("{} does not exist", output.src.display());
            continue;
        }
        if !output.dst.starts_with(resultdir) {
            tracing::warn!(
                "{} is not relative to {}",
                output.dst.display(),
                resultdir.display()
            );
            continue;
        }
        if output.dst.exists() || !claimed.insert(&output.dst) {
            tracing::warn!("{} already exists", output.dst.display());
            continue;
        }
        pending.push(output);
    }

    if pending.is_empty() {
        return 0;
    }
    tracing::info!("Copying {} outputs", pending.len());

    let mut copied = 0usize;
    for output in pending {
        tracing::info!(
            "Copying {} to {}",
            output.src.display(),
            output.dst.display()
        );
        match copy_path(&output.src, &output.dst) {
            Ok(()) => {
                telemetry.record_output_copied();
                copied += 1;
            }
            Err(error) => tracing::error!("{}: {error:#}", output.dst.display()),
        }
    }
    copied
}

fn copy_path(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if src.is_dir() {
        std::fs::create_dir_all(dst)?;
        for entry in std::fs::read_dir(src)? {
            let entry = entry?;
            copy_path(&entry.path(), &dst.join(entry.file_name()))?;
        }
    } else {
        std::fs::copy(src, dst)?;
    }
    Ok(())
}

/// Convenience entry point: validates the raw configuration, loads the
/// modules, runs the pipeline, and maps everything to an exit code.
pub async fn execute(
    label: impl Into<String>,
    config: serde_json::Value,
    modules: impl IntoIterator<Item = Module>,
) -> i32 {
    let config = match Config::from_value(config) {
        Ok(config) => config,
        Err(error) => {
            init_logging("info", false);
            tracing::error!("{error:#}");
            return EXIT_FAILURE;
        }
    };
    init_logging(config.log_level(), config.log_external());
    let pipeline = match Pipeline::new(label, config, modules) {
        Ok(pipeline) => pipeline,
        Err(error) => {
            tracing::error!("{error:#}");
            return EXIT_FAILURE;
        }
    };
    pipeline.execute().await
}
