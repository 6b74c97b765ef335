use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

const DEFAULT_EXECUTOR_NAME: &str = "subprocess";
const DEFAULT_EXECUTOR_CPUS: u64 = 1;
const DEFAULT_EXECUTOR_MEMORY: u64 = 2_000_000_000;
const DEFAULT_WORKERS: usize = 4;
const DEFAULT_LOG_LEVEL: &str = "info";
const TAG_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Validated pipeline configuration.
///
/// All instances must be constructed via [`Config::builder`] or
/// [`Config::from_value`] so invariants are validated before any consumer
/// observes the values. The raw mapping is preserved so user modules can read
/// their own keys through [`Config::get`] and [`Config::get_as`].
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    workdir: PathBuf,
    resultdir: PathBuf,
    logdir: PathBuf,
    tag: String,
    samples_file: Option<PathBuf>,
    executor_name: String,
    executor_cpus: u64,
    executor_memory: u64,
    workers: usize,
    log_level: String,
    log_external: bool,
    raw: Value,
}

impl Config {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Constructs a configuration from a raw JSON mapping.
    ///
    /// Recognized keys are extracted and validated; unrecognized keys are kept
    /// in the raw mapping for dotted-path access by user modules.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(ref mapping) = value else {
            bail!("configuration must be a mapping");
        };

        let workdir = lookup(mapping, "workdir")
            .map(value_to_path)
            .transpose()?
            .context("workdir is required")?;
        let resultdir = lookup(mapping, "resultdir")
            .map(value_to_path)
            .transpose()?
            .unwrap_or_else(|| workdir.join("results"));
        let logdir = lookup(mapping, "logdir")
            .map(value_to_path)
            .transpose()?
            .unwrap_or_else(|| workdir.join("logs"));
        let tag = match lookup(mapping, "tag") {
            Some(value) => value_to_string(value, "tag")?,
            None => default_tag(),
        };
        let samples_file = lookup(mapping, "samples_file").map(value_to_path).transpose()?;
        let executor_name = match lookup(mapping, "executor.name") {
            Some(value) => value_to_string(value, "executor.name")?,
            None => DEFAULT_EXECUTOR_NAME.to_string(),
        };
        let executor_cpus = match lookup(mapping, "executor.cpus") {
            Some(value) => value_to_u64(value, "executor.cpus")?,
            None => DEFAULT_EXECUTOR_CPUS,
        };
        let executor_memory = match lookup(mapping, "executor.memory") {
            Some(value) => value_to_u64(value, "executor.memory")?,
            None => DEFAULT_EXECUTOR_MEMORY,
        };
        let workers = match lookup(mapping, "workers") {
            Some(value) => value_to_u64(value, "workers")? as usize,
            None => DEFAULT_WORKERS,
        };
        let log_level = match lookup(mapping, "log.level") {
            Some(value) => value_to_string(value, "log.level")?,
            None => DEFAULT_LOG_LEVEL.to_string(),
        };
        let log_external = match lookup(mapping, "log.external") {
            Some(Value::Bool(flag)) => *flag,
            Some(other) => bail!("log.external must be a boolean, got {other}"),
            None => false,
        };

        let config = Self {
            workdir,
            resultdir,
            logdir,
            tag,
            samples_file,
            executor_name,
            executor_cpus,
            executor_memory,
            workers,
            log_level,
            log_external,
            raw: value,
        };
        config.validate()?;
        Ok(config)
    }

    /// Root working directory for the run.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Directory outputs are copied into.
    pub fn resultdir(&self) -> &Path {
        &self.resultdir
    }

    /// Directory log files are written to.
    pub fn logdir(&self) -> &Path {
        &self.logdir
    }

    /// Tag naming this run's workspace under the workdir.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Workspace root for this run (`<workdir>/<tag>`).
    pub fn tag_workdir(&self) -> PathBuf {
        self.workdir.join(&self.tag)
    }

    /// Path to the samples manifest, if one was configured.
    pub fn samples_file(&self) -> Option<&Path> {
        self.samples_file.as_deref()
    }

    /// Name of the executor backend selected for this run.
    pub fn executor_name(&self) -> &str {
        &self.executor_name
    }

    /// CPU hint passed to submitted jobs.
    pub fn executor_cpus(&self) -> u64 {
        self.executor_cpus
    }

    /// Memory hint (bytes) passed to submitted jobs.
    pub fn executor_memory(&self) -> u64 {
        self.executor_memory
    }

    /// Maximum number of concurrently dispatched runner shards.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Log level filter used when the driver installs the subscriber.
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Whether logs from external tools are included in the output.
    pub fn log_external(&self) -> bool {
        self.log_external
    }

    /// Looks up a value by dotted path in the raw mapping.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let Value::Object(ref mapping) = self.raw else {
            return None;
        };
        lookup(mapping, path)
    }

    /// Looks up a value by dotted path and deserializes it.
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        self.get(path)
            .map(|value| {
                serde_json::from_value(value.clone())
                    .with_context(|| format!("invalid value for '{path}'"))
            })
            .transpose()
    }

    fn validate(&self) -> Result<()> {
        if self.workdir.as_os_str().is_empty() {
            bail!("workdir cannot be empty");
        }
        if self.tag.trim().is_empty() {
            bail!("tag cannot be empty");
        }
        if self.executor_name.trim().is_empty() {
            bail!("executor.name cannot be empty");
        }
        if self.executor_cpus == 0 {
            bail!("executor.cpus must be greater than 0");
        }
        if self.executor_memory == 0 {
            bail!("executor.memory must be greater than 0");
        }
        if self.workers == 0 {
            bail!("workers must be greater than 0");
        }
        Ok(())
    }
}

/// Resolves a dotted path against a JSON mapping.
///
/// `executor.name` matches both a nested `{"executor": {"name": ...}}` entry
/// and a flat `"executor.name"` key, nested taking precedence.
fn lookup<'a>(mapping: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut current = mapping;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            return current.get(segment).or_else(|| mapping.get(path));
        }
        match current.get(segment) {
            Some(Value::Object(nested)) => current = nested,
            _ => return mapping.get(path),
        }
    }
    None
}

fn value_to_path(value: &Value) -> Result<PathBuf> {
    match value {
        Value::String(s) if !s.is_empty() => Ok(PathBuf::from(s)),
        other => bail!("expected a non-empty path, got {other}"),
    }
}

fn value_to_string(value: &Value, key: &str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => bail!("{key} must be a string, got {other}"),
    }
}

fn value_to_u64(value: &Value, key: &str) -> Result<u64> {
    value
        .as_u64()
        .with_context(|| format!("{key} must be a non-negative integer, got {value}"))
}

fn default_tag() -> String {
    chrono::Local::now().format(TAG_FORMAT).to_string()
}

/// Incrementally constructs a [`Config`], mirroring the raw-mapping path.
#[derive(Debug, Default, Clone)]
pub struct ConfigBuilder {
    mapping: Map<String, Value>,
}

impl ConfigBuilder {
    pub fn workdir(self, path: impl Into<PathBuf>) -> Self {
        self.set_path("workdir", path)
    }

    pub fn resultdir(self, path: impl Into<PathBuf>) -> Self {
        self.set_path("resultdir", path)
    }

    pub fn logdir(self, path: impl Into<PathBuf>) -> Self {
        self.set_path("logdir", path)
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.mapping.insert("tag".into(), Value::String(tag.into()));
        self
    }

    pub fn samples_file(self, path: impl Into<PathBuf>) -> Self {
        self.set_path("samples_file", path)
    }

    pub fn executor_name(mut self, name: impl Into<String>) -> Self {
        self.mapping
            .insert("executor.name".into(), Value::String(name.into()));
        self
    }

    pub fn executor_cpus(mut self, cpus: u64) -> Self {
        self.mapping.insert("executor.cpus".into(), cpus.into());
        self
    }

    pub fn executor_memory(mut self, memory: u64) -> Self {
        self.mapping.insert("executor.memory".into(), memory.into());
        self
    }

    pub fn workers(mut self, workers: u64) -> Self {
        self.mapping.insert("workers".into(), workers.into());
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.mapping
            .insert("log.level".into(), Value::String(level.into()));
        self
    }

    pub fn log_external(mut self, external: bool) -> Self {
        self.mapping.insert("log.external".into(), external.into());
        self
    }

    /// Sets an arbitrary key, for values consumed by user modules.
    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.mapping.insert(key.into(), value);
        self
    }

    pub fn build(self) -> Result<Config> {
        Config::from_value(Value::Object(self.mapping))
    }

    fn set_path(mut self, key: &str, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.mapping.insert(
            key.to_string(),
            Value::String(path.to_string_lossy().into_owned()),
        );
        self
    }
}
