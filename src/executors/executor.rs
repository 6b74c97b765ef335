use crate::cfg::Config;
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Correlation id assigned to every submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The 32-character lowercase hex form, used for workdirs and log files.
    pub fn hex(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Terminal state of an executor job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Succeeded,
    Failed(i32),
    Terminated,
}

impl JobStatus {
    pub fn success(&self) -> bool {
        matches!(self, JobStatus::Succeeded)
    }
}

/// A command submission.
///
/// `argv` is the full command line. The job environment starts from the OS
/// environment (unless `os_env` is disabled), applies the `env_spec`
/// bootstrap file when one is given, and finally the explicit `env` entries.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub argv: Vec<String>,
    pub name: Option<String>,
    pub env: BTreeMap<String, String>,
    pub os_env: bool,
    pub workdir: Option<PathBuf>,
    pub cpus: Option<u64>,
    pub memory: Option<u64>,
    pub env_spec: Option<PathBuf>,
    pub wait: bool,
}

impl JobRequest {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            name: None,
            env: BTreeMap::new(),
            os_env: true,
            workdir: None,
            cpus: None,
            memory: None,
            env_spec: None,
            wait: false,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Drops the inherited OS environment.
    pub fn no_os_env(mut self) -> Self {
        self.os_env = false;
        self
    }

    pub fn workdir(mut self, path: impl Into<PathBuf>) -> Self {
        self.workdir = Some(path.into());
        self
    }

    pub fn cpus(mut self, cpus: u64) -> Self {
        self.cpus = Some(cpus);
        self
    }

    pub fn memory(mut self, memory: u64) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Bootstraps an isolated environment from a `KEY=VALUE` file before the
    /// command executes.
    pub fn env_spec(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_spec = Some(path.into());
        self
    }

    /// Blocks the submit call until the job reaches a terminal state.
    pub fn wait(mut self) -> Self {
        self.wait = true;
        self
    }
}

/// Backend-agnostic contract for running external commands.
///
/// One executor instance lives inside one hook or runner scope; its jobs
/// live for a single submit/wait cycle.
pub trait Executor: Send {
    /// Submits a job. Returns the terminal status when the request asked to
    /// wait, otherwise `None` and a handle id.
    fn submit(&mut self, request: JobRequest) -> Result<(Option<JobStatus>, JobId)>;

    /// Blocks until every outstanding job reaches a terminal state.
    fn wait(&mut self) -> Result<Vec<(JobId, JobStatus)>>;

    /// Requests termination of all outstanding jobs.
    fn terminate(&mut self);
}

/// Per-scope context handed to executor factories.
#[derive(Debug, Clone)]
pub struct ExecutorScope {
    pub config: Config,
    pub workdir_base: PathBuf,
    pub shutdown: CancellationToken,
}

impl ExecutorScope {
    /// Default workdir for a job: `<executor-root>/<id-hex>`.
    pub fn job_workdir(&self, id: &JobId) -> PathBuf {
        self.workdir_base.join(id.hex())
    }
}

/// Builds a backend instance for one scope. Registered by name through the
/// module registry and selected by `executor.name` at startup.
pub type ExecutorFactory = Arc<dyn Fn(ExecutorScope) -> Result<Box<dyn Executor>> + Send + Sync>;

/// Parses an `env_spec` bootstrap file of `KEY=VALUE` lines.
///
/// Blank lines and `#` comments are skipped; a line without `=` is an error
/// naming the file.
pub fn read_env_spec(path: &Path) -> Result<BTreeMap<String, String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read env spec {}", path.display()))?;
    let mut env = BTreeMap::new();
    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) => {
                env.insert(key.trim().to_string(), value.trim().to_string());
            }
            None => bail!(
                "invalid env spec line {} in {}: '{line}'",
                number + 1,
                path.display()
            ),
        }
    }
    Ok(env)
}
