use super::executor::{read_env_spec, Executor, ExecutorScope, JobId, JobRequest, JobStatus};
use anyhow::{bail, Context, Result};
use std::fs::File;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// Name under which the built-in backend is registered.
pub const SUBPROCESS_EXECUTOR_NAME: &str = "subprocess";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The built-in local backend: jobs are child processes of the worker.
///
/// Stdout and stderr are captured to `<logdir>/subprocess/<id-hex>.{out,err}`.
/// Termination (explicit or via the scope's cancellation token) kills the
/// children.
pub struct SubprocessExecutor {
    scope: ExecutorScope,
    logdir: PathBuf,
    running: Vec<(JobId, Child)>,
}

impl SubprocessExecutor {
    pub fn new(scope: ExecutorScope) -> Result<Self> {
        let logdir = scope.config.logdir().join(SUBPROCESS_EXECUTOR_NAME);
        std::fs::create_dir_all(&logdir)
            .with_context(|| format!("create log directory {}", logdir.display()))?;
        Ok(Self {
            scope,
            logdir,
            running: Vec::new(),
        })
    }

    fn spawn(&self, request: &JobRequest, id: &JobId) -> Result<Child> {
        let Some((program, args)) = request.argv.split_first() else {
            bail!("cannot submit an empty command line");
        };

        let workdir = request
            .workdir
            .clone()
            .unwrap_or_else(|| self.scope.job_workdir(id));
        std::fs::create_dir_all(&workdir)
            .with_context(|| format!("create job workdir {}", workdir.display()))?;

        let stdout = File::create(self.logdir.join(format!("{}.out", id.hex())))?;
        let stderr = File::create(self.logdir.join(format!("{}.err", id.hex())))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&workdir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);

        if !request.os_env {
            command.env_clear();
        }
        if let Some(spec) = &request.env_spec {
            for (key, value) in read_env_spec(spec)? {
                command.env(key, value);
            }
        }
        command.envs(&request.env);
        command.env(
            "CELLOPHANE_CPUS",
            request.cpus.unwrap_or(self.scope.config.executor_cpus()).to_string(),
        );
        command.env(
            "CELLOPHANE_MEMORY",
            request
                .memory
                .unwrap_or(self.scope.config.executor_memory())
                .to_string(),
        );

        let child = command
            .spawn()
            .with_context(|| format!("spawn '{program}'"))?;
        tracing::debug!(job = %id, pid = child.id(), "started child process");
        Ok(child)
    }

    /// Polls a child to completion, killing it when the scope is cancelled.
    fn wait_terminal(&self, id: &JobId, child: &mut Child) -> Result<JobStatus> {
        loop {
            if self.scope.shutdown.is_cancelled() {
                return Ok(kill_child(id, child));
            }
            match child.try_wait()? {
                Some(status) => return Ok(status_of(status)),
                None => std::thread::sleep(POLL_INTERVAL),
            }
        }
    }
}

impl Executor for SubprocessExecutor {
    fn submit(&mut self, request: JobRequest) -> Result<(Option<JobStatus>, JobId)> {
        let id = JobId::new();
        let mut child = self.spawn(&request, &id)?;

        if request.wait {
            let status = self.wait_terminal(&id, &mut child)?;
            tracing::debug!(job = %id, ?status, "job completed");
            Ok((Some(status), id))
        } else {
            self.running.push((id, child));
            Ok((None, id))
        }
    }

    fn wait(&mut self) -> Result<Vec<(JobId, JobStatus)>> {
        let mut statuses = Vec::new();
        for (id, mut child) in std::mem::take(&mut self.running) {
            let status = self.wait_terminal(&id, &mut child)?;
            tracing::debug!(job = %id, ?status, "job completed");
            statuses.push((id, status));
        }
        Ok(statuses)
    }

    fn terminate(&mut self) {
        for (id, mut child) in std::mem::take(&mut self.running) {
            kill_child(&id, &mut child);
        }
    }
}

fn kill_child(id: &JobId, child: &mut Child) -> JobStatus {
    tracing::warn!(job = %id, pid = child.id(), "terminating job");
    if let Err(error) = child.kill() {
        tracing::debug!(job = %id, %error, "job already exited");
    }
    let _ = child.wait();
    JobStatus::Terminated
}

fn status_of(status: std::process::ExitStatus) -> JobStatus {
    match status.code() {
        Some(0) => JobStatus::Succeeded,
        Some(code) => JobStatus::Failed(code),
        None => JobStatus::Terminated,
    }
}
