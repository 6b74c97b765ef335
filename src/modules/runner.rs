use crate::cfg::Config;
use crate::checkpoint::Checkpoints;
use crate::cleanup::DeferredCleaner;
use crate::data::{OutputSpec, SampleCollection};
use crate::executors::Executor;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

/// Context handed to a runner callable inside its worker.
///
/// The workdir is `<workdir>/<tag>/<runner-label>[/<split-key>]`; the
/// executor, checkpoints, and deferred cleaner are all scoped to it.
pub struct RunnerScope<'a> {
    pub config: &'a Config,
    pub workdir: PathBuf,
    pub split_key: Option<String>,
    pub executor: &'a mut dyn Executor,
    pub checkpoints: &'a Checkpoints,
    pub cleaner: &'a mut DeferredCleaner,
}

pub type RunnerFn =
    Arc<dyn Fn(&mut SampleCollection, &mut RunnerScope<'_>) -> Result<()> + Send + Sync>;

/// A user runner callable with its dispatch metadata: an optional fan-out
/// attribute, declared outputs, and declared checkpoint labels.
#[derive(Clone)]
pub struct RunnerDef {
    label: String,
    split_by: Option<String>,
    outputs: Vec<OutputSpec>,
    checkpoints: Vec<String>,
    func: RunnerFn,
}

impl RunnerDef {
    pub fn new(label: impl Into<String>, func: RunnerFn) -> Self {
        Self {
            label: label.into(),
            split_by: None,
            outputs: Vec::new(),
            checkpoints: Vec::new(),
            func,
        }
    }

    /// Fans the collection out into one shard per distinct value of the
    /// attribute.
    pub fn split_by(mut self, attr: impl Into<String>) -> Self {
        self.split_by = Some(attr.into());
        self
    }

    /// Declares an output to resolve against the workdir when the runner
    /// returns.
    pub fn output(mut self, spec: OutputSpec) -> Self {
        self.outputs.push(spec);
        self
    }

    /// Declares a checkpoint label used by this runner.
    pub fn checkpoint(mut self, label: impl Into<String>) -> Self {
        self.checkpoints.push(label.into());
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn split_attr(&self) -> Option<&str> {
        self.split_by.as_deref()
    }

    pub fn outputs(&self) -> &[OutputSpec] {
        &self.outputs
    }

    pub fn checkpoint_labels(&self) -> &[String] {
        &self.checkpoints
    }

    pub fn func(&self) -> &RunnerFn {
        &self.func
    }
}

impl std::fmt::Debug for RunnerDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerDef")
            .field("label", &self.label)
            .field("split_by", &self.split_by)
            .field("outputs", &self.outputs.len())
            .field("checkpoints", &self.checkpoints)
            .finish_non_exhaustive()
    }
}
