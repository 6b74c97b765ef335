use crate::data::output::OutputSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Ordered attribute bag carried by samples and collections.
///
/// Values are plain JSON so user attributes survive the serialization
/// boundary between the driver and runner workers.
pub type AttrBag = serde_json::Map<String, Value>;

/// Terminal state of a sample, derived from its failure and processed flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleState {
    Pending,
    Complete,
    Failed(String),
}

/// The unit of work.
///
/// A sample has an id (not necessarily unique within a collection), a list of
/// input files, a user-extensible attribute bag, and an accumulated set of
/// declared outputs. The `uuid` is assigned at construction and preserved
/// across serialization; it is the identity used when shards are merged back
/// into the master collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub id: String,
    #[serde(default)]
    pub files: Vec<PathBuf>,
    uuid: Uuid,
    #[serde(default)]
    pub meta: AttrBag,
    #[serde(default)]
    processed: bool,
    #[serde(default)]
    fail: Option<String>,
    #[serde(default)]
    pub output: BTreeSet<OutputSpec>,
}

impl Sample {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            files: Vec::new(),
            uuid: Uuid::new_v4(),
            meta: AttrBag::new(),
            processed: false,
            fail: None,
            output: BTreeSet::new(),
        }
    }

    pub fn with_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.meta.get(key)
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: Value) {
        self.meta.insert(key.into(), value);
    }

    /// Marks the sample as failed. The failure is monotonic: a later
    /// `mark_processed` never clears it.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.fail = Some(reason.into());
    }

    /// Marks the sample as having been processed by a runner.
    pub fn mark_processed(&mut self) {
        self.processed = true;
    }

    pub fn processed(&self) -> bool {
        self.processed
    }

    /// The effective failure reason, if any.
    ///
    /// A sample that was never processed reports "Sample was not processed"
    /// so a run with no runners (or an abandoned shard) surfaces as failed.
    pub fn failure(&self) -> Option<String> {
        match (&self.fail, self.processed) {
            (Some(reason), _) => Some(reason.clone()),
            (None, false) => Some("Sample was not processed".to_string()),
            (None, true) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.fail.is_some()
    }

    pub fn state(&self) -> SampleState {
        match (&self.fail, self.processed) {
            (Some(reason), _) => SampleState::Failed(reason.clone()),
            (None, true) => SampleState::Complete,
            (None, false) => SampleState::Pending,
        }
    }

    /// Whether every input file of the sample exists on disk.
    pub fn has_files(&self) -> bool {
        !self.files.is_empty() && self.files.iter().all(|f| Path::new(f).exists())
    }

    pub(crate) fn merge_structural(&mut self, other: &Sample) {
        for file in &other.files {
            if !self.files.contains(file) {
                self.files.push(file.clone());
            }
        }
        self.processed = self.processed && other.processed;
        self.fail = match (self.fail.take(), other.fail.clone()) {
            (Some(this), Some(that)) if this != that => Some(format!("{this}\n{that}")),
            (this, that) => this.or(that),
        };
        self.output.extend(other.output.iter().cloned());
    }
}
