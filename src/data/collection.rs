use crate::data::merge::{AttrScope, Merger};
use crate::data::output::OutputSpec;
use crate::data::sample::{AttrBag, Sample};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Key under which samples with a nil or absent split attribute are grouped.
pub const UNKNOWN_SPLIT_KEY: &str = "unknown";

/// An ordered aggregate of samples.
///
/// Collections carry their own attribute bag and output set, and a `call_id`
/// naming the shard when the collection was produced by a split. They are
/// created from the manifest, then repeatedly split, shipped to workers, and
/// merged during dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleCollection {
    samples: Vec<Sample>,
    #[serde(default)]
    pub meta: AttrBag,
    #[serde(default)]
    pub output: BTreeSet<OutputSpec>,
    #[serde(default)]
    call_id: Option<String>,
}

impl SampleCollection {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self {
            samples,
            ..Self::default()
        }
    }

    /// An empty collection sharing this one's collection-level state.
    pub fn clone_empty(&self) -> Self {
        Self {
            samples: Vec::new(),
            meta: self.meta.clone(),
            output: self.output.clone(),
            call_id: None,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Sample> {
        self.samples.iter_mut()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }

    pub fn set_call_id(&mut self, call_id: impl Into<String>) {
        self.call_id = Some(call_id.into());
    }

    pub fn unique_ids(&self) -> BTreeSet<String> {
        self.samples.iter().map(|s| s.id.clone()).collect()
    }

    pub fn contains_uuid(&self, uuid: Uuid) -> bool {
        self.samples.iter().any(|s| s.uuid() == uuid)
    }

    pub fn get_by_uuid_mut(&mut self, uuid: Uuid) -> Option<&mut Sample> {
        self.samples.iter_mut().find(|s| s.uuid() == uuid)
    }

    /// Partitions the collection by an attribute value.
    ///
    /// Shards keep first-occurrence order; samples whose value is nil or
    /// absent bucket under [`UNKNOWN_SPLIT_KEY`]. With `None` the whole
    /// collection is a single untagged shard. Every sample lands in exactly
    /// one shard.
    pub fn split_by(&self, attr: Option<&str>) -> Vec<(Option<String>, SampleCollection)> {
        let Some(attr) = attr else {
            return vec![(None, self.clone())];
        };

        let mut keys: Vec<String> = Vec::new();
        let mut groups: Vec<Vec<Sample>> = Vec::new();
        for sample in &self.samples {
            let key = split_key(sample.attr(attr));
            match keys.iter().position(|k| *k == key) {
                Some(index) => groups[index].push(sample.clone()),
                None => {
                    keys.push(key);
                    groups.push(vec![sample.clone()]);
                }
            }
        }

        keys.into_iter()
            .zip(groups)
            .map(|(key, samples)| {
                let mut shard = self.clone_empty();
                shard.samples = samples;
                shard.call_id = Some(key.clone());
                (Some(key), shard)
            })
            .collect()
    }

    /// Samples not failed and not left unprocessed.
    pub fn complete(&self) -> SampleCollection {
        self.filtered(|s| s.failure().is_none())
    }

    /// Samples with an effective failure.
    pub fn failed(&self) -> SampleCollection {
        self.filtered(|s| s.failure().is_some())
    }

    /// Samples whose input files all exist.
    pub fn with_files(&self) -> SampleCollection {
        self.filtered(Sample::has_files)
    }

    /// Retains only samples whose input files all exist, returning the
    /// dropped samples.
    pub fn retain_with_files(&mut self) -> Vec<Sample> {
        let mut dropped = Vec::new();
        self.samples.retain(|sample| {
            if sample.has_files() {
                true
            } else {
                dropped.push(sample.clone());
                false
            }
        });
        dropped
    }

    /// Appends samples from `other` whose uuid is not present here.
    pub fn adopt_missing(&mut self, other: &SampleCollection) {
        for sample in &other.samples {
            if !self.contains_uuid(sample.uuid()) {
                self.samples.push(sample.clone());
            }
        }
    }

    /// Merges a returned shard into this collection.
    ///
    /// Samples are matched by uuid and merged attribute-wise through the
    /// registry; unmatched samples are appended. Collection-level attributes
    /// merge the same way, outputs union. A failing merge function is logged
    /// and leaves the attribute on the `this` side.
    pub fn merge(&mut self, other: &SampleCollection, merger: &Merger) {
        for sample in &other.samples {
            match self.get_by_uuid_mut(sample.uuid()) {
                Some(existing) => merge_sample(existing, sample, merger),
                None => self.samples.push(sample.clone()),
            }
        }

        self.output.extend(other.output.iter().cloned());
        merge_bag(
            &mut self.meta,
            &other.meta,
            AttrScope::Collection,
            merger,
        );
    }
}

fn merge_sample(this: &mut Sample, that: &Sample, merger: &Merger) {
    this.merge_structural(that);
    let mut meta = std::mem::take(&mut this.meta);
    merge_bag(&mut meta, &that.meta, AttrScope::Sample, merger);
    this.meta = meta;
}

fn merge_bag(this: &mut AttrBag, that: &AttrBag, scope: AttrScope, merger: &Merger) {
    for (key, that_value) in that {
        let this_value = this.get(key).cloned().unwrap_or(Value::Null);
        match merger.merge(scope, key, &this_value, that_value) {
            Ok(merged) => {
                this.insert(key.clone(), merged);
            }
            Err(error) => {
                tracing::error!("Unhandled exception when collecting results: {error:#}");
                this.insert(key.clone(), this_value);
            }
        }
    }
}

fn split_key(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => UNKNOWN_SPLIT_KEY.to_string(),
        Some(Value::String(s)) if s.is_empty() => UNKNOWN_SPLIT_KEY.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

impl SampleCollection {
    fn filtered(&self, predicate: impl Fn(&Sample) -> bool) -> SampleCollection {
        let mut filtered = self.clone_empty();
        filtered.samples = self.samples.iter().filter(|s| predicate(s)).cloned().collect();
        filtered.call_id = self.call_id.clone();
        filtered
    }
}

impl IntoIterator for SampleCollection {
    type Item = Sample;
    type IntoIter = std::vec::IntoIter<Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.into_iter()
    }
}

impl<'a> IntoIterator for &'a SampleCollection {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

impl FromIterator<Sample> for SampleCollection {
    fn from_iter<T: IntoIterator<Item = Sample>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
