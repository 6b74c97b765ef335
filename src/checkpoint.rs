//! Content-addressed fingerprints of a runner's declared outputs.
//!
//! A checkpoint is a label scoped to one runner invocation's workdir. Its
//! live fingerprint covers the sample input files plus the sources of every
//! output bound to the label; comparing it against the stored fingerprint
//! tells the runner whether its work is current.

use crate::data::SampleCollection;
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

const CHECKPOINT_DIR: &str = ".checkpoints";

/// Lazily hands out per-label [`Checkpoint`] handles rooted at a workdir.
#[derive(Debug, Clone)]
pub struct Checkpoints {
    workdir: PathBuf,
}

impl Checkpoints {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn get(&self, label: impl Into<String>) -> Checkpoint {
        let label = label.into();
        let file = self.workdir.join(CHECKPOINT_DIR).join(&label);
        Checkpoint {
            label,
            workdir: self.workdir.clone(),
            file,
            extra_paths: BTreeSet::new(),
        }
    }
}

/// A single labelled checkpoint.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    label: String,
    workdir: PathBuf,
    file: PathBuf,
    extra_paths: BTreeSet<PathBuf>,
}

impl Checkpoint {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Tracks additional paths beyond the declared outputs.
    pub fn add_paths<I, P>(&mut self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.extra_paths.extend(paths.into_iter().map(Into::into));
    }

    /// True iff a fingerprint was stored and it matches the live state.
    pub fn check(&self, samples: &SampleCollection) -> bool {
        let stored = match std::fs::read(&self.file) {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, String>>(&bytes) {
                Ok(map) => map,
                Err(_) => return false,
            },
            Err(_) => return false,
        };
        stored == self.live_map(samples)
    }

    /// Snapshots the live fingerprint to disk under the workdir.
    ///
    /// Storing an unchanged state is a no-op that keeps [`check`] true.
    ///
    /// [`check`]: Checkpoint::check
    pub fn store(&self, samples: &SampleCollection) -> Result<()> {
        let live = self.live_map(samples);
        if let Some(parent) = self.file.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create checkpoint directory {}", parent.display()))?;
        }
        let json = serde_json::to_vec(&live)?;
        std::fs::write(&self.file, json)
            .with_context(|| format!("write checkpoint {}", self.file.display()))?;
        Ok(())
    }

    /// The current live fingerprint as a hex string.
    pub fn hexdigest(&self, samples: &SampleCollection) -> String {
        let mut combined = Sha256::new();
        for (path, digest) in self.live_map(samples) {
            combined.update(path.as_bytes());
            combined.update(digest.as_bytes());
        }
        hex_string(&combined.finalize())
    }

    /// The multiset of `(relative path, content digest)` pairs covering the
    /// checkpoint's current state. Ordering is normalized by the map, so the
    /// fingerprint is order-independent.
    fn live_map(&self, samples: &SampleCollection) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        for path in self.tracked_paths(samples) {
            let key = match path.strip_prefix(&self.workdir) {
                Ok(relative) => relative.to_string_lossy().into_owned(),
                Err(_) => path.to_string_lossy().into_owned(),
            };
            match std::fs::read(&path) {
                Ok(bytes) => {
                    let mut hasher = Sha256::new();
                    hasher.update(self.label.as_bytes());
                    hasher.update(key.as_bytes());
                    hasher.update(&bytes);
                    map.insert(key, hex_string(&hasher.finalize()));
                }
                Err(_) => {
                    tracing::debug!("checkpoint {}: unreadable path {}", self.label, path.display());
                }
            }
        }
        map
    }

    fn tracked_paths(&self, samples: &SampleCollection) -> BTreeSet<PathBuf> {
        let mut paths = self.extra_paths.clone();
        for sample in samples {
            paths.extend(sample.files.iter().cloned());
        }

        let specs = samples
            .output
            .iter()
            .chain(samples.iter().flat_map(|s| s.output.iter()))
            .filter(|spec| spec.checkpoint_label() == self.label);
        for spec in specs {
            paths.extend(spec.expand_sources(samples.samples(), &self.workdir));
        }

        let mut files = BTreeSet::new();
        for path in paths {
            if path.is_dir() {
                collect_files(&path, &mut files);
            } else {
                files.insert(path);
            }
        }
        files
    }
}

fn collect_files(dir: &Path, files: &mut BTreeSet<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, files);
        } else {
            files.insert(path);
        }
    }
}

fn hex_string(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
