use crate::data::sample::AttrBag;
use crate::data::{Sample, SampleCollection};
use crate::modules::registry::Registry;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// One record of the samples manifest: an id, input files, and arbitrary
/// user attributes.
#[derive(Debug, Deserialize)]
struct ManifestRecord {
    id: Value,
    #[serde(default)]
    files: Vec<PathBuf>,
    #[serde(flatten)]
    attrs: AttrBag,
}

/// Reads the samples manifest (a JSON array of records) and applies the
/// registered attribute schemas.
///
/// Defaults fill absent attributes; validators run against every manifest
/// value, so a bad record fails the run before anything is dispatched.
pub fn read_samples(path: &Path, registry: &Registry) -> Result<SampleCollection> {
    let content = std::fs::read(path)
        .with_context(|| format!("read samples manifest {}", path.display()))?;
    let records: Vec<ManifestRecord> = serde_json::from_slice(&content)
        .with_context(|| format!("parse samples manifest {}", path.display()))?;

    let mut samples = SampleCollection::default();
    for record in records {
        let id = match record.id {
            Value::String(id) => id,
            other => other.to_string(),
        };
        let mut sample = Sample::new(&id).with_files(record.files);
        sample.meta = record.attrs;
        for schema in registry.sample_attrs() {
            schema
                .apply(&mut sample.meta)
                .with_context(|| format!("sample '{id}'"))?;
        }
        samples.push(sample);
    }

    for schema in registry.collection_attrs() {
        schema.apply(&mut samples.meta)?;
    }
    Ok(samples)
}

/// Applies collection-level attribute schemas to an empty collection, for
/// runs without a manifest.
pub fn empty_samples(registry: &Registry) -> Result<SampleCollection> {
    let mut samples = SampleCollection::default();
    for schema in registry.collection_attrs() {
        schema.apply(&mut samples.meta)?;
    }
    Ok(samples)
}
