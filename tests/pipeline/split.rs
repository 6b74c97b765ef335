//! Fan-out over a split attribute: shard contents and workdir layout.

use crate::support::helpers::{config_with_manifest, init_tracing, write_manifest, EventLog};
use cellophane::{Module, Pipeline, RunnerDef, RunnerFn};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn split_by_shards_and_workdirs() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let manifest = write_manifest(
        root,
        &[
            json!({"id": "a", "files": [root.join("input/a.txt")], "custom_prop": "x"}),
            json!({"id": "b", "files": [root.join("input/b.txt")], "custom_prop": "y"}),
            json!({"id": "c", "files": [root.join("input/c.txt")], "custom_prop": "y"}),
        ],
    );
    let config = config_with_manifest(root, &manifest);

    let events = EventLog::new();
    let recorder = events.clone();
    let func: RunnerFn = Arc::new(move |samples, scope| {
        let key = scope.split_key.clone().unwrap_or_default();
        recorder.record(format!("{key}: {}", samples.len()));
        assert!(scope.workdir.ends_with(&key), "workdir carries the split key");
        assert_eq!(samples.call_id(), Some(key.as_str()));
        Ok(())
    });

    let pipeline = Pipeline::new(
        "wrapper",
        config.clone(),
        [Module::new("split").runner(RunnerDef::new("runner", func).split_by("custom_prop"))],
    )
    .unwrap();
    let samples = pipeline.run().await.unwrap();

    assert_eq!(samples.len(), 3, "shard union equals the original");
    assert_eq!(samples.unique_ids().len(), 3);
    assert!(samples.iter().all(|s| s.failure().is_none()));

    let mut shards = events.events();
    shards.sort();
    assert_eq!(shards, ["x: 1", "y: 2"]);

    // The workspace is cleaned at exit, so shard workdirs are observed from
    // inside the runner and only their absence is asserted here.
    assert!(!config.tag_workdir().exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_without_split_sees_the_whole_collection() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let manifest = write_manifest(
        root,
        &[
            json!({"id": "a", "files": [root.join("input/a.txt")]}),
            json!({"id": "b", "files": [root.join("input/b.txt")]}),
        ],
    );
    let config = config_with_manifest(root, &manifest);

    let events = EventLog::new();
    let recorder = events.clone();
    let func: RunnerFn = Arc::new(move |samples, scope| {
        recorder.record(format!("{}", samples.len()));
        assert!(scope.split_key.is_none());
        assert!(scope.workdir.ends_with("runner"));
        Ok(())
    });

    let pipeline = Pipeline::new(
        "wrapper",
        config,
        [Module::new("whole").runner(RunnerDef::new("runner", func))],
    )
    .unwrap();
    pipeline.run().await.unwrap();

    assert_eq!(events.events(), ["2"]);
}
