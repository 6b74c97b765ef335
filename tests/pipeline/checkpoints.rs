//! Checkpoint lifecycle inside a runner scope.

use crate::support::helpers::{
    config_with_manifest, init_tracing, manifest_record, write_manifest, EventLog,
};
use cellophane::{Module, OutputSpec, Pipeline, RunnerDef, RunnerFn};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn check_store_check_round_trip() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let manifest = write_manifest(root, &[manifest_record("a", root)]);

    let events = EventLog::new();
    let recorder = events.clone();
    let func: RunnerFn = Arc::new(move |samples, scope| {
        let checkpoint = scope.checkpoints.get("a");
        let before = checkpoint.hexdigest(samples);

        fs::write(scope.workdir.join("out_a.txt"), b"OUT_A")?;
        let after = checkpoint.hexdigest(samples);
        recorder.record(format!("digests_differ: {}", before != after));

        recorder.record(format!("check_unstored: {}", checkpoint.check(samples)));
        checkpoint.store(samples)?;
        recorder.record(format!("check_stored: {}", checkpoint.check(samples)));

        let stored = checkpoint.hexdigest(samples);
        checkpoint.store(samples)?;
        recorder.record(format!(
            "restore_noop: {}",
            checkpoint.check(samples) && checkpoint.hexdigest(samples) == stored
        ));
        Ok(())
    });

    let pipeline = Pipeline::new(
        "wrapper",
        config_with_manifest(root, &manifest),
        [Module::new("checkpointed").runner(
            RunnerDef::new("runner", func)
                .output(OutputSpec::new("out_a.txt").checkpoint("a"))
                .checkpoint("a"),
        )],
    )
    .unwrap();
    let samples = pipeline.run().await.unwrap();

    assert!(samples.iter().all(|s| s.failure().is_none()));
    assert_eq!(
        events.events(),
        [
            "digests_differ: true",
            "check_unstored: false",
            "check_stored: true",
            "restore_noop: true",
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn checkpoint_files_live_under_the_runner_workdir() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let manifest = write_manifest(root, &[manifest_record("a", root)]);

    let events = EventLog::new();
    let recorder = events.clone();
    let func: RunnerFn = Arc::new(move |samples, scope| {
        fs::write(scope.workdir.join("out_a.txt"), b"OUT_A")?;
        scope.checkpoints.get("a").store(samples)?;
        recorder.record(format!(
            "checkpoint_file: {}",
            scope.workdir.join(".checkpoints/a").is_file()
        ));
        Ok(())
    });

    let pipeline = Pipeline::new(
        "wrapper",
        config_with_manifest(root, &manifest),
        [Module::new("checkpointed").runner(
            RunnerDef::new("runner", func).output(OutputSpec::new("out_a.txt").checkpoint("a")),
        )],
    )
    .unwrap();
    pipeline.run().await.unwrap();

    assert_eq!(events.events(), ["checkpoint_file: true"]);
}
