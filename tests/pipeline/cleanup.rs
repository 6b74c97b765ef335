//! Workspace cleanup: default removal, deferred registration, root scoping.

use crate::support::helpers::{
    config_with_manifest, init_tracing, manifest_record, write_manifest,
};
use cellophane::{Module, Pipeline, RunnerDef, RunnerFn};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_workspace_is_removed_by_default() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let manifest = write_manifest(root, &[manifest_record("a", root)]);
    let config = config_with_manifest(root, &manifest);

    let func: RunnerFn = Arc::new(|_, scope| {
        fs::write(scope.workdir.join("scratch.bin"), b"tmp")?;
        Ok(())
    });
    let pipeline = Pipeline::new(
        "wrapper",
        config.clone(),
        [Module::new("cleanup").runner(RunnerDef::new("runner", func))],
    )
    .unwrap();
    pipeline.run().await.unwrap();

    assert!(
        !config.tag_workdir().exists(),
        "the tag workspace is registered by default and removed"
    );
    assert!(config.workdir().exists(), "the workdir root itself survives");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unregistered_paths_survive_cleanup() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let manifest = write_manifest(root, &[manifest_record("a", root)]);
    let config = config_with_manifest(root, &manifest);

    let func: RunnerFn = Arc::new(|_, scope| {
        fs::write(scope.workdir.join("keep.txt"), b"keep")?;
        fs::write(scope.workdir.join("drop.txt"), b"drop")?;
        scope.cleaner.unregister("keep.txt");
        Ok(())
    });
    let pipeline = Pipeline::new(
        "wrapper",
        config.clone(),
        [Module::new("cleanup").runner(RunnerDef::new("runner", func))],
    )
    .unwrap();
    pipeline.run().await.unwrap();

    let workdir = config.tag_workdir().join("runner");
    assert!(workdir.join("keep.txt").exists());
    assert!(!workdir.join("drop.txt").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn outside_root_registration_requires_the_flag() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let manifest = write_manifest(root, &[manifest_record("a", root)]);
    let config = config_with_manifest(root, &manifest);

    let rejected = root.join("NON_ROOT");
    let accepted = root.join("ALSO_NON_ROOT");
    fs::write(&rejected, b"outside").unwrap();
    fs::write(&accepted, b"outside").unwrap();

    let rejected_path = rejected.clone();
    let accepted_path = accepted.clone();
    let func: RunnerFn = Arc::new(move |_, scope| {
        scope.cleaner.register(&rejected_path);
        scope.cleaner.register_ignore_outside_root(&accepted_path);
        Ok(())
    });
    let pipeline = Pipeline::new(
        "wrapper",
        config,
        [Module::new("cleanup").runner(RunnerDef::new("runner", func))],
    )
    .unwrap();
    pipeline.run().await.unwrap();

    assert!(rejected.exists(), "unflagged outside-root paths are dropped");
    assert!(!accepted.exists(), "flagged paths are removed during cleanup");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deferred_clean_is_a_no_op_inside_runners() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let manifest = write_manifest(root, &[manifest_record("a", root)]);
    let config = config_with_manifest(root, &manifest);

    let func: RunnerFn = Arc::new(|_, scope| {
        fs::write(scope.workdir.join("still_there.txt"), b"x")?;
        scope.cleaner.register("still_there.txt");
        scope.cleaner.clean();
        assert!(
            scope.workdir.join("still_there.txt").exists(),
            "deferred clean must not remove anything"
        );
        Ok(())
    });
    let pipeline = Pipeline::new(
        "wrapper",
        config,
        [Module::new("cleanup").runner(RunnerDef::new("runner", func))],
    )
    .unwrap();
    let samples = pipeline.run().await.unwrap();
    assert!(samples.iter().all(|s| s.failure().is_none()));
}
