//! Hook scheduling and driver-level boundaries.

use crate::support::helpers::{
    config_with_manifest, init_tracing, manifest_record, test_config, write_manifest, EventLog,
};
use cellophane::{
    Hook, HookFn, Module, Pipeline, RunnerDef, RunnerFn, Sample, EXIT_FAILURE, EXIT_INTERRUPT,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn recording_hook(events: &EventLog, label: &str) -> HookFn {
    let events = events.clone();
    let label = label.to_string();
    Arc::new(move |_, _| {
        events.record(label.clone());
        Ok(())
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pre_hooks_mutate_the_collection() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let manifest = write_manifest(root, &[manifest_record("a", root)]);

    let injected = root.join("input/injected.txt");
    std::fs::write(&injected, b"INPUT").unwrap();
    let injected_path = injected.clone();
    let inject: HookFn = Arc::new(move |samples, _| {
        samples.push(Sample::new("injected").with_files([injected_path.clone()]));
        Ok(())
    });

    let seen = EventLog::new();
    let recorder = seen.clone();
    let func: RunnerFn = Arc::new(move |samples, _| {
        for sample in samples.iter() {
            recorder.record(sample.id.clone());
        }
        Ok(())
    });

    let pipeline = Pipeline::new(
        "wrapper",
        config_with_manifest(root, &manifest),
        [Module::new("hooks")
            .hook(Hook::pre("inject", inject))
            .runner(RunnerDef::new("runner", func))],
    )
    .unwrap();
    let samples = pipeline.run().await.unwrap();

    assert_eq!(samples.len(), 2);
    let mut ids = seen.events();
    ids.sort();
    assert_eq!(ids, ["a", "injected"], "the runner saw the injected sample");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hook_order_honors_constraints_then_registration() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let manifest = write_manifest(root, &[manifest_record("a", root)]);

    let events = EventLog::new();
    let pipeline = Pipeline::new(
        "wrapper",
        config_with_manifest(root, &manifest),
        [Module::new("hooks")
            .hook(Hook::pre("middle", recording_hook(&events, "middle")))
            .hook(Hook::pre("late", recording_hook(&events, "late")).after(["all"]))
            .hook(Hook::pre("early", recording_hook(&events, "early")).before(["all"]))
            .hook(Hook::pre("second", recording_hook(&events, "second")).after(["middle"]))],
    )
    .unwrap();
    pipeline.run().await.unwrap();

    assert_eq!(events.events(), ["early", "middle", "second", "late"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unresolvable_hook_graph_is_fatal() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = json!({
        "workdir": dir.path().join("out"),
        "tag": "DUMMY",
    });

    let noop: HookFn = Arc::new(|_, _| Ok(()));
    let code = cellophane::execute(
        "wrapper",
        config,
        [Module::new("hooks").hook(Hook::pre("pre_hook_a", noop).after(["pre_hook_a"]))],
    )
    .await;
    assert_eq!(code, EXIT_FAILURE);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn empty_manifest_still_runs_hooks() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());

    let events = EventLog::new();
    let never: RunnerFn = Arc::new(|_, _| panic!("runner must not be dispatched"));
    let pipeline = Pipeline::new(
        "wrapper",
        config,
        [Module::new("hooks")
            .hook(Hook::pre("pre", recording_hook(&events, "pre")))
            .hook(Hook::post("post", recording_hook(&events, "post")))
            .runner(RunnerDef::new("never", never))],
    )
    .unwrap();
    let samples = pipeline.run().await.unwrap();

    assert!(samples.is_empty());
    assert_eq!(events.events(), ["pre", "post"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_run_exits_with_interrupt_code() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let manifest = write_manifest(root, &[manifest_record("a", root)]);

    let events = EventLog::new();
    let func: RunnerFn = Arc::new(|_, _| Ok(()));
    let pipeline = Pipeline::new(
        "wrapper",
        config_with_manifest(root, &manifest),
        [Module::new("hooks")
            .runner(RunnerDef::new("runner", func))
            .hook(Hook::post("on_always", recording_hook(&events, "always")))],
    )
    .unwrap();

    pipeline.shutdown_token().cancel();
    let code = pipeline.execute().await;

    assert_eq!(code, EXIT_INTERRUPT);
    assert_eq!(
        events.events(),
        ["always"],
        "always post-hooks run on whatever state the run reached"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn config_validation_failure_is_fatal() {
    init_tracing();
    let code = cellophane::execute("wrapper", json!({}), Vec::<Module>::new()).await;
    assert_eq!(code, EXIT_FAILURE);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn samples_without_files_are_skipped() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let manifest = write_manifest(
        root,
        &[
            manifest_record("a", root),
            json!({"id": "ghost", "files": []}),
        ],
    );

    let seen = EventLog::new();
    let recorder = seen.clone();
    let func: RunnerFn = Arc::new(move |samples, _| {
        for sample in samples.iter() {
            recorder.record(sample.id.clone());
        }
        Ok(())
    });
    let pipeline = Pipeline::new(
        "wrapper",
        config_with_manifest(root, &manifest),
        [Module::new("hooks").runner(RunnerDef::new("runner", func))],
    )
    .unwrap();
    let samples = pipeline.run().await.unwrap();

    assert_eq!(samples.len(), 1);
    assert_eq!(seen.events(), ["a"]);
}
