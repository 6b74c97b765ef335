//! Executor selection and job execution from inside hooks and runners.

use crate::support::helpers::{
    config_with_manifest, init_tracing, manifest_record, write_manifest, RecordingExecutor,
};
use cellophane::{
    Config, JobRequest, Module, OutputSpec, Pipeline, RunnerDef, RunnerFn,
};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runners_submit_jobs_through_the_subprocess_backend() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let manifest = write_manifest(root, &[manifest_record("a", root)]);

    let func: RunnerFn = Arc::new(|_, scope| {
        let (status, _) = scope.executor.submit(
            JobRequest::new(["sh", "-c", "echo made > made.txt"])
                .workdir(&scope.workdir)
                .wait(),
        )?;
        anyhow::ensure!(status.is_some_and(|s| s.success()), "job should succeed");
        Ok(())
    });

    let config = config_with_manifest(root, &manifest);
    let pipeline = Pipeline::new(
        "wrapper",
        config.clone(),
        [Module::new("exec").runner(
            RunnerDef::new("producer", func).output(OutputSpec::new("made.txt")),
        )],
    )
    .unwrap();
    let samples = pipeline.run().await.unwrap();

    assert!(samples.iter().all(|s| s.failure().is_none()));
    assert_eq!(
        std::fs::read_to_string(config.resultdir().join("made.txt")).unwrap(),
        "made\n"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn registered_backends_are_selected_by_name() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let manifest = write_manifest(root, &[manifest_record("a", root)]);

    let submitted = Arc::new(Mutex::new(Vec::new()));
    let func: RunnerFn = Arc::new(|_, scope| {
        scope
            .executor
            .submit(JobRequest::new(["some-tool", "--flag"]))?;
        Ok(())
    });

    let config = Config::builder()
        .workdir(root.join("out"))
        .tag("DUMMY")
        .samples_file(manifest)
        .executor_name("recording")
        .build()
        .unwrap();
    let pipeline = Pipeline::new(
        "wrapper",
        config,
        [Module::new("exec")
            .executor("recording", RecordingExecutor::factory(submitted.clone()))
            .runner(RunnerDef::new("runner", func))],
    )
    .unwrap();
    let samples = pipeline.run().await.unwrap();

    assert!(samples.iter().all(|s| s.failure().is_none()));
    let argv = submitted.lock().unwrap().clone();
    assert_eq!(argv, vec![vec!["some-tool".to_string(), "--flag".to_string()]]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_executor_name_fails_pipeline_construction() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = Config::builder()
        .workdir(dir.path().join("out"))
        .tag("DUMMY")
        .executor_name("slurm")
        .build()
        .unwrap();

    let err = Pipeline::new("wrapper", config, Vec::<Module>::new()).unwrap_err();
    assert!(format!("{err}").contains("unknown executor 'slurm'"));
}
