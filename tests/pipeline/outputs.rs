//! The output staging matrix: pattern expansion, renames, collisions.

use crate::support::helpers::{
    config_with_manifest, init_tracing, manifest_record, write_manifest,
};
use cellophane::{Config, Module, OutputSpec, Pipeline, RunnerDef, RunnerFn};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn output_matrix_runner() -> RunnerDef {
    let func: RunnerFn = Arc::new(|_, scope| {
        for name in [
            "single.txt",
            "sample_a.txt",
            "sample_b.txt",
            "out_a.txt",
            "out_b.txt",
        ] {
            fs::write(scope.workdir.join(name), name.as_bytes())?;
        }
        fs::create_dir_all(scope.workdir.join("glob"))?;
        fs::write(scope.workdir.join("glob/a.txt"), b"GLOB_A")?;
        fs::write(scope.workdir.join("glob/b.txt"), b"GLOB_B")?;
        Ok(())
    });
    RunnerDef::new("runner_a", func)
        .output(OutputSpec::new("single.txt"))
        .output(OutputSpec::new("sample_{sample.id}.txt"))
        .output(OutputSpec::new("missing.txt"))
        .output(OutputSpec::new("glob/*.txt").dst_name("invalid_rename.txt"))
        .output(OutputSpec::new("single.txt").dst_name("rename.txt"))
        .output(OutputSpec::new("out_a.txt").dst_name("overwrite.txt"))
        .output(OutputSpec::new("out_b.txt").dst_name("overwrite.txt"))
}

async fn run_output_matrix(root: &Path) -> Config {
    let manifest = write_manifest(
        root,
        &[manifest_record("a", root), manifest_record("b", root)],
    );
    let config = config_with_manifest(root, &manifest);

    let pipeline = Pipeline::new(
        "wrapper",
        config.clone(),
        [Module::new("matrix").runner(output_matrix_runner())],
    )
    .unwrap();
    let samples = pipeline.run().await.unwrap();
    assert!(samples.iter().all(|s| s.failure().is_none()));
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn output_matrix_copies_the_expected_files() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = run_output_matrix(dir.path()).await;
    let results = config.resultdir();

    // Plain pattern mirrors its path; rename applies to the single match.
    assert_eq!(fs::read(results.join("single.txt")).unwrap(), b"single.txt");
    assert_eq!(fs::read(results.join("rename.txt")).unwrap(), b"single.txt");

    // Placeholder patterns expand once per sample.
    assert!(results.join("sample_a.txt").is_file());
    assert!(results.join("sample_b.txt").is_file());

    // The multi-match rename is dropped and basenames are preserved.
    assert!(results.join("a.txt").is_file());
    assert!(results.join("b.txt").is_file());
    assert!(!results.join("invalid_rename.txt").exists());

    // The colliding rename is copied once; the second output is skipped.
    assert_eq!(fs::read(results.join("overwrite.txt")).unwrap(), b"out_a.txt");

    // The zero-match pattern is skipped without failing the run.
    assert!(!results.join("missing.txt").exists());

    let copied: Vec<_> = walk_files(results);
    assert_eq!(copied.len(), 7, "exactly the validated outputs are copied");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn copied_outputs_are_strictly_under_resultdir() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = run_output_matrix(dir.path()).await;

    for file in walk_files(config.resultdir()) {
        assert!(file.starts_with(config.resultdir()));
    }
}

fn walk_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut files = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return files;
    };
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        if path.is_dir() {
            files.extend(walk_files(&path));
        } else {
            files.push(path);
        }
    }
    files
}
