//! End-to-end pipeline tests exercising the scenarios and universal
//! properties against real files on disk.

use std::fs;

use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use docxref::config::PipelineConfig;
use docxref::pipeline::{FileOutcome, Pipeline};

fn pipeline_in(dir: &std::path::Path) -> Pipeline {
    let mut cfg = PipelineConfig::default();
    cfg.cache_dir = dir.join(".cache");
    cfg.worker_count = 2;
    Pipeline::new(cfg)
}

#[tokio::test]
async fn scenario_1_add_to_function_without_docstring() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.py");
    let b = dir.path().join("b.py");
    fs::write(&a, "def f():\n    return 1\n").unwrap();
    fs::write(&b, "from a import f\nf()\n").unwrap();

    let pipeline = pipeline_in(dir.path());
    let summary = pipeline
        .run(&[a.clone()], &[b.clone()], dir.path(), CancellationToken::new())
        .await;

    assert!(!summary.exit_is_nonzero());
    let content = fs::read_to_string(&a).unwrap();
    assert_eq!(
        content,
        "def f():\n    \"\"\"\n    Used in:\n    - b.py\n    \"\"\"\n    return 1\n"
    );
}

#[tokio::test]
async fn scenario_2_merge_with_existing_usage_block() {
    let dir = tempdir().unwrap();
    let m = dir.path().join("m.py");
    let old_dir = dir.path().join("old");
    let new_dir = dir.path().join("new");
    fs::create_dir_all(&old_dir).unwrap();
    fs::create_dir_all(&new_dir).unwrap();
    fs::write(
        &m,
        "class C:\n    \"\"\"Greeter.\n\n    Used in:\n    - old/x.py\n    \"\"\"\n    pass\n",
    )
    .unwrap();
    fs::write(old_dir.join("x.py"), "").unwrap();
    let y = new_dir.join("y.py");
    fs::write(&y, "from m import C\nC()\n").unwrap();

    let pipeline = pipeline_in(dir.path());
    let summary = pipeline
        .run(&[m.clone()], &[y.clone()], dir.path(), CancellationToken::new())
        .await;

    assert!(!summary.exit_is_nonzero());
    let content = fs::read_to_string(&m).unwrap();
    assert!(content.contains("Greeter."));
    let new_pos = content.find("new/y.py").unwrap();
    let old_pos = content.find("old/x.py").unwrap();
    assert!(new_pos < old_pos, "paths must be sorted lexicographically:\n{content}");
}

#[tokio::test]
async fn scenario_3_self_reference_excluded() {
    let dir = tempdir().unwrap();
    let s = dir.path().join("s.py");
    let original = "def g():\n    return 1\n\ng()\n";
    fs::write(&s, original).unwrap();

    let pipeline = pipeline_in(dir.path());
    let summary = pipeline
        .run(&[s.clone()], &[s.clone()], dir.path(), CancellationToken::new())
        .await;

    let (_, outcome) = summary.file_outcomes.iter().find(|(p, _)| p == &s).unwrap();
    assert_eq!(*outcome, FileOutcome::Unchanged);
    assert_eq!(fs::read_to_string(&s).unwrap(), original);
}

#[tokio::test]
async fn scenario_5_clean_mode_excises_block_but_keeps_summary() {
    let dir = tempdir().unwrap();
    let m = dir.path().join("m.py");
    fs::write(
        &m,
        "class C:\n    \"\"\"Greeter.\n\n    Used in:\n    - new/y.py\n    - old/x.py\n    \"\"\"\n    pass\n",
    )
    .unwrap();

    let pipeline = pipeline_in(dir.path());
    let summary = pipeline.clean(&[m.clone()]).await;
    let (_, outcome) = summary.file_outcomes.iter().find(|(p, _)| p == &m).unwrap();
    assert_eq!(*outcome, FileOutcome::Modified);

    let content = fs::read_to_string(&m).unwrap();
    assert!(content.contains("Greeter."));
    assert!(!content.contains("Used in:"));
}

#[tokio::test]
async fn round_trip_stability_with_no_references() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.py");
    let original = "def f():\n    \"\"\"Already documented.\"\"\"\n    return 1\n";
    fs::write(&a, original).unwrap();

    let pipeline = pipeline_in(dir.path());
    let summary = pipeline
        .run(&[a.clone()], &[], dir.path(), CancellationToken::new())
        .await;

    let (_, outcome) = summary.file_outcomes.iter().find(|(p, _)| p == &a).unwrap();
    assert_eq!(*outcome, FileOutcome::Unchanged);
    assert_eq!(fs::read_to_string(&a).unwrap(), original);
}

#[tokio::test]
async fn idempotence_running_twice_yields_the_same_bytes() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.py");
    let b = dir.path().join("b.py");
    fs::write(&a, "def f():\n    return 1\n").unwrap();
    fs::write(&b, "f()\n").unwrap();

    let pipeline = pipeline_in(dir.path());
    pipeline
        .run(&[a.clone()], &[b.clone()], dir.path(), CancellationToken::new())
        .await;
    let first_pass = fs::read_to_string(&a).unwrap();

    pipeline
        .run(&[a.clone()], &[b.clone()], dir.path(), CancellationToken::new())
        .await;
    let second_pass = fs::read_to_string(&a).unwrap();

    assert_eq!(first_pass, second_pass);
}

#[tokio::test]
async fn empty_edit_file_yields_a_single_module_construct_and_no_rewrite() {
    let dir = tempdir().unwrap();
    let empty = dir.path().join("empty.py");
    fs::write(&empty, "").unwrap();

    let pipeline = pipeline_in(dir.path());
    let summary = pipeline
        .run(&[empty.clone()], &[], dir.path(), CancellationToken::new())
        .await;

    let (_, outcome) = summary.file_outcomes.iter().find(|(p, _)| p == &empty).unwrap();
    assert_eq!(*outcome, FileOutcome::Unchanged);
}

#[tokio::test]
async fn dry_run_reports_modification_without_touching_disk() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.py");
    let b = dir.path().join("b.py");
    let original = "def f():\n    return 1\n";
    fs::write(&a, original).unwrap();
    fs::write(&b, "f()\n").unwrap();

    let mut cfg = PipelineConfig::default();
    cfg.cache_dir = dir.path().join(".cache");
    cfg.dry_run = true;
    let pipeline = Pipeline::new(cfg);

    let summary = pipeline
        .run(&[a.clone()], &[b.clone()], dir.path(), CancellationToken::new())
        .await;

    let (_, outcome) = summary.file_outcomes.iter().find(|(p, _)| p == &a).unwrap();
    assert_eq!(*outcome, FileOutcome::Modified);
    assert_eq!(fs::read_to_string(&a).unwrap(), original);
}

#[tokio::test]
async fn cache_transparency_same_inputs_yield_the_same_output() {
    let dir_a = tempdir().unwrap();
    let a1 = dir_a.path().join("a.py");
    let b1 = dir_a.path().join("b.py");
    fs::write(&a1, "def f():\n    return 1\n").unwrap();
    fs::write(&b1, "f()\n").unwrap();
    let pipeline_a = pipeline_in(dir_a.path());
    pipeline_a
        .run(&[a1.clone()], &[b1.clone()], dir_a.path(), CancellationToken::new())
        .await;
    let with_fresh_cache = fs::read_to_string(&a1).unwrap();

    let dir_b = tempdir().unwrap();
    let a2 = dir_b.path().join("a.py");
    let b2 = dir_b.path().join("b.py");
    fs::write(&a2, "def f():\n    return 1\n").unwrap();
    fs::write(&b2, "f()\n").unwrap();
    let pipeline_b = pipeline_in(dir_b.path());
    // Warm the cache with an identical prior run, then run again.
    pipeline_b
        .run(&[a2.clone()], &[b2.clone()], dir_b.path(), CancellationToken::new())
        .await;
    fs::write(&a2, "def f():\n    return 1\n").unwrap();
    pipeline_b
        .run(&[a2.clone()], &[b2.clone()], dir_b.path(), CancellationToken::new())
        .await;
    let with_warm_cache = fs::read_to_string(&a2).unwrap();

    assert_eq!(with_fresh_cache, with_warm_cache);
}
