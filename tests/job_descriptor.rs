mod common;

use common::{artifact_root, clip, ids, presets, FakeRunner};
use std::collections::HashSet;
use std::time::Duration;
use vbench_harness::{
    corpus::StaticCorpus,
    error::BenchError,
    job::{FailureKind, JobDescriptor, OutputRegistry},
    metrics::MetricCollector,
    preset::Preset,
    sweep::{CancelToken, Scheduler, SweepConfiguration},
};

#[test]
fn duplicate_output_path_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = StaticCorpus::new([clip(dir.path(), "c1.y4m")]);
    let preset = Preset::new("fast", &["-preset", "fast"]);
    let mut outputs = OutputRegistry::new();
    let out = dir.path().join("fast/c1.mkv");

    let first = JobDescriptor::build(&corpus, &mut outputs, "c1.y4m", &preset, out.clone());
    assert!(first.is_ok());
    let second = JobDescriptor::build(&corpus, &mut outputs, "c1.y4m", &preset, out.clone());
    assert!(matches!(second, Err(BenchError::DuplicateOutputPath(p)) if p == out));
}

#[test]
fn unknown_clip_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = StaticCorpus::new([clip(dir.path(), "c1.y4m")]);
    let preset = Preset::new("fast", &["-preset", "fast"]);
    let mut outputs = OutputRegistry::new();

    let res = JobDescriptor::build(
        &corpus,
        &mut outputs,
        "missing.y4m",
        &preset,
        dir.path().join("fast/missing.mkv"),
    );
    assert!(matches!(res, Err(BenchError::ClipNotFound(id)) if id == "missing.y4m"));
}

#[test]
fn empty_parameters_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = StaticCorpus::new([clip(dir.path(), "c1.y4m")]);
    let preset = Preset::new("bare", &[]);
    let mut outputs = OutputRegistry::new();

    let res = JobDescriptor::build(&corpus, &mut outputs, "c1.y4m", &preset, dir.path().join("x.mkv"));
    assert!(matches!(res, Err(BenchError::EmptyParameters(_))));
}

#[test]
fn equality_uses_identity_fields() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = StaticCorpus::new([clip(dir.path(), "c1.y4m")]);
    let fast = Preset::new("fast", &["-preset", "fast"]);
    let renamed = Preset::new("fast-copy", &["-preset", "fast"]);
    let out = dir.path().join("fast/c1.mkv");

    let a = JobDescriptor::build(&corpus, &mut OutputRegistry::new(), "c1.y4m", &fast, out.clone()).unwrap();
    let b = JobDescriptor::build(&corpus, &mut OutputRegistry::new(), "c1.y4m", &renamed, out.clone()).unwrap();
    assert_eq!(a, b);

    let c = JobDescriptor::build(
        &corpus,
        &mut OutputRegistry::new(),
        "c1.y4m",
        &fast,
        dir.path().join("other/c1.mkv"),
    )
    .unwrap();
    assert_ne!(a, c);

    let set: HashSet<_> = [a, b, c].into_iter().collect();
    assert_eq!(set.len(), 2);
}

#[test]
fn sweep_continues_past_colliding_stems() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = StaticCorpus::new([
        clip(dir.path(), "a.mkv"),
        clip(dir.path(), "a.mp4"),
        clip(dir.path(), "b.y4m"),
    ]);
    let config = SweepConfiguration::new(
        ids(&["a.mkv", "a.mp4", "b.y4m"]),
        presets(&["fast"]),
        2,
        Duration::from_secs(60),
        None,
    )
    .unwrap();

    let expansion = config.expand(&corpus, &artifact_root(dir.path()));
    assert_eq!(expansion.jobs.len(), 2);
    assert_eq!(expansion.rejected.len(), 1);
    let r = &expansion.rejected[0];
    assert_eq!((r.preset.as_str(), r.clip_id.as_str()), ("fast", "a.mp4"));
    assert_eq!(r.failure.kind, FailureKind::DuplicateOutputPath);

    let runner = FakeRunner::new(Duration::from_millis(1));
    let collector = MetricCollector::default();
    let out = Scheduler::new(&runner, &collector, &corpus)
        .run(&config, &artifact_root(dir.path()), &CancelToken::new())
        .unwrap();
    assert_eq!(out.results.len(), 2);
    assert_eq!(out.rejected.len(), 1);
    assert!(!out.aborted);
}

#[test]
fn unknown_clip_in_sweep_becomes_rejection() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = StaticCorpus::new([clip(dir.path(), "c1.y4m")]);
    let config = SweepConfiguration::new(
        ids(&["c1.y4m", "ghost.y4m"]),
        presets(&["fast", "slow"]),
        1,
        Duration::from_secs(60),
        None,
    )
    .unwrap();

    let expansion = config.expand(&corpus, &artifact_root(dir.path()));
    assert_eq!(expansion.jobs.len(), 2);
    assert!(expansion
        .rejected
        .iter()
        .all(|r| r.clip_id == "ghost.y4m" && r.failure.kind == FailureKind::ClipNotFound));
    assert_eq!(expansion.rejected.len(), 2);
}
