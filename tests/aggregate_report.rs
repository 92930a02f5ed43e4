mod common;

use common::{artifact_root, corpus, ids, presets, Behavior, FakeRunner, FakeScorer};
use std::sync::Arc;
use std::time::Duration;
use vbench_harness::{
    aggregate::{Aggregator, ScoringPolicy},
    job::{FailureKind, JobStatus},
    metrics::MetricCollector,
    pipeline::Pipeline,
    sweep::{CancelToken, Scheduler, SweepConfiguration},
};

const CLIPS: [&str; 3] = ["c1.y4m", "c2.y4m", "c3.y4m"];

fn sweep(baseline: Option<&str>) -> SweepConfiguration {
    SweepConfiguration::new(
        ids(&CLIPS),
        presets(&["fast", "slow"]),
        2,
        Duration::from_secs(60),
        baseline.map(str::to_string),
    )
    .unwrap()
}

fn scorer() -> Arc<FakeScorer> {
    Arc::new(FakeScorer::new(&[("c1.y4m", 40.0), ("c2.y4m", 42.0), ("c3.y4m", 44.0)]))
}

#[test]
fn timeout_on_one_clip_reduces_coverage() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = corpus(dir.path(), &CLIPS);
    let runner = FakeRunner::new(Duration::from_millis(2)).with("slow", "c2.y4m", Behavior::Timeout);
    let pipeline = Pipeline::new(
        Box::new(runner),
        MetricCollector::new(Some(scorer())),
        Aggregator::default(),
    );

    let out = pipeline
        .run(&sweep(None), &corpus, &artifact_root(dir.path()), &CancelToken::new())
        .unwrap();

    assert_eq!(out.outcome.results.len(), 6);
    let ok = out
        .outcome
        .results
        .iter()
        .filter(|r| r.status == JobStatus::Success)
        .count();
    assert_eq!(ok, 5);
    assert_eq!(out.outcome.results[4].status, JobStatus::Timeout);

    let slow = out.report.preset("slow").unwrap();
    assert_eq!((slow.coverage.measured, slow.coverage.total), (2, 3));
    assert!((slow.coverage.fraction - 2.0 / 3.0).abs() < 1e-12);
    assert!(slow.clips.iter().all(|c| c.clip_id != "c2.y4m"));

    let fast = out.report.preset("fast").unwrap();
    assert!(fast.coverage.is_complete());

    assert_eq!(out.report.failures.len(), 1);
    let f = &out.report.failures[0];
    assert_eq!((f.preset.as_str(), f.clip_id.as_str()), ("slow", "c2.y4m"));
    assert_eq!(f.kind, FailureKind::Timeout);
}

#[test]
fn baseline_relative_figures_are_unity_for_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = corpus(dir.path(), &CLIPS);
    let runner = FakeRunner::new(Duration::from_millis(2))
        .with_preset_bytes("fast", 200_000)
        .with_preset_bytes("slow", 100_000);
    let pipeline = Pipeline::new(
        Box::new(runner),
        MetricCollector::new(Some(scorer())),
        Aggregator::new(ScoringPolicy::default()),
    );

    let out = pipeline
        .run(&sweep(Some("fast")), &corpus, &artifact_root(dir.path()), &CancelToken::new())
        .unwrap();
    assert!(!out.report.baseline_missing);
    assert_eq!(out.outcome.results[0].quality(), Some(40.0));

    let fast = out.report.preset("fast").unwrap();
    let rel = fast.relative.unwrap();
    assert_eq!(rel.speed, 1.0);
    assert_eq!(rel.compression_ratio, 1.0);
    assert_eq!(rel.quality, Some(1.0));
    assert_eq!(fast.score, Some(1.0));

    let slow = out.report.preset("slow").unwrap();
    let rel = slow.relative.unwrap();
    assert!((rel.compression_ratio - 2.0).abs() < 1e-9);
    assert_eq!(rel.quality, Some(1.0));
    assert!(slow.score.is_some());

    let g = fast.summary.geomean_compression_ratio.unwrap();
    assert!((g - 5.0).abs() < 1e-9);
    assert_eq!(fast.summary.median_quality, Some(42.0));
    assert_eq!(fast.summary.quality_tail, Some(40.0));
}

#[test]
fn missing_baseline_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = corpus(dir.path(), &CLIPS);
    let pipeline = Pipeline::new(
        Box::new(FakeRunner::new(Duration::from_millis(1))),
        MetricCollector::default(),
        Aggregator::default(),
    );

    let out = pipeline
        .run(&sweep(Some("medium")), &corpus, &artifact_root(dir.path()), &CancelToken::new())
        .unwrap();

    assert!(out.report.baseline_missing);
    assert!(out.report.warnings.iter().any(|w| w.contains("medium")));
    assert!(out.report.presets.iter().all(|p| p.relative.is_none() && p.score.is_none()));
}

#[test]
fn baseline_without_measurements_is_missing() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = corpus(dir.path(), &CLIPS);
    let mut runner = FakeRunner::new(Duration::from_millis(1));
    for c in CLIPS {
        runner = runner.with("fast", c, Behavior::Timeout);
    }
    let pipeline = Pipeline::new(Box::new(runner), MetricCollector::default(), Aggregator::default());

    let out = pipeline
        .run(&sweep(Some("fast")), &corpus, &artifact_root(dir.path()), &CancelToken::new())
        .unwrap();

    assert!(out.report.baseline_missing);
    let fast = out.report.preset("fast").unwrap();
    assert_eq!(fast.coverage.measured, 0);
    assert_eq!(fast.summary.mean_speed_fps, None);
}

#[test]
fn baseline_without_compression_ratio_is_missing() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = vbench_harness::corpus::StaticCorpus::new(CLIPS.iter().map(|id| {
        let mut c = common::clip(dir.path(), id);
        c.byte_size = 0;
        c
    }));
    let pipeline = Pipeline::new(
        Box::new(FakeRunner::new(Duration::from_millis(1))),
        MetricCollector::default(),
        Aggregator::default(),
    );

    let out = pipeline
        .run(&sweep(Some("fast")), &corpus, &artifact_root(dir.path()), &CancelToken::new())
        .unwrap();

    let fast = out.report.preset("fast").unwrap();
    assert!(fast.summary.mean_speed_fps.is_some());
    assert_eq!(fast.summary.geomean_compression_ratio, None);
    assert!(out.report.baseline_missing);
    assert!(out
        .report
        .warnings
        .iter()
        .any(|w| w.contains("fast") && w.contains("compression")));
    assert!(out.report.presets.iter().all(|p| p.relative.is_none() && p.score.is_none()));
}

#[test]
fn scorer_failure_keeps_speed_and_ratio() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = corpus(dir.path(), &CLIPS);
    let mut s = FakeScorer::new(&[]);
    s.failing.push("c3.y4m".into());
    let pipeline = Pipeline::new(
        Box::new(FakeRunner::new(Duration::from_millis(1))),
        MetricCollector::new(Some(Arc::new(s))),
        Aggregator::default(),
    );

    let out = pipeline
        .run(&sweep(None), &corpus, &artifact_root(dir.path()), &CancelToken::new())
        .unwrap();

    let fast = out.report.preset("fast").unwrap();
    assert!(fast.coverage.is_complete());
    let c3 = fast.clips.iter().find(|c| c.clip_id == "c3.y4m").unwrap();
    assert_eq!(c3.metrics.quality, None);
    assert!(c3.metrics.speed_fps > 0.0);
    assert!((c3.metrics.compression_ratio - 10.0).abs() < 1e-12);

    let scorer_failures: Vec<_> = out
        .report
        .failures
        .iter()
        .filter(|f| f.kind == FailureKind::ScorerFailure)
        .collect();
    assert_eq!(scorer_failures.len(), 2);
}

#[test]
fn unreadable_artifact_is_a_measurement_failure() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = corpus(dir.path(), &CLIPS);
    let runner = FakeRunner::new(Duration::from_millis(1)).with("fast", "c1.y4m", Behavior::NoArtifact);
    let pipeline = Pipeline::new(Box::new(runner), MetricCollector::default(), Aggregator::default());

    let out = pipeline
        .run(&sweep(None), &corpus, &artifact_root(dir.path()), &CancelToken::new())
        .unwrap();

    let r = &out.outcome.results[0];
    assert_eq!(r.status, JobStatus::Success);
    assert!(!r.is_measured());
    assert_eq!(r.failure.as_ref().unwrap().kind, FailureKind::ArtifactUnreadable);
    assert_eq!(out.report.preset("fast").unwrap().coverage.measured, 2);
}

#[test]
fn aborted_sweep_is_flagged_in_report() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = corpus(dir.path(), &CLIPS);
    let mut runner = FakeRunner::new(Duration::from_millis(1));
    runner.cancel_on_start = Some(2);
    let collector = MetricCollector::default();
    let config = SweepConfiguration::new(
        ids(&CLIPS),
        presets(&["fast", "slow"]),
        1,
        Duration::from_secs(60),
        None,
    )
    .unwrap();

    let outcome = Scheduler::new(&runner, &collector, &corpus)
        .run(&config, &artifact_root(dir.path()), &CancelToken::new())
        .unwrap();
    let report = Aggregator::default().aggregate_sweep(&outcome, &config, &corpus);

    assert!(report.aborted);
    assert_eq!(report.total_jobs, 6);
    assert_eq!(report.completed_jobs, 2);
    let slow = report.preset("slow").unwrap();
    assert_eq!(slow.coverage.measured, 0);
    assert_eq!(slow.encoder.as_deref(), Some("libx264"));
}

#[test]
fn plain_aggregate_groups_by_first_appearance() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = corpus(dir.path(), &CLIPS);
    let runner = FakeRunner::new(Duration::from_millis(1));
    let collector = MetricCollector::default();
    let outcome = Scheduler::new(&runner, &collector, &corpus)
        .run(&sweep(None), &artifact_root(dir.path()), &CancelToken::new())
        .unwrap();

    let report = Aggregator::default().aggregate(&outcome.results, &corpus, None);
    let names: Vec<_> = report.presets.iter().map(|p| p.preset.as_str()).collect();
    assert_eq!(names, vec!["fast", "slow"]);
    assert_eq!(report.corpus_clips, 3);
    assert!(!report.baseline_missing);
}
