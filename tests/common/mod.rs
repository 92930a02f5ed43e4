#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use vbench_harness::{
    corpus::{ClipInfo, StaticCorpus},
    encoder::ProcessRunner,
    job::{Failure, FailureKind, JobDescriptor, JobResult, JobStatus},
    preset::Preset,
    quality::{QualityScorer, ScorerError},
    sweep::CancelToken,
};

pub fn clip(dir: &Path, id: &str) -> ClipInfo {
    ClipInfo {
        id: id.to_string(),
        path: dir.join(id),
        frame_count: 100,
        byte_size: 1_000_000,
        width: 640,
        height: 360,
        framerate: 25.0,
        bit_depth: 8,
        pix_fmt: Some("yuv420p".into()),
    }
}

pub fn corpus(dir: &Path, ids: &[&str]) -> StaticCorpus {
    StaticCorpus::new(ids.iter().map(|id| clip(dir, id)))
}

pub fn presets(names: &[&str]) -> Vec<Preset> {
    names
        .iter()
        .map(|n| Preset::new(*n, &["-preset", *n]))
        .collect()
}

pub fn ids(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed { bytes: usize },
    Fail { code: i32, stderr: String },
    Timeout,
    NoArtifact,
}

/// In-process stand-in for an encoder: sleeps, then writes a fixed-size
/// artifact or reports the configured failure.
pub struct FakeRunner {
    pub delay: Duration,
    pub default_bytes: usize,
    pub bytes_by_preset: HashMap<String, usize>,
    pub overrides: HashMap<(String, String), Behavior>,
    pub delays: HashMap<(String, String), Duration>,
    pub cancel_on_start: Option<usize>,
    started: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    pub started_order: Mutex<Vec<(String, String)>>,
    pub finished_order: Mutex<Vec<(String, String)>>,
}

impl FakeRunner {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            default_bytes: 100_000,
            bytes_by_preset: HashMap::new(),
            overrides: HashMap::new(),
            delays: HashMap::new(),
            cancel_on_start: None,
            started: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            started_order: Mutex::new(Vec::new()),
            finished_order: Mutex::new(Vec::new()),
        }
    }

    pub fn with(mut self, preset: &str, clip: &str, behavior: Behavior) -> Self {
        self.overrides
            .insert((preset.to_string(), clip.to_string()), behavior);
        self
    }

    pub fn with_delay(mut self, preset: &str, clip: &str, delay: Duration) -> Self {
        self.delays.insert((preset.to_string(), clip.to_string()), delay);
        self
    }

    pub fn with_preset_bytes(mut self, preset: &str, bytes: usize) -> Self {
        self.bytes_by_preset.insert(preset.to_string(), bytes);
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

impl ProcessRunner for FakeRunner {
    fn name(&self) -> &str {
        "fake"
    }

    fn run(&self, job: Arc<JobDescriptor>, _timeout: Duration, cancel: &CancelToken) -> JobResult {
        let n = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.started_order
            .lock()
            .unwrap()
            .push((job.preset().to_string(), job.clip_id().to_string()));
        if self.cancel_on_start == Some(n) {
            cancel.cancel();
        }

        let key = (job.preset().to_string(), job.clip_id().to_string());
        let delay = self.delays.get(&key).copied().unwrap_or(self.delay);

        let t0 = Instant::now();
        std::thread::sleep(delay);
        let duration = t0.elapsed();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.finished_order.lock().unwrap().push(key.clone());

        let behavior = self.overrides.get(&key).cloned().unwrap_or(Behavior::Succeed {
            bytes: *self
                .bytes_by_preset
                .get(job.preset())
                .unwrap_or(&self.default_bytes),
        });

        let fail = |status: JobStatus, kind: FailureKind, msg: String| JobResult {
            descriptor: job.clone(),
            status,
            duration,
            artifact_bytes: None,
            metrics: None,
            failure: Some(Failure::new(kind, msg)),
        };

        if cancel.is_cancelled() {
            return fail(JobStatus::Cancelled, FailureKind::Cancelled, "cancelled".into());
        }

        match behavior {
            Behavior::Succeed { bytes } => {
                write_artifact(job.output_path(), bytes);
                JobResult {
                    descriptor: job.clone(),
                    status: JobStatus::Success,
                    duration,
                    artifact_bytes: Some(bytes as u64),
                    metrics: None,
                    failure: None,
                }
            }
            Behavior::NoArtifact => JobResult {
                descriptor: job.clone(),
                status: JobStatus::Success,
                duration,
                artifact_bytes: None,
                metrics: None,
                failure: None,
            },
            Behavior::Fail { code, stderr } => fail(
                JobStatus::EncodeFailed {
                    exit_code: Some(code),
                },
                FailureKind::EncodeFailed,
                stderr,
            ),
            Behavior::Timeout => fail(JobStatus::Timeout, FailureKind::Timeout, "timed out".into()),
        }
    }
}

pub fn write_artifact(path: &Path, bytes: usize) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, vec![0u8; bytes]).unwrap();
}

/// Scores by clip id; listed clips fail.
pub struct FakeScorer {
    pub scores: HashMap<String, f64>,
    pub failing: Vec<String>,
    pub calls: AtomicUsize,
}

impl FakeScorer {
    pub fn new(scores: &[(&str, f64)]) -> Self {
        Self {
            scores: scores.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            failing: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl QualityScorer for FakeScorer {
    fn name(&self) -> &str {
        "fake-psnr"
    }

    fn range(&self) -> (f64, f64) {
        (0.0, 100.0)
    }

    fn score(&self, reference: &Path, _candidate: &Path, _cancel: &CancelToken) -> Result<f64, ScorerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let id = reference
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        if self.failing.contains(&id) {
            return Err(ScorerError::Failed(format!("cannot decode {id}")));
        }
        Ok(*self.scores.get(&id).unwrap_or(&40.0))
    }
}

pub fn artifact_root(dir: &Path) -> PathBuf {
    dir.join("artifacts")
}
