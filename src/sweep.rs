use crate::{
    corpus::Corpus,
    encoder::{discard_artifact, ProcessRunner},
    error::{BenchError, Result},
    job::{Failure, FailureKind, JobDescriptor, JobResult, JobStatus, OutputRegistry},
    metrics::MetricCollector,
    preset::Preset,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Sweep-level cancellation. Cloned into every worker; once fired (explicitly
/// or by the optional deadline) no new job is dispatched and running encodes
/// are terminated.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Cross product of clips and presets plus the limits it runs under.
#[derive(Debug, Clone)]
pub struct SweepConfiguration {
    clips: Vec<String>,
    presets: Vec<Preset>,
    concurrency_limit: usize,
    job_timeout: Duration,
    baseline: Option<String>,
}

impl SweepConfiguration {
    pub fn new(
        clips: Vec<String>,
        presets: Vec<Preset>,
        concurrency_limit: i64,
        job_timeout: Duration,
        baseline: Option<String>,
    ) -> Result<Self> {
        let invalid = |msg: String| Err(BenchError::SweepConfigurationInvalid(msg));

        if clips.is_empty() {
            return invalid("clip set is empty".into());
        }
        if presets.is_empty() {
            return invalid("preset set is empty".into());
        }
        if concurrency_limit <= 0 {
            return invalid(format!("concurrency limit must be positive, got {concurrency_limit}"));
        }
        if job_timeout.is_zero() {
            return invalid("per-job timeout must be positive".into());
        }
        let mut seen = HashSet::new();
        if let Some(dup) = clips.iter().find(|c| !seen.insert(c.as_str())) {
            return invalid(format!("clip listed twice: {dup}"));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = presets.iter().find(|p| !seen.insert(p.name.as_str())) {
            return invalid(format!("preset listed twice: {}", dup.name));
        }

        Ok(Self {
            clips,
            presets,
            concurrency_limit: concurrency_limit as usize,
            job_timeout,
            baseline: baseline.filter(|b| !b.is_empty()),
        })
    }

    pub fn clips(&self) -> &[String] {
        &self.clips
    }

    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub fn job_timeout(&self) -> Duration {
        self.job_timeout
    }

    pub fn baseline(&self) -> Option<&str> {
        self.baseline.as_deref()
    }

    /// Builds one descriptor per (preset, clip) pair, presets outer and clips
    /// inner. Pairs that fail validation are reported and left out.
    pub fn expand(&self, corpus: &dyn Corpus, artifact_dir: &Path) -> Expansion {
        let mut outputs = OutputRegistry::new();
        let mut jobs = Vec::with_capacity(self.presets.len() * self.clips.len());
        let mut rejected = Vec::new();

        for preset in &self.presets {
            for clip_id in &self.clips {
                let output = artifact_path(corpus, artifact_dir, preset, clip_id);
                match JobDescriptor::build(corpus, &mut outputs, clip_id, preset, output) {
                    Ok(job) => jobs.push(Arc::new(job)),
                    Err(err) => {
                        warn!("rejected job {}/{}: {err}", preset.name, clip_id);
                        rejected.push(Rejection {
                            preset: preset.name.clone(),
                            clip_id: clip_id.clone(),
                            failure: Failure::new(FailureKind::from_build_error(&err), err.to_string()),
                        });
                    }
                }
            }
        }

        Expansion { jobs, rejected }
    }
}

fn artifact_path(corpus: &dyn Corpus, dir: &Path, preset: &Preset, clip_id: &str) -> PathBuf {
    let stem = match corpus.resolve(clip_id) {
        Ok(clip) => clip.stem(),
        Err(_) => Path::new(clip_id)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(clip_id)
            .to_string(),
    };
    dir.join(&preset.name).join(format!("{stem}.{}", preset.container))
}

#[derive(Debug, Clone)]
pub struct Expansion {
    pub jobs: Vec<Arc<JobDescriptor>>,
    pub rejected: Vec<Rejection>,
}

/// A (preset, clip) pair that never became a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub preset: String,
    pub clip_id: String,
    pub failure: Failure,
}

#[derive(Debug)]
pub struct SweepOutcome {
    /// Results in dispatch order. Shorter than the job list only when aborted.
    pub results: Vec<JobResult>,
    pub rejected: Vec<Rejection>,
    pub total_jobs: usize,
    pub aborted: bool,
    pub wall: Duration,
}

/// Dispatches expanded jobs over a fixed pool of workers.
pub struct Scheduler<'a> {
    runner: &'a dyn ProcessRunner,
    collector: &'a MetricCollector,
    corpus: &'a dyn Corpus,
    keep_artifacts: bool,
}

impl<'a> Scheduler<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, collector: &'a MetricCollector, corpus: &'a dyn Corpus) -> Self {
        Self {
            runner,
            collector,
            corpus,
            keep_artifacts: true,
        }
    }

    pub fn keep_artifacts(mut self, keep: bool) -> Self {
        self.keep_artifacts = keep;
        self
    }

    /// Expands `config` and runs every job. Individual job failures are part of
    /// the outcome; only an invalid configuration is an error.
    pub fn run(&self, config: &SweepConfiguration, artifact_dir: &Path, cancel: &CancelToken) -> Result<SweepOutcome> {
        if self.corpus.is_empty() {
            return Err(BenchError::SweepConfigurationInvalid("corpus has no clips".into()));
        }
        let expansion = config.expand(self.corpus, artifact_dir);
        Ok(self.dispatch(config, expansion, cancel))
    }

    pub fn dispatch(&self, config: &SweepConfiguration, expansion: Expansion, cancel: &CancelToken) -> SweepOutcome {
        let started = Instant::now();
        let jobs = expansion.jobs;
        let total = jobs.len();
        let workers = config.concurrency_limit().min(total).max(1);
        info!(
            "sweep jobs={} rejected={} workers={} runner={} timeout={:?}",
            total,
            expansion.rejected.len(),
            workers,
            self.runner.name(),
            config.job_timeout()
        );

        // One write-once slot per job; a slot is filled only by the worker that
        // claimed its index.
        let slots: Vec<OnceLock<JobResult>> = (0..total).map(|_| OnceLock::new()).collect();
        let next = AtomicUsize::new(0);
        let done = AtomicUsize::new(0);
        let stopped_early = AtomicBool::new(false);

        std::thread::scope(|scope| {
            for worker in 0..workers {
                let (jobs, slots, next, done, stopped_early) = (&jobs, &slots, &next, &done, &stopped_early);
                scope.spawn(move || loop {
                    let idx = next.fetch_add(1, Ordering::SeqCst);
                    if idx >= total {
                        break;
                    }
                    if cancel.is_cancelled() {
                        stopped_early.store(true, Ordering::SeqCst);
                        break;
                    }

                    let job = jobs[idx].clone();
                    debug!("worker {worker} dispatch #{idx} {}/{}", job.preset(), job.clip_id());
                    let result = self.process(job, config.job_timeout(), cancel);
                    let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                    log_completion(finished, total, &result);

                    if slots[idx].set(result).is_err() {
                        error!("result slot {idx} written twice");
                    }
                });
            }
        });

        let results: Vec<JobResult> = slots.into_iter().filter_map(OnceLock::into_inner).collect();
        let aborted = stopped_early.load(Ordering::SeqCst)
            || results.iter().any(|r| r.status == JobStatus::Cancelled);
        if aborted {
            warn!("sweep aborted after {} of {} jobs", results.len(), total);
        }

        SweepOutcome {
            results,
            rejected: expansion.rejected,
            total_jobs: total,
            aborted,
            wall: started.elapsed(),
        }
    }

    fn process(&self, job: Arc<JobDescriptor>, timeout: Duration, cancel: &CancelToken) -> JobResult {
        let clip = match self.corpus.resolve(job.clip_id()) {
            Ok(clip) => clip,
            Err(err) => {
                return JobResult {
                    descriptor: job,
                    status: JobStatus::Crashed,
                    duration: Duration::ZERO,
                    artifact_bytes: None,
                    metrics: None,
                    failure: Some(Failure::new(FailureKind::ClipNotFound, err.to_string())),
                };
            }
        };

        let result = self.runner.run(job, timeout, cancel);
        let result = self.collector.complete(result, clip, cancel);
        if !self.keep_artifacts {
            discard_artifact(result.descriptor.output_path());
        }
        result
    }
}

fn log_completion(finished: usize, total: usize, result: &JobResult) {
    let job = &result.descriptor;
    match (&result.status, &result.metrics) {
        (JobStatus::Success, Some(m)) => info!(
            "[{finished}/{total}] {}/{} ok {:.2}s speed={:.1}fps ratio={:.2} quality={:?}",
            job.preset(),
            job.clip_id(),
            m.wall_seconds,
            m.speed_fps,
            m.compression_ratio,
            m.quality
        ),
        (status, _) => warn!(
            "[{finished}/{total}] {}/{} {:?} after {:.2}s: {}",
            job.preset(),
            job.clip_id(),
            status,
            result.duration.as_secs_f64(),
            result
                .failure
                .as_ref()
                .map(|f| f.diagnostic.lines().last().unwrap_or("").to_string())
                .unwrap_or_default()
        ),
    }
}
