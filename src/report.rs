use crate::{
    job::{Failure, FailureKind, JobResult, JobStatus},
    metrics::MetricSet,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub aborted: bool,
    pub total_jobs: usize,
    pub completed_jobs: usize,
    pub corpus_clips: usize,
    pub quality_metric: Option<String>,
    pub baseline: Option<String>,
    /// Set when a baseline was requested but could not be used.
    pub baseline_missing: bool,
    pub warnings: Vec<String>,
    pub presets: Vec<PresetReport>,
    pub failures: Vec<FailureEntry>,
}

impl Report {
    pub fn preset(&self, name: &str) -> Option<&PresetReport> {
        self.presets.iter().find(|p| p.preset == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetReport {
    pub preset: String,
    pub encoder: Option<String>,
    pub clips: Vec<ClipMetrics>,
    pub coverage: Coverage,
    pub summary: PresetSummary,
    /// Reduced metrics divided by the baseline's.
    pub relative: Option<RelativeFigures>,
    /// Weighted geometric mean of the relative figures.
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipMetrics {
    pub clip_id: String,
    pub metrics: MetricSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    pub measured: usize,
    pub total: usize,
    pub fraction: f64,
}

impl Coverage {
    pub fn new(measured: usize, total: usize) -> Self {
        let fraction = if total == 0 {
            0.0
        } else {
            measured as f64 / total as f64
        };
        Self {
            measured,
            total,
            fraction,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.measured == self.total
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresetSummary {
    pub mean_speed_fps: Option<f64>,
    /// Speed at the configured low percentile (the slow clips).
    pub speed_tail_fps: Option<f64>,
    pub geomean_compression_ratio: Option<f64>,
    pub mean_output_bitrate_bps: Option<f64>,
    pub mean_quality: Option<f64>,
    pub median_quality: Option<f64>,
    /// Quality at the configured low percentile (the worst clips).
    pub quality_tail: Option<f64>,
    pub total_wall_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelativeFigures {
    pub speed: f64,
    pub compression_ratio: f64,
    pub quality: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub preset: String,
    pub clip_id: String,
    /// Encode status; absent for jobs rejected before dispatch.
    pub status: Option<JobStatus>,
    pub kind: FailureKind,
    pub diagnostic: String,
}

/// Flat per-job record for `results.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub preset: String,
    pub clip_id: String,
    pub encoder: String,
    pub params: Vec<String>,
    pub output_path: PathBuf,
    #[serde(flatten)]
    pub status: JobStatus,
    pub wall_seconds: f64,
    pub artifact_bytes: Option<u64>,
    pub metrics: Option<MetricSet>,
    pub failure: Option<Failure>,
}

impl From<&JobResult> for JobRecord {
    fn from(r: &JobResult) -> Self {
        let d = &r.descriptor;
        Self {
            preset: d.preset().to_string(),
            clip_id: d.clip_id().to_string(),
            encoder: d.encoder().to_string(),
            params: d.params().to_vec(),
            output_path: d.output_path().to_path_buf(),
            status: r.status.clone(),
            wall_seconds: r.duration.as_secs_f64(),
            artifact_bytes: r.artifact_bytes,
            metrics: r.metrics.clone(),
            failure: r.failure.clone(),
        }
    }
}
