use crate::{
    corpus::ClipInfo,
    job::{Failure, FailureKind, JobResult, JobStatus},
    quality::{QualityScorer, ScorerError},
    sweep::CancelToken,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Measurements derived from one successful job and its reference clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    /// Source frames encoded per wall-clock second. Two-pass jobs count every
    /// frame once per pass.
    pub speed_fps: f64,
    pub wall_seconds: f64,
    /// Reference bytes / artifact bytes.
    pub compression_ratio: f64,
    pub output_bytes: u64,
    pub output_bitrate_bps: Option<f64>,
    /// Absent when no scorer is configured or the scorer failed.
    pub quality: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Error, Debug)]
pub enum MeasureError {
    #[error("job did not succeed: {0:?}")]
    NotSuccessful(JobStatus),

    #[error("artifact unreadable: {}: {reason}", path.display())]
    ArtifactUnreadable { path: PathBuf, reason: String },

    #[error("quality scoring terminated by sweep cancellation")]
    Cancelled,
}

#[derive(Clone, Default)]
pub struct MetricCollector {
    scorer: Option<Arc<dyn QualityScorer>>,
}

impl MetricCollector {
    pub fn new(scorer: Option<Arc<dyn QualityScorer>>) -> Self {
        Self { scorer }
    }

    pub fn scorer_name(&self) -> Option<&str> {
        self.scorer.as_deref().map(|s| s.name())
    }

    /// Measures a successful result against its reference clip. Depends only
    /// on the result, the clip and the artifact on disk, so repeated calls
    /// agree. A fired `cancel` stops a running scorer.
    pub fn measure(&self, result: &JobResult, clip: &ClipInfo, cancel: &CancelToken) -> Result<MetricSet, MeasureError> {
        if !result.status.is_success() {
            return Err(MeasureError::NotSuccessful(result.status.clone()));
        }

        let artifact = result.descriptor.output_path();
        let unreadable = |reason: String| MeasureError::ArtifactUnreadable {
            path: artifact.to_path_buf(),
            reason,
        };
        let output_bytes = File::open(artifact)
            .and_then(|f| f.metadata())
            .map_err(|e| unreadable(e.to_string()))?
            .len();
        if output_bytes == 0 {
            return Err(unreadable("artifact is empty".into()));
        }

        let wall_seconds = result.duration.as_secs_f64();
        let frames = clip.frame_count * u64::from(result.descriptor.passes());
        let speed_fps = frames as f64 / wall_seconds.max(f64::EPSILON);
        let compression_ratio = clip.byte_size as f64 / output_bytes as f64;
        let clip_secs = clip.duration_secs();
        let output_bitrate_bps = (clip_secs > 0.0).then(|| output_bytes as f64 * 8.0 / clip_secs);

        let mut warnings = Vec::new();
        let quality = match self.scorer.as_deref() {
            Some(scorer) => match scorer.score(&clip.path, artifact, cancel) {
                Ok(score) => Some(score),
                Err(ScorerError::Cancelled) => return Err(MeasureError::Cancelled),
                Err(err) => {
                    warn!(
                        "{} scorer failed for {}/{}: {err}",
                        scorer.name(),
                        result.descriptor.preset(),
                        result.descriptor.clip_id()
                    );
                    warnings.push(format!("{}: {err}", scorer.name()));
                    None
                }
            },
            None => None,
        };

        Ok(MetricSet {
            speed_fps,
            wall_seconds,
            compression_ratio,
            output_bytes,
            output_bitrate_bps,
            quality,
            warnings,
        })
    }

    /// Attaches measurements to a runner result. Failed encodes pass through
    /// untouched; an unreadable artifact becomes a measurement failure and
    /// cancelled scoring turns the job `Cancelled`.
    pub fn complete(&self, result: JobResult, clip: &ClipInfo, cancel: &CancelToken) -> JobResult {
        if !result.status.is_success() {
            return result;
        }
        match self.measure(&result, clip, cancel) {
            Ok(metrics) => JobResult {
                artifact_bytes: Some(metrics.output_bytes),
                metrics: Some(metrics),
                ..result
            },
            Err(MeasureError::Cancelled) => {
                warn!(
                    "scoring cancelled for {}/{}",
                    result.descriptor.preset(),
                    result.descriptor.clip_id()
                );
                JobResult {
                    status: JobStatus::Cancelled,
                    metrics: None,
                    failure: Some(Failure::new(FailureKind::Cancelled, MeasureError::Cancelled.to_string())),
                    ..result
                }
            }
            Err(err) => {
                warn!(
                    "measurement failed for {}/{}: {err}",
                    result.descriptor.preset(),
                    result.descriptor.clip_id()
                );
                JobResult {
                    metrics: None,
                    failure: Some(Failure::new(FailureKind::ArtifactUnreadable, err.to_string())),
                    ..result
                }
            }
        }
    }
}

