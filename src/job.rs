use crate::{
    corpus::Corpus,
    error::{BenchError, Result},
    metrics::MetricSet,
    preset::Preset,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// One benchmark unit: a clip encoded under one preset. Immutable once built;
/// equality and hashing use the identity fields (clip, encoder, parameters,
/// output path) only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    clip_id: String,
    preset: String,
    encoder: String,
    params: Vec<String>,
    passes: u8,
    input: PathBuf,
    output_path: PathBuf,
}

impl JobDescriptor {
    /// Validates and builds a descriptor. The clip must resolve in `corpus`,
    /// the resolved parameter list must be non-empty and `output_path` must not
    /// have been claimed earlier in the same sweep.
    pub fn build(
        corpus: &dyn Corpus,
        outputs: &mut OutputRegistry,
        clip_id: &str,
        preset: &Preset,
        output_path: PathBuf,
    ) -> Result<Self> {
        let clip = corpus.resolve(clip_id)?;
        let params = preset.resolve_params(clip)?;
        outputs.claim(&output_path)?;

        Ok(Self {
            clip_id: clip_id.to_string(),
            preset: preset.name.clone(),
            encoder: preset.encoder.clone(),
            params,
            passes: preset.passes.max(1),
            input: clip.path.clone(),
            output_path,
        })
    }

    pub fn clip_id(&self) -> &str {
        &self.clip_id
    }

    pub fn preset(&self) -> &str {
        &self.preset
    }

    pub fn encoder(&self) -> &str {
        &self.encoder
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn passes(&self) -> u8 {
        self.passes
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}

impl PartialEq for JobDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.clip_id == other.clip_id
            && self.encoder == other.encoder
            && self.params == other.params
            && self.output_path == other.output_path
    }
}

impl Eq for JobDescriptor {}

impl Hash for JobDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.clip_id.hash(state);
        self.encoder.hash(state);
        self.params.hash(state);
        self.output_path.hash(state);
    }
}

/// Output paths handed out during one sweep.
#[derive(Debug, Default)]
pub struct OutputRegistry {
    used: HashSet<PathBuf>,
}

impl OutputRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&mut self, path: &Path) -> Result<()> {
        if !self.used.insert(path.to_path_buf()) {
            return Err(BenchError::DuplicateOutputPath(path.to_path_buf()));
        }
        Ok(())
    }
}

/// Terminal state of the encode step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    EncodeFailed { exit_code: Option<i32> },
    Timeout,
    Crashed,
    /// Forcibly terminated by sweep-level cancellation.
    Cancelled,
}

impl JobStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    DuplicateOutputPath,
    ClipNotFound,
    EmptyParameters,
    EncodeFailed,
    Timeout,
    Crashed,
    Cancelled,
    ArtifactUnreadable,
    ScorerFailure,
}

impl FailureKind {
    pub fn from_build_error(err: &BenchError) -> Self {
        match err {
            BenchError::DuplicateOutputPath(_) => FailureKind::DuplicateOutputPath,
            BenchError::ClipNotFound(_) => FailureKind::ClipNotFound,
            _ => FailureKind::EmptyParameters,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub diagnostic: String,
}

impl Failure {
    pub fn new(kind: FailureKind, diagnostic: impl Into<String>) -> Self {
        Self {
            kind,
            diagnostic: diagnostic.into(),
        }
    }
}

/// Outcome of one job, written once by the worker that processed it.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub descriptor: Arc<JobDescriptor>,
    pub status: JobStatus,
    pub duration: Duration,
    /// Artifact size; absent when the encode did not produce a trusted output.
    pub artifact_bytes: Option<u64>,
    /// Present only when the job was fully measured.
    pub metrics: Option<MetricSet>,
    /// Encode or measurement failure, with the diagnostic kept verbatim.
    pub failure: Option<Failure>,
}

impl JobResult {
    pub fn quality(&self) -> Option<f64> {
        self.metrics.as_ref().and_then(|m| m.quality)
    }

    /// Encoded and measured; counts towards coverage.
    pub fn is_measured(&self) -> bool {
        self.status.is_success() && self.metrics.is_some()
    }
}
