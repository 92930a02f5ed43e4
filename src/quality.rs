use crate::{
    process::{run_supervised, Termination},
    sweep::CancelToken,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Score reported for a lossless PSNR comparison (`average:inf`).
pub const PSNR_LOSSLESS: f64 = 100.0;

#[derive(Error, Debug)]
pub enum ScorerError {
    #[error("scorer could not run: {0}")]
    Launch(String),

    #[error("scorer exited unsuccessfully: {0}")]
    Failed(String),

    #[error("scorer timed out after {0:?}")]
    Timeout(Duration),

    #[error("scorer terminated by sweep cancellation")]
    Cancelled,

    #[error("no {0} score in scorer output")]
    Unparseable(&'static str),

    #[error("score {score} outside [{min}, {max}]")]
    OutOfRange { score: f64, min: f64, max: f64 },
}

/// Compares an encoded artifact against its reference. Must be a pure function
/// of its two inputs; `cancel` only cuts a running comparison short.
pub trait QualityScorer: Send + Sync {
    fn name(&self) -> &str;

    /// Inclusive range of valid scores.
    fn range(&self) -> (f64, f64);

    fn score(&self, reference: &Path, candidate: &Path, cancel: &CancelToken) -> Result<f64, ScorerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityMetric {
    Psnr,
    Ssim,
}

impl QualityMetric {
    pub fn filter(self) -> &'static str {
        match self {
            QualityMetric::Psnr => "psnr",
            QualityMetric::Ssim => "ssim",
        }
    }

    pub fn range(self) -> (f64, f64) {
        match self {
            QualityMetric::Psnr => (0.0, PSNR_LOSSLESS),
            QualityMetric::Ssim => (0.0, 1.0),
        }
    }
}

/// PSNR/SSIM through ffmpeg's lavfi filters with both inputs re-based to
/// start at PTS 0.
#[derive(Debug, Clone)]
pub struct FfmpegScorer {
    exe: PathBuf,
    metric: QualityMetric,
    timeout: Duration,
}

impl FfmpegScorer {
    pub fn new(exe: impl Into<PathBuf>, metric: QualityMetric, timeout: Duration) -> Self {
        Self {
            exe: exe.into(),
            metric,
            timeout,
        }
    }
}

impl QualityScorer for FfmpegScorer {
    fn name(&self) -> &str {
        self.metric.filter()
    }

    fn range(&self) -> (f64, f64) {
        self.metric.range()
    }

    fn score(&self, reference: &Path, candidate: &Path, cancel: &CancelToken) -> Result<f64, ScorerError> {
        let graph = format!(
            "[0:v]setpts=PTS-STARTPTS[ref];[1:v]setpts=PTS-STARTPTS[dist];[dist][ref]{}",
            self.metric.filter()
        );
        let mut cmd = Command::new(&self.exe);
        cmd.args(["-hide_banner", "-nostdin", "-i"]);
        cmd.arg(reference);
        cmd.arg("-i");
        cmd.arg(candidate);
        cmd.args(["-lavfi", &graph, "-f", "null", "-"]);

        let out = run_supervised(&mut cmd, Some(self.timeout), Some(cancel))
            .map_err(|e| ScorerError::Launch(format!("{e:#}")))?;
        let stderr = out.stderr_lossy();
        match out.termination {
            Termination::Exited(status) if status.success() => {}
            Termination::Exited(_) => return Err(ScorerError::Failed(stderr)),
            Termination::Cancelled => return Err(ScorerError::Cancelled),
            Termination::TimedOut => return Err(ScorerError::Timeout(self.timeout)),
        }

        let score = match self.metric {
            QualityMetric::Psnr => parse_psnr(&stderr)?,
            QualityMetric::Ssim => parse_ssim(&stderr)?,
        };
        check_range(score, self.range())
    }
}

pub fn check_range(score: f64, (min, max): (f64, f64)) -> Result<f64, ScorerError> {
    if score.is_nan() || score < min || score > max {
        return Err(ScorerError::OutOfRange { score, min, max });
    }
    Ok(score)
}

/// Average PSNR from ffmpeg's psnr filter summary. Identical inputs report
/// `average:inf`, mapped to [`PSNR_LOSSLESS`].
pub fn parse_psnr(log: &str) -> Result<f64, ScorerError> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"average:([0-9]+(?:\.[0-9]+)?|inf)").expect("static psnr regex")
    });
    let cap = re
        .captures_iter(log)
        .last()
        .ok_or(ScorerError::Unparseable("psnr"))?;
    match &cap[1] {
        "inf" => Ok(PSNR_LOSSLESS),
        v => v.parse().map_err(|_| ScorerError::Unparseable("psnr")),
    }
}

/// Overall SSIM (`All:`) from ffmpeg's ssim filter summary.
pub fn parse_ssim(log: &str) -> Result<f64, ScorerError> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"All:([0-9]+(?:\.[0-9]+)?)").expect("static ssim regex"));
    let cap = re
        .captures_iter(log)
        .last()
        .ok_or(ScorerError::Unparseable("ssim"))?;
    cap[1].parse().map_err(|_| ScorerError::Unparseable("ssim"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_psnr_summary() {
        let log = "frame=  300 fps=0.0 q=-0.0 Lsize=N/A\n\
                   [Parsed_psnr_2 @ 0x55] PSNR y:41.52 u:45.10 v:45.87 average:42.611523 min:38.20 max:47.91";
        assert!((parse_psnr(log).unwrap() - 42.611523).abs() < 1e-9);
    }

    #[test]
    fn lossless_psnr_is_capped() {
        let log = "[Parsed_psnr_2 @ 0x55] PSNR y:inf u:inf v:inf average:inf min:inf max:inf";
        assert_eq!(parse_psnr(log).unwrap(), PSNR_LOSSLESS);
    }

    #[test]
    fn parses_ssim_summary() {
        let log = "[Parsed_ssim_2 @ 0x5] SSIM Y:0.981 (17.2) U:0.99 (20.1) V:0.99 (20.3) All:0.984512 (18.07)";
        assert!((parse_ssim(log).unwrap() - 0.984512).abs() < 1e-9);
    }

    #[test]
    fn missing_score_is_error() {
        assert!(matches!(parse_psnr("garbage"), Err(ScorerError::Unparseable("psnr"))));
        assert!(check_range(1.5, QualityMetric::Ssim.range()).is_err());
    }
}
