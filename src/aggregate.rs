use crate::{
    corpus::Corpus,
    job::{FailureKind, JobResult},
    report::{ClipMetrics, Coverage, FailureEntry, PresetReport, PresetSummary, RelativeFigures, Report},
    sweep::{SweepConfiguration, SweepOutcome},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

/// How reduced metrics are summarized and combined into one comparative score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringPolicy {
    pub speed_weight: f64,
    pub compression_weight: f64,
    pub quality_weight: f64,
    /// Low percentile (0..=100) reported for speed.
    pub speed_percentile: f64,
    /// Low percentile (0..=100) reported for quality.
    pub quality_tail_percentile: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            speed_weight: 1.0,
            compression_weight: 1.0,
            quality_weight: 1.0,
            speed_percentile: 10.0,
            quality_tail_percentile: 10.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    policy: ScoringPolicy,
    quality_metric: Option<String>,
}

impl Aggregator {
    pub fn new(policy: ScoringPolicy) -> Self {
        Self {
            policy,
            quality_metric: None,
        }
    }

    pub fn with_quality_metric(mut self, name: Option<&str>) -> Self {
        self.quality_metric = name.map(str::to_string);
        self
    }

    /// Reduces `results` per preset (in order of first appearance). Coverage
    /// is measured against every clip of `corpus`.
    pub fn aggregate(&self, results: &[JobResult], corpus: &dyn Corpus, baseline: Option<&str>) -> Report {
        let mut order: Vec<String> = Vec::new();
        for r in results {
            if !order.iter().any(|p| p == r.descriptor.preset()) {
                order.push(r.descriptor.preset().to_string());
            }
        }
        self.build(results, corpus, baseline, &order)
    }

    /// Report for a whole sweep: presets in configuration order (including
    /// ones that produced no result), rejected jobs listed as failures and the
    /// abort marker carried over.
    pub fn aggregate_sweep(&self, outcome: &SweepOutcome, config: &SweepConfiguration, corpus: &dyn Corpus) -> Report {
        let order: Vec<String> = config.presets().iter().map(|p| p.name.clone()).collect();
        let mut report = self.build(&outcome.results, corpus, config.baseline(), &order);

        for p in &mut report.presets {
            if p.encoder.is_none() {
                p.encoder = config
                    .presets()
                    .iter()
                    .find(|c| c.name == p.preset)
                    .map(|c| c.encoder.clone());
            }
        }

        let rejected = outcome.rejected.iter().map(|r| FailureEntry {
            preset: r.preset.clone(),
            clip_id: r.clip_id.clone(),
            status: None,
            kind: r.failure.kind,
            diagnostic: r.failure.diagnostic.clone(),
        });
        report.failures.splice(0..0, rejected);

        report.aborted = outcome.aborted;
        report.total_jobs = outcome.total_jobs;
        if outcome.aborted {
            report.warnings.push(format!(
                "sweep aborted: {} of {} jobs reached a terminal state",
                outcome.results.len(),
                outcome.total_jobs
            ));
        }
        report
    }

    fn build(&self, results: &[JobResult], corpus: &dyn Corpus, baseline: Option<&str>, order: &[String]) -> Report {
        let corpus_clips = corpus.len();
        let mut presets: Vec<PresetReport> = order
            .iter()
            .map(|name| self.reduce_preset(name, results, corpus_clips))
            .collect();

        let mut warnings = Vec::new();
        let mut baseline_missing = false;

        if let Some(base_name) = baseline {
            let base_summary = presets
                .iter()
                .find(|p| p.preset == base_name)
                .map(|p| p.summary.clone());
            match base_summary {
                Some(base) if relative_figures(&base, &base).is_some() => {
                    for p in &mut presets {
                        p.relative = relative_figures(&p.summary, &base);
                        p.score = p.relative.as_ref().and_then(|r| self.composite(r));
                    }
                }
                Some(base) if base.mean_speed_fps.is_some() => {
                    baseline_missing = true;
                    warnings.push(format!(
                        "baseline preset {base_name} has no usable compression ratio; relative figures omitted"
                    ));
                }
                Some(_) => {
                    baseline_missing = true;
                    warnings.push(format!(
                        "baseline preset {base_name} has no measured clips; relative figures omitted"
                    ));
                }
                None => {
                    baseline_missing = true;
                    warnings.push(format!(
                        "baseline preset {base_name} not present in results; relative figures omitted"
                    ));
                }
            }
        }
        for w in &warnings {
            warn!("{w}");
        }

        for p in &presets {
            if !p.coverage.is_complete() {
                info!(
                    "preset {} coverage {}/{}",
                    p.preset, p.coverage.measured, p.coverage.total
                );
            }
        }

        Report {
            aborted: false,
            total_jobs: results.len(),
            completed_jobs: results.len(),
            corpus_clips,
            quality_metric: self.quality_metric.clone(),
            baseline: baseline.map(str::to_string),
            baseline_missing,
            warnings,
            presets,
            failures: failure_entries(results),
        }
    }

    fn reduce_preset(&self, name: &str, results: &[JobResult], corpus_clips: usize) -> PresetReport {
        let own: Vec<&JobResult> = results.iter().filter(|r| r.descriptor.preset() == name).collect();

        let clips: Vec<ClipMetrics> = own
            .iter()
            .filter(|r| r.is_measured())
            .filter_map(|r| {
                r.metrics.as_ref().map(|m| ClipMetrics {
                    clip_id: r.descriptor.clip_id().to_string(),
                    metrics: m.clone(),
                })
            })
            .collect();

        let measured: HashSet<&str> = clips.iter().map(|c| c.clip_id.as_str()).collect();
        let coverage = Coverage::new(measured.len(), corpus_clips);

        let speeds: Vec<f64> = clips.iter().map(|c| c.metrics.speed_fps).collect();
        let ratios: Vec<f64> = clips.iter().map(|c| c.metrics.compression_ratio).collect();
        let bitrates: Vec<f64> = clips.iter().filter_map(|c| c.metrics.output_bitrate_bps).collect();
        let qualities: Vec<f64> = clips.iter().filter_map(|c| c.metrics.quality).collect();

        let summary = PresetSummary {
            mean_speed_fps: mean(&speeds),
            speed_tail_fps: percentile(&speeds, self.policy.speed_percentile),
            geomean_compression_ratio: geometric_mean(&ratios),
            mean_output_bitrate_bps: mean(&bitrates),
            mean_quality: mean(&qualities),
            median_quality: percentile(&qualities, 50.0),
            quality_tail: percentile(&qualities, self.policy.quality_tail_percentile),
            total_wall_seconds: own.iter().map(|r| r.duration.as_secs_f64()).sum(),
        };

        PresetReport {
            preset: name.to_string(),
            encoder: own.first().map(|r| r.descriptor.encoder().to_string()),
            clips,
            coverage,
            summary,
            relative: None,
            score: None,
        }
    }

    /// Weighted geometric mean of the available relative figures.
    fn composite(&self, rel: &RelativeFigures) -> Option<f64> {
        let mut terms = vec![
            (rel.speed, self.policy.speed_weight),
            (rel.compression_ratio, self.policy.compression_weight),
        ];
        if let Some(q) = rel.quality {
            terms.push((q, self.policy.quality_weight));
        }
        let terms: Vec<(f64, f64)> = terms
            .into_iter()
            .filter(|(v, w)| *w > 0.0 && *v > 0.0 && v.is_finite())
            .collect();
        let total_weight: f64 = terms.iter().map(|(_, w)| w).sum();
        if total_weight <= 0.0 {
            return None;
        }
        let log_sum: f64 = terms.iter().map(|(v, w)| w * v.ln()).sum();
        Some((log_sum / total_weight).exp())
    }
}

fn relative_figures(own: &PresetSummary, base: &PresetSummary) -> Option<RelativeFigures> {
    Some(RelativeFigures {
        speed: ratio(own.mean_speed_fps, base.mean_speed_fps)?,
        compression_ratio: ratio(own.geomean_compression_ratio, base.geomean_compression_ratio)?,
        quality: ratio(own.median_quality, base.median_quality),
    })
}

fn ratio(own: Option<f64>, base: Option<f64>) -> Option<f64> {
    match (own, base) {
        (Some(o), Some(b)) if b != 0.0 => Some(o / b),
        _ => None,
    }
}

fn failure_entries(results: &[JobResult]) -> Vec<FailureEntry> {
    let mut out = Vec::new();
    for r in results {
        let d = &r.descriptor;
        if let Some(f) = &r.failure {
            out.push(FailureEntry {
                preset: d.preset().to_string(),
                clip_id: d.clip_id().to_string(),
                status: Some(r.status.clone()),
                kind: f.kind,
                diagnostic: f.diagnostic.clone(),
            });
        }
        if let Some(m) = &r.metrics {
            for w in &m.warnings {
                out.push(FailureEntry {
                    preset: d.preset().to_string(),
                    clip_id: d.clip_id().to_string(),
                    status: Some(r.status.clone()),
                    kind: FailureKind::ScorerFailure,
                    diagnostic: w.clone(),
                });
            }
        }
    }
    out
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Geometric mean over strictly positive values; `None` if any value is not.
pub fn geometric_mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() || values.iter().any(|v| *v <= 0.0 || !v.is_finite()) {
        return None;
    }
    let log_mean = values.iter().map(|v| v.ln()).sum::<f64>() / values.len() as f64;
    Some(log_mean.exp())
}

/// Nearest-rank percentile, `p` in 0..=100.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let last = sorted.len() - 1;
    let idx = ((p.clamp(0.0, 100.0) / 100.0) * last as f64).round() as usize;
    Some(sorted[idx.min(last)])
}
