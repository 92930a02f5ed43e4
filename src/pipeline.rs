use crate::{
    aggregate::Aggregator,
    config::{Config, EncoderKind, QualityMetricCfg},
    corpus::Corpus,
    encoder::{CommandEncoder, FfmpegEncoder, ProcessRunner},
    error::Result,
    metrics::MetricCollector,
    quality::{FfmpegScorer, QualityMetric, QualityScorer},
    report::Report,
    sweep::{CancelToken, Scheduler, SweepConfiguration, SweepOutcome},
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Corpus sweep followed by aggregation, with the encoder and scorer chosen
/// at construction.
pub struct Pipeline {
    runner: Box<dyn ProcessRunner>,
    collector: MetricCollector,
    aggregator: Aggregator,
    keep_artifacts: bool,
}

pub struct BenchOutput {
    pub outcome: SweepOutcome,
    pub report: Report,
}

impl Pipeline {
    pub fn new(runner: Box<dyn ProcessRunner>, collector: MetricCollector, aggregator: Aggregator) -> Self {
        Self {
            runner,
            collector,
            aggregator,
            keep_artifacts: true,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        let runner: Box<dyn ProcessRunner> = match cfg.encoder.kind {
            EncoderKind::Ffmpeg => Box::new(FfmpegEncoder::new(cfg.ffmpeg_exe(), cfg.tools.encoder_threads)),
            EncoderKind::Command => Box::new(CommandEncoder::new(
                &cfg.encoder.program,
                cfg.encoder.args.clone(),
            )),
        };

        let metric = match cfg.quality.metric {
            QualityMetricCfg::Psnr => Some(QualityMetric::Psnr),
            QualityMetricCfg::Ssim => Some(QualityMetric::Ssim),
            QualityMetricCfg::None => None,
        };
        let scorer = metric.map(|m| {
            Arc::new(FfmpegScorer::new(
                cfg.ffmpeg_exe(),
                m,
                Duration::from_secs(cfg.quality.timeout_seconds),
            )) as Arc<dyn QualityScorer>
        });
        let collector = MetricCollector::new(scorer);
        let aggregator = Aggregator::new(cfg.scoring.clone()).with_quality_metric(collector.scorer_name());

        let mut pipeline = Self::new(runner, collector, aggregator);
        pipeline.keep_artifacts = cfg.global.keep_artifacts;
        pipeline
    }

    pub fn keep_artifacts(mut self, keep: bool) -> Self {
        self.keep_artifacts = keep;
        self
    }

    pub fn run(
        &self,
        sweep: &SweepConfiguration,
        corpus: &dyn Corpus,
        artifact_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<BenchOutput> {
        info!(
            "pipeline presets={} clips={} concurrency={} baseline={:?}",
            sweep.presets().len(),
            sweep.clips().len(),
            sweep.concurrency_limit(),
            sweep.baseline()
        );

        let outcome = Scheduler::new(self.runner.as_ref(), &self.collector, corpus)
            .keep_artifacts(self.keep_artifacts)
            .run(sweep, artifact_dir, cancel)?;
        let report = self.aggregator.aggregate_sweep(&outcome, sweep, corpus);

        info!(
            "pipeline done results={}/{} aborted={} wall={:.1}s",
            outcome.results.len(),
            outcome.total_jobs,
            outcome.aborted,
            outcome.wall.as_secs_f64()
        );
        Ok(BenchOutput { outcome, report })
    }
}
