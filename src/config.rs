use crate::{
    aggregate::ScoringPolicy,
    error::Result as BenchResult,
    preset::Preset,
    scenario::{self, Scenario},
    sweep::SweepConfiguration,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub tools: Tools,
    #[serde(default)]
    pub encoder: Encoder,
    #[serde(default)]
    pub corpus: CorpusCfg,
    #[serde(default)]
    pub sweep: Sweep,
    #[serde(default)]
    pub presets: Vec<Preset>,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub scoring: ScoringPolicy,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }

    /// A stable, normalization-friendly string for hashing.
    pub fn normalized_for_hash(&self) -> String {
        toml::to_string(self).unwrap_or_default()
    }

    /// Scenario presets followed by the custom `[[presets]]`.
    pub fn all_presets(&self) -> Vec<Preset> {
        let mut out: Vec<Preset> = self.sweep.scenarios.iter().map(|s| s.preset()).collect();
        out.extend(self.presets.iter().cloned());
        out
    }

    pub fn video_dir(&self) -> PathBuf {
        if !self.paths.video_dir.is_empty() {
            return PathBuf::from(&self.paths.video_dir);
        }
        PathBuf::from(&self.paths.vbench_root).join(scenario::default_video_subdir(&self.sweep.scenarios))
    }

    pub fn ffmpeg_exe(&self) -> PathBuf {
        resolve_tool(&self.tools.ffmpeg_exe, &self.paths.vbench_root, "ffmpeg")
    }

    pub fn ffprobe_exe(&self) -> PathBuf {
        resolve_tool(&self.tools.ffprobe_exe, &self.paths.vbench_root, "ffprobe")
    }

    /// Validated sweep over `clips`, with optional command-line overrides.
    pub fn sweep_configuration(
        &self,
        clips: Vec<String>,
        concurrency: Option<i64>,
        baseline: Option<String>,
    ) -> BenchResult<SweepConfiguration> {
        let baseline = baseline.or_else(|| Some(self.sweep.baseline.clone()));
        SweepConfiguration::new(
            clips,
            self.all_presets(),
            concurrency.unwrap_or(self.sweep.concurrency_limit),
            Duration::from_secs(self.sweep.job_timeout_seconds),
            baseline,
        )
    }
}

/// `auto` prefers the vbench build tree (`<root>/bin/<tool>`), then PATH.
fn resolve_tool(raw: &str, vbench_root: &str, tool: &str) -> PathBuf {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("auto") {
        let bundled = PathBuf::from(vbench_root).join("bin").join(tool);
        if bundled.is_file() {
            return bundled;
        }
        return PathBuf::from(tool);
    }
    expand_tilde(raw)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub run_name: String,
    pub overwrite: bool,
    pub keep_artifacts: bool,
    pub print_summary: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            run_name: "default".into(),
            overwrite: false,
            keep_artifacts: true,
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    pub out_dir: String,
    pub vbench_root: String,
    pub video_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            out_dir: "out".into(),
            vbench_root: "vbench".into(),
            video_dir: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tools {
    pub ffmpeg_exe: String,
    pub ffprobe_exe: String,
    pub probe_timeout_seconds: u64,
    pub encoder_threads: u32,
}
impl Default for Tools {
    fn default() -> Self {
        Self {
            ffmpeg_exe: "auto".into(),
            ffprobe_exe: "auto".into(),
            probe_timeout_seconds: 600,
            encoder_threads: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    Ffmpeg,
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Encoder {
    pub kind: EncoderKind,
    /// Binary for `kind = "command"`.
    pub program: String,
    /// Argument template for `kind = "command"`.
    pub args: Vec<String>,
}
impl Default for Encoder {
    fn default() -> Self {
        Self {
            kind: EncoderKind::Ffmpeg,
            program: "x264".into(),
            args: vec![
                "{params}".into(),
                "--threads".into(),
                "1".into(),
                "-o".into(),
                "{output}".into(),
                "{input}".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusCfg {
    pub extensions: Vec<String>,
    /// File names to benchmark; empty means every clip in the video dir.
    pub clips: Vec<String>,
}
impl Default for CorpusCfg {
    fn default() -> Self {
        Self {
            extensions: vec!["mkv".into(), "y4m".into(), "mp4".into()],
            clips: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sweep {
    pub scenarios: Vec<Scenario>,
    pub concurrency_limit: i64,
    pub job_timeout_seconds: u64,
    /// Sweep-level cancellation after this many seconds; 0 disables it.
    pub deadline_seconds: u64,
    pub baseline: String,
}
impl Default for Sweep {
    fn default() -> Self {
        Self {
            scenarios: vec![Scenario::Live, Scenario::Vod, Scenario::Popular],
            concurrency_limit: 1,
            job_timeout_seconds: 3600,
            deadline_seconds: 0,
            baseline: "".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityMetricCfg {
    Psnr,
    Ssim,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quality {
    pub metric: QualityMetricCfg,
    pub timeout_seconds: u64,
}
impl Default for Quality {
    fn default() -> Self {
        Self {
            metric: QualityMetricCfg::Psnr,
            timeout_seconds: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub write_report_json: bool,
    pub write_results_json: bool,
    pub write_index_json: bool,
    pub report_filename: String,
    pub results_filename: String,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            write_report_json: true,
            write_results_json: true,
            write_index_json: true,
            report_filename: "report.json".into(),
            results_filename: "results.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: true,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debug {
    pub dump_effective_config: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            dump_effective_config: true,
        }
    }
}
