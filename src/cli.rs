use crate::{
    config::Config,
    corpus::{list_clip_files, Corpus, DirectoryCorpus},
    pipeline::Pipeline,
    probe::{tool_version, Ffprobe},
    process::{run_supervised, Termination},
    report::JobRecord,
    sweep::CancelToken,
    util::{ensure_dir, now_rfc3339, run_id, write_json},
};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "vbench")]
#[command(about = "Corpus-driven video transcoding benchmark (vbench methodology)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Cmd,

    /// Path to config TOML. If omitted, uses ./vbench.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Check the encoder toolchain and corpus directory.
    Doctor {},
    /// Probe and print the corpus clips.
    Corpus {},
    /// Print the expanded job list without encoding.
    Plan {},
    /// Run the sweep and write the report.
    Run {
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Override sweep.concurrency_limit.
        #[arg(long)]
        concurrency: Option<i64>,
        /// Override sweep.baseline.
        #[arg(long)]
        baseline: Option<String>,
        /// Cancel the sweep after this many seconds.
        #[arg(long)]
        deadline_seconds: Option<u64>,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref())?;
    let cfg = Config::load(&cfg_path)?;

    match &args.cmd {
        Cmd::Doctor {} => {
            let _guard = init_logging(&args, &cfg, None)?;
            doctor(&cfg)
        }
        Cmd::Corpus {} => {
            let _guard = init_logging(&args, &cfg, None)?;
            corpus(&cfg)
        }
        Cmd::Plan {} => {
            let _guard = init_logging(&args, &cfg, None)?;
            plan(&cfg)
        }
        Cmd::Run {
            out_dir,
            concurrency,
            baseline,
            deadline_seconds,
        } => run(
            &args,
            &cfg,
            RunOverrides {
                out_dir: out_dir.clone(),
                concurrency: *concurrency,
                baseline: baseline.clone(),
                deadline_seconds: *deadline_seconds,
            },
        ),
    }
}

struct RunOverrides {
    out_dir: Option<PathBuf>,
    concurrency: Option<i64>,
    baseline: Option<String>,
    deadline_seconds: Option<u64>,
}

fn resolve_config_path(user: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = user {
        return Ok(p.to_path_buf());
    }
    let default = PathBuf::from("vbench.toml");
    if default.exists() {
        Ok(default)
    } else {
        Ok(PathBuf::from("vbench.example.toml"))
    }
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn ffprobe(cfg: &Config) -> Ffprobe {
    Ffprobe::new(
        cfg.ffprobe_exe(),
        Duration::from_secs(cfg.tools.probe_timeout_seconds),
    )
}

fn load_corpus(cfg: &Config) -> Result<DirectoryCorpus> {
    DirectoryCorpus::load(
        &cfg.video_dir(),
        &cfg.corpus.extensions,
        &cfg.corpus.clips,
        &ffprobe(cfg),
    )
}

/// Clips the sweep covers: the configured subset verbatim (so missing names
/// surface as rejected jobs), else the whole corpus.
fn sweep_clips(cfg: &Config, corpus: &dyn Corpus) -> Vec<String> {
    if cfg.corpus.clips.is_empty() {
        corpus.clip_ids()
    } else {
        cfg.corpus.clips.clone()
    }
}

fn doctor(cfg: &Config) -> Result<()> {
    let ffmpeg = cfg.ffmpeg_exe();
    let probe = ffprobe(cfg);
    let video_dir = cfg.video_dir();

    let ffmpeg_version = tool_version(&ffmpeg).map_err(|e| format!("{e:#}"));
    let ffprobe_version = probe.version().map_err(|e| format!("{e:#}"));
    let clips = list_clip_files(&video_dir, &cfg.corpus.extensions).map(|v| v.len());

    let mut cmd = Command::new(&ffmpeg);
    cmd.args(["-hide_banner", "-encoders"]);
    let libx264 = run_supervised(&mut cmd, Some(Duration::from_secs(30)), None)
        .map(|o| matches!(o.termination, Termination::Exited(s) if s.success()) && o.stdout_lossy().contains("libx264"))
        .unwrap_or(false);

    let ok = ffmpeg_version.is_ok() && ffprobe_version.is_ok() && clips.is_ok();
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "ffmpeg": ffmpeg,
            "ffmpeg_version": ffmpeg_version.as_ref().ok(),
            "ffmpeg_error": ffmpeg_version.as_ref().err(),
            "ffprobe": probe.exe(),
            "ffprobe_version": ffprobe_version.as_ref().ok(),
            "ffprobe_error": ffprobe_version.as_ref().err(),
            "libx264": libx264,
            "video_dir": video_dir,
            "clips": clips.as_ref().ok(),
            "video_dir_error": clips.as_ref().err().map(|e| format!("{e:#}")),
            "ok": ok,
        }))?
    );
    Ok(())
}

fn corpus(cfg: &Config) -> Result<()> {
    let corpus = load_corpus(cfg)?;
    let clips: Vec<_> = corpus.clips().collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "root": corpus.root(),
            "clips": clips,
        }))?
    );
    Ok(())
}

fn plan(cfg: &Config) -> Result<()> {
    let corpus = load_corpus(cfg)?;
    let sweep = cfg.sweep_configuration(sweep_clips(cfg, &corpus), None, None)?;
    let expansion = sweep.expand(&corpus, &PathBuf::from(&cfg.paths.out_dir).join("artifacts"));
    let jobs: Vec<_> = expansion.jobs.iter().map(|j| j.as_ref()).collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "concurrency_limit": sweep.concurrency_limit(),
            "job_timeout_seconds": sweep.job_timeout().as_secs(),
            "baseline": sweep.baseline(),
            "jobs": jobs,
            "rejected": expansion.rejected,
        }))?
    );
    Ok(())
}

fn run(args: &Args, cfg: &Config, ov: RunOverrides) -> Result<()> {
    let video_dir = cfg.video_dir();
    let mut clip_names: Vec<String> = list_clip_files(&video_dir, &cfg.corpus.extensions)?
        .iter()
        .filter_map(|p| p.file_name().and_then(|s| s.to_str()).map(str::to_string))
        .collect();
    if !cfg.corpus.clips.is_empty() {
        clip_names = cfg.corpus.clips.clone();
    }

    let id = run_id(&cfg.normalized_for_hash(), &clip_names);
    let out_root = ov
        .out_dir
        .unwrap_or_else(|| PathBuf::from(&cfg.paths.out_dir));
    let run_dir = out_root.join(&id);

    if run_dir.exists() && !cfg.global.overwrite {
        return Err(anyhow!(
            "run_dir already exists and overwrite=false: {}",
            run_dir.display()
        ));
    }

    ensure_dir(&run_dir)?;
    ensure_dir(&run_dir.join("logs"))?;
    let artifact_dir = run_dir.join("artifacts");
    ensure_dir(&artifact_dir)?;

    let log_path = resolve_log_path(cfg, &run_dir);
    let _guard = init_logging(args, cfg, log_path.as_deref())?;

    info!("run_id={id} name={} out={}", cfg.global.run_name, run_dir.display());

    if cfg.debug.dump_effective_config {
        let raw = toml::to_string(cfg).unwrap_or_default();
        std::fs::write(run_dir.join("effective-config.toml"), raw)?;
    }

    let corpus = load_corpus(cfg)?;
    let sweep = cfg.sweep_configuration(sweep_clips(cfg, &corpus), ov.concurrency, ov.baseline)?;

    let deadline = ov.deadline_seconds.unwrap_or(cfg.sweep.deadline_seconds);
    let cancel = if deadline > 0 {
        CancelToken::with_deadline(Instant::now() + Duration::from_secs(deadline))
    } else {
        CancelToken::new()
    };

    let pipeline = Pipeline::from_config(cfg);
    let started = now_rfc3339();
    let out = pipeline.run(&sweep, &corpus, &artifact_dir, &cancel)?;
    let finished = now_rfc3339();

    if out.report.baseline_missing {
        warn!("baseline-relative figures omitted");
    }

    if cfg.output.write_report_json {
        write_json(&run_dir.join(&cfg.output.report_filename), &out.report)?;
    }

    if cfg.output.write_results_json {
        let records: Vec<JobRecord> = out.outcome.results.iter().map(JobRecord::from).collect();
        write_json(&run_dir.join(&cfg.output.results_filename), &records)?;
    }

    if cfg.output.write_index_json {
        let index = serde_json::json!({
            "run_id": id,
            "run_name": cfg.global.run_name,
            "started": started,
            "finished": finished,
            "aborted": out.outcome.aborted,
            "report": cfg.output.report_filename,
            "results": cfg.output.results_filename,
            "artifacts": "artifacts",
        });
        write_json(&run_dir.join("index.json"), &index)?;
    }

    if cfg.global.print_summary {
        let presets: Vec<_> = out
            .report
            .presets
            .iter()
            .map(|p| {
                serde_json::json!({
                    "preset": p.preset,
                    "coverage": format!("{}/{}", p.coverage.measured, p.coverage.total),
                    "mean_speed_fps": p.summary.mean_speed_fps,
                    "geomean_compression_ratio": p.summary.geomean_compression_ratio,
                    "median_quality": p.summary.median_quality,
                    "score": p.score,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "run_id": id,
                "run_dir": run_dir,
                "status": if out.outcome.aborted { "aborted" } else { "ok" },
                "failures": out.report.failures.len(),
                "presets": presets,
            }))?
        );
    }

    Ok(())
}

fn resolve_log_path(cfg: &Config, run_dir: &Path) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }

    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }

    Some(run_dir.join("logs").join("vbench.log"))
}
