use crate::{
    job::{Failure, FailureKind, JobDescriptor, JobResult, JobStatus},
    process::{run_supervised, Termination},
    sweep::CancelToken,
};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Executes one encode job as an external process. Implementations are shared
/// by all sweep workers, so they hold configuration only.
pub trait ProcessRunner: Send + Sync {
    fn name(&self) -> &str;

    /// Runs `job` to a terminal state. Never fails: every outcome, including
    /// spawn errors, is recorded in the returned result. The artifact is left
    /// on disk only when the status is `Success`.
    fn run(&self, job: Arc<JobDescriptor>, timeout: Duration, cancel: &CancelToken) -> JobResult;
}

/// Encodes through `ffmpeg -c:v <encoder>`, the way vbench drives x264.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    exe: PathBuf,
    threads: u32,
}

impl FfmpegEncoder {
    pub fn new(exe: impl Into<PathBuf>, threads: u32) -> Self {
        Self {
            exe: exe.into(),
            threads,
        }
    }

    fn pass_command(&self, job: &JobDescriptor, pass: Option<u8>) -> Command {
        let mut cmd = Command::new(&self.exe);
        cmd.args(["-hide_banner", "-nostdin", "-y", "-i"]);
        cmd.arg(job.input());
        cmd.args(["-c:v", job.encoder(), "-threads"]);
        cmd.arg(self.threads.to_string());

        match pass {
            Some(1) => {
                cmd.args(["-pass", "1", "-passlogfile"]);
                cmd.arg(passlog_prefix(job.output_path()));
                cmd.args(["-an", "-sn"]);
                cmd.args(job.params());
                cmd.args(["-f", "null", "-"]);
            }
            Some(n) => {
                cmd.args(["-pass", &n.to_string(), "-passlogfile"]);
                cmd.arg(passlog_prefix(job.output_path()));
                cmd.args(job.params());
                cmd.arg(job.output_path());
            }
            None => {
                cmd.args(job.params());
                cmd.arg(job.output_path());
            }
        }
        cmd
    }
}

impl ProcessRunner for FfmpegEncoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn run(&self, job: Arc<JobDescriptor>, timeout: Duration, cancel: &CancelToken) -> JobResult {
        let cmds = if job.passes() >= 2 {
            (1..=job.passes())
                .map(|p| self.pass_command(&job, Some(p)))
                .collect()
        } else {
            vec![self.pass_command(&job, None)]
        };
        let result = execute_passes(job.clone(), cmds, timeout, cancel);
        if job.passes() >= 2 {
            remove_passlogs(job.output_path());
        }
        result
    }
}

/// Runs an arbitrary encoder binary from an argument template. Tokens:
/// `{input}`, `{output}`, `{encoder}`, `{pass}` and `{params}` (which expands
/// to the whole parameter list as separate arguments).
#[derive(Debug, Clone)]
pub struct CommandEncoder {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandEncoder {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn pass_command(&self, job: &JobDescriptor, pass: u8) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(expand_template(&self.args, job, pass));
        cmd
    }
}

impl ProcessRunner for CommandEncoder {
    fn name(&self) -> &str {
        self.program
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("command")
    }

    fn run(&self, job: Arc<JobDescriptor>, timeout: Duration, cancel: &CancelToken) -> JobResult {
        let cmds = (1..=job.passes().max(1))
            .map(|p| self.pass_command(&job, p))
            .collect();
        execute_passes(job, cmds, timeout, cancel)
    }
}

pub fn expand_template(template: &[String], job: &JobDescriptor, pass: u8) -> Vec<OsString> {
    let mut out = Vec::with_capacity(template.len() + job.params().len());
    for arg in template {
        match arg.as_str() {
            "{params}" => out.extend(job.params().iter().map(OsString::from)),
            "{input}" => out.push(job.input().as_os_str().to_owned()),
            "{output}" => out.push(job.output_path().as_os_str().to_owned()),
            other => out.push(OsString::from(
                other
                    .replace("{encoder}", job.encoder())
                    .replace("{pass}", &pass.to_string())
                    .replace("{input}", &job.input().display().to_string())
                    .replace("{output}", &job.output_path().display().to_string()),
            )),
        }
    }
    out
}

/// Runs the pass commands in order under one shared timeout budget.
fn execute_passes(
    job: Arc<JobDescriptor>,
    cmds: Vec<Command>,
    timeout: Duration,
    cancel: &CancelToken,
) -> JobResult {
    if let Some(parent) = job.output_path().parent().map(Path::to_path_buf) {
        if let Err(err) = std::fs::create_dir_all(&parent) {
            let diagnostic = format!("create output dir {}: {err}", parent.display());
            return failed(
                job,
                JobStatus::Crashed,
                Duration::ZERO,
                Failure::new(FailureKind::Crashed, diagnostic),
            );
        }
    }

    let mut elapsed = Duration::ZERO;
    for mut cmd in cmds {
        let budget = timeout.saturating_sub(elapsed);
        if budget.is_zero() {
            return failed(job, JobStatus::Timeout, elapsed, timeout_failure(timeout));
        }

        let outcome = match run_supervised(&mut cmd, Some(budget), Some(cancel)) {
            Ok(o) => o,
            Err(err) => {
                warn!("job {}/{} could not run: {err:#}", job.preset(), job.clip_id());
                return failed(
                    job,
                    JobStatus::Crashed,
                    elapsed,
                    Failure::new(FailureKind::Crashed, format!("{err:#}")),
                );
            }
        };
        elapsed += outcome.elapsed;

        match outcome.termination {
            Termination::Exited(status) if status.success() => {
                debug!(
                    "job {}/{} pass ok in {:?}",
                    job.preset(),
                    job.clip_id(),
                    outcome.elapsed
                );
            }
            Termination::Exited(status) => {
                let stderr = outcome.stderr_lossy();
                return match status.code() {
                    Some(code) => failed(
                        job,
                        JobStatus::EncodeFailed {
                            exit_code: Some(code),
                        },
                        elapsed,
                        Failure::new(FailureKind::EncodeFailed, stderr),
                    ),
                    None => failed(
                        job,
                        JobStatus::Crashed,
                        elapsed,
                        Failure::new(FailureKind::Crashed, format!("{status}\n{stderr}")),
                    ),
                };
            }
            Termination::TimedOut => {
                return failed(job, JobStatus::Timeout, elapsed, timeout_failure(timeout));
            }
            Termination::Cancelled => {
                return failed(
                    job,
                    JobStatus::Cancelled,
                    elapsed,
                    Failure::new(FailureKind::Cancelled, "terminated by sweep cancellation"),
                );
            }
        }
    }

    let artifact_bytes = std::fs::metadata(job.output_path()).ok().map(|m| m.len());
    JobResult {
        descriptor: job,
        status: JobStatus::Success,
        duration: elapsed,
        artifact_bytes,
        metrics: None,
        failure: None,
    }
}

fn timeout_failure(timeout: Duration) -> Failure {
    Failure::new(
        FailureKind::Timeout,
        format!("encode exceeded timeout of {:?}", timeout),
    )
}

/// Builds a failed result and discards whatever partial artifact exists.
fn failed(job: Arc<JobDescriptor>, status: JobStatus, duration: Duration, failure: Failure) -> JobResult {
    discard_artifact(job.output_path());
    JobResult {
        descriptor: job,
        status,
        duration,
        artifact_bytes: None,
        metrics: None,
        failure: Some(failure),
    }
}

pub fn discard_artifact(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("discarded artifact {}", path.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!("failed to discard artifact {}: {err}", path.display()),
    }
}

fn passlog_prefix(output: &Path) -> PathBuf {
    let mut s = output.as_os_str().to_owned();
    s.push(".passlog");
    PathBuf::from(s)
}

fn remove_passlogs(output: &Path) {
    let prefix = passlog_prefix(output);
    let (Some(dir), Some(name)) = (prefix.parent(), prefix.file_name().and_then(|s| s.to_str())) else {
        return;
    };
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        if entry.file_name().to_str().is_some_and(|n| n.starts_with(name)) {
            let _ = std::fs::remove_file(entry.path());
        }
    }
}
