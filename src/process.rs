use crate::sweep::CancelToken;
use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How a supervised child process came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

#[derive(Debug)]
pub struct ProcessOutcome {
    pub termination: Termination,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

impl ProcessOutcome {
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Spawns `cmd` with piped output and waits for it, killing the child when
/// `timeout` elapses or `cancel` fires. Only a failure to spawn or reap the
/// child is an error; every way the child can end is a [`Termination`].
pub fn run_supervised(
    cmd: &mut Command,
    timeout: Option<Duration>,
    cancel: Option<&CancelToken>,
) -> Result<ProcessOutcome> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    // Own process group, so a kill also reaches wrapper scripts' children.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    debug!("spawn {:?} timeout={:?}", cmd, timeout);

    let started = Instant::now();
    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning {:?}", cmd.get_program()))?;
    wait_supervised(&mut child, started, timeout, cancel)
}

fn wait_supervised(
    child: &mut Child,
    started: Instant,
    timeout: Option<Duration>,
    cancel: Option<&CancelToken>,
) -> Result<ProcessOutcome> {
    // Drain pipes while waiting so a chatty encoder can't block on a full
    // stderr buffer.
    let stdout_thread = drain(child.stdout.take().map(|p| Box::new(p) as Box<dyn Read + Send>));
    let stderr_thread = drain(child.stderr.take().map(|p| Box::new(p) as Box<dyn Read + Send>));

    let termination = loop {
        if let Some(status) = child.try_wait().with_context(|| "try_wait")? {
            break Termination::Exited(status);
        }

        let forced = if timeout.is_some_and(|t| started.elapsed() > t) {
            Some(Termination::TimedOut)
        } else if cancel.is_some_and(CancelToken::is_cancelled) {
            Some(Termination::Cancelled)
        } else {
            None
        };

        if let Some(termination) = forced {
            warn!(
                "terminating pid {} ({:?}) after {:?}",
                child.id(),
                termination,
                started.elapsed()
            );
            kill_group(child);
            child.wait().with_context(|| "wait after kill")?;
            break termination;
        }

        std::thread::sleep(POLL_INTERVAL);
    };
    let elapsed = started.elapsed();

    let stdout = stdout_thread
        .join()
        .map_err(|_| anyhow!("stdout reader thread panicked"))??;
    let stderr = stderr_thread
        .join()
        .map_err(|_| anyhow!("stderr reader thread panicked"))??;

    Ok(ProcessOutcome {
        termination,
        stdout,
        stderr,
        elapsed,
    })
}

/// SIGKILLs the child's whole process group, then the child itself.
fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: plain syscall; a negative pid addresses the group the child leads.
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
}

fn drain(pipe: Option<Box<dyn Read + Send>>) -> JoinHandle<Result<Vec<u8>>> {
    std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut p) = pipe {
            p.read_to_end(&mut buf).with_context(|| "read child pipe")?;
        }
        Ok(buf)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_exit_and_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err >&2; exit 4"]);
        let out = run_supervised(&mut cmd, Some(Duration::from_secs(10)), None).unwrap();
        match out.termination {
            Termination::Exited(status) => assert_eq!(status.code(), Some(4)),
            other => panic!("unexpected termination {other:?}"),
        }
        assert_eq!(out.stdout_lossy().trim(), "out");
        assert_eq!(out.stderr_lossy().trim(), "err");
    }

    #[test]
    fn kills_on_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("10");
        let out = run_supervised(&mut cmd, Some(Duration::from_millis(200)), None).unwrap();
        assert_eq!(out.termination, Termination::TimedOut);
        assert!(out.elapsed < Duration::from_secs(5));
    }

    #[test]
    fn timeout_kills_grandchildren() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 5; true"]);
        let t0 = Instant::now();
        let out = run_supervised(&mut cmd, Some(Duration::from_millis(200)), None).unwrap();
        assert_eq!(out.termination, Termination::TimedOut);
        assert!(t0.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn kills_on_cancel() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut cmd = Command::new("sleep");
        cmd.arg("10");
        let out = run_supervised(&mut cmd, None, Some(&cancel)).unwrap();
        assert_eq!(out.termination, Termination::Cancelled);
    }
}
