use crate::{
    corpus::ClipInfo,
    process::{run_supervised, Termination},
};
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::debug;

/// Reads clip metadata through ffprobe. Frames are counted by decoding
/// (`-count_frames`) since container frame counts are unreliable for y4m/mkv.
#[derive(Debug, Clone)]
pub struct Ffprobe {
    exe: PathBuf,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ProbeDoc {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_read_frames: Option<String>,
    bits_per_raw_sample: Option<String>,
    pix_fmt: Option<String>,
}

impl Ffprobe {
    pub fn new(exe: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            exe: exe.into(),
            timeout,
        }
    }

    pub fn exe(&self) -> &Path {
        &self.exe
    }

    pub fn probe(&self, id: &str, path: &Path) -> Result<ClipInfo> {
        let byte_size = std::fs::metadata(path)
            .with_context(|| format!("stat clip: {}", path.display()))?
            .len();

        let mut cmd = Command::new(&self.exe);
        cmd.args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-count_frames",
            "-show_entries",
            "stream=width,height,r_frame_rate,avg_frame_rate,nb_read_frames,bits_per_raw_sample,pix_fmt",
            "-of",
            "json",
        ]);
        cmd.arg(path);

        let out = run_supervised(&mut cmd, Some(self.timeout), None)?;
        match out.termination {
            Termination::Exited(status) if status.success() => {}
            Termination::Exited(status) => {
                return Err(anyhow!(
                    "ffprobe failed on {} ({status}): {}",
                    path.display(),
                    out.stderr_lossy().trim()
                ));
            }
            other => {
                return Err(anyhow!("ffprobe did not finish on {}: {other:?}", path.display()));
            }
        }

        let mut clip = parse_probe_json(id, path, &out.stdout)?;
        clip.byte_size = byte_size;
        debug!(
            "probed {} {}x{} @{:.3}fps frames={} bytes={}",
            clip.id, clip.width, clip.height, clip.framerate, clip.frame_count, clip.byte_size
        );
        Ok(clip)
    }

    pub fn version(&self) -> Result<String> {
        tool_version(&self.exe)
    }
}

/// Builds a [`ClipInfo`] from ffprobe's JSON output. `byte_size` is left at zero
/// for the caller to fill in from the filesystem.
pub fn parse_probe_json(id: &str, path: &Path, raw: &[u8]) -> Result<ClipInfo> {
    let doc: ProbeDoc = serde_json::from_slice(raw).with_context(|| "parsing ffprobe JSON")?;
    let stream = doc
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no video stream in {}", path.display()))?;

    let width = stream.width.ok_or_else(|| anyhow!("missing width"))?;
    let height = stream.height.ok_or_else(|| anyhow!("missing height"))?;
    let framerate = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_rational)
        .or_else(|| stream.avg_frame_rate.as_deref().and_then(parse_rational))
        .ok_or_else(|| anyhow!("missing framerate"))?;
    let frame_count: u64 = stream
        .nb_read_frames
        .as_deref()
        .ok_or_else(|| anyhow!("frames could not be counted"))?
        .trim()
        .parse()
        .with_context(|| "parsing nb_read_frames")?;

    let bit_depth = stream
        .bits_per_raw_sample
        .as_deref()
        .and_then(|s| s.trim().parse::<u8>().ok())
        .unwrap_or_else(|| bit_depth_from_pix_fmt(stream.pix_fmt.as_deref().unwrap_or("")));

    Ok(ClipInfo {
        id: id.to_string(),
        path: path.to_path_buf(),
        frame_count,
        byte_size: 0,
        width,
        height,
        framerate,
        bit_depth,
        pix_fmt: stream.pix_fmt,
    })
}

/// Parses ffprobe rationals such as `30000/1001`. A zero denominator or
/// numerator (ffprobe's `0/0` for unknown) yields `None`.
pub fn parse_rational(s: &str) -> Option<f64> {
    let s = s.trim();
    let value = match s.split_once('/') {
        Some((n, d)) => {
            let n: f64 = n.trim().parse().ok()?;
            let d: f64 = d.trim().parse().ok()?;
            if d == 0.0 {
                return None;
            }
            n / d
        }
        None => s.parse().ok()?,
    };
    (value > 0.0).then_some(value)
}

fn bit_depth_from_pix_fmt(pix_fmt: &str) -> u8 {
    if pix_fmt.contains("12le") || pix_fmt.contains("12be") {
        12
    } else if pix_fmt.contains("10le") || pix_fmt.contains("10be") || pix_fmt == "p010le" {
        10
    } else {
        8
    }
}

/// First line of `<tool> -version`.
pub fn tool_version(exe: &Path) -> Result<String> {
    let mut cmd = Command::new(exe);
    cmd.arg("-version");
    let out = run_supervised(&mut cmd, Some(Duration::from_secs(30)), None)?;
    let text = out.stdout_lossy();
    text.lines()
        .next()
        .map(|l| l.trim().to_string())
        .ok_or_else(|| anyhow!("{} -version printed nothing", exe.display()))
}
