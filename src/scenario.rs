use crate::{corpus::ClipInfo, preset::Preset};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The vbench transcoding scenarios. Each maps to an x264 preset whose rate
/// control depends on the clip being encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    Upload,
    Live,
    Vod,
    Platform,
    Popular,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::Upload,
        Scenario::Live,
        Scenario::Vod,
        Scenario::Platform,
        Scenario::Popular,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Scenario::Upload => "upload",
            Scenario::Live => "live",
            Scenario::Vod => "vod",
            Scenario::Platform => "platform",
            Scenario::Popular => "popular",
        }
    }

    /// Corpus directory below the vbench root. Upload starts from lossless
    /// sources, the others from crf18 mezzanines.
    pub fn video_subdir(self) -> &'static str {
        match self {
            Scenario::Upload => "videos/crf0",
            _ => "videos/crf18",
        }
    }

    pub fn preset(self) -> Preset {
        match self {
            Scenario::Upload => Preset::new(self.as_str(), &["-crf", "18"]),
            Scenario::Live => Preset::new(
                self.as_str(),
                &[
                    "-b:v",
                    "{target_bitrate}",
                    "-preset",
                    "{live_preset}",
                    "-tune",
                    "zerolatency",
                ],
            ),
            Scenario::Vod | Scenario::Platform => {
                Preset::new(self.as_str(), &["-b:v", "{target_bitrate}", "-preset", "medium"])
                    .with_passes(2)
            }
            Scenario::Popular => {
                Preset::new(self.as_str(), &["-b:v", "{target_bitrate}", "-preset", "veryslow"])
                    .with_passes(2)
            }
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scenario::ALL
            .into_iter()
            .find(|sc| sc.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown scenario: {s}"))
    }
}

/// Corpus directory for a set of scenarios: the lossless set only when every
/// scenario is `upload`.
pub fn default_video_subdir(scenarios: &[Scenario]) -> &'static str {
    if !scenarios.is_empty() && scenarios.iter().all(|s| *s == Scenario::Upload) {
        Scenario::Upload.video_subdir()
    } else {
        Scenario::Live.video_subdir()
    }
}

/// Target bitrate in bits per second: `2 * width * height`, or three times
/// the pixel count above 30fps, capped at half the source bitrate.
pub fn target_bitrate(clip: &ClipInfo) -> u64 {
    let pixels = clip.pixels();
    let target = if clip.framerate > 30.0 {
        3 * pixels
    } else {
        2 * pixels
    };
    match clip.bitrate_bps() {
        Some(source) if (target as f64) > source / 2.0 => (source / 2.0) as u64,
        _ => target,
    }
}

/// Live encodes trade effort for latency as resolution grows.
pub fn live_preset(clip: &ClipInfo) -> &'static str {
    let pixels = clip.pixels();
    if pixels > 4_000_000 {
        "ultrafast"
    } else if pixels > 1_000_000 {
        "superfast"
    } else {
        "veryfast"
    }
}
