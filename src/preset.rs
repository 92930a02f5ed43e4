use crate::{
    corpus::ClipInfo,
    error::{BenchError, Result},
    scenario,
};
use serde::{Deserialize, Serialize};

/// A named, fixed set of encoder parameters under comparison.
///
/// Parameters may contain per-clip tokens that are expanded when a job is
/// built for a concrete clip:
///
/// * `{target_bitrate}`: vbench's resolution/framerate driven bitrate target
/// * `{live_preset}`: x264 effort level picked from the clip resolution
/// * `{width}`, `{height}`, `{framerate}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    #[serde(default = "default_encoder")]
    pub encoder: String,
    pub params: Vec<String>,
    #[serde(default = "default_passes")]
    pub passes: u8,
    #[serde(default = "default_container")]
    pub container: String,
}

fn default_encoder() -> String {
    "libx264".into()
}

fn default_passes() -> u8 {
    1
}

fn default_container() -> String {
    "mkv".into()
}

impl Preset {
    pub fn new(name: impl Into<String>, params: &[&str]) -> Self {
        Self {
            name: name.into(),
            encoder: default_encoder(),
            params: params.iter().map(|s| s.to_string()).collect(),
            passes: default_passes(),
            container: default_container(),
        }
    }

    pub fn with_passes(mut self, passes: u8) -> Self {
        self.passes = passes;
        self
    }

    pub fn is_two_pass(&self) -> bool {
        self.passes >= 2
    }

    /// Concrete parameter list for `clip`.
    pub fn resolve_params(&self, clip: &ClipInfo) -> Result<Vec<String>> {
        if self.params.is_empty() {
            return Err(BenchError::EmptyParameters(self.name.clone()));
        }
        Ok(self.params.iter().map(|p| expand_tokens(p, clip)).collect())
    }
}

fn expand_tokens(param: &str, clip: &ClipInfo) -> String {
    if !param.contains('{') {
        return param.to_string();
    }
    param
        .replace("{target_bitrate}", &scenario::target_bitrate(clip).to_string())
        .replace("{live_preset}", scenario::live_preset(clip))
        .replace("{width}", &clip.width.to_string())
        .replace("{height}", &clip.height.to_string())
        .replace("{framerate}", &format!("{:.3}", clip.framerate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn clip() -> ClipInfo {
        ClipInfo {
            id: "c.mkv".into(),
            path: PathBuf::from("c.mkv"),
            frame_count: 300,
            byte_size: 100_000_000,
            width: 1280,
            height: 720,
            framerate: 30.0,
            bit_depth: 8,
            pix_fmt: None,
        }
    }

    #[test]
    fn expands_clip_tokens() {
        let p = Preset::new("live", &["-b:v", "{target_bitrate}", "-preset", "{live_preset}"]);
        let params = p.resolve_params(&clip()).unwrap();
        assert_eq!(params, vec!["-b:v", "1843200", "-preset", "veryfast"]);
    }

    #[test]
    fn empty_params_rejected() {
        let p = Preset::new("bare", &[]);
        assert!(matches!(
            p.resolve_params(&clip()),
            Err(BenchError::EmptyParameters(name)) if name == "bare"
        ));
    }
}
