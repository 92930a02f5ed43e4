use crate::{
    error::{BenchError, Result as BenchResult},
    probe::Ffprobe,
};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One reference clip of the corpus and the metadata the harness needs from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipInfo {
    pub id: String,
    pub path: PathBuf,
    pub frame_count: u64,
    pub byte_size: u64,
    pub width: u32,
    pub height: u32,
    pub framerate: f64,
    pub bit_depth: u8,
    #[serde(default)]
    pub pix_fmt: Option<String>,
}

impl ClipInfo {
    /// Pixels per frame.
    pub fn pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn duration_secs(&self) -> f64 {
        if self.framerate > 0.0 {
            self.frame_count as f64 / self.framerate
        } else {
            0.0
        }
    }

    pub fn bitrate_bps(&self) -> Option<f64> {
        let d = self.duration_secs();
        (d > 0.0).then(|| self.byte_size as f64 * 8.0 / d)
    }

    /// File name without extension; used to name encoded artifacts.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.id)
            .to_string()
    }
}

/// Resolves clip identifiers to reference inputs. Implementations are shared
/// read-only across sweep workers.
pub trait Corpus: Send + Sync {
    /// All clip identifiers in a stable order.
    fn clip_ids(&self) -> Vec<String>;
    fn resolve(&self, id: &str) -> BenchResult<&ClipInfo>;

    fn len(&self) -> usize {
        self.clip_ids().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory corpus with already known metadata.
#[derive(Debug, Clone, Default)]
pub struct StaticCorpus {
    clips: BTreeMap<String, ClipInfo>,
}

impl StaticCorpus {
    pub fn new(clips: impl IntoIterator<Item = ClipInfo>) -> Self {
        Self {
            clips: clips.into_iter().map(|c| (c.id.clone(), c)).collect(),
        }
    }
}

impl Corpus for StaticCorpus {
    fn clip_ids(&self) -> Vec<String> {
        self.clips.keys().cloned().collect()
    }

    fn resolve(&self, id: &str) -> BenchResult<&ClipInfo> {
        self.clips
            .get(id)
            .ok_or_else(|| BenchError::ClipNotFound(id.to_string()))
    }
}

/// A directory of clips, probed once at load time. Clip ids are file names.
#[derive(Debug, Clone)]
pub struct DirectoryCorpus {
    root: PathBuf,
    inner: StaticCorpus,
}

impl DirectoryCorpus {
    /// Lists the clips under `root` and probes them. A non-empty `subset` limits
    /// probing to those file names; names that do not exist are reported and
    /// left unresolved.
    pub fn load(root: &Path, extensions: &[String], subset: &[String], probe: &Ffprobe) -> Result<Self> {
        let files = list_clip_files(root, extensions)?;
        let mut clips = Vec::new();

        for path in files {
            let Some(id) = path.file_name().and_then(|s| s.to_str()).map(str::to_string) else {
                warn!("skipping clip with non UTF-8 name: {}", path.display());
                continue;
            };
            if !subset.is_empty() && !subset.contains(&id) {
                continue;
            }
            let clip = probe
                .probe(&id, &path)
                .with_context(|| format!("probing clip {id}"))?;
            clips.push(clip);
        }

        for wanted in subset {
            if !clips.iter().any(|c| &c.id == wanted) {
                warn!("clip {wanted} not found under {}", root.display());
            }
        }

        info!("corpus {} clips={}", root.display(), clips.len());
        Ok(Self {
            root: root.to_path_buf(),
            inner: StaticCorpus::new(clips),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn clips(&self) -> impl Iterator<Item = &ClipInfo> {
        self.inner.clips.values()
    }
}

impl Corpus for DirectoryCorpus {
    fn clip_ids(&self) -> Vec<String> {
        self.inner.clip_ids()
    }

    fn resolve(&self, id: &str) -> BenchResult<&ClipInfo> {
        self.inner.resolve(id)
    }
}

/// Video files directly under `dir` whose extension is in `extensions`
/// (case-insensitive), sorted by path.
pub fn list_clip_files(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(anyhow!("video_dir is not a valid video directory: {}", dir.display()));
    }

    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("read_dir {}", dir.display()))? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)));
        if matches {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}
