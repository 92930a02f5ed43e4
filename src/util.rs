use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use time::format_description::well_known::Rfc3339;

pub fn ensure_dir(p: &Path) -> Result<()> {
    std::fs::create_dir_all(p).with_context(|| format!("create_dir_all {}", p.display()))
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Identifies a run by its normalized configuration and the clips it covers,
/// so identical sweeps land in the same directory.
pub fn run_id(normalized_config: &str, clips: &[String]) -> String {
    let mut h = Sha256::new();
    h.update(normalized_config.as_bytes());
    for c in clips {
        h.update([0u8]);
        h.update(c.as_bytes());
    }
    format!("{:x}", h.finalize())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("write {}", path.display()))
}
