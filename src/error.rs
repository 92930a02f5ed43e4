use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("invalid sweep configuration: {0}")]
    SweepConfigurationInvalid(String),

    #[error("output path already used in this sweep: {}", .0.display())]
    DuplicateOutputPath(PathBuf),

    #[error("clip not found in corpus: {0}")]
    ClipNotFound(String),

    #[error("preset has no encoder parameters: {0}")]
    EmptyParameters(String),

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BenchError>;
