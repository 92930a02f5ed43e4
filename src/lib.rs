pub mod aggregate;
pub mod cli;
pub mod config;
pub mod corpus;
pub mod encoder;
pub mod error;
pub mod job;
pub mod metrics;
pub mod pipeline;
pub mod preset;
pub mod probe;
pub mod process;
pub mod quality;
pub mod report;
pub mod scenario;
pub mod sweep;
pub mod util;
