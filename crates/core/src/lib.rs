pub mod config;
pub mod error;

pub use config::{AwsConfig, BatchConfig, Config, PipelineConfig, QueueConfig, ReporterTable};
pub use error::ConfigError;
