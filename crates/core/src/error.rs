use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid reporter entry '{0}', expected CODE=KEY")]
    InvalidReporterEntry(String),

    #[error("invalid reporter key '{value}' for jurisdiction {jurisdiction}")]
    InvalidReporterKey { jurisdiction: String, value: String },
}
