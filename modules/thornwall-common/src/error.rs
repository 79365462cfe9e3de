use thiserror::Error;

/// Errors raised while loading configuration from the environment.
/// These are fatal to the process; the binary exits non-zero.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {var}: {value}")]
    InvalidVar { var: &'static str, value: String },
}
