use thiserror::Error;

/// Errors raised while loading a [`SchedulerConfig`](crate::config::SchedulerConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}
