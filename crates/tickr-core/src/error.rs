use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid time of day: {0}")]
    InvalidTime(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
