//! Error types for marga-nav.

use thiserror::Error;

/// Navigation error type.
#[derive(Error, Debug)]
pub enum NavError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Robot interface error: {0}")]
    Robot(String),

    #[error("Planner error: {0}")]
    Planner(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Log encode error: {0}")]
    LogEncode(String),
}

impl From<toml::de::Error> for NavError {
    fn from(e: toml::de::Error) -> Self {
        NavError::Config(e.to_string())
    }
}

impl From<postcard::Error> for NavError {
    fn from(e: postcard::Error) -> Self {
        NavError::LogEncode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NavError>;
