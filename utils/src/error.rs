use std::sync::PoisonError;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 应用层错误类型
#[derive(Debug, Error)]
pub enum Error {
    /// 带可选底层原因的通用错误
    #[error("{msg}")]
    Message {
        msg: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Logger error: {0}")]
    Logger(#[from] log::SetLoggerError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock poisoned: {0}")]
    Lock(String),
}

impl Error {
    pub fn new(msg: impl Into<String>) -> Self {
        Error::Message {
            msg: msg.into(),
            source: None,
        }
    }

    pub fn with_source(msg: impl Into<String>, source: BoxError) -> Self {
        Error::Message {
            msg: msg.into(),
            source: Some(source),
        }
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::new(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::new(msg)
    }
}

impl<T> From<PoisonError<T>> for Error {
    fn from(err: PoisonError<T>) -> Self {
        Error::Lock(err.to_string())
    }
}
