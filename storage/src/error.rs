use std::io;

use thiserror::Error;

/// 存储端点操作错误
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to list {root} on {endpoint}: {source}")]
    Listing {
        endpoint: String,
        root: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to create directory {path}: {source}")]
    DirectoryCreation {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to transfer {path}: {source}")]
    Transfer {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to get size of {path}: {source}")]
    SizeLookup {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot connect to endpoint {endpoint}: {source}")]
    Connection {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration for endpoint {endpoint}: {message}")]
    Config { endpoint: String, message: String },
}

impl StorageError {
    pub fn transfer(path: &str, source: io::Error) -> Self {
        StorageError::Transfer {
            path: path.to_string(),
            source,
        }
    }

    pub fn config(endpoint: &str, message: impl Into<String>) -> Self {
        StorageError::Config {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

impl From<StorageError> for utils::error::Error {
    fn from(err: StorageError) -> Self {
        utils::error::Error::with_source(err.to_string(), Box::new(err))
    }
}
