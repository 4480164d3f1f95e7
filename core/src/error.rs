//! Error types for the retrieval engine.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A parameter is out of range or the input cannot be used at all
    /// (empty corpus, zero clusters, zero-dimension samples, ...).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Sample, vocabulary or histogram lengths disagree.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A persisted vocabulary, index or sample file is malformed or truncated.
    #[error("malformed file: {0}")]
    Format(String),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidConfiguration(msg.into())
    }

    /// Fails with `DimensionMismatch` unless `got == expected`.
    pub(crate) fn check_dimension(expected: usize, got: usize) -> Result<()> {
        if expected == got {
            Ok(())
        } else {
            Err(Error::DimensionMismatch { expected, got })
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
