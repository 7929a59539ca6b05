use std::io;
use std::path::PathBuf;

/// Every failure that can escalate out of the pipeline.
///
/// Line-level anomalies never show up here; parsers log them and move on.
#[derive(Debug, thiserror::Error)]
pub enum BugreportError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: {message}", path.display())]
    Archive { path: PathBuf, message: String },

    #[error("not a monkey log: {0}")]
    NotMonkeyLog(String),

    #[error("{0}")]
    Usage(String),

    #[error("invalid inspector configuration {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("invalid signal {name}: {message}")]
    InvalidSignal { name: String, message: String },

    #[error("lookback of {0}s is out of range")]
    LookbackOutOfRange(u64),
}

impl BugreportError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        BugreportError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, BugreportError>;
