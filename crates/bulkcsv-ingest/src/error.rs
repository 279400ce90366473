//! Run-terminating errors

use std::time::Duration;

use thiserror::Error;

use crate::sink::SinkError;
use crate::source::SourceError;

/// Invalid settings, caught before anything is opened
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("invalid delimiter '{0}': expected a single ASCII character other than '\"', CR or LF")]
    InvalidDelimiter(String),
}

/// Errors that end a run without a summary
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("timeout waiting for CSV header after {}s", .0.as_secs_f64())]
    HeaderTimeout(Duration),

    #[error("header channel closed unexpectedly")]
    HeaderChannelClosed,

    #[error("cancelled before the CSV header arrived")]
    Cancelled,

    #[error(transparent)]
    Source(SourceError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_messages() {
        assert_eq!(
            IngestError::HeaderTimeout(Duration::from_secs(10)).to_string(),
            "timeout waiting for CSV header after 10s"
        );

        let err = IngestError::Source(SourceError::Empty {
            path: PathBuf::from("input.csv"),
        });
        assert_eq!(err.to_string(), "CSV file input.csv is empty");

        let err: IngestError = ConfigError::ZeroTimeout("idle timeout").into();
        assert_eq!(
            err.to_string(),
            "invalid configuration: idle timeout must be greater than zero"
        );
    }
}
