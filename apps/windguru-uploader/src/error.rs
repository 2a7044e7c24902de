use std::time::Duration;
use thiserror::Error;

/// The record cannot be turned into a request. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("no {0} in record")]
    MissingField(&'static str),
}

/// A single delivery attempt failed; the worker retries these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("server returned HTTP {0}")]
    Status(u16),
    #[error("server response: {0}")]
    Rejected(String),
}

/// Invalid or incomplete channel configuration; the channel does not start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing option {0}")]
    Missing(&'static str),
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
