//! Centralized error type for the pipeline.
//!
//! Every fallible operation across the gateway, stores, agents, and
//! orchestrator returns `Result<T>`. Variants line up with the error-kind
//! table in the design notes: transient vs. permanent failures are kept
//! distinct so callers can decide what to retry and what to fall back on.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// LLM call exhausted its retry budget.
    #[error("LLM call failed after retries: {0}")]
    LlmTransient(String),

    /// LLM responded but the content could not be salvaged into JSON.
    #[error("LLM response was not valid JSON: {0}")]
    LlmMalformedJson(String),

    /// An article could not be carried through extraction/merge.
    #[error("article processing failed for {url}: {reason}")]
    ArticleFailed { url: String, reason: String },

    /// The merger fell back to verbatim source union after an LLM failure.
    #[error("merger fell back to verbatim input: {0}")]
    MergerFailed(String),

    /// The vector index backend is unreachable or returned a fault.
    #[error("vector backend unavailable: {0}")]
    VectorBackendUnavailable(String),

    /// Alias resolution could not settle on a single entity.
    #[error("entity resolution ambiguous for alias '{0}'")]
    EntityAmbiguous(String),

    /// A SQLite write lost a race or violated a constraint.
    #[error("database write conflict: {0}")]
    DbConflict(String),

    /// Config file or environment expansion failed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Any other rusqlite failure.
    #[error("database error: {0}")]
    Database(String),

    /// Filesystem I/O failure (config, telemetry log, fixtures).
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON encode/decode failure outside the LLM salvage path.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Outbound HTTP failure talking to the LLM provider.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Anything that doesn't fit a more specific variant above.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::ArticleFailed {
            url: "https://example.com/a".to_string(),
            reason: "timeout".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "article processing failed for https://example.com/a: timeout"
        );

        let err = Error::LlmTransient("3 attempts exhausted".to_string());
        assert!(err.to_string().contains("retries"));
    }

    #[test]
    fn test_error_conversion_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(_) => {}
            _ => panic!("expected Serialization error"),
        }
    }

    #[test]
    fn test_error_conversion_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing file");
        let err: Error = io_err.into();
        match err {
            Error::Io(msg) => assert!(msg.contains("missing file")),
            _ => panic!("expected Io error"),
        }
    }
}

