use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures of the schema introspection service.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("schema service unreachable: {0}")]
    Connection(String),
    #[error("schema service rejected credentials: {0}")]
    Auth(String),
    #[error("malformed response from schema service: {0}")]
    Malformed(String),
    #[error("schema service did not answer within {0:?}")]
    Timeout(Duration),
}

impl TransportError {
    /// Classify a raw MCP/RPC failure message.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("login failed")
            || lower.contains("authentication")
            || lower.contains("permission denied")
            || lower.contains("unauthorized")
        {
            TransportError::Auth(message)
        } else if lower.contains("parse")
            || lower.contains("invalid json")
            || lower.contains("missing result")
        {
            TransportError::Malformed(message)
        } else {
            TransportError::Connection(message)
        }
    }
}

/// Failures of an Analyst or Validator call. Every variant consumes one attempt.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("model call failed: {0}")]
    Model(String),
    #[error("model output could not be parsed: {0}")]
    Unparseable(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
}

/// Outcomes that leave a stage run without a persisted result.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("stage run cancelled after {attempts_used} attempt(s)")]
    Cancelled { attempts_used: u32 },
    #[error("failed to write {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
