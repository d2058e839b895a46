//! Typed errors shared by the executor and the batch sequencer.

use serde::{Deserialize, Serialize};

/// Maximum number of items accepted by a single batch.
pub const MAX_BATCH_SIZE: usize = 100;

/// Classification attached to a failure by whoever produced it.
///
/// Retry decisions are made on the kind, never on the message text.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// Connection refused, reset, DNS failure.
    Network,
    /// The remote call did not answer in time.
    Timeout,
    /// The remote endpoint throttled the caller.
    RateLimit,
    /// The remote endpoint failed internally (5xx, node error).
    Server,
    /// Missing or rejected credentials.
    Authorization,
    /// Malformed request or configuration.
    InvalidInput,
    /// Local validation rejected the request before it was sent.
    Validation,
    /// The circuit breaker refused to run the operation.
    CircuitOpen,
    /// Anything the producer could not classify.
    Unknown,
}

impl ErrorKind {
    /// Kinds that are never retried, whatever the retry profile says.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::Authorization | ErrorKind::InvalidInput | ErrorKind::Validation
        )
    }
}

/// A failure of a single remote operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct OperationError {
    pub kind: ErrorKind,
    pub message: String,
}

impl OperationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimit, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Server, message)
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authorization, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    pub(crate) fn circuit_open(id: &str) -> Self {
        Self::new(
            ErrorKind::CircuitOpen,
            format!("circuit breaker is open for '{}'", id),
        )
    }
}

/// Errors that abort a whole batch run.
///
/// Per-item failures never surface here; they are recorded in the summary.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("batch must contain at least one item")]
    EmptyBatch,
    #[error("batch contains {count} items, the maximum is {max}")]
    TooManyItems { count: usize, max: usize },
    #[error("batch callback failed: {0}")]
    Callback(#[source] anyhow::Error),
}
