//! Error types for the vault ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Reconciliation mismatch between the replayed state and the chain
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Input that has no meaningful result (empty leaf set, backwards query, ...)
    #[error("Degenerate input: {0}")]
    DegenerateInput(String),

    /// A single auxiliary read returned no data
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    /// Chain data provider failure
    #[error("Provider error: {0}")]
    Provider(String),

    /// Malformed ABI payload or log
    #[error("Decode error: {0}")]
    Decode(String),

    /// 256-bit arithmetic overflow or underflow
    #[error("Arithmetic overflow: {0}")]
    Overflow(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error must abort the whole run
    pub fn is_fatal_invariant(&self) -> bool {
        matches!(self, Error::InvariantViolation(_) | Error::Overflow(_))
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
