//! Error types for the reward engine

use thiserror::Error;

/// Result type for reward engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Reward engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger, provider or commitment error
    #[error("Ledger error: {0}")]
    Ledger(#[from] vault_ledger::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error is a reconciliation or arithmetic failure that
    /// must abort the run without emitting any output
    pub fn is_fatal_invariant(&self) -> bool {
        matches!(self, Error::Ledger(inner) if inner.is_fatal_invariant())
    }

    /// Shorthand for a ledger-level invariant violation
    pub fn invariant(msg: impl Into<String>) -> Self {
        Error::Ledger(vault_ledger::Error::InvariantViolation(msg.into()))
    }

    /// Shorthand for a ledger-level degenerate input
    pub fn degenerate(msg: impl Into<String>) -> Self {
        Error::Ledger(vault_ledger::Error::DegenerateInput(msg.into()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(format!("Failed to parse config: {}", err))
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
