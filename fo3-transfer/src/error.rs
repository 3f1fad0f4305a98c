//! Error types for the transfer core

use thiserror::Error;

/// Custom error type for transfer operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Derivation error: {0}")]
    Derivation(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient funds: available {available} BTC, needed {needed} BTC, shortfall {shortfall} BTC")]
    InsufficientFunds {
        /// Spendable balance in decimal BTC
        available: String,
        /// Amount plus fee in decimal BTC
        needed: String,
        /// Difference in decimal BTC
        shortfall: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out after {timeout_ms} ms: {operation}")]
    Timeout {
        /// What was being attempted
        operation: String,
        /// The bound that elapsed
        timeout_ms: u64,
    },

    #[error("Signing error at input {input_index}: {reason}")]
    Signing {
        /// Index of the input that failed to sign
        input_index: usize,
        /// Underlying cause
        reason: String,
    },

    /// Signing failure on an account-based chain, where there are no inputs
    #[error("Signing error: {0}")]
    AccountSigning(String),

    #[error("Broadcast failed on every provider: {}", .0.join("; "))]
    Broadcast(Vec<String>),

    #[error("Wrong network: expected chain id {expected}, provider reported {actual}")]
    WrongNetwork {
        /// Configured chain id
        expected: u64,
        /// Chain id reported by the provider
        actual: u64,
    },

    #[error("Estimation error: {0}")]
    Estimation(String),

    #[error("Transaction reverted: {0}")]
    Reverted(String),

    #[error("Unsupported token: {0}")]
    UnsupportedToken(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error came from the bounded-call timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Network(e.to_string())
    }
}

impl From<ethers::providers::ProviderError> for Error {
    fn from(e: ethers::providers::ProviderError) -> Self {
        Error::Network(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Network(format!("Malformed provider response: {}", e))
    }
}

/// Result type for transfer operations
pub type Result<T> = std::result::Result<T, Error>;
