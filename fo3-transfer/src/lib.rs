//! FO3 Transfer Core - Multi-chain transaction construction, signing and broadcast
//!
//! This library takes a seed phrase, a recipient, a token symbol and an amount,
//! derives the chain-specific signing key, builds and signs a transaction for
//! Bitcoin (SegWit), Ethereum or Solana, and submits it through an ordered list
//! of fallback providers. Every request ends in a uniform [`TransactionResult`].

pub mod error;
pub mod config;
pub mod crypto;
pub mod transaction;

// Re-export commonly used types for convenience
pub use config::TransferConfig;
pub use error::{Error, Result};
pub use transaction::{TransactionResult, TransferOrchestrator, TransferRequest};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
