//! Transaction functionality
//!
//! One adapter per chain builds, signs and submits native transfers; the
//! orchestrator routes requests to them by token symbol.

pub mod amount;
pub mod bitcoin;
pub mod ethereum;
pub mod orchestrator;
pub mod provider;
pub mod solana;
pub mod types;

pub use self::bitcoin::BitcoinAdapter;
pub use ethereum::EthereumAdapter;
pub use orchestrator::TransferOrchestrator;
pub use provider::{EndpointConfig, ProviderKind};
pub use solana::SolanaAdapter;
pub use types::*;
