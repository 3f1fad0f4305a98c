//! Common transaction types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::crypto::keys::Chain;
use crate::error::{Error, Result};

/// A transfer request as supplied by the caller
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// Native token symbol (BTC, ETH, SOL)
    pub token_symbol: String,
    /// Recipient address in the chain's text form
    pub recipient_address: String,
    /// Decimal amount in the chain's major unit
    pub amount: String,
    /// Seed phrase; never logged or persisted
    pub mnemonic: String,
}

impl std::fmt::Debug for TransferRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferRequest")
            .field("token_symbol", &self.token_symbol)
            .field("recipient_address", &self.recipient_address)
            .field("amount", &self.amount)
            .field("mnemonic", &"<redacted>")
            .finish()
    }
}

/// Outcome of a transfer that reached the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    /// Transaction hash or signature
    pub tx_hash: String,
    /// Non-fatal condition the caller should know about
    pub warning: Option<TransferWarning>,
}

impl TransferReceipt {
    pub fn confirmed(tx_hash: String) -> Self {
        Self { tx_hash, warning: None }
    }
}

/// Non-fatal conditions attached to a successful submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferWarning {
    /// Submitted, but no receipt arrived within the confirmation bound
    ConfirmationTimeout { waited_secs: u64 },
}

impl std::fmt::Display for TransferWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfirmationTimeout { waited_secs } => write!(
                f,
                "ConfirmationTimeoutWarning: not confirmed after {}s; the transaction may still confirm",
                waited_secs
            ),
        }
    }
}

/// Fee estimate for a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    /// sat/vB for Bitcoin, wei per gas for Ethereum
    pub rate: u128,
    /// Total fee in the smallest unit
    pub total: u128,
}

/// Unspent output in the common shape every UTXO provider is normalized to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub output_index: u32,
    pub value_sat: u64,
}

/// The single result shape returned for every chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl TransactionResult {
    pub fn failure(error: &Error) -> Self {
        Self {
            success: false,
            tx_hash: None,
            error_message: Some(error.to_string()),
            warning: None,
        }
    }
}

impl From<Result<TransferReceipt>> for TransactionResult {
    fn from(result: Result<TransferReceipt>) -> Self {
        match result {
            Ok(receipt) => Self {
                success: true,
                tx_hash: Some(receipt.tx_hash),
                error_message: None,
                warning: receipt.warning.map(|w| w.to_string()),
            },
            Err(e) => Self::failure(&e),
        }
    }
}

/// Build, sign and submit a native transfer on one chain
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// The chain this adapter serves
    fn chain(&self) -> Chain;

    /// Run the full pipeline for one request
    async fn transfer(&self, mnemonic: &str, recipient: &str, amount: &str) -> Result<TransferReceipt>;
}
