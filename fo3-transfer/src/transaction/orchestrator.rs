//! Request dispatch across chain adapters

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::config::TransferConfig;
use crate::crypto::keys::Chain;
use crate::error::{Error, Result};
use crate::transaction::bitcoin::BitcoinAdapter;
use crate::transaction::ethereum::EthereumAdapter;
use crate::transaction::provider::http_client;
use crate::transaction::solana::SolanaAdapter;
use crate::transaction::types::{ChainAdapter, TransactionResult, TransferReceipt, TransferRequest};

/// Routes each request to the adapter for its token symbol
#[derive(Clone)]
pub struct TransferOrchestrator {
    adapters: HashMap<Chain, Arc<dyn ChainAdapter>>,
}

impl TransferOrchestrator {
    /// Build the Bitcoin, Ethereum and Solana adapters from configuration
    pub fn new(config: &TransferConfig) -> Result<Self> {
        config.validate()?;
        let client = http_client()?;

        let adapters: Vec<Arc<dyn ChainAdapter>> = vec![
            Arc::new(BitcoinAdapter::with_client(config.bitcoin.clone(), client.clone())?),
            Arc::new(EthereumAdapter::new(config.ethereum.clone())?),
            Arc::new(SolanaAdapter::with_client(config.solana.clone(), client)?),
        ];
        Ok(Self::with_adapters(adapters))
    }

    /// Use the given adapters; a later adapter replaces an earlier one for the same chain
    pub fn with_adapters(adapters: Vec<Arc<dyn ChainAdapter>>) -> Self {
        Self {
            adapters: adapters.into_iter().map(|adapter| (adapter.chain(), adapter)).collect(),
        }
    }

    /// Chains this orchestrator can serve
    pub fn supported_chains(&self) -> Vec<Chain> {
        let mut chains: Vec<Chain> = self.adapters.keys().copied().collect();
        chains.sort_by_key(|chain| chain.symbol());
        chains
    }

    /// Run one transfer to completion. Never panics into the caller; every
    /// failure is reported in the returned result.
    pub async fn execute(&self, request: TransferRequest) -> TransactionResult {
        let request_id = Uuid::new_v4();
        let symbol = request.token_symbol.trim().to_uppercase();
        let span = tracing::info_span!("transfer", %request_id, symbol = %symbol);

        async move {
            let result = self.dispatch(&symbol, &request).await;
            match &result {
                Ok(receipt) => info!(tx_hash = %receipt.tx_hash, "Transfer submitted"),
                Err(e) => warn!(error = %e, "Transfer failed"),
            }
            TransactionResult::from(result)
        }
        .instrument(span)
        .await
    }

    async fn dispatch(&self, symbol: &str, request: &TransferRequest) -> Result<TransferReceipt> {
        let adapter = Chain::from_symbol(symbol)
            .and_then(|chain| self.adapters.get(&chain))
            .ok_or_else(|| Error::UnsupportedToken(symbol.to_string()))?;

        info!(chain = %adapter.chain(), to = %request.recipient_address, amount = %request.amount, "Dispatching transfer");
        adapter
            .transfer(&request.mnemonic, &request.recipient_address, &request.amount)
            .await
    }
}
