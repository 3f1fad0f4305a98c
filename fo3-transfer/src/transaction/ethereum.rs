//! Ethereum transfer adapter

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::prelude::{Address, TransactionRequest as EthersTransactionRequest, U256};
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{TransactionReceipt, H256, U64};
use tracing::{debug, info, warn};

use crate::config::EthereumConfig;
use crate::crypto::keys::ethereum::{derive_ethereum_key, parse_address, EthereumKey};
use crate::crypto::keys::{Chain, ChainSigner, DerivationPath};
use crate::crypto::mnemonic::mnemonic_to_seed;
use crate::error::{Error, Result};
use crate::transaction::amount::to_minor_units;
use crate::transaction::provider::bounded;
use crate::transaction::types::{ChainAdapter, FeeEstimate, TransferReceipt, TransferWarning};

const WEI_PER_GWEI: u64 = 1_000_000_000;

/// Ethereum adapter
pub struct EthereumAdapter {
    config: EthereumConfig,
    path: DerivationPath,
    provider: Arc<Provider<Http>>,
}

impl EthereumAdapter {
    /// Create an adapter for the configured RPC endpoint
    pub fn new(config: EthereumConfig) -> Result<Self> {
        let provider = Provider::<Http>::try_from(config.rpc.url.as_str())
            .map_err(|e| Error::Config(format!("Invalid Ethereum RPC url {}: {}", config.rpc.url, e)))?;
        let path = config
            .derivation_path
            .parse()
            .map_err(|e: Error| Error::Config(e.to_string()))?;

        Ok(Self {
            config,
            path,
            provider: Arc::new(provider),
        })
    }

    fn rpc_timeout(&self) -> Duration {
        self.config.rpc.timeout()
    }

    /// Fail unless the provider serves the configured chain
    pub async fn verify_chain(&self) -> Result<()> {
        let chain_id = bounded("eth_chainId", self.rpc_timeout(), async {
            self.provider.get_chainid().await.map_err(Error::from)
        })
        .await?;

        if chain_id != U256::from(self.config.expected_chain_id) {
            return Err(Error::WrongNetwork {
                expected: self.config.expected_chain_id,
                actual: chain_id.low_u64(),
            });
        }
        Ok(())
    }

    /// Current gas price, or the configured fallback when the node cannot say
    pub async fn gas_price(&self) -> U256 {
        let fetched = bounded("eth_gasPrice", self.rpc_timeout(), async {
            self.provider.get_gas_price().await.map_err(Error::from)
        })
        .await;

        match fetched {
            Ok(price) => price,
            Err(e) => {
                let fallback = U256::from(self.config.fallback_gas_price_gwei) * U256::from(WEI_PER_GWEI);
                warn!(error = %e, fallback_gwei = self.config.fallback_gas_price_gwei, "Gas price unavailable, using fallback");
                fallback
            }
        }
    }

    /// Gas limit for `tx` from a simulated call; a rejection is an estimation error
    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256> {
        bounded("eth_estimateGas", self.rpc_timeout(), async {
            self.provider
                .estimate_gas(tx, None)
                .await
                .map_err(|e| Error::Estimation(e.to_string()))
        })
        .await
    }

    async fn submit(&self, key: &EthereumKey, mut tx: TypedTransaction) -> Result<H256> {
        let nonce = bounded("eth_getTransactionCount", self.rpc_timeout(), async {
            self.provider
                .get_transaction_count(key.account(), None)
                .await
                .map_err(Error::from)
        })
        .await?;
        tx.set_nonce(nonce);

        let signature = key
            .wallet()
            .sign_transaction_sync(&tx)
            .map_err(|e| Error::AccountSigning(e.to_string()))?;
        let raw = tx.rlp_signed(&signature);

        let pending = bounded("eth_sendRawTransaction", self.rpc_timeout(), async {
            self.provider.send_raw_transaction(raw).await.map_err(Error::from)
        })
        .await?;

        Ok(pending.tx_hash())
    }

    /// Poll for the receipt until it appears or `confirmation_timeout` elapses
    async fn await_receipt(&self, tx_hash: H256) -> Option<TransactionReceipt> {
        let poll = async {
            loop {
                let fetched = bounded("eth_getTransactionReceipt", self.rpc_timeout(), async {
                    self.provider.get_transaction_receipt(tx_hash).await.map_err(Error::from)
                })
                .await;

                match fetched {
                    Ok(Some(receipt)) => return receipt,
                    Ok(None) => {}
                    Err(e) => debug!(error = %e, "Receipt poll failed"),
                }
                tokio::time::sleep(self.config.poll_interval()).await;
            }
        };

        tokio::time::timeout(self.config.confirmation_timeout(), poll).await.ok()
    }
}

#[async_trait]
impl ChainAdapter for EthereumAdapter {
    fn chain(&self) -> Chain {
        Chain::Ethereum
    }

    async fn transfer(&self, mnemonic: &str, recipient: &str, amount: &str) -> Result<TransferReceipt> {
        let to: Address = parse_address(recipient)?;
        let value = U256::from(to_minor_units(amount, Chain::Ethereum.decimals())?);

        let seed = mnemonic_to_seed(mnemonic, None)?;
        let key = derive_ethereum_key(&seed[..], &self.path, self.config.expected_chain_id)?;

        self.verify_chain().await?;
        info!(chain = "ETH", from = %key.address(), to = %recipient, wei = %value, "Preparing transfer");

        let gas_price = self.gas_price().await;
        let mut tx: TypedTransaction = EthersTransactionRequest::new()
            .from(key.account())
            .to(to)
            .value(value)
            .gas_price(gas_price)
            .chain_id(self.config.expected_chain_id)
            .into();

        let gas_limit = self.estimate_gas(&tx).await?;
        tx.set_gas(gas_limit);
        let fee = FeeEstimate {
            rate: gas_price.low_u128(),
            total: gas_limit.saturating_mul(gas_price).low_u128(),
        };
        debug!(gas_limit = %gas_limit, gas_price = fee.rate, fee_wei = fee.total, "Estimated fee");

        let tx_hash = self.submit(&key, tx).await?;
        let tx_hash_hex = format!("{:#x}", tx_hash);
        info!(tx_hash = %tx_hash_hex, "Transaction submitted");

        match self.await_receipt(tx_hash).await {
            Some(receipt) if receipt.status == Some(U64::zero()) => {
                Err(Error::Reverted(format!("{} failed on-chain", tx_hash_hex)))
            }
            Some(receipt) => {
                info!(tx_hash = %tx_hash_hex, block = ?receipt.block_number, "Transaction confirmed");
                Ok(TransferReceipt::confirmed(tx_hash_hex))
            }
            None => {
                let waited_secs = self.config.confirmation_timeout_secs;
                warn!(tx_hash = %tx_hash_hex, waited_secs, "No receipt before confirmation timeout");
                Ok(TransferReceipt {
                    tx_hash: tx_hash_hex,
                    warning: Some(TransferWarning::ConfirmationTimeout { waited_secs }),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::provider::{EndpointConfig, ProviderKind};

    fn config(url: &str) -> EthereumConfig {
        EthereumConfig {
            rpc: EndpointConfig::new("local", ProviderKind::JsonRpc, url, 500),
            ..EthereumConfig::default()
        }
    }

    #[test]
    fn test_rejects_bad_rpc_url() {
        assert!(matches!(EthereumAdapter::new(config("not a url")), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_invalid_recipient_fails_before_network() {
        // Nothing listens on this port; a network call would surface as Network or Timeout
        let adapter = EthereumAdapter::new(config("http://127.0.0.1:9")).unwrap();
        let err = adapter
            .transfer("abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about", "0x1234", "0.1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn test_gas_price_falls_back() {
        let adapter = EthereumAdapter::new(config("http://127.0.0.1:9")).unwrap();
        assert_eq!(adapter.gas_price().await, U256::from(20_000_000_000u64));
    }
}
