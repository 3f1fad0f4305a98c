//! Transfer configuration
//!
//! Provider endpoints and chain policies are data, not code. Values come from
//! the built-in testnet defaults, then an optional TOML file, then `FO3_*`
//! environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::keys::bitcoin::{Network, DEFAULT_BITCOIN_PATH};
use crate::crypto::keys::ethereum::DEFAULT_ETHEREUM_PATH;
use crate::crypto::keys::solana::{SolanaDerivation, DEFAULT_SOLANA_PATH};
use crate::crypto::keys::DerivationPath;
use crate::error::{Error, Result};
use crate::transaction::provider::{EndpointConfig, ProviderKind};

/// Sepolia chain id
pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bitcoin adapter settings
    pub bitcoin: BitcoinConfig,
    /// Ethereum adapter settings
    pub ethereum: EthereumConfig,
    /// Solana adapter settings
    pub solana: SolanaConfig,
}

/// Bitcoin network selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitcoinNetwork {
    Mainnet,
    Testnet,
    Signet,
    Regtest,
}

impl From<BitcoinNetwork> for Network {
    fn from(network: BitcoinNetwork) -> Self {
        match network {
            BitcoinNetwork::Mainnet => Network::Bitcoin,
            BitcoinNetwork::Testnet => Network::Testnet,
            BitcoinNetwork::Signet => Network::Signet,
            BitcoinNetwork::Regtest => Network::Regtest,
        }
    }
}

/// Bitcoin adapter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BitcoinConfig {
    pub network: BitcoinNetwork,
    pub derivation_path: String,
    /// UTXO sources, tried in priority order
    pub utxo_providers: Vec<EndpointConfig>,
    /// Broadcast targets, tried in priority order
    pub broadcast_providers: Vec<EndpointConfig>,
    pub fee_rate_sat_per_vb: u64,
    pub min_fee_sat: u64,
    pub dust_threshold_sat: u64,
}

impl Default for BitcoinConfig {
    fn default() -> Self {
        Self {
            network: BitcoinNetwork::Testnet,
            derivation_path: DEFAULT_BITCOIN_PATH.to_string(),
            utxo_providers: vec![
                EndpointConfig::new("blockstream", ProviderKind::Esplora, "https://blockstream.info/testnet/api", 8_000),
                EndpointConfig::new("blockcypher", ProviderKind::BlockCypher, "https://api.blockcypher.com/v1/btc/test3", 12_000)
                    .with_priority(1),
            ],
            broadcast_providers: vec![
                EndpointConfig::new("blockcypher", ProviderKind::BlockCypher, "https://api.blockcypher.com/v1/btc/test3", 15_000),
                EndpointConfig::new("mempool", ProviderKind::Esplora, "https://mempool.space/testnet/api", 15_000)
                    .with_priority(1),
            ],
            fee_rate_sat_per_vb: 2,
            min_fee_sat: 300,
            dust_threshold_sat: 546,
        }
    }
}

/// Ethereum adapter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EthereumConfig {
    pub rpc: EndpointConfig,
    pub expected_chain_id: u64,
    pub derivation_path: String,
    pub fallback_gas_price_gwei: u64,
    pub confirmation_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl EthereumConfig {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for EthereumConfig {
    fn default() -> Self {
        Self {
            rpc: EndpointConfig::new("sepolia", ProviderKind::JsonRpc, "https://ethereum-sepolia-rpc.publicnode.com", 15_000),
            expected_chain_id: SEPOLIA_CHAIN_ID,
            derivation_path: DEFAULT_ETHEREUM_PATH.to_string(),
            fallback_gas_price_gwei: 20,
            confirmation_timeout_secs: 60,
            poll_interval_ms: 2_000,
        }
    }
}

/// Solana adapter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolanaConfig {
    /// RPC endpoints, tried in priority order
    pub endpoints: Vec<EndpointConfig>,
    pub derivation_path: String,
    pub derivation: SolanaDerivation,
    /// Pause before moving to the next endpoint
    pub retry_delay_ms: u64,
    pub confirm_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl SolanaConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for SolanaConfig {
    fn default() -> Self {
        Self {
            endpoints: default_solana_endpoints(&[
                "https://api.devnet.solana.com",
                "https://rpc.ankr.com/solana_devnet",
                "https://solana-devnet.api.onfinality.io/public",
            ]),
            derivation_path: DEFAULT_SOLANA_PATH.to_string(),
            derivation: SolanaDerivation::Slip10,
            retry_delay_ms: 1_000,
            confirm_timeout_secs: 60,
            poll_interval_ms: 500,
        }
    }
}

fn default_solana_endpoints(urls: &[&str]) -> Vec<EndpointConfig> {
    urls.iter()
        .enumerate()
        .map(|(i, url)| {
            EndpointConfig::new(&format!("solana-{}", i + 1), ProviderKind::JsonRpc, url, 10_000)
                .with_priority(i as u32)
        })
        .collect()
}

impl TransferConfig {
    /// Defaults, then the TOML file if given, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document; missing sections keep their defaults
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))
    }

    /// Apply `FO3_*` overrides from a key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("FO3_ETH_RPC_URL") {
            self.ethereum.rpc.url = url;
        }
        if let Some(raw) = lookup("FO3_ETH_CHAIN_ID") {
            self.ethereum.expected_chain_id = raw
                .trim()
                .parse::<u64>()
                .map_err(|e| Error::Config(format!("FO3_ETH_CHAIN_ID={:?} is not a chain id: {}", raw, e)))?;
        }
        if let Some(token) = lookup("FO3_BTC_API_TOKEN") {
            for endpoint in self
                .bitcoin
                .utxo_providers
                .iter_mut()
                .chain(self.bitcoin.broadcast_providers.iter_mut())
                .filter(|endpoint| endpoint.kind == ProviderKind::BlockCypher)
            {
                endpoint.api_token = Some(token.clone());
            }
        }
        if let Some(urls) = lookup("FO3_SOL_RPC_URLS") {
            let urls: Vec<&str> = urls.split(',').map(str::trim).filter(|u| !u.is_empty()).collect();
            if !urls.is_empty() {
                self.solana.endpoints = default_solana_endpoints(&urls);
            }
        }
        Ok(())
    }

    /// Reject configurations the adapters cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.bitcoin.utxo_providers.is_empty() {
            return Err(Error::Config("bitcoin.utxo_providers is empty".to_string()));
        }
        if self.bitcoin.broadcast_providers.is_empty() {
            return Err(Error::Config("bitcoin.broadcast_providers is empty".to_string()));
        }
        if self.solana.endpoints.is_empty() {
            return Err(Error::Config("solana.endpoints is empty".to_string()));
        }

        let all_endpoints = self
            .bitcoin
            .utxo_providers
            .iter()
            .chain(&self.bitcoin.broadcast_providers)
            .chain(std::iter::once(&self.ethereum.rpc))
            .chain(&self.solana.endpoints);
        for endpoint in all_endpoints {
            if endpoint.timeout_ms == 0 {
                return Err(Error::Config(format!("endpoint {} has a zero timeout", endpoint.name)));
            }
            if !endpoint.url.starts_with("http://") && !endpoint.url.starts_with("https://") {
                return Err(Error::Config(format!("endpoint {} has a non-HTTP url", endpoint.name)));
            }
        }

        for endpoint in &self.bitcoin.utxo_providers {
            if endpoint.kind == ProviderKind::JsonRpc {
                return Err(Error::Config(format!("{} cannot serve UTXO queries", endpoint.name)));
            }
        }

        for path in [
            &self.bitcoin.derivation_path,
            &self.ethereum.derivation_path,
            &self.solana.derivation_path,
        ] {
            path.parse::<DerivationPath>()
                .map_err(|e| Error::Config(e.to_string()))?;
        }

        if self.ethereum.confirmation_timeout_secs == 0 || self.solana.confirm_timeout_secs == 0 {
            return Err(Error::Config("confirmation timeouts must be positive".to_string()));
        }

        Ok(())
    }
}
