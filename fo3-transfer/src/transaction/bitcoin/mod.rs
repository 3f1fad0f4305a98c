//! Bitcoin transfer adapter
//!
//! Spends every unreserved UTXO of the derived P2WPKH address in one
//! transaction, paying the recipient and returning change above the dust
//! threshold to the source address.

pub mod broadcast;
pub mod builder;
pub mod utxo;

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bitcoin::{Address, Network};
use tracing::{debug, info};

use crate::config::BitcoinConfig;
use crate::crypto::keys::bitcoin::derive_bitcoin_key;
use crate::crypto::keys::{Chain, ChainSigner, DerivationPath};
use crate::crypto::mnemonic::mnemonic_to_seed;
use crate::error::{Error, Result};
use crate::transaction::amount::to_minor_units;
use crate::transaction::provider::http_client;
use crate::transaction::types::{ChainAdapter, TransferReceipt, Utxo};

use self::builder::{build_unsigned, finalize, plan_spend, sign_inputs, to_raw_hex, FeePolicy};

type ReservationSet = Arc<Mutex<HashSet<String>>>;

/// Bitcoin adapter
pub struct BitcoinAdapter {
    config: BitcoinConfig,
    network: Network,
    path: DerivationPath,
    policy: FeePolicy,
    client: reqwest::Client,
    reservations: ReservationSet,
}

impl BitcoinAdapter {
    /// Create an adapter from configuration
    pub fn new(config: BitcoinConfig) -> Result<Self> {
        Self::with_client(config, http_client()?)
    }

    /// Create an adapter sharing an existing HTTP client
    pub fn with_client(config: BitcoinConfig, client: reqwest::Client) -> Result<Self> {
        let path = config
            .derivation_path
            .parse()
            .map_err(|e: Error| Error::Config(e.to_string()))?;
        let policy = FeePolicy {
            rate_sat_per_vb: config.fee_rate_sat_per_vb,
            min_fee_sat: config.min_fee_sat,
            dust_threshold_sat: config.dust_threshold_sat,
        };

        Ok(Self {
            network: config.network.into(),
            config,
            path,
            policy,
            client,
            reservations: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Number of outpoints held by requests still in progress
    pub fn reserved_outpoints(&self) -> usize {
        lock(&self.reservations).len()
    }

    /// Decode `recipient` and require it to belong to the configured network
    pub fn parse_recipient(&self, recipient: &str) -> Result<Address> {
        Address::from_str(recipient.trim())
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", recipient, e)))?
            .require_network(self.network)
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", recipient, e)))
    }

    fn reserve(&self, utxos: Vec<Utxo>) -> (Vec<Utxo>, Reservation) {
        let mut held = lock(&self.reservations);
        let mut keys = Vec::new();
        let mut free = Vec::new();

        for utxo in utxos {
            let key = outpoint_key(&utxo);
            if held.insert(key.clone()) {
                keys.push(key);
                free.push(utxo);
            } else {
                debug!(outpoint = %key, "Skipping UTXO reserved by another request");
            }
        }

        let reservation = Reservation {
            set: Arc::clone(&self.reservations),
            keys,
        };
        (free, reservation)
    }
}

#[async_trait]
impl ChainAdapter for BitcoinAdapter {
    fn chain(&self) -> Chain {
        Chain::Bitcoin
    }

    async fn transfer(&self, mnemonic: &str, recipient: &str, amount: &str) -> Result<TransferReceipt> {
        let recipient = self.parse_recipient(recipient)?;
        let amount_sat = u64::try_from(to_minor_units(amount, Chain::Bitcoin.decimals())?)
            .map_err(|_| Error::InvalidAmount(format!("{} BTC is out of range", amount)))?;

        let seed = mnemonic_to_seed(mnemonic, None)?;
        let key = derive_bitcoin_key(&seed[..], &self.path, self.network)?;
        let source = key.address();
        info!(chain = "BTC", from = %source, to = %recipient, amount_sat, "Preparing transfer");

        let utxos = utxo::fetch_utxos(&self.client, &self.config.utxo_providers, &source).await?;
        let (utxos, _reservation) = self.reserve(utxos);

        let plan = plan_spend(utxos, amount_sat, &self.policy)?;
        let unsigned = build_unsigned(&plan, &recipient, key.p2wpkh_address())?;
        let witnesses = sign_inputs(&unsigned, &plan, &key)?;
        let signed = finalize(unsigned, witnesses)?;
        let raw_hex = to_raw_hex(&signed);
        debug!(txid = %signed.txid(), vsize = signed.vsize(), fee_sat = plan.fee_sat, "Transaction signed");

        let tx_hash = broadcast::broadcast(&self.client, &self.config.broadcast_providers, &raw_hex).await?;
        Ok(TransferReceipt::confirmed(tx_hash))
    }
}

/// Releases its outpoints when the owning request finishes
struct Reservation {
    set: ReservationSet,
    keys: Vec<String>,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut held = lock(&self.set);
        for key in &self.keys {
            held.remove(key);
        }
    }
}

fn lock(set: &ReservationSet) -> std::sync::MutexGuard<'_, HashSet<String>> {
    // A panic elsewhere cannot leave the set half-updated
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn outpoint_key(utxo: &Utxo) -> String {
    format!("{}:{}", utxo.txid, utxo.output_index)
}
