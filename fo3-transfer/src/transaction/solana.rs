//! Solana transfer adapter
//!
//! Transactions are assembled in the legacy message format and submitted over
//! plain JSON-RPC, one endpoint at a time.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::SolanaConfig;
use crate::crypto::keys::solana::{derive_solana_key, parse_pubkey, SolanaKey};
use crate::crypto::keys::{Chain, ChainSigner, DerivationPath};
use crate::crypto::mnemonic::mnemonic_to_seed;
use crate::error::{Error, Result};
use crate::transaction::amount::to_minor_units;
use crate::transaction::provider::{bounded, http_client, json_rpc, ordered, EndpointConfig};
use crate::transaction::types::{ChainAdapter, TransferReceipt};

/// The system program id (all zeros, base58 `11111111111111111111111111111111`)
const SYSTEM_PROGRAM_ID: [u8; 32] = [0u8; 32];

/// System program instruction index for `Transfer`
const SYSTEM_TRANSFER: u32 = 2;

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestBlockhash {
    blockhash: String,
    last_valid_block_height: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureStatus {
    #[serde(default)]
    err: Option<serde_json::Value>,
    #[serde(default)]
    confirmation_status: Option<String>,
}

/// How an endpoint attempt ended without a confirmation
#[derive(Debug)]
enum AttemptError {
    /// Nothing of ours can land anymore; the next endpoint may sign a fresh transfer
    Retryable(Error),
    /// The signed transfer may still land; sending another one risks paying twice
    InFlight(Error),
}

/// Solana adapter
pub struct SolanaAdapter {
    config: SolanaConfig,
    path: DerivationPath,
    client: reqwest::Client,
}

impl SolanaAdapter {
    /// Create an adapter from configuration
    pub fn new(config: SolanaConfig) -> Result<Self> {
        Self::with_client(config, http_client()?)
    }

    /// Create an adapter sharing an existing HTTP client
    pub fn with_client(config: SolanaConfig, client: reqwest::Client) -> Result<Self> {
        let path = config
            .derivation_path
            .parse()
            .map_err(|e: Error| Error::Config(e.to_string()))?;
        Ok(Self { config, path, client })
    }

    /// Recent blockhash and the last block height at which it is still accepted
    async fn latest_blockhash(&self, endpoint: &EndpointConfig) -> Result<([u8; 32], u64)> {
        let result = bounded("getLatestBlockhash", endpoint.timeout(), async {
            json_rpc(
                &self.client,
                endpoint,
                "getLatestBlockhash",
                serde_json::json!([{ "commitment": "finalized" }]),
            )
            .await
        })
        .await?;

        let response: RpcResponse<LatestBlockhash> = serde_json::from_value(result)?;
        let bytes = bs58::decode(&response.value.blockhash)
            .into_vec()
            .map_err(|e| Error::Network(format!("{} returned a malformed blockhash: {}", endpoint.name, e)))?;
        let blockhash = <[u8; 32]>::try_from(bytes.as_slice())
            .map_err(|_| Error::Network(format!("{} returned a blockhash that is not 32 bytes", endpoint.name)))?;
        Ok((blockhash, response.value.last_valid_block_height))
    }

    async fn send(&self, endpoint: &EndpointConfig, wire: &[u8]) -> Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(wire);
        let result = bounded("sendTransaction", endpoint.timeout(), async {
            json_rpc(
                &self.client,
                endpoint,
                "sendTransaction",
                serde_json::json!([encoded, { "encoding": "base64", "preflightCommitment": "confirmed" }]),
            )
            .await
        })
        .await?;

        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Network(format!("{} returned a non-string signature", endpoint.name)))
    }

    async fn block_height(&self, endpoint: &EndpointConfig) -> Result<u64> {
        let result = bounded("getBlockHeight", endpoint.timeout(), async {
            json_rpc(
                &self.client,
                endpoint,
                "getBlockHeight",
                serde_json::json!([{ "commitment": "confirmed" }]),
            )
            .await
        })
        .await?;

        result
            .as_u64()
            .ok_or_else(|| Error::Network(format!("{} returned a non-numeric block height", endpoint.name)))
    }

    async fn signature_status(&self, endpoint: &EndpointConfig, signature: &str) -> Result<Option<SignatureStatus>> {
        let result = bounded("getSignatureStatuses", endpoint.timeout(), async {
            json_rpc(
                &self.client,
                endpoint,
                "getSignatureStatuses",
                serde_json::json!([[signature], { "searchTransactionHistory": false }]),
            )
            .await
        })
        .await?;

        let response: RpcResponse<Vec<Option<SignatureStatus>>> = serde_json::from_value(result)?;
        Ok(response.value.into_iter().next().flatten())
    }

    /// Wait for `confirmed` or `finalized`, bounded by the confirmation timeout.
    ///
    /// Only a node-reported failure or an expired blockhash is retryable. Running
    /// out of time while the blockhash is still valid leaves the transfer in flight.
    async fn confirm(
        &self,
        endpoint: &EndpointConfig,
        signature: &str,
        last_valid_block_height: u64,
    ) -> std::result::Result<(), AttemptError> {
        match bounded(
            "Solana confirmation",
            self.config.confirm_timeout(),
            self.poll_status(endpoint, signature, last_valid_block_height),
        )
        .await
        {
            Ok(()) => Ok(()),
            Err(e @ Error::Timeout { .. }) => Err(AttemptError::InFlight(e)),
            Err(e) => Err(AttemptError::Retryable(e)),
        }
    }

    async fn poll_status(&self, endpoint: &EndpointConfig, signature: &str, last_valid_block_height: u64) -> Result<()> {
        loop {
            match self.signature_status(endpoint, signature).await {
                Ok(Some(status)) => {
                    if let Some(err) = status.err {
                        return Err(Error::Reverted(format!("{} failed: {}", signature, err)));
                    }
                    if matches!(status.confirmation_status.as_deref(), Some("confirmed") | Some("finalized")) {
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) => debug!(endpoint = %endpoint.name, error = %e, "Status query failed, still polling"),
            }

            match self.block_height(endpoint).await {
                Ok(height) if height > last_valid_block_height => {
                    return Err(Error::Network(format!(
                        "{} expired unconfirmed at block height {} (valid through {})",
                        signature, height, last_valid_block_height
                    )));
                }
                Ok(_) => {}
                Err(e) => debug!(endpoint = %endpoint.name, error = %e, "Block height query failed, still polling"),
            }

            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    async fn attempt(
        &self,
        endpoint: &EndpointConfig,
        key: &SolanaKey,
        to: &[u8; 32],
        lamports: u64,
    ) -> std::result::Result<String, AttemptError> {
        let (blockhash, last_valid_block_height) =
            self.latest_blockhash(endpoint).await.map_err(AttemptError::Retryable)?;
        let message = transfer_message(&key.pubkey_bytes(), to, lamports, &blockhash);
        let signature = key.sign(&message).map_err(AttemptError::Retryable)?;
        let wire = encode_transaction(&signature, &message);

        // A send that timed out may still have reached the leader, so track it by its own signature
        let tx_signature = match self.send(endpoint, &wire).await {
            Ok(tx_signature) => tx_signature,
            Err(e) if e.is_timeout() => {
                warn!(endpoint = %endpoint.name, error = %e, "Send timed out, watching for the signed transfer");
                bs58::encode(&signature).into_string()
            }
            Err(e) => return Err(AttemptError::Retryable(e)),
        };
        debug!(
            endpoint = %endpoint.name,
            signature = %tx_signature,
            last_valid_block_height,
            "Transaction sent, awaiting confirmation"
        );
        self.confirm(endpoint, &tx_signature, last_valid_block_height).await?;
        Ok(tx_signature)
    }
}

#[async_trait]
impl ChainAdapter for SolanaAdapter {
    fn chain(&self) -> Chain {
        Chain::Solana
    }

    async fn transfer(&self, mnemonic: &str, recipient: &str, amount: &str) -> Result<TransferReceipt> {
        let to = parse_pubkey(recipient)?;
        let lamports = u64::try_from(to_minor_units(amount, Chain::Solana.decimals())?)
            .map_err(|_| Error::InvalidAmount(format!("{} SOL is out of range", amount)))?;

        let seed = mnemonic_to_seed(mnemonic, None)?;
        let key = derive_solana_key(&seed[..], &self.path, self.config.derivation)?;
        info!(chain = "SOL", from = %key.address(), to = %recipient, lamports, "Preparing transfer");

        let mut last_error = None;
        for (attempt, endpoint) in ordered(&self.config.endpoints).into_iter().enumerate() {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay()).await;
            }

            match self.attempt(endpoint, &key, &to, lamports).await {
                Ok(signature) => {
                    info!(endpoint = %endpoint.name, tx_hash = %signature, "Transaction confirmed");
                    return Ok(TransferReceipt::confirmed(signature));
                }
                Err(AttemptError::Retryable(e)) => {
                    warn!(endpoint = %endpoint.name, error = %e, "Solana endpoint failed");
                    last_error = Some(e);
                }
                Err(AttemptError::InFlight(e)) => {
                    warn!(endpoint = %endpoint.name, error = %e, "Transfer still pending, not resending");
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Config("no Solana endpoints configured".to_string())))
    }
}

/// Serialize a legacy message holding one system transfer
pub fn transfer_message(from: &[u8; 32], to: &[u8; 32], lamports: u64, blockhash: &[u8; 32]) -> Vec<u8> {
    let mut accounts: Vec<&[u8; 32]> = vec![from];
    if to != from {
        accounts.push(to);
    }
    accounts.push(&SYSTEM_PROGRAM_ID);
    let to_index = if to == from { 0u8 } else { 1u8 };
    let program_index = (accounts.len() - 1) as u8;

    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&SYSTEM_TRANSFER.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());

    // One signer, no read-only signers, the program account read-only
    let mut message = vec![1u8, 0, 1];
    encode_length(&mut message, accounts.len());
    for account in &accounts {
        message.extend_from_slice(&account[..]);
    }
    message.extend_from_slice(blockhash);

    encode_length(&mut message, 1);
    message.push(program_index);
    encode_length(&mut message, 2);
    message.extend_from_slice(&[0, to_index]);
    encode_length(&mut message, data.len());
    message.extend_from_slice(&data);

    message
}

/// Prefix the message with its single signature
pub fn encode_transaction(signature: &[u8], message: &[u8]) -> Vec<u8> {
    let mut wire = Vec::with_capacity(1 + signature.len() + message.len());
    encode_length(&mut wire, 1);
    wire.extend_from_slice(signature);
    wire.extend_from_slice(message);
    wire
}

/// compact-u16 length prefix
fn encode_length(buf: &mut Vec<u8>, len: usize) {
    let mut remaining = len as u16;
    loop {
        let mut byte = (remaining & 0x7f) as u8;
        remaining >>= 7;
        if remaining == 0 {
            buf.push(byte);
            return;
        }
        byte |= 0x80;
        buf.push(byte);
    }
}
