//! UTXO lookup with provider fallback

use std::str::FromStr;

use bitcoin::Txid;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::transaction::provider::{bounded, ensure_success, ordered, EndpointConfig, ProviderKind};
use crate::transaction::types::Utxo;

/// Esplora `/address/{addr}/utxo` item
#[derive(Debug, Deserialize)]
struct EsploraUtxo {
    txid: String,
    vout: u32,
    value: u64,
}

/// BlockCypher `/addrs/{addr}?unspentOnly=true` body
#[derive(Debug, Deserialize)]
struct BlockCypherAddress {
    #[serde(default)]
    txrefs: Vec<BlockCypherTxRef>,
    #[serde(default)]
    unconfirmed_txrefs: Vec<BlockCypherTxRef>,
}

#[derive(Debug, Deserialize)]
struct BlockCypherTxRef {
    tx_hash: String,
    tx_output_n: i64,
    value: u64,
}

/// Fetch the address's UTXOs from the first provider that answers.
///
/// Each provider gets one attempt under its own timeout. Nothing from a
/// failed provider is kept.
pub async fn fetch_utxos(
    client: &reqwest::Client,
    providers: &[EndpointConfig],
    address: &str,
) -> Result<Vec<Utxo>> {
    let mut failures = Vec::new();

    for provider in ordered(providers) {
        let operation = format!("UTXO query via {}", provider.name);
        match bounded(&operation, provider.timeout(), fetch_from(client, provider, address)).await {
            Ok(utxos) => {
                debug!(provider = %provider.name, count = utxos.len(), "Fetched UTXOs");
                return Ok(utxos);
            }
            Err(e) => {
                warn!(provider = %provider.name, error = %e, "UTXO provider failed");
                failures.push(format!("{}: {}", provider.name, e));
            }
        }
    }

    Err(Error::Network(format!("All UTXO providers failed: {}", failures.join("; "))))
}

async fn fetch_from(client: &reqwest::Client, provider: &EndpointConfig, address: &str) -> Result<Vec<Utxo>> {
    let utxos = match provider.kind {
        ProviderKind::Esplora => {
            let response = client
                .get(provider.endpoint(&format!("address/{}/utxo", address)))
                .send()
                .await?;
            let items: Vec<EsploraUtxo> = ensure_success(&provider.name, response).await?.json().await?;

            items
                .into_iter()
                .map(|item| Utxo {
                    txid: item.txid,
                    output_index: item.vout,
                    value_sat: item.value,
                })
                .collect::<Vec<_>>()
        }
        ProviderKind::BlockCypher => {
            let mut request = client
                .get(provider.endpoint(&format!("addrs/{}", address)))
                .query(&[("unspentOnly", "true")]);
            if let Some(token) = &provider.api_token {
                request = request.query(&[("token", token.as_str())]);
            }

            let response = request.send().await?;
            let body: BlockCypherAddress = ensure_success(&provider.name, response).await?.json().await?;

            body.txrefs
                .into_iter()
                .chain(body.unconfirmed_txrefs)
                .filter(|txref| txref.tx_output_n >= 0)
                .map(|txref| Utxo {
                    txid: txref.tx_hash,
                    output_index: txref.tx_output_n as u32,
                    value_sat: txref.value,
                })
                .collect::<Vec<_>>()
        }
        ProviderKind::JsonRpc => {
            return Err(Error::Config(format!("{} does not serve UTXO queries", provider.name)));
        }
    };

    for utxo in &utxos {
        Txid::from_str(&utxo.txid).map_err(|e| {
            Error::Network(format!("{} returned malformed txid {}: {}", provider.name, utxo.txid, e))
        })?;
    }

    Ok(utxos)
}
