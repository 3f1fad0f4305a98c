//! Raw transaction broadcast with provider fallback

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::transaction::provider::{bounded, ensure_success, json_rpc, ordered, EndpointConfig, ProviderKind};

#[derive(Debug, Deserialize)]
struct BlockCypherPushResponse {
    tx: BlockCypherPushedTx,
}

#[derive(Debug, Deserialize)]
struct BlockCypherPushedTx {
    hash: String,
}

/// Submit `raw_hex` to each provider in order until one accepts it.
///
/// Returns the txid reported by the accepting provider. When every provider
/// refuses, the error carries each provider's cause.
pub async fn broadcast(client: &reqwest::Client, providers: &[EndpointConfig], raw_hex: &str) -> Result<String> {
    let mut failures = Vec::new();

    for provider in ordered(providers) {
        let operation = format!("broadcast via {}", provider.name);
        match bounded(&operation, provider.timeout(), push(client, provider, raw_hex)).await {
            Ok(txid) => {
                info!(provider = %provider.name, tx_hash = %txid, "Transaction broadcast");
                return Ok(txid);
            }
            Err(e) => {
                warn!(provider = %provider.name, error = %e, "Broadcast provider failed");
                failures.push(format!("{}: {}", provider.name, e));
            }
        }
    }

    Err(Error::Broadcast(failures))
}

async fn push(client: &reqwest::Client, provider: &EndpointConfig, raw_hex: &str) -> Result<String> {
    let txid = match provider.kind {
        ProviderKind::BlockCypher => {
            let mut request = client
                .post(provider.endpoint("txs/push"))
                .json(&serde_json::json!({ "tx": raw_hex }));
            if let Some(token) = &provider.api_token {
                request = request.query(&[("token", token.as_str())]);
            }

            let response = request.send().await?;
            let body: BlockCypherPushResponse = ensure_success(&provider.name, response).await?.json().await?;
            body.tx.hash
        }
        ProviderKind::Esplora => {
            let response = client
                .post(provider.endpoint("tx"))
                .header(reqwest::header::CONTENT_TYPE, "text/plain")
                .body(raw_hex.to_string())
                .send()
                .await?;
            ensure_success(&provider.name, response).await?.text().await?.trim().to_string()
        }
        ProviderKind::JsonRpc => {
            let result = json_rpc(client, provider, "sendrawtransaction", serde_json::json!([raw_hex])).await?;
            result
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| Error::Network(format!("{} returned a non-string txid", provider.name)))?
        }
    };

    if txid.is_empty() {
        return Err(Error::Network(format!("{} returned an empty txid", provider.name)));
    }
    Ok(txid)
}
