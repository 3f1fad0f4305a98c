//! Solana transfers across mocked RPC endpoints

use std::time::{Duration, Instant};

use base64::Engine;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fo3_transfer::config::SolanaConfig;
use fo3_transfer::transaction::{ChainAdapter, EndpointConfig, ProviderKind, SolanaAdapter};
use fo3_transfer::Error;

const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
const SIGNATURE: &str = "5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnbJLgp8uirBgmQpjKhoR4tjF3ZpRzrFmBV6UjKdiSZkQUW";

fn recipient() -> String {
    bs58::encode([2u8; 32]).into_string()
}

fn rpc_result(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": result,
    }))
}

fn blockhash_result() -> ResponseTemplate {
    rpc_result(serde_json::json!({
        "context": { "slot": 2792 },
        "value": {
            "blockhash": bs58::encode([7u8; 32]).into_string(),
            "lastValidBlockHeight": 3090
        }
    }))
}

async fn mount_rpc(server: &MockServer, rpc_method: &str, response: ResponseTemplate, expected: u64) {
    Mock::given(method("POST"))
        .and(body_partial_json(serde_json::json!({ "method": rpc_method })))
        .respond_with(response)
        .expect(expected)
        .mount(server)
        .await;
}

async fn mount_healthy_endpoint(server: &MockServer, status: serde_json::Value) {
    mount_rpc(server, "getLatestBlockhash", blockhash_result(), 1).await;
    mount_rpc(server, "sendTransaction", rpc_result(serde_json::json!(SIGNATURE)), 1).await;
    mount_rpc(
        server,
        "getSignatureStatuses",
        rpc_result(serde_json::json!({ "context": { "slot": 2800 }, "value": [status] })),
        1,
    )
    .await;
}

async fn mount_status_forever(server: &MockServer, status: serde_json::Value) {
    Mock::given(method("POST"))
        .and(body_partial_json(serde_json::json!({ "method": "getSignatureStatuses" })))
        .respond_with(rpc_result(serde_json::json!({ "context": { "slot": 1 }, "value": [status] })))
        .mount(server)
        .await;
}

async fn mount_block_height(server: &MockServer, height: u64) {
    Mock::given(method("POST"))
        .and(body_partial_json(serde_json::json!({ "method": "getBlockHeight" })))
        .respond_with(rpc_result(serde_json::json!(height)))
        .mount(server)
        .await;
}

fn test_config(servers: &[&MockServer], retry_delay_ms: u64) -> SolanaConfig {
    SolanaConfig {
        endpoints: servers
            .iter()
            .enumerate()
            .map(|(i, server)| {
                EndpointConfig::new(&format!("solana-{}", i + 1), ProviderKind::JsonRpc, &server.uri(), 2_000)
                    .with_priority(i as u32)
            })
            .collect(),
        retry_delay_ms,
        confirm_timeout_secs: 2,
        poll_interval_ms: 50,
        ..SolanaConfig::default()
    }
}

#[tokio::test]
async fn test_third_endpoint_succeeds_after_two_failures() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    let third = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&first)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32005, "message": "Node is behind by 42 slots" }
        })))
        .expect(1)
        .mount(&second)
        .await;
    mount_healthy_endpoint(
        &third,
        serde_json::json!({ "slot": 2799, "confirmations": 0, "err": null, "confirmationStatus": "confirmed" }),
    )
    .await;

    let adapter = SolanaAdapter::new(test_config(&[&first, &second, &third], 1_000)).unwrap();
    let started = Instant::now();
    let receipt = adapter.transfer(PHRASE, &recipient(), "0.5").await.unwrap();

    assert_eq!(receipt.tx_hash, SIGNATURE);
    assert!(started.elapsed() >= Duration::from_secs(2));

    let send = third
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .map(|request| serde_json::from_slice::<serde_json::Value>(&request.body).unwrap())
        .find(|body| body["method"] == "sendTransaction")
        .unwrap();
    assert_eq!(send["params"][1]["encoding"], "base64");

    let wire = base64::engine::general_purpose::STANDARD
        .decode(send["params"][0].as_str().unwrap())
        .unwrap();
    // one signature, then a three-account message with a single transfer
    assert_eq!(wire.len(), 215);
    assert_eq!(wire[0], 1);
    assert_eq!(&wire[65..69], &[1, 0, 1, 3]);
    assert_eq!(&wire[wire.len() - 8..], &500_000_000u64.to_le_bytes());
}

#[tokio::test]
async fn test_all_endpoints_failing_returns_last_error() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&first)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&second)
        .await;

    let adapter = SolanaAdapter::new(test_config(&[&first, &second], 10)).unwrap();
    let err = adapter.transfer(PHRASE, &recipient(), "0.5").await.unwrap_err();

    assert!(matches!(err, Error::Network(_)));
    assert!(err.to_string().contains("solana-2"));
}

#[tokio::test]
async fn test_transaction_error_fails_the_endpoint() {
    let server = MockServer::start().await;
    mount_healthy_endpoint(
        &server,
        serde_json::json!({
            "slot": 2799,
            "err": { "InstructionError": [0, { "Custom": 1 }] },
            "confirmationStatus": "processed"
        }),
    )
    .await;

    let adapter = SolanaAdapter::new(test_config(&[&server], 10)).unwrap();
    let err = adapter.transfer(PHRASE, &recipient(), "0.5").await.unwrap_err();

    assert!(matches!(err, Error::Reverted(_)));
}

#[tokio::test]
async fn test_unconfirmed_signature_times_out() {
    let server = MockServer::start().await;
    mount_rpc(&server, "getLatestBlockhash", blockhash_result(), 1).await;
    mount_rpc(&server, "sendTransaction", rpc_result(serde_json::json!(SIGNATURE)), 1).await;
    mount_status_forever(&server, serde_json::Value::Null).await;
    mount_block_height(&server, 10).await;

    let adapter = SolanaAdapter::new(test_config(&[&server], 10)).unwrap();
    let err = adapter.transfer(PHRASE, &recipient(), "0.5").await.unwrap_err();

    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_pending_transfer_is_not_resent_on_next_endpoint() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;

    mount_rpc(&first, "getLatestBlockhash", blockhash_result(), 1).await;
    mount_rpc(&first, "sendTransaction", rpc_result(serde_json::json!(SIGNATURE)), 1).await;
    mount_status_forever(
        &first,
        serde_json::json!({ "slot": 11, "confirmations": 0, "err": null, "confirmationStatus": "processed" }),
    )
    .await;
    mount_block_height(&first, 10).await;

    mount_rpc(&second, "getLatestBlockhash", blockhash_result(), 0).await;
    mount_rpc(&second, "sendTransaction", rpc_result(serde_json::json!(SIGNATURE)), 0).await;

    let adapter = SolanaAdapter::new(test_config(&[&first, &second], 10)).unwrap();
    let err = adapter.transfer(PHRASE, &recipient(), "0.5").await.unwrap_err();

    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_expired_blockhash_moves_to_next_endpoint() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;

    mount_rpc(&first, "getLatestBlockhash", blockhash_result(), 1).await;
    mount_rpc(&first, "sendTransaction", rpc_result(serde_json::json!(SIGNATURE)), 1).await;
    mount_status_forever(&first, serde_json::Value::Null).await;
    // past lastValidBlockHeight 3090
    mount_block_height(&first, 3091).await;

    mount_healthy_endpoint(
        &second,
        serde_json::json!({ "slot": 3100, "confirmations": 1, "err": null, "confirmationStatus": "confirmed" }),
    )
    .await;

    let adapter = SolanaAdapter::new(test_config(&[&first, &second], 10)).unwrap();
    let receipt = adapter.transfer(PHRASE, &recipient(), "0.5").await.unwrap();

    assert_eq!(receipt.tx_hash, SIGNATURE);
}

#[tokio::test]
async fn test_send_timeout_watches_local_signature() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;

    mount_rpc(&first, "getLatestBlockhash", blockhash_result(), 1).await;
    mount_rpc(
        &first,
        "sendTransaction",
        rpc_result(serde_json::json!(SIGNATURE)).set_delay(Duration::from_secs(3)),
        1,
    )
    .await;
    mount_status_forever(
        &first,
        serde_json::json!({ "slot": 12, "confirmations": 1, "err": null, "confirmationStatus": "confirmed" }),
    )
    .await;

    mount_rpc(&second, "sendTransaction", rpc_result(serde_json::json!(SIGNATURE)), 0).await;

    let mut config = test_config(&[&first, &second], 10);
    config.endpoints[0].timeout_ms = 500;
    let adapter = SolanaAdapter::new(config).unwrap();
    let receipt = adapter.transfer(PHRASE, &recipient(), "0.5").await.unwrap();

    // base58 of a 64-byte ed25519 signature
    let signature = bs58::decode(&receipt.tx_hash).into_vec().unwrap();
    assert_eq!(signature.len(), 64);
}

#[tokio::test]
async fn test_short_recipient_rejected_without_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(blockhash_result())
        .expect(0)
        .mount(&server)
        .await;

    let adapter = SolanaAdapter::new(test_config(&[&server], 10)).unwrap();
    let short = bs58::encode([2u8; 20]).into_string();
    let err = adapter.transfer(PHRASE, &short, "0.5").await.unwrap_err();

    assert!(matches!(err, Error::InvalidAddress(_)));
}
