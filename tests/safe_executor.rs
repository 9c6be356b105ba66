//! Safe execution against scripted backends.

mod common;

use std::sync::Arc;

use alloy::consensus::{Transaction, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::hex;
use alloy::primitives::{keccak256, Address, Bytes, U256};
use alloy::sol_types::{SolCall, SolValue};
use chain_relay::abi::RevertDecoder;
use chain_relay::observability::{CounterMetrics, TxCounter, TxMetrics};
use chain_relay::resilience::{RetryOverrides, RetryPolicy};
use chain_relay::rpc::{RpcError, RpcFacade};
use chain_relay::safe::contracts::ISafe;
use chain_relay::safe::{SafeError, SafeExecutor, SafeTransaction};
use chain_relay::config::SafeConfig;
use chain_relay::signing::LocalKeyring;
use chain_relay::submit::Account;
use common::{facade_over, facade_with_metrics, word, MockBackend, Reply, CHAIN_ID};

const A: &str = "https://a.example.com";
const B: &str = "https://b.example.com";
const OWNER_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

struct Harness {
    executor: SafeExecutor,
    keyring: Arc<LocalKeyring>,
    owner: Account,
    metrics: Arc<CounterMetrics>,
    facade: Arc<RpcFacade>,
}

fn safe_address() -> Address {
    Address::repeat_byte(0x5a)
}

fn harness(backends: &[(&str, Arc<MockBackend>)], max_retries: u32) -> Harness {
    let (facade, _) = facade_over(backends);
    harness_on(facade, Arc::new(CounterMetrics::new()), max_retries)
}

/// Facade and executor reporting into the same metrics sink.
fn shared_metrics_harness(backends: &[(&str, Arc<MockBackend>)], max_retries: u32) -> Harness {
    let metrics = Arc::new(CounterMetrics::new());
    let sink: Arc<dyn TxMetrics> = metrics.clone();
    let (facade, _) = facade_with_metrics(backends, sink);
    harness_on(facade, metrics, max_retries)
}

fn harness_on(facade: Arc<RpcFacade>, metrics: Arc<CounterMetrics>, max_retries: u32) -> Harness {
    let mut keyring = LocalKeyring::new();
    let address = keyring.add_key(OWNER_KEY).unwrap();
    let keyring = Arc::new(keyring);

    let policy = RetryPolicy::resolve(
        RetryOverrides {
            max_retries: Some(max_retries),
            gas_buffer: None,
        },
        &SafeConfig::default(),
    );
    let executor = SafeExecutor::new(facade.clone(), keyring.clone(), policy)
        .with_metrics(metrics.clone())
        .with_decoder(Arc::new(RevertDecoder::new()));

    Harness {
        executor,
        keyring,
        owner: Account {
            address,
            tag: Some("owner".to_string()),
        },
        metrics,
        facade,
    }
}

async fn signed_tx(h: &Harness, safe_nonce: u64) -> SafeTransaction {
    SafeTransaction::new(Address::repeat_byte(0x42), U256::ZERO, Bytes::new(), safe_nonce)
        .with_safe_tx_gas(100_000)
        .sign(h.keyring.as_ref(), &[h.owner.address], CHAIN_ID, safe_address())
        .await
        .unwrap()
}

/// `safeTxGas` of every `execTransaction` the backend was sent.
fn sent_safe_tx_gas(backend: &MockBackend) -> Vec<u64> {
    backend
        .sent()
        .iter()
        .map(|raw| {
            let envelope = TxEnvelope::decode_2718(&mut raw.as_ref()).unwrap();
            let call = ISafe::execTransactionCall::abi_decode(envelope.input()).unwrap();
            call.safeTxGas.saturating_to::<u64>()
        })
        .collect()
}

fn nonce_selector() -> String {
    hex::encode(ISafe::nonceCall::SELECTOR)
}

fn revert_with_reason(reason: &str) -> RpcError {
    let data = format!(
        "0x08c379a0{}",
        hex::encode((reason.to_string(),).abi_encode_params())
    );
    RpcError::Rpc(format!("execution reverted, data: {}", data))
}

#[tokio::test(start_paused = true)]
async fn test_executes_on_first_attempt() {
    let a = MockBackend::new("a");
    let h = harness(&[(A, a.clone())], 6);
    let tx = signed_tx(&h, 3).await;

    let execution = h
        .executor
        .execute_with_retry(safe_address(), tx, &[h.owner.clone()], "transfer")
        .await
        .unwrap();

    assert_eq!(execution.attempts, 1);
    assert_eq!(execution.safe_nonce, 3);
    assert!(execution.receipt.status);
    assert_eq!(a.count("send_raw_transaction"), 1);
    // gas was set and signed, so no estimate of the inner call
    assert_eq!(a.count("estimate_gas"), 1);
    assert_eq!(h.metrics.get(TxCounter::Success), 1);
}

#[tokio::test(start_paused = true)]
async fn test_logic_revert_in_simulation_aborts_on_first_attempt() {
    let a = MockBackend::new("a");
    a.fail("call", revert_with_reason("Ownable: caller is not the owner"));
    let h = harness(&[(A, a.clone())], 6);
    let tx = signed_tx(&h, 3).await;

    let err = h
        .executor
        .execute_with_retry(safe_address(), tx, &[h.owner.clone()], "transfer")
        .await
        .unwrap_err();

    match err {
        SafeError::Reverted(reason) => assert!(reason.contains("caller is not the owner"), "{}", reason),
        other => panic!("expected revert, got {:?}", other),
    }
    assert_eq!(h.metrics.get(TxCounter::Attempt), 1);
    assert_eq!(a.count("send_raw_transaction"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_nonce_conflict_refreshes_once_and_uses_new_nonce() {
    let a = MockBackend::new("a");
    // simulate ok, nonce() -> 7, simulate ok
    a.push("call", Ok(Reply::Data(word(1))));
    a.push("call", Ok(Reply::Data(word(7))));
    a.push("call", Ok(Reply::Data(word(1))));
    a.fail("send_raw_transaction", RpcError::Rpc("GS025: invalid nonce".to_string()));
    let h = harness(&[(A, a.clone())], 6);
    let tx = signed_tx(&h, 3).await;

    let execution = h
        .executor
        .execute_with_retry(safe_address(), tx, &[h.owner.clone()], "transfer")
        .await
        .unwrap();

    assert_eq!(execution.attempts, 2);
    assert_eq!(execution.safe_nonce, 7);
    assert_eq!(a.count(&format!("call:{}", nonce_selector())), 1);
    assert_eq!(h.metrics.get(TxCounter::NonceRetry), 1);
    assert_eq!(a.count("send_raw_transaction"), 2);

    let sent = a.sent();
    assert_ne!(sent[0], sent[1]);
}

#[tokio::test(start_paused = true)]
async fn test_signature_rejection_fails_fast() {
    let a = MockBackend::new("a");
    a.fail("call", RpcError::Rpc("execution reverted: GS020".to_string()));
    let h = harness(&[(A, a.clone())], 6);
    let tx = signed_tx(&h, 3).await;

    let err = h
        .executor
        .execute_with_retry(safe_address(), tx, &[h.owner.clone()], "transfer")
        .await
        .unwrap_err();

    assert!(matches!(err, SafeError::SignatureRejected(ref m) if m.contains("GS020")));
    assert_eq!(h.metrics.get(TxCounter::Attempt), 1);
    assert_eq!(a.count("send_raw_transaction"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_signatures_rejected_before_any_call() {
    let a = MockBackend::new("a");
    let h = harness(&[(A, a.clone())], 6);
    let unsigned = SafeTransaction::new(Address::repeat_byte(0x42), U256::ZERO, Bytes::new(), 0);
    let truncated = unsigned.clone().with_signatures(Bytes::from(vec![0u8; 30]));

    let err = h
        .executor
        .execute_with_retry(safe_address(), unsigned.clone(), &[h.owner.clone()], "transfer")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No valid signatures"));

    let err = h
        .executor
        .execute_with_retry(safe_address(), truncated, &[h.owner.clone()], "transfer")
        .await
        .unwrap_err();
    assert!(matches!(err, SafeError::InvalidSignatures(30)));

    let err = h
        .executor
        .execute_with_retry(safe_address(), unsigned, &[], "transfer")
        .await
        .unwrap_err();
    assert!(matches!(err, SafeError::NoSigners));

    assert!(a.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_rotates_and_retries() {
    let a = MockBackend::new("a");
    let b = MockBackend::new("b");
    a.fail(
        "send_raw_transaction",
        RpcError::Http {
            status: 429,
            message: "Too Many Requests".to_string(),
        },
    );
    let h = harness(&[(A, a.clone()), (B, b.clone())], 6);
    let tx = signed_tx(&h, 3).await;

    let execution = h
        .executor
        .execute_with_retry(safe_address(), tx, &[h.owner.clone()], "transfer")
        .await
        .unwrap();

    assert_eq!(execution.attempts, 2);
    assert_eq!(h.facade.active_url(), B);
    assert_eq!(b.count("send_raw_transaction"), 1);
    assert_eq!(h.metrics.get(TxCounter::RpcRotation), 1);
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_max_retries() {
    let a = MockBackend::new("a");
    for _ in 0..3 {
        a.fail("send_raw_transaction", RpcError::Rpc("persistent failure".to_string()));
    }
    let h = harness(&[(A, a.clone())], 2);
    let tx = signed_tx(&h, 3).await;

    let err = h
        .executor
        .execute_with_retry(safe_address(), tx, &[h.owner.clone()], "transfer")
        .await
        .unwrap_err();

    assert!(matches!(err, SafeError::Exhausted { attempts: 3, .. }));
    assert_eq!(a.count("send_raw_transaction"), 3);
    assert_eq!(h.metrics.get(TxCounter::Failure), 1);
    // retries re-estimate the inner gas
    assert_eq!(h.metrics.get(TxCounter::GasRetry), 2);
}

#[tokio::test(start_paused = true)]
async fn test_safe_tx_gas_cap_is_relative_to_raw_first_estimate() {
    let a = MockBackend::new("a");
    // inner estimate, outer exec estimate, then a ballooned inner estimate
    a.push("estimate_gas", Ok(Reply::Number(100_000)));
    a.push("estimate_gas", Ok(Reply::Number(200_000)));
    a.push("estimate_gas", Ok(Reply::Number(1_200_000)));
    a.fail("send_raw_transaction", RpcError::Rpc("persistent failure".to_string()));
    let h = harness(&[(A, a.clone())], 2);
    let tx = SafeTransaction::new(Address::repeat_byte(0x42), U256::ZERO, Bytes::new(), 3)
        .sign(h.keyring.as_ref(), &[h.owner.address], CHAIN_ID, safe_address())
        .await
        .unwrap();

    let execution = h
        .executor
        .execute_with_retry(safe_address(), tx, &[h.owner.clone()], "transfer")
        .await
        .unwrap();

    assert_eq!(execution.attempts, 2);
    // 1.5x buffer on the first try, then at most 10x the raw 100k
    assert_eq!(sent_safe_tx_gas(&a), vec![150_000, 1_000_000]);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_without_spare_endpoint_counts_no_rotation() {
    let a = MockBackend::new("a");
    a.fail(
        "send_raw_transaction",
        RpcError::Http {
            status: 429,
            message: "Too Many Requests".to_string(),
        },
    );
    let h = harness(&[(A, a.clone())], 6);
    let tx = signed_tx(&h, 3).await;

    let execution = h
        .executor
        .execute_with_retry(safe_address(), tx, &[h.owner.clone()], "transfer")
        .await
        .unwrap();

    assert_eq!(execution.attempts, 2);
    assert_eq!(h.facade.active_url(), A);
    assert_eq!(a.count("send_raw_transaction"), 2);
    assert_eq!(h.metrics.get(TxCounter::RpcRotation), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rotation_counted_once_when_facade_shares_metrics() {
    let a = MockBackend::new("a");
    let b = MockBackend::new("b");
    a.fail(
        "send_raw_transaction",
        RpcError::Http {
            status: 429,
            message: "Too Many Requests".to_string(),
        },
    );
    let h = shared_metrics_harness(&[(A, a.clone()), (B, b.clone())], 6);
    let tx = signed_tx(&h, 3).await;

    h.executor
        .execute_with_retry(safe_address(), tx, &[h.owner.clone()], "transfer")
        .await
        .unwrap();

    assert_eq!(h.facade.active_url(), B);
    assert_eq!(h.metrics.get(TxCounter::RpcRotation), 1);
}

#[tokio::test(start_paused = true)]
async fn test_accepted_broadcast_is_found_instead_of_resent() {
    let a = MockBackend::new("a");
    a.lose_next_send_response(RpcError::Rpc("connection reset by peer".to_string()));
    let h = harness(&[(A, a.clone())], 6);
    let tx = signed_tx(&h, 3).await;

    let execution = h
        .executor
        .execute_with_retry(safe_address(), tx, &[h.owner.clone()], "transfer")
        .await
        .unwrap();

    assert_eq!(a.count("send_raw_transaction"), 1);
    assert_eq!(execution.tx_hash, keccak256(&a.sent()[0]));
    assert_eq!(h.metrics.get(TxCounter::Attempt), 2);
    assert_eq!(h.metrics.get(TxCounter::Success), 1);
}
