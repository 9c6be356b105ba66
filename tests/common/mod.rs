//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::consensus::{Transaction, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::hex;
use alloy::primitives::{keccak256, Address, Bytes, TxHash, U256};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use chain_relay::observability::{NoopMetrics, TxMetrics};
use chain_relay::pool::EndpointPool;
use chain_relay::rpc::{
    BackendFactory, BlockTag, FacadeSettings, RateLimiter, Receipt, RpcBackend, RpcError,
    RpcFacade, RpcResult,
};

pub const CHAIN_ID: u64 = 100;
pub const ONE_GWEI: u128 = 1_000_000_000;

/// Scripted reply for one backend call.
#[derive(Debug, Clone)]
pub enum Reply {
    Number(u64),
    Wide(u128),
    Data(Bytes),
}

/// ABI word holding `value`, as returned by `nonce()` or `execTransaction`.
pub fn word(value: u64) -> Bytes {
    Bytes::from(U256::from(value).to_be_bytes::<32>().to_vec())
}

/// In-memory backend. Each method pops its scripted replies first and falls
/// back to a healthy default once the script runs dry.
pub struct MockBackend {
    pub label: String,
    chain_id: u64,
    nonce: AtomicU64,
    calls: Mutex<Vec<String>>,
    script: Mutex<HashMap<&'static str, VecDeque<RpcResult<Reply>>>>,
    receipts: Mutex<HashMap<TxHash, Receipt>>,
    receipt_status: Mutex<VecDeque<bool>>,
    lost_responses: Mutex<VecDeque<RpcError>>,
    latency: Mutex<Duration>,
    sent: Mutex<Vec<Bytes>>,
}

impl MockBackend {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            chain_id: CHAIN_ID,
            nonce: AtomicU64::new(0),
            calls: Mutex::new(Vec::new()),
            script: Mutex::new(HashMap::new()),
            receipts: Mutex::new(HashMap::new()),
            receipt_status: Mutex::new(VecDeque::new()),
            lost_responses: Mutex::new(VecDeque::new()),
            latency: Mutex::new(Duration::ZERO),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Queue a reply for `method`.
    pub fn push(&self, method: &'static str, reply: RpcResult<Reply>) {
        self.script
            .lock()
            .unwrap()
            .entry(method)
            .or_default()
            .push_back(reply);
    }

    pub fn fail(&self, method: &'static str, err: RpcError) {
        self.push(method, Err(err));
    }

    /// Status of the receipt minted for the next accepted broadcast.
    pub fn mine_next_with_status(&self, status: bool) {
        self.receipt_status.lock().unwrap().push_back(status);
    }

    /// Accept the next broadcast but answer it with `err`, as when the
    /// connection drops after the node took the transaction.
    pub fn lose_next_send_response(&self, err: RpcError) {
        self.lost_responses.lock().unwrap().push_back(err);
    }

    /// Delay every `block_number` answer by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn set_nonce(&self, nonce: u64) {
        self.nonce.store(nonce, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Every raw transaction handed to `send_raw_transaction`, accepted or not.
    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }

    /// Gas limits of the transactions sent so far.
    pub fn sent_gas_limits(&self) -> Vec<u64> {
        self.sent()
            .iter()
            .map(|raw| {
                TxEnvelope::decode_2718(&mut raw.as_ref())
                    .expect("mock received an undecodable transaction")
                    .gas_limit()
            })
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn next(&self, method: &'static str) -> Option<RpcResult<Reply>> {
        self.script
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(|q| q.pop_front())
    }

    fn number(&self, method: &'static str, default: u64) -> RpcResult<u64> {
        self.record(method.to_string());
        match self.next(method) {
            Some(Ok(Reply::Number(n))) => Ok(n),
            Some(Ok(other)) => panic!("{}: unexpected scripted reply {:?}", method, other),
            Some(Err(e)) => Err(e),
            None => Ok(default),
        }
    }

    fn wide(&self, method: &'static str, default: u128) -> RpcResult<u128> {
        self.record(method.to_string());
        match self.next(method) {
            Some(Ok(Reply::Wide(n))) => Ok(n),
            Some(Ok(Reply::Number(n))) => Ok(n as u128),
            Some(Ok(other)) => panic!("{}: unexpected scripted reply {:?}", method, other),
            Some(Err(e)) => Err(e),
            None => Ok(default),
        }
    }
}

#[async_trait]
impl RpcBackend for MockBackend {
    async fn block_number(&self) -> RpcResult<u64> {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.number("block_number", 1000)
    }

    async fn chain_id(&self) -> RpcResult<u64> {
        self.number("chain_id", self.chain_id)
    }

    async fn transaction_count(&self, _address: Address, tag: BlockTag) -> RpcResult<u64> {
        let method = match tag {
            BlockTag::Latest => "nonce_latest",
            BlockTag::Pending => "nonce_pending",
        };
        self.number(method, self.nonce.load(Ordering::SeqCst))
    }

    async fn balance(&self, _address: Address) -> RpcResult<U256> {
        self.wide("balance", 0).map(U256::from)
    }

    async fn code(&self, _address: Address) -> RpcResult<Bytes> {
        self.record("code".to_string());
        match self.next("code") {
            Some(Ok(Reply::Data(d))) => Ok(d),
            Some(Err(e)) => Err(e),
            _ => Ok(Bytes::new()),
        }
    }

    async fn gas_price(&self) -> RpcResult<u128> {
        self.wide("gas_price", ONE_GWEI)
    }

    async fn max_priority_fee(&self) -> RpcResult<u128> {
        self.wide("max_priority_fee", ONE_GWEI)
    }

    async fn latest_base_fee(&self) -> RpcResult<Option<u128>> {
        self.wide("base_fee", ONE_GWEI).map(Some)
    }

    async fn estimate_gas(&self, _tx: TransactionRequest) -> RpcResult<u64> {
        self.number("estimate_gas", 21_000)
    }

    async fn call(&self, tx: TransactionRequest) -> RpcResult<Bytes> {
        let selector = tx
            .input
            .input()
            .filter(|d| d.len() >= 4)
            .map(|d| hex::encode(&d[..4]))
            .unwrap_or_default();
        self.record(format!("call:{}", selector));
        match self.next("call") {
            Some(Ok(Reply::Data(d))) => Ok(d),
            Some(Ok(other)) => panic!("call: unexpected scripted reply {:?}", other),
            Some(Err(e)) => Err(e),
            None => Ok(word(1)),
        }
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> RpcResult<TxHash> {
        self.record("send_raw_transaction".to_string());
        self.sent.lock().unwrap().push(raw.clone());
        if let Some(Err(e)) = self.next("send_raw_transaction") {
            return Err(e);
        }

        let hash = keccak256(&raw);
        let status = self.receipt_status.lock().unwrap().pop_front().unwrap_or(true);
        self.receipts.lock().unwrap().insert(
            hash,
            Receipt {
                tx_hash: hash,
                status,
                block_number: Some(1001),
                gas_used: 21_000,
                effective_gas_price: ONE_GWEI,
                from: Address::ZERO,
                to: None,
                logs: Vec::new(),
            },
        );
        self.nonce.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.lost_responses.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: TxHash) -> RpcResult<Option<Receipt>> {
        self.record("transaction_receipt".to_string());
        if let Some(Err(e)) = self.next("transaction_receipt") {
            return Err(e);
        }
        Ok(self.receipts.lock().unwrap().get(&hash).cloned())
    }

    async fn logs(&self, _filter: Filter) -> RpcResult<Vec<Log>> {
        self.record("logs".to_string());
        Ok(Vec::new())
    }
}

/// Hands out pre-registered mock backends by URL.
#[derive(Default)]
pub struct MockFactory {
    backends: Mutex<HashMap<String, Arc<MockBackend>>>,
    connects: Mutex<Vec<String>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, url: &str, backend: Arc<MockBackend>) {
        self.backends
            .lock()
            .unwrap()
            .insert(url.to_string(), backend);
    }

    pub fn connects(&self) -> Vec<String> {
        self.connects.lock().unwrap().clone()
    }
}

impl BackendFactory for MockFactory {
    fn connect(&self, url: &str) -> RpcResult<Arc<dyn RpcBackend>> {
        self.connects.lock().unwrap().push(url.to_string());
        match self.backends.lock().unwrap().get(url) {
            Some(backend) => Ok(backend.clone()),
            None => Err(RpcError::InvalidUrl {
                url: url.to_string(),
                reason: "no mock registered".to_string(),
            }),
        }
    }
}

/// Facade over `urls`, each backed by the matching mock.
pub fn facade_over(backends: &[(&str, Arc<MockBackend>)]) -> (Arc<RpcFacade>, Arc<MockFactory>) {
    facade_with_metrics(backends, Arc::new(NoopMetrics))
}

/// Like [`facade_over`], counting rotations into `metrics`.
pub fn facade_with_metrics(
    backends: &[(&str, Arc<MockBackend>)],
    metrics: Arc<dyn TxMetrics>,
) -> (Arc<RpcFacade>, Arc<MockFactory>) {
    let factory = MockFactory::new();
    for (url, backend) in backends {
        factory.register(url, backend.clone());
    }
    let extras: Vec<String> = backends[1..].iter().map(|(u, _)| u.to_string()).collect();
    let pool = Arc::new(EndpointPool::new(CHAIN_ID, backends[0].0, &extras, 20));
    let limiter = Arc::new(RateLimiter::new(CHAIN_ID, 1_000.0, 1_000));
    let facade = RpcFacade::new(pool, factory.clone(), limiter, FacadeSettings::default())
        .expect("primary mock must connect")
        .with_metrics(metrics);
    (Arc::new(facade), factory)
}

/// Start a JSON-RPC server on an ephemeral port. `respond` receives the
/// request body and returns status code and response body; every response
/// is delayed by `delay`. Returns the server URL.
pub async fn start_jsonrpc_server<F, Fut>(delay: Duration, respond: F) -> String
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let respond = Arc::new(respond);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let respond = respond.clone();
                    tokio::spawn(async move {
                        let Some(request) = read_body(&mut socket).await else {
                            return;
                        };
                        tokio::time::sleep(delay).await;
                        let (status, body) = respond(request).await;
                        let status_text = match status {
                            200 => "200 OK",
                            403 => "403 Forbidden",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    format!("http://{}", addr)
}

/// Server answering `eth_blockNumber` with `height` after `delay`.
pub async fn start_block_server(delay: Duration, height: u64) -> String {
    start_jsonrpc_server(delay, move |request| async move {
        let id = request.get("id").cloned().unwrap_or(serde_json::Value::from(1));
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": format!("0x{:x}", height),
        });
        (200, body.to_string())
    })
    .await
}

/// Plain HTTP server answering every GET with `body` as JSON. Returns the
/// URL of `/rpcs.json` and a counter of requests served.
pub async fn start_document_server(body: String) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let body = body.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                let mut buffer = Vec::new();
                let mut chunk = [0u8; 4096];
                while find(&buffer, b"\r\n\r\n").is_none() {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buffer.extend_from_slice(&chunk[..n]),
                    }
                }
                counter.fetch_add(1, Ordering::SeqCst);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{}/rpcs.json", addr), hits)
}

async fn read_body(socket: &mut tokio::net::TcpStream) -> Option<serde_json::Value> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..n]);

        let Some(header_end) = find(&buffer, b"\r\n\r\n") else {
            continue;
        };
        let headers = String::from_utf8_lossy(&buffer[..header_end]).to_lowercase();
        let length = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        let body_start = header_end + 4;
        if buffer.len() >= body_start + length {
            return serde_json::from_slice(&buffer[body_start..body_start + length]).ok();
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
