//! Endpoint liveness probe: one `eth_blockNumber` call, timed.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::{timeout, Instant};

use crate::pool::ProbeResult;

/// Measures an endpoint. Never errors: anything unusable is `None`.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str, timeout: Duration) -> Option<ProbeResult>;
}

/// JSON-RPC over HTTP prober.
#[derive(Debug, Clone, Default)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Block height from a JSON-RPC response; `None` for errors, null or zero.
pub fn parse_block_number(payload: &serde_json::Value) -> Option<u64> {
    if payload.get("error").map(|e| !e.is_null()).unwrap_or(false) {
        return None;
    }
    let hex = payload.get("result")?.as_str()?;
    let digits = hex.strip_prefix("0x").unwrap_or(hex);
    match u64::from_str_radix(digits, 16) {
        Ok(0) | Err(_) => None,
        Ok(height) => Some(height),
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str, limit: Duration) -> Option<ProbeResult> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": "eth_blockNumber",
            "params": [],
            "id": 1,
        });

        let start = Instant::now();
        let request = async {
            let response = self.client.post(url).json(&body).send().await?;
            response.error_for_status()?.json::<serde_json::Value>().await
        };

        let payload = match timeout(limit, request).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                tracing::debug!(url, error = %e, "Probe failed");
                return None;
            }
            Err(_) => {
                tracing::debug!(url, timeout_ms = limit.as_millis() as u64, "Probe timed out");
                return None;
            }
        };
        let latency_ms = start.elapsed().as_millis() as u64;

        let block_height = parse_block_number(&payload)?;
        Some(ProbeResult {
            url: url.to_string(),
            latency_ms,
            block_height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_block_number() {
        assert_eq!(parse_block_number(&json!({"result": "0x3e8"})), Some(1000));
        assert_eq!(parse_block_number(&json!({"result": "0x0"})), None);
        assert_eq!(parse_block_number(&json!({"result": null})), None);
        assert_eq!(
            parse_block_number(&json!({"error": {"code": -32000, "message": "nope"}})),
            None
        );
        assert_eq!(parse_block_number(&json!({"result": "garbage"})), None);
    }

    #[tokio::test]
    async fn test_probe_unreachable_is_none() {
        let prober = HttpProber::new();
        assert!(prober
            .probe("http://127.0.0.1:9", Duration::from_secs(2))
            .await
            .is_none());
    }
}
