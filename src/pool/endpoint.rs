//! A single candidate RPC endpoint and its health record.

use std::time::SystemTime;

use serde::Serialize;

/// Where an endpoint came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EndpointOrigin {
    /// Operator supplied (config or environment).
    Configured,
    /// Added from the public registry.
    Discovered,
}

/// Result of one successful `eth_blockNumber` probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub url: String,
    pub latency_ms: u64,
    pub block_height: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Endpoint {
    pub url: String,
    pub chain_id: u64,
    pub origin: EndpointOrigin,
    pub last_probed_at: Option<SystemTime>,
    pub latency_ms: Option<u64>,
    pub block_height: Option<u64>,
    pub is_template: bool,
    pub is_secure: bool,
    /// 0.0 for dead or lagging, approaching 1.0 for fast and current.
    pub health_score: f64,
    /// Skipped by rotation while set.
    pub excluded: bool,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, chain_id: u64, origin: EndpointOrigin) -> Self {
        let url = url.into();
        Self {
            is_template: is_template_url(&url),
            is_secure: is_secure_url(&url),
            url,
            chain_id,
            origin,
            last_probed_at: None,
            latency_ms: None,
            block_height: None,
            health_score: 1.0,
            excluded: false,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.origin == EndpointOrigin::Configured
    }

    /// Fold a probe outcome into the record.
    ///
    /// `median_height` is the median over the whole probe round; an endpoint
    /// trailing it by `max_lag` blocks or more scores zero.
    pub fn record_probe(&mut self, probe: Option<&ProbeResult>, median_height: Option<u64>, max_lag: u64) {
        self.last_probed_at = Some(SystemTime::now());
        match probe {
            Some(result) => {
                self.latency_ms = Some(result.latency_ms);
                self.block_height = Some(result.block_height);
                let lagging = median_height
                    .map(|median| median.saturating_sub(result.block_height) >= max_lag)
                    .unwrap_or(false);
                self.health_score = if lagging {
                    0.0
                } else {
                    latency_score(result.latency_ms)
                };
            }
            None => {
                self.latency_ms = None;
                self.health_score = 0.0;
            }
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health_score > 0.0
    }
}

/// `1 / (1 + latency/100ms)`: 0ms scores 1.0, 100ms scores 0.5.
pub fn latency_score(latency_ms: u64) -> f64 {
    1.0 / (1.0 + latency_ms as f64 / 100.0)
}

/// Lowercase and strip trailing slashes so equivalent URLs compare equal.
pub fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_lowercase()
}

/// Registry URLs with `${API_KEY}` or `{key}` placeholders are unusable.
pub fn is_template_url(url: &str) -> bool {
    url.contains("${") || url.contains('{')
}

pub fn is_secure_url(url: &str) -> bool {
    let lower = url.trim().to_lowercase();
    lower.starts_with("https://") || lower.starts_with("wss://")
}

/// Forked or virtual test networks (Tenderly and similar).
pub fn is_ephemeral_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.contains("tenderly") || lower.contains("virtual")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("https://rpc.example.com/"), "https://rpc.example.com");
        assert_eq!(normalize_url("https://RPC.Example.COM"), "https://rpc.example.com");
        assert_eq!(normalize_url("https://rpc.example.com"), "https://rpc.example.com");
    }

    #[test]
    fn test_url_flags() {
        assert!(is_template_url("https://rpc.example.com/${API_KEY}"));
        assert!(is_template_url("https://rpc.example.com/{api_key}"));
        assert!(!is_template_url("https://rpc.example.com"));

        assert!(is_secure_url("https://a.example.com"));
        assert!(is_secure_url("wss://a.example.com"));
        assert!(!is_secure_url("http://a.example.com"));

        assert!(is_ephemeral_url("https://virtual.gnosis.rpc.tenderly.co/abc"));
        assert!(!is_ephemeral_url("https://rpc.gnosischain.com"));
    }

    #[test]
    fn test_record_probe_scores() {
        let mut endpoint = Endpoint::new("https://a.example.com", 100, EndpointOrigin::Discovered);
        let probe = ProbeResult {
            url: endpoint.url.clone(),
            latency_ms: 100,
            block_height: 1000,
        };
        endpoint.record_probe(Some(&probe), Some(1000), 100);
        assert_eq!(endpoint.health_score, 0.5);
        assert!(endpoint.is_healthy());

        let lagging = ProbeResult { block_height: 900, ..probe };
        endpoint.record_probe(Some(&lagging), Some(1000), 100);
        assert!(!endpoint.is_healthy());

        endpoint.record_probe(None, Some(1000), 100);
        assert_eq!(endpoint.latency_ms, None);
        assert!(!endpoint.is_healthy());
    }
}
