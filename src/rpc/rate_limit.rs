//! Per-chain token bucket shared by every task talking to that chain.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::rpc::types::{RpcError, RpcResult};

/// Longest single sleep while waiting for a token.
const MAX_WAIT_STEP: Duration = Duration::from_millis(100);

struct BucketState {
    tokens: f64,
    last_refill: Instant,
    backoff_until: Option<Instant>,
}

/// Token bucket with a backoff window.
pub struct RateLimiter {
    chain_id: u64,
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

/// Snapshot of a limiter for status output.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStatus {
    pub chain_id: u64,
    pub tokens: f64,
    pub rate: f64,
    pub burst: f64,
    pub in_backoff: bool,
    pub backoff_remaining: Duration,
}

impl RateLimiter {
    pub fn new(chain_id: u64, rate: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            chain_id,
            rate: rate.max(f64::MIN_POSITIVE),
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
                backoff_until: None,
            }),
        }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        state.last_refill = now;
    }

    /// Take a token without waiting.
    pub fn try_acquire(&self) -> bool {
        self.poll(Instant::now()).is_none()
    }

    /// Returns `None` when a token was taken, or how long to wait otherwise.
    fn poll(&self, now: Instant) -> Option<Duration> {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");

        if let Some(until) = state.backoff_until {
            if now < until {
                return Some(until - now);
            }
            state.backoff_until = None;
            state.last_refill = now;
        }

        self.refill(&mut state, now);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            None
        } else {
            Some(Duration::from_secs_f64((1.0 - state.tokens) / self.rate))
        }
    }

    /// Wait for a token, giving up after `timeout`.
    pub async fn acquire(&self, timeout: Duration) -> RpcResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            let wait = match self.poll(now) {
                None => return Ok(()),
                Some(wait) => wait,
            };
            if now >= deadline {
                tracing::warn!(chain_id = self.chain_id, ?timeout, "Rate limiter acquire timed out");
                return Err(RpcError::RateLimitTimeout(timeout));
            }
            let step = wait.min(MAX_WAIT_STEP).min(deadline - now);
            tokio::time::sleep(step.max(Duration::from_millis(1))).await;
        }
    }

    /// Drain the bucket and refuse tokens for `duration`.
    pub fn trigger_backoff(&self, duration: Duration) {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        state.tokens = 0.0;
        state.backoff_until = Some(Instant::now() + duration);
        tracing::warn!(
            chain_id = self.chain_id,
            backoff_secs = duration.as_secs_f64(),
            "Rate limit backoff triggered"
        );
    }

    pub fn status(&self) -> RateLimiterStatus {
        let now = Instant::now();
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        let backoff_remaining = state
            .backoff_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or_default();
        if backoff_remaining.is_zero() {
            self.refill(&mut state, now);
        }
        RateLimiterStatus {
            chain_id: self.chain_id,
            tokens: state.tokens,
            rate: self.rate,
            burst: self.burst,
            in_backoff: !backoff_remaining.is_zero(),
            backoff_remaining,
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("chain_id", &self.chain_id)
            .field("rate", &self.rate)
            .field("burst", &self.burst)
            .finish()
    }
}

/// Hands out one shared limiter per chain.
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    limiters: DashMap<u64, Arc<RateLimiter>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limiter for `chain_id`, created from `config` on first use.
    pub fn get_or_create(&self, chain_id: u64, config: &RateLimitConfig) -> Arc<RateLimiter> {
        self.limiters
            .entry(chain_id)
            .or_insert_with(|| {
                Arc::new(RateLimiter::new(
                    chain_id,
                    config.requests_per_second,
                    config.burst,
                ))
            })
            .clone()
    }

    pub fn get(&self, chain_id: u64) -> Option<Arc<RateLimiter>> {
        self.limiters.get(&chain_id).map(|l| l.clone())
    }

    pub fn statuses(&self) -> Vec<RateLimiterStatus> {
        let mut out: Vec<_> = self.limiters.iter().map(|l| l.status()).collect();
        out.sort_by_key(|s| s.chain_id);
        out
    }
}
