//! Endpoint pool.
//!
//! # Data Flow
//! ```text
//! config (primary + extras) ──► EndpointPool::new
//! discovery (validated urls) ──► merge (capped)
//! refresh monitor (probes)   ──► apply_probes (score, exclude / re-admit)
//! facade (rotation-worthy)   ──► rotate ──► next non-excluded endpoint
//! ```
//!
//! # Design Decisions
//! - One lock guards the list and the current pointer, so a reader never
//!   sees a half-applied rotation
//! - Endpoints are never removed, only excluded
//! - The configured primary stays at index 0 and is never excluded

pub mod endpoint;

use std::collections::HashMap;
use std::sync::Mutex;

use crate::pool::endpoint::normalize_url;
pub use crate::pool::endpoint::{Endpoint, EndpointOrigin, ProbeResult};

struct PoolState {
    endpoints: Vec<Endpoint>,
    current: usize,
    rotations: u64,
}

/// Ordered endpoints of one chain plus the "current" pointer.
pub struct EndpointPool {
    chain_id: u64,
    max_size: usize,
    state: Mutex<PoolState>,
}

impl EndpointPool {
    /// Build a pool with `primary` first. Duplicates (after normalization)
    /// and anything beyond `max_size` are dropped.
    pub fn new(chain_id: u64, primary: &str, extras: &[String], max_size: usize) -> Self {
        let pool = Self {
            chain_id,
            max_size: max_size.max(1),
            state: Mutex::new(PoolState {
                endpoints: vec![Endpoint::new(primary, chain_id, EndpointOrigin::Configured)],
                current: 0,
                rotations: 0,
            }),
        };
        pool.merge_with_origin(extras.iter().cloned(), EndpointOrigin::Configured);
        pool
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Index and URL of the current endpoint.
    pub fn current(&self) -> (usize, String) {
        let state = self.state.lock().expect("endpoint pool mutex poisoned");
        (state.current, state.endpoints[state.current].url.clone())
    }

    /// Advance to the next non-excluded endpoint after the current one.
    ///
    /// Returns `None` when no other endpoint is usable; the pointer is left
    /// untouched in that case.
    pub fn rotate(&self) -> Option<(usize, String)> {
        let mut state = self.state.lock().expect("endpoint pool mutex poisoned");
        let len = state.endpoints.len();
        for step in 1..len {
            let index = (state.current + step) % len;
            if !state.endpoints[index].excluded {
                state.current = index;
                state.rotations += 1;
                let url = state.endpoints[index].url.clone();
                tracing::info!(
                    chain_id = self.chain_id,
                    index,
                    url = %url,
                    rotations = state.rotations,
                    "Rotated RPC endpoint"
                );
                return Some((index, url));
            }
        }
        None
    }

    /// Exclude an endpoint from rotation. The configured primary is exempt.
    pub fn exclude(&self, url: &str) -> bool {
        let key = normalize_url(url);
        let mut state = self.state.lock().expect("endpoint pool mutex poisoned");
        let position = state
            .endpoints
            .iter()
            .position(|e| normalize_url(&e.url) == key);
        match position {
            Some(index) if index != 0 => {
                state.endpoints[index].excluded = true;
                true
            }
            _ => false,
        }
    }

    /// Add URLs not already present until the pool is full. Returns how many
    /// were added.
    pub fn merge<I>(&self, urls: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        self.merge_with_origin(urls, EndpointOrigin::Discovered)
    }

    fn merge_with_origin<I>(&self, urls: I, origin: EndpointOrigin) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut state = self.state.lock().expect("endpoint pool mutex poisoned");
        let mut added = 0;
        for url in urls {
            if state.endpoints.len() >= self.max_size {
                break;
            }
            let key = normalize_url(&url);
            if key.is_empty() || state.endpoints.iter().any(|e| normalize_url(&e.url) == key) {
                continue;
            }
            state.endpoints.push(Endpoint::new(url, self.chain_id, origin));
            added += 1;
        }
        added
    }

    /// Record a probe round. Endpoints that failed or lag are excluded,
    /// recovered ones re-admitted; index 0 is always kept selectable.
    pub fn apply_probes(&self, results: &[(String, Option<ProbeResult>)], median_height: Option<u64>, max_lag: u64) {
        let by_url: HashMap<String, Option<&ProbeResult>> = results
            .iter()
            .map(|(url, probe)| (normalize_url(url), probe.as_ref()))
            .collect();

        let mut state = self.state.lock().expect("endpoint pool mutex poisoned");
        for (index, endpoint) in state.endpoints.iter_mut().enumerate() {
            let Some(probe) = by_url.get(&normalize_url(&endpoint.url)) else {
                continue;
            };
            endpoint.record_probe(*probe, median_height, max_lag);
            let exclude = index != 0 && !endpoint.is_healthy();
            if exclude != endpoint.excluded {
                tracing::info!(
                    chain_id = self.chain_id,
                    url = %endpoint.url,
                    excluded = exclude,
                    "Endpoint health changed"
                );
            }
            endpoint.excluded = exclude;
        }
    }

    pub fn urls(&self) -> Vec<String> {
        let state = self.state.lock().expect("endpoint pool mutex poisoned");
        state.endpoints.iter().map(|e| e.url.clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<Endpoint> {
        let state = self.state.lock().expect("endpoint pool mutex poisoned");
        state.endpoints.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("endpoint pool mutex poisoned").endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.max_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn rotation_count(&self) -> u64 {
        self.state.lock().expect("endpoint pool mutex poisoned").rotations
    }

    /// Number of endpoints rotation may currently pick from.
    pub fn available(&self) -> usize {
        let state = self.state.lock().expect("endpoint pool mutex poisoned");
        state.endpoints.iter().filter(|e| !e.excluded).count()
    }
}

impl std::fmt::Debug for EndpointPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect("endpoint pool mutex poisoned");
        f.debug_struct("EndpointPool")
            .field("chain_id", &self.chain_id)
            .field("endpoints", &state.endpoints.len())
            .field("current", &state.current)
            .field("rotations", &state.rotations)
            .finish()
    }
}
