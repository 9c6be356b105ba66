//! Per-chain wiring: endpoint pool, shared rate limiter and facade.

use std::sync::Arc;

use crate::config::{ChainConfig, RelayConfig};
use crate::discovery::{enrich_pool, EndpointValidator, WatchedPool};
use crate::observability::metrics::{NoopMetrics, TxMetrics};
use crate::pool::endpoint::is_ephemeral_url;
use crate::pool::EndpointPool;
use crate::resilience::{RetryOverrides, RetryPolicy};
use crate::rpc::{BackendFactory, FacadeSettings, RateLimiterRegistry, RpcFacade, RpcResult};
use crate::safe::SafeExecutor;
use crate::submit::collaborators::TransactionSigner;
use crate::submit::{Collaborators, EoaSubmitter};

/// Everything needed to talk to one chain.
pub struct ChainInterface {
    config: ChainConfig,
    relay: Arc<RelayConfig>,
    pool: Arc<EndpointPool>,
    facade: Arc<RpcFacade>,
    ephemeral: bool,
}

impl ChainInterface {
    /// Build the pool from configured URLs and connect its primary endpoint.
    /// The limiter comes from `limiters`, so every interface for the same
    /// chain id shares one bucket.
    pub fn connect(
        chain: &ChainConfig,
        relay: Arc<RelayConfig>,
        limiters: &RateLimiterRegistry,
        factory: Arc<dyn BackendFactory>,
    ) -> RpcResult<Self> {
        Self::connect_with_metrics(chain, relay, limiters, factory, Arc::new(NoopMetrics))
    }

    /// Same as [`connect`](Self::connect), reporting rotations to `metrics`.
    pub fn connect_with_metrics(
        chain: &ChainConfig,
        relay: Arc<RelayConfig>,
        limiters: &RateLimiterRegistry,
        factory: Arc<dyn BackendFactory>,
        metrics: Arc<dyn TxMetrics>,
    ) -> RpcResult<Self> {
        let pool = Arc::new(EndpointPool::new(
            chain.chain_id,
            &chain.rpc_url,
            &chain.extra_rpcs,
            relay.discovery.max_endpoints,
        ));
        let limiter = limiters.get_or_create(chain.chain_id, &relay.rate_limit);
        let ephemeral = chain.ephemeral || is_ephemeral_url(&chain.rpc_url);
        let settings = FacadeSettings::from_config(&relay.rpc, &relay.rate_limit);

        let facade = RpcFacade::new(pool.clone(), factory, limiter, settings)?
            .with_ephemeral(ephemeral)
            .with_metrics(metrics);

        tracing::info!(
            chain = %chain.name,
            chain_id = chain.chain_id,
            endpoints = pool.len(),
            ephemeral,
            "Chain connected"
        );

        Ok(Self {
            config: chain.clone(),
            relay,
            pool,
            facade: Arc::new(facade),
            ephemeral,
        })
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    pub fn facade(&self) -> &Arc<RpcFacade> {
        &self.facade
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Top the pool up with validated registry endpoints.
    pub async fn enrich(&self, validator: &EndpointValidator) -> usize {
        if !self.relay.discovery.enabled {
            return 0;
        }
        enrich_pool(&self.pool, validator, self.ephemeral).await
    }

    pub fn watched(&self) -> WatchedPool {
        WatchedPool {
            pool: self.pool.clone(),
            ephemeral: self.ephemeral,
        }
    }

    pub fn eoa_submitter(&self, collaborators: Collaborators) -> EoaSubmitter {
        EoaSubmitter::new(
            self.facade.clone(),
            self.config.clone(),
            collaborators,
            self.relay.submission.clone(),
        )
    }

    pub fn safe_executor(&self, signer: Arc<dyn TransactionSigner>, overrides: RetryOverrides) -> SafeExecutor {
        SafeExecutor::new(
            self.facade.clone(),
            signer,
            RetryPolicy::resolve(overrides, &self.relay.safe),
        )
    }
}
