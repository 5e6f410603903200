use std::sync::Arc;

use tracing::info;

use crate::{
    config::AppConfig,
    server::{
        error::{AppResult, Error},
        utils::upstream_utils::{RetryPolicy, build_proxy_client, build_resolution_client},
    },
};

use super::{
    origin_services::OriginService, recovery_services::RecoveryService,
    resolution_cache_services::ResolutionCache,
    resolver_services::{DynStreamResolver, StreamResolver},
};

/// everything a request handler needs, cloned into every request through an Extension
#[derive(Clone)]
pub struct EdgeServices {
    pub resolver: DynStreamResolver,
    pub recovery: Arc<RecoveryService>,
    // proxy client, the resolver has its own with tighter timeouts
    pub http: reqwest::Client,
    pub retry: RetryPolicy,
    pub config: Arc<AppConfig>,
}

impl EdgeServices {
    pub async fn new(config: Arc<AppConfig>) -> AppResult<Self> {
        info!("starting edge services...");

        let retry = RetryPolicy::from_config(&config);
        let resolution_client = build_resolution_client(&config).map_err(|e| {
            Error::InternalServerErrorWithContext(format!("failed to build http client: {}", e))
        })?;

        let origin = Arc::new(OriginService::new(
            resolution_client.clone(),
            retry.clone(),
            config.bootstrap_url.clone(),
            config.default_origin.clone(),
        ));

        // first discovery happens before we take traffic, it never fails
        origin.refresh().await;

        info!("origin ok, starting resolver...");
        let resolver = Arc::new(StreamResolver::new(
            resolution_client,
            retry,
            origin,
            ResolutionCache::new(config.cache_ttl()),
        )) as DynStreamResolver;

        Self::with_resolver(resolver, config)
    }

    /// builds the rest of the services around an existing resolver
    pub fn with_resolver(resolver: DynStreamResolver, config: Arc<AppConfig>) -> AppResult<Self> {
        let http = build_proxy_client(&config).map_err(|e| {
            Error::InternalServerErrorWithContext(format!("failed to build http client: {}", e))
        })?;

        let recovery = Arc::new(RecoveryService::new(resolver.clone()));

        Ok(Self {
            resolver,
            recovery,
            http,
            retry: RetryPolicy::from_config(&config),
            config,
        })
    }
}
