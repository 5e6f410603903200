use tracing::{error, info, warn};

use crate::{
    models::{OriginContext, ResolvedStream},
    server::error::{AppResult, Error},
};

use super::resolver_services::DynStreamResolver;

/// when a resolution fails the usual cause is a stale domain or a stale cached session, so the
/// reset is: drop the cache, find the origin again, try exactly once more. the per request retries
/// already live in the http layer so nothing here backs off
pub struct RecoveryService {
    resolver: DynStreamResolver,
}

impl RecoveryService {
    pub fn new(resolver: DynStreamResolver) -> Self {
        Self { resolver }
    }

    pub async fn resolve_with_recovery(&self, channel_id: &str) -> AppResult<ResolvedStream> {
        let first_error = match self.resolver.resolve(channel_id).await {
            Ok(stream) => return Ok(stream),
            Err(e) => e,
        };

        warn!(
            "resolution failed for channel {}: {}, resetting and retrying",
            channel_id, first_error
        );
        let origin = self.reset().await;
        info!("retrying channel {} against {}", channel_id, origin.base_url);

        match self.resolver.resolve(channel_id).await {
            Ok(stream) => {
                info!("channel {} resolved after reset", channel_id);
                Ok(stream)
            }
            Err(e) => {
                error!("channel {} failed again after reset: {}", channel_id, e);
                Err(Error::RecoveryExhausted {
                    channel_id: channel_id.to_string(),
                    source: Box::new(e),
                })
            }
        }
    }

    /// cache clear + origin re-discovery without the retry
    pub async fn reset(&self) -> OriginContext {
        self.resolver.clear_cache();
        self.resolver.rediscover_origin().await
    }
}
