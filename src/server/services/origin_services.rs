use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::header;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    models::OriginContext,
    server::{
        error::{AppResult, Error},
        utils::{
            obfuscation_utils::{ORIGIN_PATTERNS, first_match},
            upstream_utils::RetryPolicy,
        },
    },
};

/// keeps track of the upstream domain. the site rotates domains, so the current one is read from
/// a small bootstrap document and swapped in as a whole
pub struct OriginService {
    http: reqwest::Client,
    retry: RetryPolicy,
    bootstrap_url: String,
    default_origin: String,
    current: RwLock<Arc<OriginContext>>,
}

impl OriginService {
    /// starts out on the default origin, call `refresh` to run discovery
    pub fn new(
        http: reqwest::Client,
        retry: RetryPolicy,
        bootstrap_url: String,
        default_origin: String,
    ) -> Self {
        let current = Arc::new(OriginContext::from_base(&default_origin));
        Self {
            http,
            retry,
            bootstrap_url,
            default_origin,
            current: RwLock::new(current),
        }
    }

    /// snapshot of the current origin, never half updated
    pub fn current(&self) -> Arc<OriginContext> {
        self.current.read().clone()
    }

    /// runs discovery and swaps the result in
    pub async fn refresh(&self) -> Arc<OriginContext> {
        let located = Arc::new(self.locate().await);
        *self.current.write() = located.clone();
        info!("origin set to {}", located.base_url);
        located
    }

    /// discovery that never fails, a dead bootstrap document shouldn't stop us from trying the
    /// default origin
    pub async fn locate(&self) -> OriginContext {
        match self.try_locate().await {
            Ok(origin) => origin,
            Err(e) => {
                warn!("{}, falling back to {}", e, self.default_origin);
                OriginContext::fallback(&self.default_origin)
            }
        }
    }

    pub async fn try_locate(&self) -> AppResult<OriginContext> {
        debug!("fetching bootstrap document {}", self.bootstrap_url);

        let request = self
            .http
            .get(&self.bootstrap_url)
            .header(header::CONNECTION, "Keep-Alive");

        let response = self
            .retry
            .send(request)
            .await
            .map_err(|e| Error::OriginUnreachable(format!("bootstrap request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::OriginUnreachable(format!(
                "bootstrap returned {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::OriginUnreachable(format!("bootstrap body unreadable: {}", e)))?;

        Self::origin_from_bootstrap(&body)
    }

    /// scheme + host (+ port) of the first `src = "<url>"` in the document
    pub fn origin_from_bootstrap(body: &str) -> AppResult<OriginContext> {
        let (_, target) = first_match(&ORIGIN_PATTERNS, body).ok_or_else(|| {
            Error::OriginUnreachable("no redirect target in bootstrap document".to_string())
        })?;

        let target = Url::parse(target).map_err(|e| {
            Error::OriginUnreachable(format!("bad redirect target {}: {}", target, e))
        })?;

        if target.host_str().is_none() {
            return Err(Error::OriginUnreachable(format!(
                "redirect target {} has no host",
                target
            )));
        }

        Ok(OriginContext::from_base(&target.origin().ascii_serialization()))
    }
}
