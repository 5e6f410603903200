use serde::Serialize;

use crate::models::{ReplayHeaders, ResolvedStream};
use crate::server::utils::manifest_utils::proxy_manifest_path;

/// what the api hands out for a channel, the relay path is what a player should actually load
#[derive(Debug, Serialize)]
pub struct StreamResponse {
    pub channel_id: String,
    pub media_url: String,
    pub relay_path: String,
    pub replay_headers: ReplayHeaders,
    pub resolved_at: chrono::DateTime<chrono::Utc>,
}

impl StreamResponse {
    pub fn new(channel_id: &str, stream: ResolvedStream) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            relay_path: proxy_manifest_path(channel_id),
            media_url: stream.media_url,
            replay_headers: stream.replay_headers,
            resolved_at: stream.resolved_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CacheResetResponse {
    pub origin: String,
    pub schedule_url: String,
}
