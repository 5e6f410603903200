// the player only ever talks to these routes. manifests are fetched whole and rewritten, every
// other resource is streamed through as upstream sends it
use axum::{
    Extension, Router,
    body::Body,
    extract::Path,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::{debug, error, info};
use url::Url;

use crate::{
    models::ResolvedStream,
    server::{
        error::{AppResult, Error},
        services::edge_services::EdgeServices,
        utils::manifest_utils::{
            MANIFEST_CONTENT_TYPE, content_type_for, is_manifest_resource,
            looks_like_manifest_type, rewrite_manifest, upstream_target,
        },
    },
};

pub struct HlsController;

impl HlsController {
    pub fn app() -> Router {
        Router::new().route("/{channel_id}/{*resource}", get(Self::hls_get))
    }

    fn build_manifest_response(rewritten: String) -> Response {
        let mut response_headers = HeaderMap::new();
        response_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(MANIFEST_CONTENT_TYPE),
        );
        response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        (StatusCode::OK, response_headers, rewritten).into_response()
    }

    async fn hls_get(
        Extension(services): Extension<EdgeServices>,
        Path((channel_id, resource)): Path<(String, String)>,
        headers: HeaderMap,
    ) -> AppResult<Response> {
        debug!("hls request for channel {}: {}", channel_id, resource);

        let stream = services.recovery.resolve_with_recovery(&channel_id).await?;
        let target = upstream_target(&resource, &stream.media_url)?;
        let wants_manifest = is_manifest_resource(&resource);

        let mut request_builder = services
            .http
            .get(target.clone())
            .headers(stream.replay_headers.to_header_map());

        // ranges only make sense for the byte passthrough, manifests are always fetched whole
        if !wants_manifest {
            if let Some(range) = headers.get(header::RANGE) {
                request_builder = request_builder.header(header::RANGE, range.clone());
            }
        }

        let target_response = services.retry.send(request_builder).await.map_err(|e| {
            error!("Request to {} failed: {}", target, e);
            Error::UpstreamFetchFailed(format!("request to {} failed: {}", target, e))
        })?;

        let response_status = target_response.status();
        if !response_status.is_success() {
            // usually a cloudflare page, not worth logging the body
            error!(
                "channel {}: upstream {} returned {}",
                channel_id, target, response_status
            );
            return Err(Error::UpstreamFetchFailed(format!(
                "{} returned {}",
                target, response_status
            )));
        }

        let upstream_type = target_response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let is_manifest = wants_manifest
            || upstream_type
                .as_deref()
                .is_some_and(looks_like_manifest_type);

        if is_manifest {
            // the final url after redirects is what relative references hang off
            let manifest_url = target_response.url().clone();
            let text = target_response.text().await.map_err(|e| {
                error!("Failed to read manifest: {}", e);
                Error::UpstreamFetchFailed(format!("failed to read manifest: {}", e))
            })?;

            let rewritten = Self::process_manifest(&text, &manifest_url, &channel_id, &stream);
            debug!(
                "rewrote manifest for channel {} ({} -> {} bytes)",
                channel_id,
                text.len(),
                rewritten.len()
            );
            return Ok(Self::build_manifest_response(rewritten));
        }

        Ok(Self::build_passthrough_response(
            &resource,
            upstream_type.as_deref(),
            target_response,
        ))
    }

    fn process_manifest(
        text: &str,
        manifest_url: &Url,
        channel_id: &str,
        stream: &ResolvedStream,
    ) -> String {
        info!(
            "serving manifest for channel {} (resolved {})",
            channel_id, stream.resolved_at
        );
        rewrite_manifest(text, manifest_url, channel_id)
    }

    /// segments and keys go straight through, chunk by chunk, nothing is buffered
    fn build_passthrough_response(
        resource: &str,
        upstream_type: Option<&str>,
        target_response: reqwest::Response,
    ) -> Response {
        let status = target_response.status();
        let content_type = content_type_for(resource, upstream_type);

        let mut response_headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&content_type) {
            response_headers.insert(header::CONTENT_TYPE, value);
        }

        for name in [header::CONTENT_LENGTH, header::CONTENT_RANGE, header::ACCEPT_RANGES] {
            if let Some(value) = target_response.headers().get(&name) {
                response_headers.insert(name, value.clone());
            }
        }

        let body = Body::from_stream(target_response.bytes_stream());

        (status, response_headers, body).into_response()
    }
}
