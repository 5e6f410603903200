use once_cell::sync::Lazy;
use regex::Regex;
use tracing::error;
use url::Url;

use crate::server::error::{AppResult, Error};

pub const MANIFEST_EXTENSION: &str = ".m3u8";
pub const SEGMENT_EXTENSION: &str = ".ts";

pub const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

// only the URI attribute is touched, METHOD/IV/KEYFORMAT stay as they were
static KEY_URI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"URI="([^"]+)""#).expect("static key uri pattern should compile"));

/// `/hls/{id}/{encoded}`, the only shape of url a player ever sees from us
pub fn proxy_path(channel_id: &str, resource: &str) -> String {
    format!(
        "/hls/{}/{}",
        urlencoding::encode(channel_id),
        urlencoding::encode(resource)
    )
}

/// entry point handed to playlist generators
pub fn proxy_manifest_path(channel_id: &str) -> String {
    proxy_path(channel_id, "mono.m3u8")
}

fn path_part(resource: &str) -> &str {
    resource
        .split(['?', '#'])
        .next()
        .unwrap_or(resource)
}

pub fn is_manifest_resource(resource: &str) -> bool {
    path_part(resource).ends_with(MANIFEST_EXTENSION)
}

pub fn is_segment_resource(resource: &str) -> bool {
    path_part(resource).ends_with(SEGMENT_EXTENSION)
}

pub fn is_absolute(resource: &str) -> bool {
    resource.starts_with("http://") || resource.starts_with("https://")
}

/// scheme + host + directory of the manifest, query dropped
pub fn manifest_base(media_url: &Url) -> Url {
    let mut base = media_url.clone();
    let directory = match media_url.path().rfind('/') {
        Some(idx) => media_url.path()[..=idx].to_string(),
        None => "/".to_string(),
    };
    base.set_path(&directory);
    base.set_query(None);
    base.set_fragment(None);
    base
}

/// what to actually fetch for a requested resource. manifests always go back to the resolved
/// media url since that's the only manifest we trust, everything else was put in a manifest by
/// `rewrite_manifest` and is either absolute or relative to the manifest directory
pub fn upstream_target(requested: &str, media_url: &str) -> AppResult<Url> {
    let media_url = Url::parse(media_url).map_err(|e| {
        error!("resolved media url is invalid: {} - {}", media_url, e);
        Error::InternalServerErrorWithContext(format!("invalid media url: {}", e))
    })?;

    if is_manifest_resource(requested) {
        return Ok(media_url);
    }

    if is_absolute(requested) {
        return Url::parse(requested)
            .map_err(|e| Error::BadRequest(format!("invalid resource url: {}", e)));
    }

    manifest_base(&media_url)
        .join(requested)
        .map_err(|e| Error::BadRequest(format!("invalid resource path: {}", e)))
}

/// manifest and segment types are fixed, anything else keeps what upstream said
pub fn content_type_for(requested: &str, upstream: Option<&str>) -> String {
    if is_manifest_resource(requested) {
        MANIFEST_CONTENT_TYPE.to_string()
    } else if is_segment_resource(requested) {
        SEGMENT_CONTENT_TYPE.to_string()
    } else {
        upstream
            .filter(|v| !v.is_empty())
            .unwrap_or(FALLBACK_CONTENT_TYPE)
            .to_string()
    }
}

pub fn looks_like_manifest_type(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    content_type.contains("mpegurl") || content_type.contains("m3u8")
}

fn resolve_reference(manifest_url: &Url, reference: &str) -> Option<String> {
    match manifest_url.join(reference) {
        Ok(resolved) => Some(resolved.to_string()),
        Err(e) => {
            error!("Failed to resolve: {} - {}", reference, e);
            None
        }
    }
}

/// points every segment, sub playlist and key in a manifest back at the proxy. comments and
/// blank lines are left alone, references that can't be resolved are left alone too
pub fn rewrite_manifest(text: &str, manifest_url: &Url, channel_id: &str) -> String {
    let lines: Vec<String> = text
        .lines()
        .map(|line| {
            let trimmed = line.trim();

            if trimmed.starts_with("#EXT-X-KEY") {
                return rewrite_key_line(trimmed, manifest_url, channel_id)
                    .unwrap_or_else(|| line.to_string());
            }

            if trimmed.is_empty() || trimmed.starts_with('#') {
                return line.to_string();
            }

            match resolve_reference(manifest_url, trimmed) {
                Some(resolved) => proxy_path(channel_id, &resolved),
                None => line.to_string(),
            }
        })
        .collect();

    let mut rewritten = lines.join("\n");
    if text.ends_with('\n') {
        rewritten.push('\n');
    }
    rewritten
}

fn rewrite_key_line(line: &str, manifest_url: &Url, channel_id: &str) -> Option<String> {
    let caps = KEY_URI.captures(line)?;
    let uri = caps.get(1)?;
    let resolved = resolve_reference(manifest_url, uri.as_str())?;

    let mut rewritten = line.to_string();
    rewritten.replace_range(uri.range(), &proxy_path(channel_id, &resolved));
    Some(rewritten)
}
