// the channel resolution chain. every hop re-points Referer/Origin at the page it's fetching, the
// upstream checks those on every request
use std::sync::Arc;

use async_trait::async_trait;
use mockall::automock;
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    models::{ObfuscationBundle, OriginContext, ReplayHeaders, ResolutionStage, ResolvedStream},
    server::{
        error::{AppResult, Error},
        services::{origin_services::OriginService, resolution_cache_services::ResolutionCache},
        utils::{
            obfuscation_utils::{
                BUNDLE_PATTERNS, CHANNEL_KEY_PATTERNS, HOST_ARRAY_PATTERNS, IFRAME_PATTERNS,
                PLAYER_LINK_PATTERNS, SERVER_LOOKUP_PATTERNS, TextPattern, auth_path,
                decode_bundle, first_match, parse_host_parts,
            },
            upstream_utils::{BROWSER_USER_AGENT, RetryPolicy},
        },
    },
};

pub type DynStreamResolver = Arc<dyn StreamResolverTrait + Send + Sync>;

// this server key is served from a fixed host, every other key is `{key}new`
const TOP1_SERVER_KEY: &str = "top1/cdn";
const MEDIA_HOST_SUFFIX: &str = "new.newkso.ru";

#[automock]
#[async_trait]
pub trait StreamResolverTrait {
    /// cached stream if it's still fresh, otherwise the whole chain
    async fn resolve(&self, channel_id: &str) -> AppResult<ResolvedStream>;
    fn clear_cache(&self);
    /// re-runs origin discovery and swaps the result in
    async fn rediscover_origin(&self) -> OriginContext;
    fn current_origin(&self) -> OriginContext;
    fn cached_streams(&self) -> usize;
}

#[derive(Debug, Deserialize)]
struct ServerLookupResponse {
    server_key: Option<String>,
}

/// media url for a server key, this is an upstream convention and the host suffix is literal
pub fn build_media_url(server_key: &str, channel_key: &str) -> String {
    if server_key == TOP1_SERVER_KEY {
        format!("https://top1.newkso.ru/top1/cdn/{}/mono.m3u8", channel_key)
    } else {
        format!(
            "https://{}{}/{}/{}/mono.m3u8",
            server_key, MEDIA_HOST_SUFFIX, server_key, channel_key
        )
    }
}

/// relative player links hang off the base, and some pages emit `//cast` which upstream 404s on
pub fn player_url(base_url: &str, link: &str) -> String {
    let absolute = if link.starts_with("http") {
        link.to_string()
    } else {
        format!("{}{}", base_url.trim_end_matches('/'), link)
    };

    match absolute.split_once("://") {
        Some((scheme, rest)) => format!("{}://{}", scheme, rest.replace("//cast", "/cast")),
        None => absolute.replace("//cast", "/cast"),
    }
}

fn origin_of(url: &str, stage: ResolutionStage) -> AppResult<String> {
    let parsed = Url::parse(url).map_err(|e| Error::resolution(stage, format!("bad url {}: {}", url, e)))?;
    Ok(parsed.origin().ascii_serialization())
}

fn extract<'a>(
    patterns: &[TextPattern],
    body: &'a str,
    stage: ResolutionStage,
    what: &str,
) -> AppResult<&'a str> {
    match first_match(patterns, body) {
        Some((pattern, value)) => {
            debug!("stage {}: {} matched via {}", stage, what, pattern);
            Ok(value)
        }
        None => {
            error!("stage {}: no {} found ({} chars of body)", stage, what, body.len());
            Err(Error::resolution(stage, format!("no {} found", what)))
        }
    }
}

/// everything the auth call needs out of the embed page, the lookup path is filled in after auth
pub fn extract_bundle(body: &str) -> AppResult<ObfuscationBundle> {
    let stage = ResolutionStage::EmbedPage;

    let channel_key = extract(&CHANNEL_KEY_PATTERNS, body, stage, "channel key")?.to_string();

    let encoded = extract(&BUNDLE_PATTERNS, body, stage, "token bundle")?;
    let mut fields = decode_bundle(encoded)
        .map_err(|e| Error::resolution(stage, format!("token bundle: {}", e)))?;
    let mut take = |field: &str| {
        fields
            .remove(field)
            .ok_or_else(|| Error::resolution(stage, format!("token bundle has no {}", field)))
    };
    let ts = take("b_ts")?;
    let rnd = take("b_rnd")?;
    let sig = take("b_sig")?;

    let host_parts = parse_host_parts(extract(&HOST_ARRAY_PATTERNS, body, stage, "host array")?);

    Ok(ObfuscationBundle {
        channel_key,
        ts,
        rnd,
        sig,
        host_parts,
        server_lookup_path: String::new(),
    })
}

/// the lookup path lives in the embed page too, but it's only read once auth has gone out so a
/// miss here is a server lookup failure
pub fn extract_lookup_path(body: &str) -> AppResult<String> {
    extract(
        &SERVER_LOOKUP_PATTERNS,
        body,
        ResolutionStage::ServerLookup,
        "server lookup path",
    )
    .map(str::to_string)
}

pub fn auth_url(bundle: &ObfuscationBundle, auth_path: &str) -> String {
    format!(
        "{}{}?channel_id={}&ts={}&rnd={}&sig={}",
        bundle.host(),
        auth_path,
        urlencoding::encode(&bundle.channel_key),
        urlencoding::encode(&bundle.ts),
        urlencoding::encode(&bundle.rnd),
        urlencoding::encode(&bundle.sig),
    )
}

pub struct StreamResolver {
    http_client: reqwest::Client,
    retry: RetryPolicy,
    origin: Arc<OriginService>,
    cache: ResolutionCache,
}

impl StreamResolver {
    pub fn new(
        http_client: reqwest::Client,
        retry: RetryPolicy,
        origin: Arc<OriginService>,
        cache: ResolutionCache,
    ) -> Self {
        Self {
            http_client,
            retry,
            origin,
            cache,
        }
    }

    fn browser_headers(referer: &str, origin: &str) -> ReplayHeaders {
        let mut headers = ReplayHeaders::new();
        headers.insert("User-Agent", BROWSER_USER_AGENT);
        headers.insert("Connection", "Keep-Alive");
        headers.insert("Referer", referer);
        headers.insert("Origin", origin);
        headers
    }

    async fn send(
        &self,
        url: &str,
        headers: &ReplayHeaders,
        stage: ResolutionStage,
    ) -> AppResult<reqwest::Response> {
        let request = self.http_client.get(url).headers(headers.to_header_map());

        self.retry.send(request).await.map_err(|e| {
            error!("stage {}: request to {} failed: {}", stage, url, e);
            Error::resolution(stage, format!("request to {} failed: {}", url, e))
        })
    }

    async fn fetch_page(
        &self,
        url: &str,
        headers: &ReplayHeaders,
        stage: ResolutionStage,
    ) -> AppResult<String> {
        info!("stage {}: fetching {}", stage, url);
        let response = self.send(url, headers, stage).await?;

        if !response.status().is_success() {
            error!("stage {}: {} returned {}", stage, url, response.status());
            return Err(Error::resolution(
                stage,
                format!("{} returned {}", url, response.status()),
            ));
        }

        let body = response.text().await.map_err(|e| {
            Error::resolution(stage, format!("failed to read {}: {}", url, e))
        })?;
        debug!("stage {}: {} chars from {}", stage, body.len(), url);
        Ok(body)
    }

    async fn run_pipeline(
        &self,
        channel_id: &str,
        origin: &OriginContext,
    ) -> AppResult<ResolvedStream> {
        // stream page -> player link
        let stream_page = origin.stream_page_url(channel_id);
        let headers = Self::browser_headers(&format!("{}/", origin.base_url), &origin.base_url);
        let body = self
            .fetch_page(&stream_page, &headers, ResolutionStage::StreamPage)
            .await?;
        let link = extract(
            &PLAYER_LINK_PATTERNS,
            &body,
            ResolutionStage::StreamPage,
            "player link",
        )?;

        // player page -> embed iframe
        let player = player_url(&origin.base_url, link);
        let player_origin = origin_of(&player, ResolutionStage::PlayerPage)?;
        let headers = Self::browser_headers(&player, &player_origin);
        let body = self
            .fetch_page(&player, &headers, ResolutionStage::PlayerPage)
            .await?;
        let iframe = extract(&IFRAME_PATTERNS, &body, ResolutionStage::PlayerPage, "iframe")?;

        // embed page -> tokens
        let embed = Url::parse(&player)
            .and_then(|player| player.join(iframe))
            .map_err(|e| {
                Error::resolution(
                    ResolutionStage::EmbedPage,
                    format!("bad iframe url {}: {}", iframe, e),
                )
            })?
            .to_string();
        let embed_origin = origin_of(&embed, ResolutionStage::EmbedPage)?;
        let headers = Self::browser_headers(&embed, &embed_origin);
        let body = self
            .fetch_page(&embed, &headers, ResolutionStage::EmbedPage)
            .await?;
        let mut bundle = extract_bundle(&body)?;
        info!(
            "stage {}: channel key {} on host {}",
            ResolutionStage::EmbedPage,
            bundle.channel_key,
            bundle.host()
        );

        let auth_path = auth_path();
        if auth_path.is_empty() {
            return Err(Error::resolution(
                ResolutionStage::PathDeobfuscation,
                "auth path decoded to nothing",
            ));
        }

        // auth only matters for the session it opens upstream, the body is ignored
        let auth = auth_url(&bundle, &auth_path);
        let response = self
            .send(&auth, &headers, ResolutionStage::Authentication)
            .await?;
        if response.status().is_success() {
            debug!("stage {}: {}", ResolutionStage::Authentication, response.status());
        } else {
            warn!(
                "stage {}: auth returned {}, carrying on",
                ResolutionStage::Authentication,
                response.status()
            );
        }

        // server key lookup
        bundle.server_lookup_path = extract_lookup_path(&body)?;
        let lookup = format!(
            "{}{}{}",
            embed_origin, bundle.server_lookup_path, bundle.channel_key
        );
        info!("stage {}: fetching {}", ResolutionStage::ServerLookup, lookup);
        let response = self
            .send(&lookup, &headers, ResolutionStage::ServerLookup)
            .await?;
        if !response.status().is_success() {
            return Err(Error::resolution(
                ResolutionStage::ServerLookup,
                format!("server lookup returned {}", response.status()),
            ));
        }
        let server_key = response
            .json::<ServerLookupResponse>()
            .await
            .map_err(|e| {
                Error::resolution(
                    ResolutionStage::ServerLookup,
                    format!("server lookup response unreadable: {}", e),
                )
            })?
            .server_key
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                Error::resolution(ResolutionStage::ServerLookup, "no server_key in response")
            })?;

        let media_url = build_media_url(&server_key, &bundle.channel_key);
        Url::parse(&media_url).map_err(|e| {
            Error::resolution(
                ResolutionStage::MediaUrl,
                format!("server key {} gave a bad url: {}", server_key, e),
            )
        })?;

        let mut replay_headers = ReplayHeaders::new();
        replay_headers.insert("Referer", format!("{}/", embed_origin));
        replay_headers.insert("Origin", embed_origin.as_str());
        replay_headers.insert("User-Agent", BROWSER_USER_AGENT);
        replay_headers.insert("Connection", "keep-alive");

        Ok(ResolvedStream::new(media_url, replay_headers))
    }
}

#[async_trait]
impl StreamResolverTrait for StreamResolver {
    async fn resolve(&self, channel_id: &str) -> AppResult<ResolvedStream> {
        if let Some(cached) = self.cache.get(channel_id) {
            debug!("using cached stream for channel {}", channel_id);
            return Ok(cached);
        }

        info!("resolving stream for channel {}", channel_id);
        let origin = self.origin.current();
        let stream = self.run_pipeline(channel_id, &origin).await?;

        info!(
            "resolved channel {} to {}",
            channel_id, stream.media_url
        );
        self.cache.put(channel_id.to_string(), stream.clone());
        Ok(stream)
    }

    fn clear_cache(&self) {
        self.cache.clear();
    }

    async fn rediscover_origin(&self) -> OriginContext {
        self.origin.refresh().await.as_ref().clone()
    }

    fn current_origin(&self) -> OriginContext {
        self.origin.current().as_ref().clone()
    }

    fn cached_streams(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine;

    use super::*;

    fn b64(text: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(text)
    }

    fn embed_page() -> String {
        let inner = format!(
            r#"{{"b_ts":"{}","b_rnd":"{}","b_sig":"{}"}}"#,
            b64("1718000000"),
            b64("r4nd"),
            b64("s/g+=")
        );
        format!(
            r#"<script>
                const CHANNEL_KEY = "premium51";
                const XKZK = "{}";
                var host = ['https://', 'top2new', '.newkso.ru/'];
                fetchWithRetry('/server_lookup.php?channel_id=' + CHANNEL_KEY);
            </script>"#,
            b64(&inner)
        )
    }

    #[test]
    fn top1_server_key_uses_the_fixed_host() {
        assert_eq!(
            build_media_url("top1/cdn", "premium51"),
            "https://top1.newkso.ru/top1/cdn/premium51/mono.m3u8"
        );
    }

    #[test]
    fn other_server_keys_get_the_new_suffix() {
        assert_eq!(
            build_media_url("zeko", "premium51"),
            "https://zekonew.newkso.ru/zeko/premium51/mono.m3u8"
        );
    }

    #[test]
    fn player_links_are_made_absolute_and_cleaned() {
        assert_eq!(
            player_url("https://dlhd.example", "/cast/stream-51.php"),
            "https://dlhd.example/cast/stream-51.php"
        );
        assert_eq!(
            player_url("https://dlhd.example/", "//cast/stream-51.php"),
            "https://dlhd.example/cast/stream-51.php"
        );
        assert_eq!(
            player_url("https://dlhd.example", "https://castweb.example//cast/x.php"),
            "https://castweb.example/cast/x.php"
        );
    }

    #[test]
    fn bundle_is_fully_extracted() {
        let bundle = extract_bundle(&embed_page()).unwrap();

        assert_eq!(bundle.channel_key, "premium51");
        assert_eq!(bundle.ts, "1718000000");
        assert_eq!(bundle.rnd, "r4nd");
        assert_eq!(bundle.sig, "s/g+=");
        assert_eq!(bundle.host(), "https://top2new.newkso.ru/");
        assert!(bundle.server_lookup_path.is_empty());
        assert_eq!(
            extract_lookup_path(&embed_page()).unwrap(),
            "/server_lookup.php?channel_id="
        );
    }

    #[test]
    fn auth_url_escapes_every_value() {
        let bundle = extract_bundle(&embed_page()).unwrap();
        assert_eq!(
            auth_url(&bundle, "auth.php"),
            "https://top2new.newkso.ru/auth.php?channel_id=premium51&ts=1718000000&rnd=r4nd&sig=s%2Fg%2B%3D"
        );
    }

    #[test]
    fn missing_bundle_fails_the_embed_stage() {
        let page = r#"const CHANNEL_KEY = "premium51";"#;
        let err = extract_bundle(page).unwrap_err();
        assert_eq!(err.stage(), Some(ResolutionStage::EmbedPage));
    }

    #[test]
    fn missing_lookup_path_fails_the_lookup_stage() {
        let page = embed_page().replace("fetchWithRetry", "fetchOnce");
        assert!(extract_bundle(&page).is_ok());

        let err = extract_lookup_path(&page).unwrap_err();
        assert_eq!(err.stage(), Some(ResolutionStage::ServerLookup));
    }
}
