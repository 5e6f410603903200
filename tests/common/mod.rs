// a tiny stand-in for the whole upstream: bootstrap document, the three html hops, auth, server
// lookup and a cdn serving one manifest with its segments and key
#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use base64::Engine;
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::TcpListener;

pub const CHANNEL_KEY: &str = "premium51";
pub const SEGMENT_BYTES: &[u8] = b"\x47\x40\x11\x10segment-one-payload";
pub const KEY_BYTES: &[u8] = b"0123456789abcdef";

#[derive(Default)]
pub struct Hits {
    pub bootstrap: AtomicUsize,
    pub stream_page: AtomicUsize,
    pub player_page: AtomicUsize,
    pub embed_page: AtomicUsize,
    pub auth: AtomicUsize,
    pub server_lookup: AtomicUsize,
    pub manifest: AtomicUsize,
}

/// knobs for the pages and endpoints that decide which stage a resolution gets to
#[derive(Clone)]
pub struct UpstreamOptions {
    pub server_key: String,
    pub with_player_link: bool,
    pub with_iframe: bool,
    pub with_lookup_path: bool,
    // host the embed page hands out for auth, None means this server
    pub auth_host: Option<String>,
    pub auth_status: StatusCode,
    pub lookup_status: StatusCode,
    // replaces the `{"server_key": ...}` body when set
    pub lookup_body: Option<serde_json::Value>,
}

impl Default for UpstreamOptions {
    fn default() -> Self {
        Self {
            server_key: "zeko".to_string(),
            with_player_link: true,
            with_iframe: true,
            with_lookup_path: true,
            auth_host: None,
            auth_status: StatusCode::OK,
            lookup_status: StatusCode::OK,
            lookup_body: None,
        }
    }
}

pub struct Upstream {
    pub base_url: String,
    pub options: UpstreamOptions,
    pub hits: Hits,
    pub auth_query: Mutex<HashMap<String, String>>,
}

impl Upstream {
    /// the referer the cdn insists on, same as what the resolver replays
    pub fn cdn_referer(&self) -> String {
        format!("{}/", self.base_url)
    }

    pub fn media_url(&self) -> String {
        format!("{}/zeko/{}/mono.m3u8", self.base_url, CHANNEL_KEY)
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct FakeUpstream {
    pub state: Arc<Upstream>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl FakeUpstream {
    pub async fn start() -> Self {
        Self::start_with(UpstreamOptions::default()).await
    }

    pub async fn start_with(options: UpstreamOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let state = Arc::new(Upstream {
            base_url: format!("http://{}", addr),
            options,
            hits: Hits::default(),
            auth_query: Mutex::new(HashMap::new()),
        });

        let router = Router::new()
            .route("/dl.xml", get(bootstrap))
            .route("/broken.xml", get(broken_bootstrap))
            .route("/stream/{file}", get(stream_page))
            .route("/cast/{file}", get(player_page))
            .route("/embed/{file}", get(embed_page))
            .route("/auth.php", get(auth))
            .route("/server_lookup.php", get(server_lookup))
            .route("/zeko/premium51/{file}", get(media))
            .route("/abs/{file}", get(media))
            .route("/keys/{file}", get(key))
            .with_state(state.clone());

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let server = axum::serve(listener, router).with_graceful_shutdown(async {
            shutdown_rx.await.ok();
        });

        tokio::spawn(async move {
            server.await.unwrap();
        });

        Self {
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.state.base_url, path)
    }
}

impl Drop for FakeUpstream {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

fn b64(text: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(text)
}

async fn bootstrap(State(state): State<Arc<Upstream>>) -> String {
    state.hits.bootstrap.fetch_add(1, Ordering::SeqCst);
    format!(
        r#"<html><iframe name="main" src = "{}/index.php?from=bootstrap"></iframe></html>"#,
        state.base_url
    )
}

async fn broken_bootstrap() -> &'static str {
    "<html>moved, no forwarding address</html>"
}

async fn stream_page(State(state): State<Arc<Upstream>>, Path(file): Path<String>) -> String {
    state.hits.stream_page.fetch_add(1, Ordering::SeqCst);
    if !state.options.with_player_link {
        return "<html><body>channel offline</body></html>".to_string();
    }

    format!(
        r#"<html><body>
            <a href="/watch/{file}"><button>Player 1</button></a>
            <a href="/cast/{file}" target="_blank"><button class="btn">Player 2</button></a>
        </body></html>"#
    )
}

async fn player_page(State(state): State<Arc<Upstream>>) -> &'static str {
    state.hits.player_page.fetch_add(1, Ordering::SeqCst);
    if !state.options.with_iframe {
        return "<html><body><p>stream starting soon</p></body></html>";
    }
    r#"<html><body><iframe src="/embed/premium51.php" width="100%" allowfullscreen></iframe></body></html>"#
}

async fn embed_page(State(state): State<Arc<Upstream>>) -> String {
    state.hits.embed_page.fetch_add(1, Ordering::SeqCst);

    let bundle = json!({
        "b_ts": b64("1718000000"),
        "b_rnd": b64("a1b2c3"),
        "b_sig": b64("sig/with+chars="),
    });
    let host_port = state
        .options
        .auth_host
        .as_deref()
        .unwrap_or(&state.base_url)
        .trim_start_matches("http://")
        .to_string();
    let lookup_call = if state.options.with_lookup_path {
        "fetchWithRetry('/server_lookup.php?channel_id=' + CHANNEL_KEY);"
    } else {
        "loadServer(CHANNEL_KEY);"
    };

    format!(
        r#"<script>
            const CHANNEL_KEY = "{}";
            const XKZK = "{}";
            var host = ['http://', '{}', '/'];
            {}
        </script>"#,
        CHANNEL_KEY,
        b64(&bundle.to_string()),
        host_port,
        lookup_call
    )
}

async fn auth(
    State(state): State<Arc<Upstream>>,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, &'static str) {
    state.hits.auth.fetch_add(1, Ordering::SeqCst);
    *state.auth_query.lock() = query;
    (state.options.auth_status, "{\"status\":\"ok\"}")
}

async fn server_lookup(
    State(state): State<Arc<Upstream>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.hits.server_lookup.fetch_add(1, Ordering::SeqCst);
    if query.get("channel_id").map(String::as_str) != Some(CHANNEL_KEY) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let body = state
        .options
        .lookup_body
        .clone()
        .unwrap_or_else(|| json!({ "server_key": state.options.server_key }));
    (state.options.lookup_status, Json(body)).into_response()
}

async fn media(
    State(state): State<Arc<Upstream>>,
    Path(file): Path<String>,
    headers: HeaderMap,
) -> Response {
    // the cdn refuses anyone who doesn't look like they came from the embed page
    let referer = headers.get(header::REFERER).and_then(|v| v.to_str().ok());
    if referer != Some(state.cdn_referer().as_str()) {
        return StatusCode::FORBIDDEN.into_response();
    }

    match file.as_str() {
        "mono.m3u8" => {
            state.hits.manifest.fetch_add(1, Ordering::SeqCst);
            let manifest = format!(
                "#EXTM3U\n\
                 #EXT-X-VERSION:3\n\
                 #EXT-X-TARGETDURATION:4\n\
                 ## served by fake-cdn\n\
                 #EXT-X-KEY:METHOD=AES-128,URI=\"/keys/k1.key\",IV=0x0102\n\
                 #EXTINF:4.0,\n\
                 seg-1.ts\n\
                 #EXTINF:4.0,\n\
                 {}/abs/seg-2.ts\n",
                state.base_url
            );
            (
                [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
                manifest,
            )
                .into_response()
        }
        "seg-1.ts" | "seg-2.ts" => segment(&headers),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

fn segment(headers: &HeaderMap) -> Response {
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("bytes="))
        .and_then(|v| v.split_once('-'));

    if let Some((start, end)) = range {
        let start: usize = start.parse().unwrap();
        let end: usize = end.parse().unwrap();
        return (
            StatusCode::PARTIAL_CONTENT,
            [
                (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                (
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", start, end, SEGMENT_BYTES.len()),
                ),
            ],
            SEGMENT_BYTES[start..=end].to_vec(),
        )
            .into_response();
    }

    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        SEGMENT_BYTES.to_vec(),
    )
        .into_response()
}

async fn key() -> Response {
    ([(header::CONTENT_TYPE, "application/x-aes-key")], KEY_BYTES.to_vec()).into_response()
}
