use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Serialize, Serializer, ser::SerializeMap};

// type hell, but smaller this time
//
// `ResolvedStream` is what the cache owns and what the proxy replays. It's never mutated, a new
// resolution just replaces the old one. `OriginContext` is the current upstream domain and is
// swapped as a whole. `ObfuscationBundle` only lives for one resolution attempt.

/// opaque channel token, numeric in practice but never treated as a number
pub type ChannelId = String;

/// header set that has to be sent on every upstream fetch for a resolved stream, order is kept
/// the way it was built
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayHeaders(Vec<(String, String)>);

impl ReplayHeaders {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// replaces an existing header (case insensitive) in place or appends it
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .0
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some(slot) => slot.1 = value,
            None => self.0.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// anything that isn't a valid header is skipped, upstream values are plain ascii anyways
    pub fn to_header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(self.0.len());
        for (name, value) in &self.0 {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
        headers
    }
}

impl Serialize for ReplayHeaders {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedStream {
    pub media_url: String,
    pub replay_headers: ReplayHeaders,
    pub resolved_at: DateTime<Utc>,
}

impl ResolvedStream {
    pub fn new(media_url: String, replay_headers: ReplayHeaders) -> Self {
        Self {
            media_url,
            replay_headers,
            resolved_at: Utc::now(),
        }
    }

    /// valid while now - resolved_at < ttl
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now.signed_duration_since(self.resolved_at) < ttl,
            // a ttl that doesn't fit in chrono is effectively forever
            Err(_) => true,
        }
    }
}

/// current upstream domain and the urls derived from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OriginContext {
    pub base_url: String,
    pub stream_page_template: String,
    pub schedule_url: String,
    // set when discovery failed and this is the configured default
    pub from_fallback: bool,
}

impl OriginContext {
    pub fn from_base(base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            stream_page_template: format!("{}/stream/stream-%s.php", base_url),
            schedule_url: format!("{}/schedule/schedule-generated.php", base_url),
            base_url,
            from_fallback: false,
        }
    }

    pub fn fallback(base_url: &str) -> Self {
        Self {
            from_fallback: true,
            ..Self::from_base(base_url)
        }
    }

    pub fn stream_page_url(&self, channel_id: &str) -> String {
        self.stream_page_template.replacen("%s", channel_id, 1)
    }
}

/// everything pulled out of the embed page for one resolution attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObfuscationBundle {
    pub channel_key: String,
    pub ts: String,
    pub rnd: String,
    pub sig: String,
    pub host_parts: Vec<String>,
    // empty until the auth call has gone out
    pub server_lookup_path: String,
}

impl ObfuscationBundle {
    /// the real auth host is split into string fragments in the page source
    pub fn host(&self) -> String {
        self.host_parts.concat()
    }
}

/// hops of the resolution chain, the numbers are stable and show up in error messages.
///
/// `PathDeobfuscation` (4) and `ReplayHeaders` (8) are reserved: with the current constants the
/// auth path and the replay headers can't fail, the numbers are kept so the other stages keep
/// theirs when upstream changes again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResolutionStage {
    StreamPage,
    PlayerPage,
    EmbedPage,
    PathDeobfuscation,
    Authentication,
    ServerLookup,
    MediaUrl,
    ReplayHeaders,
}

impl ResolutionStage {
    pub fn number(&self) -> u8 {
        match self {
            Self::StreamPage => 1,
            Self::PlayerPage => 2,
            Self::EmbedPage => 3,
            Self::PathDeobfuscation => 4,
            Self::Authentication => 5,
            Self::ServerLookup => 6,
            Self::MediaUrl => 7,
            Self::ReplayHeaders => 8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::StreamPage => "stream page",
            Self::PlayerPage => "player page",
            Self::EmbedPage => "embed page",
            Self::PathDeobfuscation => "path de-obfuscation",
            Self::Authentication => "authentication",
            Self::ServerLookup => "server lookup",
            Self::MediaUrl => "media url",
            Self::ReplayHeaders => "replay headers",
        }
    }
}

impl fmt::Display for ResolutionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.name())
    }
}
