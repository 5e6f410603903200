// the upstream pages change shape every few weeks, so every extraction is a list of patterns tried
// in order. when something breaks the fix should be a new entry here, not new control flow
use std::collections::HashMap;

use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;

/// a named regex where capture group 1 is the value we want
pub struct TextPattern {
    pub name: &'static str,
    pub regex: Regex,
}

impl TextPattern {
    fn new(name: &'static str, pattern: &str) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).expect("static extraction pattern should compile"),
        }
    }
}

/// first pattern with a non-empty capture wins, returns the pattern name for logging
pub fn first_match<'a>(patterns: &[TextPattern], body: &'a str) -> Option<(&'static str, &'a str)> {
    patterns.iter().find_map(|pattern| {
        pattern
            .regex
            .captures_iter(body)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str())
            .find(|value| !value.is_empty())
            .map(|value| (pattern.name, value))
    })
}

// bootstrap document, `src = "<url>"`
pub static ORIGIN_PATTERNS: Lazy<Vec<TextPattern>> =
    Lazy::new(|| vec![TextPattern::new("src-assignment", r#"src = "([^"]*)"#)]);

// stream page -> player link, the layout depends on the channel so most specific goes first
pub static PLAYER_LINK_PATTERNS: Lazy<Vec<TextPattern>> = Lazy::new(|| {
    vec![
        TextPattern::new(
            "player-2-button",
            r#"(?is)<a[^>]*href="([^"]+)"[^>]*>\s*<button[^>]*>\s*Player\s*2\s*</button>"#,
        ),
        TextPattern::new(
            "cast-button",
            r#"(?is)<a[^>]*href="(/cast[^"]+)"[^>]*>\s*<button"#,
        ),
        TextPattern::new("cast-href", r#"(?is)href="(/cast[^"]*)""#),
        TextPattern::new(
            "any-player-button",
            r#"(?is)<a[^>]*href="([^"]+)"[^>]*>\s*<button[^>]*>.*?player.*?</button>"#,
        ),
        TextPattern::new("first-iframe", r#"(?is)<iframe[^>]*src="([^"]+)""#),
    ]
});

// player page -> embed iframe
pub static IFRAME_PATTERNS: Lazy<Vec<TextPattern>> =
    Lazy::new(|| vec![TextPattern::new("iframe-src", r#"(?i)iframe\s+src="([^"]*)"#)]);

// embed page -> plaintext channel key
pub static CHANNEL_KEY_PATTERNS: Lazy<Vec<TextPattern>> = Lazy::new(|| {
    vec![
        TextPattern::new("const-channel-key", r#"const\s+CHANNEL_KEY\s*=\s*"([^"]+)""#),
        TextPattern::new("channel-key-var", r#"channelKey\s*=\s*["']([^"']+)["']"#),
    ]
});

// embed page -> base64 json with base64 values, the constant gets renamed now and then
pub static BUNDLE_PATTERNS: Lazy<Vec<TextPattern>> = Lazy::new(|| {
    vec![
        TextPattern::new("const-xkzk", r#"const\s+XKZK\s*=\s*"([^"]+)""#),
        TextPattern::new("const-xjz", r#"const\s+XJZ\s*=\s*"([^"]+)""#),
    ]
});

// embed page -> host = ['htt', 'ps://', ...]
pub static HOST_ARRAY_PATTERNS: Lazy<Vec<TextPattern>> =
    Lazy::new(|| vec![TextPattern::new("host-array", r#"host\s*=\s*\[([^\]]+)\]"#)]);

// embed page -> path of the server key lookup, the channel key gets appended to it
pub static SERVER_LOOKUP_PATTERNS: Lazy<Vec<TextPattern>> = Lazy::new(|| {
    vec![TextPattern::new(
        "fetch-with-retry",
        r#"fetchWithRetry\(\s*["']([^"']*)"#,
    )]
});

/// auth script path as it sits in the embed page, each byte XOR AUTH_PATH_KEY.
/// if upstream rotates the constant, grab the new array and key from the page and update both
pub const AUTH_PATH_BYTES: [u8; 8] = [40, 60, 61, 33, 103, 57, 33, 57];
pub const AUTH_PATH_KEY: u8 = 73;

pub fn xor_decode(bytes: &[u8], key: u8) -> String {
    bytes.iter().map(|b| char::from(b ^ key)).collect()
}

/// "auth.php" with the current constants
pub fn auth_path() -> String {
    xor_decode(&AUTH_PATH_BYTES, AUTH_PATH_KEY)
}

/// base64 with whatever padding upstream felt like leaving on
pub fn decode_base64_text(encoded: &str) -> Result<String, String> {
    let mut padded = encoded.trim().to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&padded)
        .map_err(|e| format!("invalid base64: {}", e))?;

    String::from_utf8(bytes).map_err(|e| format!("decoded base64 is not utf-8: {}", e))
}

/// outer layer is base64 json, every value in it is base64 again
pub fn decode_bundle(encoded: &str) -> Result<HashMap<String, String>, String> {
    let json = decode_base64_text(encoded)?;
    let fields: HashMap<String, String> =
        serde_json::from_str(&json).map_err(|e| format!("bundle is not a string map: {}", e))?;

    fields
        .into_iter()
        .map(|(key, value)| {
            decode_base64_text(&value)
                .map(|decoded| (key.clone(), decoded))
                .map_err(|e| format!("bundle field {}: {}", key, e))
        })
        .collect()
}

/// `'https://', "top", 'new.example/'` -> ["https://", "top", "new.example/"]
pub fn parse_host_parts(array_body: &str) -> Vec<String> {
    array_body
        .split(',')
        .map(|part| part.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(text: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(text)
    }

    #[test]
    fn auth_path_is_derived_from_xor() {
        assert_eq!(auth_path(), "auth.php");
        assert_eq!(xor_decode(&[b'a' ^ 7, b'b' ^ 7], 7), "ab");
    }

    #[test]
    fn player_patterns_prefer_the_player_2_button() {
        let page = r#"
            <a href="/cast/stream-51.php"><button>Player 1</button></a>
            <a href="/plus/stream-51.php">
                <button class="btn">Player 2</button>
            </a>
        "#;

        let (name, link) = first_match(&PLAYER_LINK_PATTERNS, page).unwrap();
        assert_eq!(name, "player-2-button");
        assert_eq!(link, "/plus/stream-51.php");
    }

    #[test]
    fn player_patterns_fall_through_to_iframe() {
        let page = r#"<div><IFRAME width="100%" SRC="https://embed.example/e/51"></IFRAME></div>"#;

        let (name, link) = first_match(&PLAYER_LINK_PATTERNS, page).unwrap();
        assert_eq!(name, "first-iframe");
        assert_eq!(link, "https://embed.example/e/51");
    }

    #[test]
    fn player_patterns_miss_on_unrelated_page() {
        assert!(first_match(&PLAYER_LINK_PATTERNS, "<html><a href=\"/home\">home</a></html>").is_none());
    }

    #[test]
    fn empty_captures_do_not_count_as_matches() {
        let page = r#"<iframe src=""></iframe><iframe src="/premiumtv/daddy.php?id=51">"#;
        let (_, link) = first_match(&IFRAME_PATTERNS, page).unwrap();
        assert_eq!(link, "/premiumtv/daddy.php?id=51");
    }

    #[test]
    fn channel_key_has_a_fallback_spelling() {
        let page = "var channelKey = 'premium51';";
        let (name, key) = first_match(&CHANNEL_KEY_PATTERNS, page).unwrap();
        assert_eq!(name, "channel-key-var");
        assert_eq!(key, "premium51");
    }

    #[test]
    fn bundle_values_are_decoded_twice() {
        let inner = format!(
            r#"{{"b_ts":"{}","b_rnd":"{}","b_sig":"{}"}}"#,
            b64("1718000000"),
            b64("a1b2c3"),
            b64("sig/with+chars")
        );
        let page = format!(r#"const XJZ = "{}";"#, b64(&inner).trim_end_matches('='));

        let (_, encoded) = first_match(&BUNDLE_PATTERNS, &page).unwrap();
        let fields = decode_bundle(encoded).unwrap();

        assert_eq!(fields["b_ts"], "1718000000");
        assert_eq!(fields["b_rnd"], "a1b2c3");
        assert_eq!(fields["b_sig"], "sig/with+chars");
    }

    #[test]
    fn bundle_with_non_base64_value_is_rejected() {
        let inner = r#"{"b_ts":"%%%"}"#;
        let err = decode_bundle(&b64(inner)).unwrap_err();
        assert!(err.contains("b_ts"));
    }

    #[test]
    fn host_fragments_are_joined() {
        let page = r#"const host = ['https://', "top2", 'new.newkso.ru/'];"#;
        let (_, body) = first_match(&HOST_ARRAY_PATTERNS, page).unwrap();

        assert_eq!(parse_host_parts(body).concat(), "https://top2new.newkso.ru/");
    }

    #[test]
    fn server_lookup_path_is_extracted() {
        let page = r#"fetchWithRetry( '/server_lookup.php?channel_id=' + CHANNEL_KEY)"#;
        let (_, path) = first_match(&SERVER_LOOKUP_PATTERNS, page).unwrap();
        assert_eq!(path, "/server_lookup.php?channel_id=");
    }
}
