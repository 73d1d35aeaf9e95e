//! Dedup keys for content items.
//!
//! An item is identified three ways so that a repost is caught even when the
//! feed changes one of them: its native id, its canonical link and its
//! normalized text. Each key is a pure function of the item.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;
use url::Url;

/// Query parameters that only track where a click came from.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "yclid", "dclid", "msclkid", "mc_cid", "mc_eid", "igshid",
];

static BLOCK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:script|style)\b.*?</(?:script|style)\s*>")
        .unwrap_or_else(|_| unreachable!())
});

static TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->|<[^>]*>").unwrap_or_else(|_| unreachable!()));

/// A feed entry as produced by a feed parser. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContentItem {
    /// Feed the item came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Publication date as given by the feed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iso_date: Option<String>,
    /// Body, possibly HTML.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Plain-text excerpt, preferred over `content` when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_snippet: Option<String>,
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.trim().is_empty())
}

impl ContentItem {
    /// Plain text used for the content hash: the snippet if present, else the
    /// body with markup removed; normalized.
    #[must_use]
    pub fn plain_text(&self) -> String {
        match non_empty(self.content_snippet.as_ref()) {
            Some(snippet) => normalize_text(snippet),
            None => normalize_text(&strip_markup(self.content.as_deref().unwrap_or_default())),
        }
    }
}

/// The dedup keys of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupKeySet {
    pub id: String,
    pub canonical_link: Option<String>,
    pub url_hash: Option<String>,
    pub content_hash: Option<String>,
}

impl DedupKeySet {
    /// Keys as stored: `id:…`, `uh:…`, `ch:…`. Absent keys are omitted.
    #[must_use]
    pub fn store_keys(&self) -> Vec<String> {
        let mut keys = vec![format!("id:{}", self.id)];
        if let Some(url_hash) = &self.url_hash {
            keys.push(format!("uh:{url_hash}"));
        }
        if let Some(content_hash) = &self.content_hash {
            keys.push(format!("ch:{content_hash}"));
        }
        keys
    }
}

/// Lowercase hex SHA-256 of `input`.
#[must_use]
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Derive the dedup keys of `item`.
///
/// * `id` - native id, else the link, else `sha256(title|isoDate|link)`
/// * `url_hash` - `sha256(canonical link)`, absent without a link
/// * `content_hash` - `sha256(title|plain text)`, absent when both are empty
#[must_use]
pub fn make_keys(item: &ContentItem) -> DedupKeySet {
    let title = item.title.as_deref().unwrap_or_default();
    let link = non_empty(item.link.as_ref());

    let id = non_empty(item.id.as_ref())
        .or(link)
        .map(str::to_string)
        .unwrap_or_else(|| {
            sha256_hex(&format!(
                "{}|{}|{}",
                title,
                item.iso_date.as_deref().unwrap_or_default(),
                item.link.as_deref().unwrap_or_default()
            ))
        });

    let canonical_link = link.map(canonicalize_url);
    let url_hash = canonical_link.as_deref().map(sha256_hex);

    let plain = item.plain_text();
    let content_hash = if title.trim().is_empty() && plain.is_empty() {
        None
    } else {
        Some(sha256_hex(&format!("{title}|{plain}")))
    };

    let keys = DedupKeySet {
        id,
        canonical_link,
        url_hash,
        content_hash,
    };
    log::trace!("Keys for '{}': {:?}", keys.id, keys.store_keys());
    keys
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Canonical form of a link.
///
/// Drops the fragment and tracking parameters, sorts the remaining query
/// parameters by key (stable, so repeated keys keep their order), lowercases
/// the host and removes an empty query. Links that do not parse are returned
/// unchanged. Applying it twice gives the same result as once.
#[must_use]
pub fn canonicalize_url(link: &str) -> String {
    let mut url = match Url::parse(link.trim()) {
        Ok(url) => url,
        Err(e) => {
            log::debug!("Leaving unparsable link as is ({e}): {link}");
            return link.to_string();
        }
    };

    url.set_fragment(None);

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    params.sort_by(|a, b| a.0.cmp(&b.0));

    if params.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(params);
    }

    if let Some(host) = url.host_str() {
        let lower = host.to_lowercase();
        if lower != host {
            // Only fails for hosts that cannot be changed, which keep their case.
            let _ = url.set_host(Some(&lower));
        }
    }

    url.to_string()
}

/// Remove markup from an HTML fragment, leaving its text.
///
/// Script and style bodies and comments are dropped, tags become spaces,
/// character references are decoded and whitespace is collapsed.
#[must_use]
pub fn strip_markup(html: &str) -> String {
    let without_blocks = BLOCK_PATTERN.replace_all(html, " ");
    let without_tags = TAG_PATTERN.replace_all(&without_blocks, " ");
    let decoded = html_escape::decode_html_entities(&without_tags);
    collapse_whitespace(&decoded)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// NFC-normalize, collapse whitespace and lowercase.
#[must_use]
pub fn normalize_text(text: &str) -> String {
    let composed: String = text.nfc().collect();
    collapse_whitespace(&composed).to_lowercase()
}
