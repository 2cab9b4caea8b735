//! Snapshot normalization.
//!
//! Converts a raw fetched snapshot into the canonical shapes the identity
//! resolver and diff engine operate on. Everything here is pure and
//! synchronous: URL canonicalization, timestamp coercion, list
//! deduplication, and required-field validation. Unvalidated raw fields do
//! not survive past this module.

use crate::error::{Result, WatchError};
use crate::models::{NormalizedSnapshot, PostContent, RawPost, RawThreadSnapshot, RawTimestamp, ThreadMeta};

/// Canonicalize a thread URL: trim whitespace, drop query and fragment,
/// strip a trailing `page-N` pagination segment and trailing slashes.
///
/// The canonical form is the thread's identity key; every pagination
/// variant of the same thread must collapse to the same string.
pub fn canonical_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(WatchError::MalformedSnapshot("empty thread URL".to_string()));
    }
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(WatchError::MalformedSnapshot(format!(
            "thread URL has no http(s) scheme: {trimmed}"
        )));
    }

    let mut url = trimmed;
    if let Some(pos) = url.find('#') {
        url = &url[..pos];
    }
    if let Some(pos) = url.find('?') {
        url = &url[..pos];
    }

    let mut url = url.trim_end_matches('/').to_string();

    // Pagination suffix: ".../page-12" points into the same thread.
    if let Some(idx) = url.rfind('/') {
        let last = &url[idx + 1..];
        if let Some(n) = last.strip_prefix("page-") {
            if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) {
                url.truncate(idx);
            }
        }
    }

    Ok(url.trim_end_matches('/').to_string())
}

/// Coerce a source timestamp to unix seconds.
///
/// Purely numeric values are disambiguated by digit length: 13 digits is
/// unix milliseconds, anything else is taken as unix seconds. Non-numeric
/// text is parsed as RFC 3339, then as a couple of common calendar forms.
/// Returns `None` when nothing matches; a post without a usable timestamp
/// is stored without one rather than failing the snapshot.
pub fn coerce_timestamp(raw: &RawTimestamp) -> Option<i64> {
    match raw {
        RawTimestamp::Numeric(n) => Some(coerce_numeric(*n)),
        RawTimestamp::Text(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if s.bytes().all(|b| b.is_ascii_digit()) {
                return s.parse::<i64>().ok().map(coerce_numeric);
            }
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
                return Some(dt.timestamp());
            }
            if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(dt.and_utc().timestamp());
            }
            if let Ok(d) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return Some(d.and_hms_opt(0, 0, 0)?.and_utc().timestamp());
            }
            None
        }
    }
}

fn coerce_numeric(n: i64) -> i64 {
    if n.unsigned_abs().to_string().len() == 13 {
        n / 1000
    } else {
        n
    }
}

/// Deduplicate URL lists while preserving first-seen order. Blank entries
/// are dropped.
pub fn dedup_urls(urls: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for url in urls {
        let url = url.trim();
        if url.is_empty() {
            continue;
        }
        if seen.insert(url.to_string()) {
            out.push(url.to_string());
        }
    }
    out
}

fn clean_opt(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn normalize_post(raw: &RawPost) -> PostContent {
    PostContent {
        source_post_id: raw.post_id,
        floor: raw.floor.filter(|f| *f > 0),
        author_name: clean_opt(&raw.author_name),
        author_id: raw.author_id,
        author_profile_url: clean_opt(&raw.author_profile_url),
        posted_at: raw.posted_at.as_ref().and_then(coerce_timestamp),
        content_text: raw.content_text.clone().unwrap_or_default(),
        content_html: clean_opt(&raw.content_html),
        image_urls: dedup_urls(&raw.image_urls),
        link_urls: dedup_urls(&raw.link_urls),
        embed_urls: dedup_urls(&raw.embed_urls),
        reactions: raw.reactions.unwrap_or(0).max(0),
    }
}

/// Normalize a raw snapshot into canonical thread metadata and ordered
/// post content.
///
/// Fails with [`WatchError::MalformedSnapshot`] when the thread URL or
/// title is absent, which aborts the current sync run only.
pub fn normalize_snapshot(raw: &RawThreadSnapshot) -> Result<NormalizedSnapshot> {
    let url = raw
        .url
        .as_deref()
        .ok_or_else(|| WatchError::MalformedSnapshot("snapshot has no thread URL".to_string()))?;
    let url = canonical_url(url)?;

    let title = clean_opt(&raw.title)
        .ok_or_else(|| WatchError::MalformedSnapshot("snapshot has no thread title".to_string()))?;

    let thread = ThreadMeta {
        url,
        title,
        categories: raw
            .categories
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect(),
        tags: raw
            .tags
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        avatar_url: clean_opt(&raw.avatar_url),
        description: clean_opt(&raw.description),
    };

    let posts = raw.posts.iter().map(normalize_post).collect();

    Ok(NormalizedSnapshot { thread, posts })
}
