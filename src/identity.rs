//! Post identity resolution.
//!
//! The source does not guarantee stable post ids, so pairing a freshly
//! fetched post with its stored counterpart is record linkage under
//! uncertain keys. Matching is tiered:
//!
//! 1. **Source id** — exact match against a previously stored id wins.
//! 2. **Floor** — positional floor number, usable only when floors are
//!    unique within both the fresh and the stored snapshot.
//! 3. **Positional signature** — same position and an identical
//!    author/timestamp/content signature.
//!
//! Anything weaker is graded [`Confidence::Uncertain`] and resolved as a
//! no-op: the diff engine neither inserts nor updates for uncertain
//! pairings. That bias is deliberate — a wrongly inserted duplicate
//! accumulates forever, a skipped edit is recovered on the next fetch that
//! carries a stable signal. An identity claimed once in a resolution pass
//! is never claimed again, so a collision can not overwrite an unrelated
//! post's history.

use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};

use crate::models::{Post, PostContent};

/// How strongly a fresh post was paired with its resolved identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// Matched (or minted) via the source-assigned post id.
    SourceId,
    /// Matched (or minted) via a unique floor number.
    Floor,
    /// Matched via position plus an identical content signature, or
    /// appended past the end of the stored sequence.
    Positional,
    /// Ambiguous pairing; treated as unchanged, never written.
    Uncertain,
}

/// A fresh post annotated with its resolved stable identity.
#[derive(Debug, Clone)]
pub struct ResolvedPost {
    pub content: PostContent,
    pub identity: String,
    pub is_new: bool,
    pub confidence: Confidence,
}

/// Signature over the fields that make a post "the same post": author,
/// timestamp, and text content. Reactions and media lists are mutable
/// metadata and excluded on purpose.
pub fn content_signature(post: &PostContent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(post.author_name.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(post.author_id.unwrap_or(0).to_le_bytes());
    hasher.update(b"|");
    hasher.update(post.posted_at.unwrap_or(0).to_le_bytes());
    hasher.update(b"|");
    hasher.update(post.content_text.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

fn floors_unique(floors: impl Iterator<Item = Option<i64>>) -> bool {
    let mut seen = HashSet::new();
    for floor in floors.flatten() {
        if !seen.insert(floor) {
            return false;
        }
    }
    true
}

/// Assign each fresh post a stable identity against the thread's stored
/// posts.
///
/// `stored` must be in thread order (ascending floor); position-based
/// matching relies on it.
pub fn resolve_identities(fresh: &[PostContent], stored: &[Post]) -> Vec<ResolvedPost> {
    let by_source_id: HashMap<i64, &Post> = stored
        .iter()
        .filter_map(|p| p.content.source_post_id.map(|id| (id, p)))
        .collect();

    // Floor is only trustworthy when no floor repeats on either side.
    let floor_usable = floors_unique(stored.iter().map(|p| p.content.floor))
        && floors_unique(fresh.iter().map(|p| p.floor));
    let by_floor: HashMap<i64, &Post> = if floor_usable {
        stored
            .iter()
            .filter_map(|p| p.content.floor.map(|f| (f, p)))
            .collect()
    } else {
        HashMap::new()
    };

    let mut claimed: HashSet<String> = HashSet::new();
    let mut resolved = Vec::with_capacity(fresh.len());

    for (index, post) in fresh.iter().enumerate() {
        let candidate = resolve_one(post, index, stored, &by_source_id, &by_floor, floor_usable);

        let candidate = if claimed.contains(&candidate.identity) {
            // Second claim on the same identity within one snapshot: the
            // pairing is ambiguous, keep the first and no-op this one.
            ResolvedPost {
                content: post.clone(),
                identity: candidate.identity,
                is_new: false,
                confidence: Confidence::Uncertain,
            }
        } else {
            candidate
        };

        claimed.insert(candidate.identity.clone());
        resolved.push(candidate);
    }

    resolved
}

fn resolve_one(
    post: &PostContent,
    index: usize,
    stored: &[Post],
    by_source_id: &HashMap<i64, &Post>,
    by_floor: &HashMap<i64, &Post>,
    floor_usable: bool,
) -> ResolvedPost {
    if let Some(source_id) = post.source_post_id {
        // Tier 1: the source id survives floor shifts and edits.
        return match by_source_id.get(&source_id) {
            Some(existing) => ResolvedPost {
                content: post.clone(),
                identity: existing.identity.clone(),
                is_new: false,
                confidence: Confidence::SourceId,
            },
            None => ResolvedPost {
                content: post.clone(),
                identity: format!("id:{source_id}"),
                is_new: true,
                confidence: Confidence::SourceId,
            },
        };
    }

    if floor_usable {
        if let Some(floor) = post.floor {
            return match by_floor.get(&floor) {
                Some(existing) => ResolvedPost {
                    content: post.clone(),
                    identity: existing.identity.clone(),
                    is_new: false,
                    confidence: Confidence::Floor,
                },
                None => ResolvedPost {
                    content: post.clone(),
                    identity: format!("floor:{floor}"),
                    is_new: true,
                    confidence: Confidence::Floor,
                },
            };
        }
    }

    // Tier 3: position. Past the end of the stored sequence the post is
    // genuinely new; inside it, only an identical signature is a match.
    match stored.get(index) {
        None => ResolvedPost {
            content: post.clone(),
            identity: format!("sig:{}", content_signature(post)),
            is_new: true,
            confidence: Confidence::Positional,
        },
        Some(existing) => {
            if content_signature(&existing.content) == content_signature(post) {
                ResolvedPost {
                    content: post.clone(),
                    identity: existing.identity.clone(),
                    is_new: false,
                    confidence: Confidence::Positional,
                }
            } else {
                ResolvedPost {
                    content: post.clone(),
                    identity: existing.identity.clone(),
                    is_new: false,
                    confidence: Confidence::Uncertain,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(source_post_id: Option<i64>, floor: Option<i64>, text: &str) -> PostContent {
        PostContent {
            source_post_id,
            floor,
            author_name: Some("alice".to_string()),
            posted_at: Some(1_700_000_000),
            content_text: text.to_string(),
            ..Default::default()
        }
    }

    fn stored(identity: &str, post: PostContent) -> Post {
        Post {
            uuid: format!("uuid-{identity}"),
            thread_uuid: "thread-1".to_string(),
            identity: identity.to_string(),
            content: post,
        }
    }

    #[test]
    fn source_id_match_survives_floor_shift() {
        let existing = vec![stored("id:900", content(Some(900), Some(2), "hello"))];
        // Same post, floor shifted down after an earlier post vanished.
        let fresh = vec![content(Some(900), Some(1), "hello")];

        let resolved = resolve_identities(&fresh, &existing);
        assert_eq!(resolved[0].identity, "id:900");
        assert!(!resolved[0].is_new);
        assert_eq!(resolved[0].confidence, Confidence::SourceId);
    }

    #[test]
    fn unseen_source_id_is_new() {
        let existing = vec![stored("id:900", content(Some(900), Some(1), "hello"))];
        let fresh = vec![
            content(Some(900), Some(1), "hello"),
            content(Some(901), Some(2), "a reply"),
        ];

        let resolved = resolve_identities(&fresh, &existing);
        assert!(!resolved[0].is_new);
        assert!(resolved[1].is_new);
        assert_eq!(resolved[1].identity, "id:901");
    }

    #[test]
    fn floor_fallback_when_no_source_ids() {
        let existing = vec![
            stored("floor:1", content(None, Some(1), "first")),
            stored("floor:2", content(None, Some(2), "second")),
        ];
        let fresh = vec![
            content(None, Some(1), "first"),
            content(None, Some(2), "second (edited)"),
            content(None, Some(3), "third"),
        ];

        let resolved = resolve_identities(&fresh, &existing);
        assert_eq!(resolved[0].identity, "floor:1");
        assert_eq!(resolved[1].identity, "floor:2");
        assert!(!resolved[1].is_new);
        assert_eq!(resolved[1].confidence, Confidence::Floor);
        assert!(resolved[2].is_new);
        assert_eq!(resolved[2].identity, "floor:3");
    }

    #[test]
    fn duplicate_floors_degrade_to_positional() {
        let existing = vec![
            stored("floor:1", content(None, Some(1), "first")),
            stored("floor:2", content(None, Some(2), "second")),
        ];
        // The source repeated a floor number; floor matching is off.
        let fresh = vec![
            content(None, Some(1), "first"),
            content(None, Some(1), "second"),
        ];

        let resolved = resolve_identities(&fresh, &existing);
        assert_eq!(resolved[0].confidence, Confidence::Positional);
        assert_eq!(resolved[0].identity, "floor:1");
        assert!(!resolved[0].is_new);
    }

    #[test]
    fn ambiguous_positional_pairing_is_uncertain() {
        let existing = vec![stored("sig:aa", content(None, None, "original text"))];
        let fresh = vec![content(None, None, "entirely different text")];

        let resolved = resolve_identities(&fresh, &existing);
        assert_eq!(resolved[0].confidence, Confidence::Uncertain);
        assert!(!resolved[0].is_new);
    }

    #[test]
    fn appended_posts_without_keys_are_new() {
        let existing = vec![stored("sig:aa", content(None, None, "first"))];
        let fresh = vec![content(None, None, "first"), content(None, None, "second")];

        let resolved = resolve_identities(&fresh, &existing);
        assert!(!resolved[0].is_new);
        assert_eq!(resolved[0].confidence, Confidence::Positional);
        assert!(resolved[1].is_new);
        assert!(resolved[1].identity.starts_with("sig:"));
    }

    #[test]
    fn duplicate_source_id_in_one_snapshot_claims_once() {
        let existing = vec![stored("id:900", content(Some(900), Some(1), "hello"))];
        let fresh = vec![
            content(Some(900), Some(1), "hello"),
            content(Some(900), Some(2), "hello again"),
        ];

        let resolved = resolve_identities(&fresh, &existing);
        assert_eq!(resolved[0].confidence, Confidence::SourceId);
        // The second claim on id:900 must not overwrite the first pairing.
        assert_eq!(resolved[1].confidence, Confidence::Uncertain);
        assert!(!resolved[1].is_new);
    }
}
