//! Changeset computation between a fresh snapshot and stored state.
//!
//! Pure and synchronous. Each resolved fresh post is looked up by identity
//! against the stored posts: no counterpart means insert, a differing
//! content fingerprint means update, an identical fingerprint means
//! unchanged. Stored posts absent from the fetch are counted as
//! `missing_in_fetch` and left untouched — the diff engine never deletes,
//! so a partial or truncated fetch can not destroy data.
//!
//! Thread aggregates are recomputed from the union of stored and fresh
//! posts on every diff rather than accumulated incrementally, so they can
//! not drift.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::identity::{Confidence, ResolvedPost};
use crate::models::{Post, PostContent, ThreadAggregates};

/// Which part of a post changed between stored and fresh state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangedField {
    Content,
    Reactions,
    Images,
    Links,
    Embeds,
    Author,
    Timestamp,
}

/// A post to be inserted: resolved identity plus canonical content.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub identity: String,
    pub content: PostContent,
}

/// An update to an existing post, with before/after content and the set of
/// fields that differ.
#[derive(Debug, Clone)]
pub struct PostUpdate {
    pub identity: String,
    pub before: PostContent,
    pub after: PostContent,
    pub changed: Vec<ChangedField>,
}

impl PostUpdate {
    /// True when the reaction count is the only thing that moved. Reaction
    /// deltas count as updates even though the content is untouched.
    pub fn reaction_delta_only(&self) -> bool {
        self.changed == [ChangedField::Reactions]
    }
}

/// The computed difference between a fresh snapshot and stored state.
/// Ephemeral: consumed by the orchestrator, retained transiently only as a
/// watcher's last result.
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    pub inserts: Vec<NewPost>,
    pub updates: Vec<PostUpdate>,
    pub unchanged: u64,
    /// Count of stored posts absent from this fetch. Informational only.
    pub missing_in_fetch: u64,
    pub aggregates: ThreadAggregates,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty()
    }
}

/// Content fingerprint: text, rendered content, reaction count, and the
/// media/link/embed lists. Two posts with equal fingerprints need no write.
pub fn fingerprint(post: &PostContent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(post.content_text.as_bytes());
    hasher.update(b"|");
    hasher.update(post.content_html.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(post.reactions.to_le_bytes());
    for list in [&post.image_urls, &post.link_urls, &post.embed_urls] {
        hasher.update(b"|");
        for url in list {
            hasher.update(url.as_bytes());
            hasher.update(b"\n");
        }
    }
    hex::encode(hasher.finalize())
}

fn changed_fields(before: &PostContent, after: &PostContent) -> Vec<ChangedField> {
    let mut changed = Vec::new();
    if before.content_text != after.content_text || before.content_html != after.content_html {
        changed.push(ChangedField::Content);
    }
    if before.reactions != after.reactions {
        changed.push(ChangedField::Reactions);
    }
    if before.image_urls != after.image_urls {
        changed.push(ChangedField::Images);
    }
    if before.link_urls != after.link_urls {
        changed.push(ChangedField::Links);
    }
    if before.embed_urls != after.embed_urls {
        changed.push(ChangedField::Embeds);
    }
    if before.author_name != after.author_name || before.author_id != after.author_id {
        changed.push(ChangedField::Author);
    }
    if before.posted_at != after.posted_at {
        changed.push(ChangedField::Timestamp);
    }
    changed
}

/// Compare resolved fresh posts against stored posts and produce a
/// [`Changeset`].
pub fn diff_snapshot(resolved: &[ResolvedPost], stored: &[Post]) -> Changeset {
    let stored_by_identity: HashMap<&str, &Post> =
        stored.iter().map(|p| (p.identity.as_str(), p)).collect();

    let mut changeset = Changeset::default();

    // Union of stored and fresh content, fresh winning for matched
    // identities; aggregates come from this, not from the counters.
    let mut union: HashMap<String, PostContent> = stored
        .iter()
        .map(|p| (p.identity.clone(), p.content.clone()))
        .collect();

    for post in resolved {
        if post.confidence == Confidence::Uncertain {
            // Ambiguous pairing: no write either way.
            changeset.unchanged += 1;
            continue;
        }

        match stored_by_identity.get(post.identity.as_str()) {
            None => {
                union.insert(post.identity.clone(), post.content.clone());
                changeset.inserts.push(NewPost {
                    identity: post.identity.clone(),
                    content: post.content.clone(),
                });
            }
            Some(existing) => {
                union.insert(post.identity.clone(), post.content.clone());
                if fingerprint(&existing.content) == fingerprint(&post.content) {
                    changeset.unchanged += 1;
                } else {
                    changeset.updates.push(PostUpdate {
                        identity: post.identity.clone(),
                        before: existing.content.clone(),
                        after: post.content.clone(),
                        changed: changed_fields(&existing.content, &post.content),
                    });
                }
            }
        }
    }

    let fetched: std::collections::HashSet<&str> =
        resolved.iter().map(|p| p.identity.as_str()).collect();
    changeset.missing_in_fetch = stored
        .iter()
        .filter(|p| !fetched.contains(p.identity.as_str()))
        .count() as u64;

    changeset.aggregates = compute_aggregates(union.values());
    changeset
}

/// Recompute thread aggregates over a set of posts.
pub fn compute_aggregates<'a>(posts: impl Iterator<Item = &'a PostContent>) -> ThreadAggregates {
    let mut aggregates = ThreadAggregates::default();
    let mut authors = std::collections::HashSet::new();

    for post in posts {
        aggregates.post_count += 1;
        // Author identity: id when present, else name. Fully anonymous
        // posts do not contribute to the author count.
        match (post.author_id, post.author_name.as_deref()) {
            (Some(id), _) => {
                authors.insert(format!("id:{id}"));
            }
            (None, Some(name)) => {
                authors.insert(format!("name:{name}"));
            }
            (None, None) => {}
        }
        if let Some(ts) = post.posted_at {
            aggregates.first_post_at = Some(aggregates.first_post_at.map_or(ts, |f| f.min(ts)));
            aggregates.latest_post_at = Some(aggregates.latest_post_at.map_or(ts, |l| l.max(ts)));
        }
    }

    aggregates.author_count = authors.len() as i64;
    aggregates
}
