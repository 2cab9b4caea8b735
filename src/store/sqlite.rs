//! SQLite [`Store`] backend.
//!
//! Threads and posts live in two tables; URL-list fields are stored as JSON
//! text columns. Post upserts run in one transaction per call and key on
//! `(thread_uuid, identity)`, never touching the row UUID of an existing
//! post.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{Result, WatchError};
use crate::models::{Post, PostContent, Thread, ThreadAggregates, ThreadMeta};

use super::Store;

/// Create the schema. Idempotent; run on `tw init` and at server startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS threads (
            uuid TEXT PRIMARY KEY,
            url TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            categories_json TEXT NOT NULL DEFAULT '[]',
            tags_json TEXT NOT NULL DEFAULT '[]',
            avatar_url TEXT,
            description TEXT,
            post_count INTEGER NOT NULL DEFAULT 0,
            author_count INTEGER NOT NULL DEFAULT 0,
            first_post_at INTEGER,
            latest_post_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS posts (
            uuid TEXT PRIMARY KEY,
            thread_uuid TEXT NOT NULL,
            identity TEXT NOT NULL,
            source_post_id INTEGER,
            floor INTEGER,
            author_name TEXT,
            author_id INTEGER,
            author_profile_url TEXT,
            posted_at INTEGER,
            content_text TEXT NOT NULL DEFAULT '',
            content_html TEXT,
            image_urls_json TEXT NOT NULL DEFAULT '[]',
            link_urls_json TEXT NOT NULL DEFAULT '[]',
            embed_urls_json TEXT NOT NULL DEFAULT '[]',
            reactions INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(thread_uuid, identity),
            FOREIGN KEY (thread_uuid) REFERENCES threads(uuid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_thread_uuid ON posts(thread_uuid)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_thread_floor ON posts(thread_uuid, floor)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_threads_latest_post_at ON threads(latest_post_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// SQLite-backed store sharing one connection pool across all syncs.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn to_json(list: &[String]) -> String {
    serde_json::to_string(list).unwrap_or_else(|_| "[]".to_string())
}

fn from_json(text: &str) -> Vec<String> {
    serde_json::from_str(text).unwrap_or_default()
}

fn row_to_thread(row: &sqlx::sqlite::SqliteRow) -> std::result::Result<Thread, sqlx::Error> {
    Ok(Thread {
        uuid: row.try_get("uuid")?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        categories: from_json(&row.try_get::<String, _>("categories_json")?),
        tags: from_json(&row.try_get::<String, _>("tags_json")?),
        avatar_url: row.try_get("avatar_url")?,
        description: row.try_get("description")?,
        aggregates: ThreadAggregates {
            post_count: row.try_get("post_count")?,
            author_count: row.try_get("author_count")?,
            first_post_at: row.try_get("first_post_at")?,
            latest_post_at: row.try_get("latest_post_at")?,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_post(row: &sqlx::sqlite::SqliteRow) -> std::result::Result<Post, sqlx::Error> {
    Ok(Post {
        uuid: row.try_get("uuid")?,
        thread_uuid: row.try_get("thread_uuid")?,
        identity: row.try_get("identity")?,
        content: PostContent {
            source_post_id: row.try_get("source_post_id")?,
            floor: row.try_get("floor")?,
            author_name: row.try_get("author_name")?,
            author_id: row.try_get("author_id")?,
            author_profile_url: row.try_get("author_profile_url")?,
            posted_at: row.try_get("posted_at")?,
            content_text: row.try_get("content_text")?,
            content_html: row.try_get("content_html")?,
            image_urls: from_json(&row.try_get::<String, _>("image_urls_json")?),
            link_urls: from_json(&row.try_get::<String, _>("link_urls_json")?),
            embed_urls: from_json(&row.try_get::<String, _>("embed_urls_json")?),
            reactions: row.try_get("reactions")?,
        },
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_thread_by_url(&self, url: &str) -> Result<Option<Thread>> {
        let row = sqlx::query("SELECT * FROM threads WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_thread).transpose().map_err(Into::into)
    }

    async fn get_thread(&self, uuid: &str) -> Result<Option<Thread>> {
        let row = sqlx::query("SELECT * FROM threads WHERE uuid = ?")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_thread).transpose().map_err(Into::into)
    }

    async fn create_thread(&self, meta: &ThreadMeta) -> Result<Thread> {
        let ts = now();
        let thread = Thread {
            uuid: Uuid::new_v4().to_string(),
            url: meta.url.clone(),
            title: meta.title.clone(),
            categories: meta.categories.clone(),
            tags: meta.tags.clone(),
            avatar_url: meta.avatar_url.clone(),
            description: meta.description.clone(),
            aggregates: ThreadAggregates::default(),
            created_at: ts,
            updated_at: ts,
        };

        sqlx::query(
            r#"
            INSERT INTO threads (uuid, url, title, categories_json, tags_json, avatar_url, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&thread.uuid)
        .bind(&thread.url)
        .bind(&thread.title)
        .bind(to_json(&thread.categories))
        .bind(to_json(&thread.tags))
        .bind(&thread.avatar_url)
        .bind(&thread.description)
        .bind(thread.created_at)
        .bind(thread.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(thread)
    }

    async fn list_threads(&self, limit: i64, offset: i64) -> Result<(Vec<Thread>, i64)> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM threads
            ORDER BY latest_post_at IS NULL, latest_post_at DESC, created_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let threads = rows
            .iter()
            .map(row_to_thread)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM threads")
            .fetch_one(&self.pool)
            .await?;

        Ok((threads, total))
    }

    async fn list_posts(&self, thread_uuid: &str) -> Result<Vec<Post>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM posts
            WHERE thread_uuid = ?
            ORDER BY floor IS NULL, floor ASC, rowid ASC
            "#,
        )
        .bind(thread_uuid)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(row_to_post)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    async fn list_posts_page(
        &self,
        thread_uuid: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Post>, i64)> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM posts
            WHERE thread_uuid = ?
            ORDER BY floor IS NULL, floor ASC, rowid ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(thread_uuid)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let posts = rows
            .iter()
            .map(row_to_post)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts WHERE thread_uuid = ?")
            .bind(thread_uuid)
            .fetch_one(&self.pool)
            .await?;

        Ok((posts, total))
    }

    async fn upsert_posts(&self, thread_uuid: &str, posts: &[Post]) -> Result<()> {
        let ts = now();
        let mut tx = self.pool.begin().await?;

        for post in posts {
            sqlx::query(
                r#"
                INSERT INTO posts (
                    uuid, thread_uuid, identity, source_post_id, floor,
                    author_name, author_id, author_profile_url, posted_at,
                    content_text, content_html, image_urls_json, link_urls_json,
                    embed_urls_json, reactions, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(thread_uuid, identity) DO UPDATE SET
                    source_post_id = excluded.source_post_id,
                    floor = excluded.floor,
                    author_name = excluded.author_name,
                    author_id = excluded.author_id,
                    author_profile_url = excluded.author_profile_url,
                    posted_at = excluded.posted_at,
                    content_text = excluded.content_text,
                    content_html = excluded.content_html,
                    image_urls_json = excluded.image_urls_json,
                    link_urls_json = excluded.link_urls_json,
                    embed_urls_json = excluded.embed_urls_json,
                    reactions = excluded.reactions,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&post.uuid)
            .bind(thread_uuid)
            .bind(&post.identity)
            .bind(post.content.source_post_id)
            .bind(post.content.floor)
            .bind(&post.content.author_name)
            .bind(post.content.author_id)
            .bind(&post.content.author_profile_url)
            .bind(post.content.posted_at)
            .bind(&post.content.content_text)
            .bind(&post.content.content_html)
            .bind(to_json(&post.content.image_urls))
            .bind(to_json(&post.content.link_urls))
            .bind(to_json(&post.content.embed_urls))
            .bind(post.content.reactions)
            .bind(ts)
            .bind(ts)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_thread_aggregates(
        &self,
        uuid: &str,
        aggregates: &ThreadAggregates,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE threads SET
                post_count = ?, author_count = ?, first_post_at = ?,
                latest_post_at = ?, updated_at = ?
            WHERE uuid = ?
            "#,
        )
        .bind(aggregates.post_count)
        .bind(aggregates.author_count)
        .bind(aggregates.first_post_at)
        .bind(aggregates.latest_post_at)
        .bind(now())
        .bind(uuid)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(WatchError::NotFound("thread".to_string(), uuid.to_string()));
        }
        Ok(())
    }
}
