//! SQLite store round-trips: schema migration, thread creation, post
//! upserts keyed on identity, ordering, and aggregate updates.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::TempDir;

use threadwatch::models::{Post, PostContent, ThreadAggregates, ThreadMeta};
use threadwatch::store::{sqlite, SqliteStore, Store};

async fn open_store(dir: &TempDir) -> SqliteStore {
    let path = dir.path().join("tw.sqlite");
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .unwrap()
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
        .unwrap();
    sqlite::run_migrations(&pool).await.unwrap();
    // Second migration run must be a no-op.
    sqlite::run_migrations(&pool).await.unwrap();
    SqliteStore::new(pool)
}

fn meta(url: &str, title: &str) -> ThreadMeta {
    ThreadMeta {
        url: url.to_string(),
        title: title.to_string(),
        categories: vec!["General".to_string()],
        tags: vec!["rust".to_string()],
        avatar_url: None,
        description: Some("a thread".to_string()),
    }
}

fn post(identity: &str, thread_uuid: &str, floor: i64, text: &str, reactions: i64) -> Post {
    Post {
        uuid: format!("uuid-{identity}"),
        thread_uuid: thread_uuid.to_string(),
        identity: identity.to_string(),
        content: PostContent {
            source_post_id: Some(floor + 1000),
            floor: Some(floor),
            author_name: Some("alice".to_string()),
            posted_at: Some(1_700_000_000 + floor),
            content_text: text.to_string(),
            image_urls: vec![format!("https://img.example.com/{floor}.jpg")],
            reactions,
            ..Default::default()
        },
    }
}

#[tokio::test]
async fn thread_create_and_lookup_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let url = "https://forum.example.com/threads/topic.1";
    let created = store.create_thread(&meta(url, "Topic")).await.unwrap();

    let by_url = store.get_thread_by_url(url).await.unwrap().unwrap();
    assert_eq!(by_url.uuid, created.uuid);
    assert_eq!(by_url.title, "Topic");
    assert_eq!(by_url.categories, vec!["General".to_string()]);
    assert_eq!(by_url.tags, vec!["rust".to_string()]);

    let by_uuid = store.get_thread(&created.uuid).await.unwrap().unwrap();
    assert_eq!(by_uuid.url, url);

    assert!(store.get_thread_by_url("https://forum.example.com/threads/none.9").await.unwrap().is_none());
}

#[tokio::test]
async fn upsert_keeps_row_uuid_for_known_identity() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let thread = store
        .create_thread(&meta("https://forum.example.com/threads/topic.1", "Topic"))
        .await
        .unwrap();

    store
        .upsert_posts(&thread.uuid, &[post("id:1001", &thread.uuid, 1, "original", 0)])
        .await
        .unwrap();

    let first = store.list_posts(&thread.uuid).await.unwrap();
    let original_uuid = first[0].uuid.clone();

    // Same identity, different row uuid and content: the update wins but
    // the stored row uuid survives.
    let mut edited = post("id:1001", &thread.uuid, 1, "edited", 5);
    edited.uuid = "some-new-uuid".to_string();
    store.upsert_posts(&thread.uuid, &[edited]).await.unwrap();

    let after = store.list_posts(&thread.uuid).await.unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].uuid, original_uuid);
    assert_eq!(after[0].content.content_text, "edited");
    assert_eq!(after[0].content.reactions, 5);
    assert_eq!(
        after[0].content.image_urls,
        vec!["https://img.example.com/1.jpg".to_string()]
    );
}

#[tokio::test]
async fn posts_come_back_in_floor_order() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let thread = store
        .create_thread(&meta("https://forum.example.com/threads/topic.1", "Topic"))
        .await
        .unwrap();

    // Inserted out of order on purpose.
    store
        .upsert_posts(
            &thread.uuid,
            &[
                post("id:1003", &thread.uuid, 3, "third", 0),
                post("id:1001", &thread.uuid, 1, "first", 0),
                post("id:1002", &thread.uuid, 2, "second", 0),
            ],
        )
        .await
        .unwrap();

    let posts = store.list_posts(&thread.uuid).await.unwrap();
    let floors: Vec<i64> = posts.iter().filter_map(|p| p.content.floor).collect();
    assert_eq!(floors, vec![1, 2, 3]);

    let (page, total) = store.list_posts_page(&thread.uuid, 2, 1).await.unwrap();
    assert_eq!(total, 3);
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].content.floor, Some(2));
}

#[tokio::test]
async fn aggregates_update_orders_thread_listing() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let older = store
        .create_thread(&meta("https://forum.example.com/threads/older.1", "Older"))
        .await
        .unwrap();
    let newer = store
        .create_thread(&meta("https://forum.example.com/threads/newer.2", "Newer"))
        .await
        .unwrap();

    store
        .update_thread_aggregates(
            &older.uuid,
            &ThreadAggregates {
                post_count: 3,
                author_count: 2,
                first_post_at: Some(1_700_000_000),
                latest_post_at: Some(1_700_100_000),
            },
        )
        .await
        .unwrap();
    store
        .update_thread_aggregates(
            &newer.uuid,
            &ThreadAggregates {
                post_count: 1,
                author_count: 1,
                first_post_at: Some(1_700_200_000),
                latest_post_at: Some(1_700_200_000),
            },
        )
        .await
        .unwrap();

    let (threads, total) = store.list_threads(10, 0).await.unwrap();
    assert_eq!(total, 2);
    assert_eq!(threads[0].uuid, newer.uuid, "most recent activity first");
    assert_eq!(threads[0].aggregates.post_count, 1);
    assert_eq!(threads[1].aggregates.post_count, 3);

    let missing = store
        .update_thread_aggregates("no-such-thread", &ThreadAggregates::default())
        .await;
    assert!(missing.is_err());
}
