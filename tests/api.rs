//! HTTP API behavior: crawl/sync endpoints, thread browsing, watcher
//! lifecycle, and typed error mapping, driven over a real socket against
//! in-memory state.

mod common;

use std::sync::Arc;

use common::{engine_with, raw_post, snapshot, ScriptedFetcher};
use serde_json::{json, Value};
use threadwatch::models::RawPost;
use threadwatch::server::{router, AppState};
use threadwatch::store::Store;
use threadwatch::watch::WatcherRegistry;

const URL: &str = "https://forum.example.com/threads/topic.101";

async fn spawn_api() -> (String, Arc<ScriptedFetcher>) {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let (engine, store) = engine_with(fetcher.clone());
    let store: Arc<dyn Store> = store;
    let registry = Arc::new(WatcherRegistry::new(engine.clone(), 60));

    let state = AppState {
        engine,
        registry,
        store,
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });

    (format!("http://{addr}"), fetcher)
}

#[tokio::test]
async fn crawl_then_browse_threads_and_posts() {
    let (base, fetcher) = spawn_api().await;
    let anonymous_post = RawPost {
        floor: Some(3),
        post_id: Some(1003),
        content_text: Some("no author on this one".to_string()),
        ..Default::default()
    };
    fetcher.set_snapshot(
        URL,
        snapshot(
            URL,
            "Topic",
            vec![
                raw_post(1001, 1, "alice", "opening post", 2),
                raw_post(1002, 2, "bob", "reply", 0),
                anonymous_post,
            ],
        ),
    );

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/api/crawl"))
        .json(&json!({ "thread_url": URL }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["inserted"], 3);
    assert_eq!(body["data"]["created_thread"], true);
    let uuid = body["data"]["thread_uuid"].as_str().unwrap().to_string();

    let body: Value = client
        .get(format!("{base}/api/threads"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["total_count"], 1);
    assert_eq!(body["data"]["threads"][0]["title"], "Topic");

    let body: Value = client
        .get(format!("{base}/api/threads/{uuid}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["total_posts"], 3);
    let posts = body["data"]["posts"].as_array().unwrap();
    assert_eq!(posts[0]["content"]["author_name"], "alice");
    // The missing author appears as the presentation-time sentinel.
    assert_eq!(posts[2]["content"]["author_name"], "anonymous");
}

#[tokio::test]
async fn sync_errors_map_to_typed_codes_and_statuses() {
    let (base, _fetcher) = spawn_api().await;
    let client = reqwest::Client::new();

    // No scripted snapshot: the fetch fails upstream.
    let response = client
        .post(format!("{base}/api/sync"))
        .json(&json!({ "thread_url": URL }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "fetch_failed");

    let response = client
        .get(format!("{base}/api/watchers/no-such-id"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let response = client
        .post(format!("{base}/api/watch"))
        .json(&json!({
            "thread_url": URL,
            "schedule": { "kind": "calendar", "expression": "nope" }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "invalid_schedule");
}

#[tokio::test]
async fn watcher_lifecycle_over_the_api() {
    let (base, fetcher) = spawn_api().await;
    fetcher.set_snapshot(
        URL,
        snapshot(URL, "Topic", vec![raw_post(1001, 1, "alice", "post", 0)]),
    );
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{base}/api/watch"))
        .json(&json!({
            "thread_url": URL,
            "schedule": { "kind": "interval", "minutes": 30 }
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], true);
    let watcher_id = body["data"]["id"].as_str().unwrap().to_string();

    // Watching the same thread again is a conflict.
    let response = client
        .post(format!("{base}/api/watch"))
        .json(&json!({ "thread_url": URL }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "duplicate_watcher");

    let body: Value = client
        .get(format!("{base}/api/watchers"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["watchers"].as_array().unwrap().len(), 1);

    // Let the immediate first run finish so force-sync does not collide
    // with it on the per-thread guard.
    let mut first_run_done = false;
    for _ in 0..100 {
        let body: Value = client
            .get(format!("{base}/api/watchers/{watcher_id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if body["data"]["sync_count"].as_u64().unwrap_or(0) >= 1 {
            first_run_done = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(first_run_done, "immediate first run never recorded");

    let body: Value = client
        .post(format!("{base}/api/watchers/{watcher_id}/force-sync"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], true);

    let response = client
        .delete(format!("{base}/api/watchers/{watcher_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["status"], "stopped");
}
