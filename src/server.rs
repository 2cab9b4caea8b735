//! HTTP API server.
//!
//! Exposes sync, crawl, watcher management, and thread browsing as a JSON
//! API. All success responses share one envelope:
//!
//! ```json
//! { "success": true, "message": "sync complete", "data": { ... } }
//! ```
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/crawl` | First-time ingestion of a thread |
//! | `POST` | `/api/sync` | One incremental sync cycle |
//! | `POST` | `/api/watch` | Create a watcher |
//! | `GET` | `/api/watchers` | List watchers |
//! | `GET` | `/api/watchers/{id}` | Inspect a watcher |
//! | `DELETE` | `/api/watchers/{id}` | Stop a watcher |
//! | `POST` | `/api/watchers/{id}/force-sync` | Run a watcher's sync now |
//! | `GET` | `/api/threads` | Page stored threads by latest activity |
//! | `GET` | `/api/threads/{uuid}` | Thread detail with paged posts |
//! | `GET` | `/health` | Health check |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "sync_in_progress", "message": "..." } }
//! ```
//!
//! Codes come from [`WatchError::code`]: `malformed_snapshot` (422),
//! `fetch_failed` (502), `persistence_failed` (500), `sync_in_progress`
//! (409), `duplicate_watcher` (409), `not_found` (404), `invalid_schedule`
//! (400).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::error::WatchError;
use crate::fetch::HttpFetcher;
use crate::models::{Post, SyncResult, Thread};
use crate::store::{sqlite, SqliteStore, Store};
use crate::sync::{SyncEngine, SyncOptions};
use crate::watch::{Schedule, WatcherRegistry, WatcherView};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
    pub registry: Arc<WatcherRegistry>,
    pub store: Arc<dyn Store>,
}

/// Starts the API server and runs until the process is terminated.
///
/// Watchers live in this process; stopping the server discards them (their
/// stored thread data survives, watches are re-created on demand).
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    sqlite::run_migrations(&pool).await?;

    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
    let fetcher = Arc::new(HttpFetcher::new(&config.fetcher)?);
    let engine = Arc::new(SyncEngine::new(store.clone(), fetcher, config));
    let registry = Arc::new(WatcherRegistry::new(
        engine.clone(),
        config.watch.default_interval_minutes,
    ));

    let state = AppState {
        engine,
        registry,
        store,
    };

    let bind_addr = config.server.bind.clone();
    info!(bind = %bind_addr, "API server listening");
    println!("threadwatch API listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

/// Build the router; separated from [`run_server`] so tests can drive the
/// API against in-memory state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/crawl", post(handle_crawl))
        .route("/api/sync", post(handle_sync))
        .route("/api/watch", post(handle_watch))
        .route("/api/watchers", get(handle_list_watchers))
        .route("/api/watchers/{id}", get(handle_get_watcher))
        .route("/api/watchers/{id}", delete(handle_stop_watcher))
        .route("/api/watchers/{id}/force-sync", post(handle_force_sync))
        .route("/api/threads", get(handle_list_threads))
        .route("/api/threads/{uuid}", get(handle_get_thread))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Response envelope ============

/// Success envelope shared by all endpoints.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    message: String,
    data: T,
}

fn ok<T: Serialize>(message: impl Into<String>, data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        message: message.into(),
        data,
    })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<WatchError> for AppError {
    fn from(err: WatchError) -> Self {
        let status = match &err {
            WatchError::MalformedSnapshot(_) => StatusCode::UNPROCESSABLE_ENTITY,
            WatchError::FetchFailed(_) => StatusCode::BAD_GATEWAY,
            WatchError::PersistenceFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WatchError::SyncInProgress(_) => StatusCode::CONFLICT,
            WatchError::DuplicateWatcher(_) => StatusCode::CONFLICT,
            WatchError::NotFound(_, _) => StatusCode::NOT_FOUND,
            WatchError::InvalidSchedule(_) => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ============ Requests ============

/// Body for `POST /api/crawl` and `POST /api/sync`.
#[derive(Deserialize)]
struct SyncRequest {
    thread_url: String,
    /// Override the configured reaction-detail default.
    #[serde(default)]
    include_reactions: Option<bool>,
    /// Compute the changeset without writing.
    #[serde(default)]
    dry_run: bool,
    /// Ask the fetch agent for new posts only when possible.
    #[serde(default)]
    incremental: bool,
}

impl SyncRequest {
    fn options(&self) -> SyncOptions {
        SyncOptions {
            include_reactions: self.include_reactions,
            dry_run: self.dry_run,
            incremental: self.incremental,
        }
    }
}

/// Body for `POST /api/watch`. Omitting `schedule` uses the configured
/// default interval.
#[derive(Deserialize)]
struct WatchRequest {
    thread_url: String,
    #[serde(default)]
    schedule: Option<Schedule>,
    #[serde(default)]
    include_reactions: Option<bool>,
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    50
}

// ============ Handlers ============

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_crawl(
    State(state): State<AppState>,
    Json(request): Json<SyncRequest>,
) -> Result<Json<ApiResponse<SyncResult>>, AppError> {
    let result = state
        .engine
        .crawl(&request.thread_url, &request.options())
        .await?;
    Ok(ok("crawl complete", result))
}

async fn handle_sync(
    State(state): State<AppState>,
    Json(request): Json<SyncRequest>,
) -> Result<Json<ApiResponse<SyncResult>>, AppError> {
    let result = state
        .engine
        .sync(&request.thread_url, &request.options())
        .await?;
    Ok(ok("sync complete", result))
}

async fn handle_watch(
    State(state): State<AppState>,
    Json(request): Json<WatchRequest>,
) -> Result<Json<ApiResponse<WatcherView>>, AppError> {
    let options = SyncOptions {
        include_reactions: request.include_reactions,
        ..Default::default()
    };
    let view = state
        .registry
        .create(&request.thread_url, request.schedule, options)?;
    Ok(ok("watch started", view))
}

#[derive(Serialize)]
struct WatcherListData {
    watchers: Vec<WatcherView>,
}

async fn handle_list_watchers(
    State(state): State<AppState>,
) -> Json<ApiResponse<WatcherListData>> {
    let watchers = state.registry.list();
    let message = format!("{} watcher(s)", watchers.len());
    ok(message, WatcherListData { watchers })
}

async fn handle_get_watcher(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<WatcherView>>, AppError> {
    let view = state.registry.get(&id)?;
    Ok(ok("watcher status", view))
}

async fn handle_stop_watcher(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<WatcherView>>, AppError> {
    let view = state.registry.stop(&id)?;
    Ok(ok("watcher stopped", view))
}

async fn handle_force_sync(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<SyncResult>>, AppError> {
    let result = state.registry.force_run(&id).await?;
    Ok(ok("sync triggered", result))
}

#[derive(Serialize)]
struct ThreadListData {
    threads: Vec<Thread>,
    total_count: i64,
}

async fn handle_list_threads(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Result<Json<ApiResponse<ThreadListData>>, AppError> {
    let (threads, total_count) = state.store.list_threads(page.limit, page.offset).await?;
    Ok(ok(
        format!("{} thread(s)", total_count),
        ThreadListData {
            threads,
            total_count,
        },
    ))
}

#[derive(Serialize)]
struct ThreadDetailData {
    thread: Thread,
    posts: Vec<Post>,
    total_posts: i64,
}

async fn handle_get_thread(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<ApiResponse<ThreadDetailData>>, AppError> {
    let thread = state
        .store
        .get_thread(&uuid)
        .await?
        .ok_or_else(|| WatchError::NotFound("thread".to_string(), uuid.clone()))?;

    let (posts, total_posts) = state
        .store
        .list_posts_page(&uuid, page.limit, page.offset)
        .await?;

    // The anonymous sentinel is applied here, at the presentation edge;
    // stored rows keep the author absent.
    let posts = posts
        .into_iter()
        .map(|mut post| {
            post.content.author_name.get_or_insert_with(|| "anonymous".to_string());
            post
        })
        .collect();

    Ok(ok(
        "thread detail",
        ThreadDetailData {
            thread,
            posts,
            total_posts,
        },
    ))
}
