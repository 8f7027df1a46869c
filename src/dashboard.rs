//! Read-mostly HTTP surface over the running crawl.
//!
//! Three endpoints: the metrics snapshot, recent findings flattened to
//! one entry per finding, and runtime URL injection into the frontier.
//! The HTML dashboard that used to sit in front of these is a separate
//! adapter and not part of the engine.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::frontier::PriorityFrontier;
use crate::metrics::MetricsCollector;
use crate::models::{CrawlMetrics, CrawlMode, UrlTask};
use crate::storage::{DbEntry, Storage};
use crate::url_utils;

#[derive(Clone)]
pub struct DashboardState {
    pub metrics: Arc<MetricsCollector>,
    pub storage: Arc<Storage>,
    pub frontier: Arc<PriorityFrontier>,
}

pub fn router(state: DashboardState) -> Router {
    Router::new()
        .route("/api/metrics", get(handle_metrics))
        .route("/api/ws", get(handle_ws))
        .route("/api/results", get(handle_results))
        .route("/api/add-urls", post(handle_add_urls))
        .route("/api/db-view", get(handle_db_view))
        .with_state(state)
}

/// Bind and serve until the cancellation token fires.
pub async fn serve(
    state: DashboardState,
    port: u16,
    cancel: CancellationToken,
) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("dashboard listening on http://localhost:{}", port);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

async fn handle_metrics(State(state): State<DashboardState>) -> Json<CrawlMetrics> {
    Json(state.metrics.snapshot())
}

/// Push a metrics snapshot to the client every couple of seconds until
/// the socket closes.
async fn handle_ws(State(state): State<DashboardState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| push_metrics(socket, state))
}

async fn push_metrics(mut socket: WebSocket, state: DashboardState) {
    let mut ticker = tokio::time::interval(Duration::from_secs(Config::METRICS_PUSH_SECS));

    loop {
        ticker.tick().await;

        let snapshot = state.metrics.snapshot();
        let Ok(payload) = serde_json::to_string(&snapshot) else {
            break;
        };
        if socket.send(Message::Text(payload)).await.is_err() {
            break;
        }
    }
}

#[derive(Deserialize)]
struct DbViewQuery {
    limit: Option<usize>,
}

async fn handle_db_view(
    State(state): State<DashboardState>,
    Query(query): Query<DbViewQuery>,
) -> Result<Json<Vec<DbEntry>>, (StatusCode, String)> {
    let limit = query.limit.unwrap_or(100).max(1);

    state
        .storage
        .dump_entries(limit)
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

#[derive(Deserialize)]
struct ResultsQuery {
    #[serde(rename = "type")]
    result_type: Option<String>,
    limit: Option<usize>,
}

/// One flattened finding for the results feed.
#[derive(Serialize)]
struct ResultEntry {
    #[serde(rename = "type")]
    entry_type: String,
    source_url: String,
    data: String,
    found_at: u64,
}

async fn handle_results(
    State(state): State<DashboardState>,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<Vec<ResultEntry>>, (StatusCode, String)> {
    let limit = query.limit.unwrap_or(100).max(1);
    let mode = match query.result_type.as_deref() {
        None | Some("all") => CrawlMode::All,
        Some("emails") => CrawlMode::Email,
        Some("keywords") => CrawlMode::Keywords,
        Some("dead_links") => CrawlMode::Domains,
        Some(other) => {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("unknown result type: {}", other),
            ))
        }
    };

    let results = state
        .storage
        .read_results(mode, limit)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let mut entries = Vec::new();
    for result in results {
        for email in &result.emails {
            entries.push(ResultEntry {
                entry_type: "email".to_string(),
                source_url: result.url.clone(),
                data: email.clone(),
                found_at: result.processed_at,
            });
        }
        for (keyword, count) in &result.keywords {
            entries.push(ResultEntry {
                entry_type: "keyword".to_string(),
                source_url: result.url.clone(),
                data: format!("{} (found {} times)", keyword, count),
                found_at: result.processed_at,
            });
        }
        for dead_link in &result.dead_links {
            entries.push(ResultEntry {
                entry_type: "dead_link".to_string(),
                source_url: result.url.clone(),
                data: dead_link.clone(),
                found_at: result.processed_at,
            });
        }
        for dead_domain in &result.dead_domains {
            entries.push(ResultEntry {
                entry_type: "dead_domain".to_string(),
                source_url: result.url.clone(),
                data: dead_domain.clone(),
                found_at: result.processed_at,
            });
        }

        if !result.has_findings() {
            let entry_type = if result.error.is_some() {
                "error"
            } else {
                "success"
            };
            entries.push(ResultEntry {
                entry_type: entry_type.to_string(),
                source_url: result.url.clone(),
                data: format!("Status: {}, Title: {}", result.status_code, result.title),
                found_at: result.processed_at,
            });
        }
    }

    Ok(Json(entries))
}

#[derive(Deserialize)]
struct AddUrlsRequest {
    urls: Vec<String>,
}

#[derive(Serialize)]
struct AddUrlsResponse {
    success: bool,
    added: usize,
    total_valid: usize,
    invalid_urls: Vec<String>,
    errors: Vec<String>,
    message: String,
}

async fn handle_add_urls(
    State(state): State<DashboardState>,
    Json(request): Json<AddUrlsRequest>,
) -> Result<Json<AddUrlsResponse>, (StatusCode, String)> {
    if request.urls.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No URLs provided".to_string()));
    }

    let mut valid_urls = Vec::new();
    let mut invalid_urls = Vec::new();

    for raw in &request.urls {
        let cleaned = raw.trim();
        if cleaned.is_empty() {
            continue;
        }
        if url_utils::is_valid_url(cleaned) {
            valid_urls.push(cleaned.to_string());
        } else {
            invalid_urls.push(cleaned.to_string());
        }
    }

    let mut added = 0;
    let mut errors = Vec::new();

    for url in &valid_urls {
        let task = UrlTask::new(url.clone(), 0);
        match state.frontier.push(task) {
            Ok(()) => added += 1,
            Err(e) => errors.push(format!("Failed to add {}: {}", url, e)),
        }
    }

    let total_valid = valid_urls.len();
    Ok(Json(AddUrlsResponse {
        success: true,
        added,
        total_valid,
        invalid_urls,
        errors,
        message: format!("Successfully added {} URLs to the crawl queue", added),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CrawlResult;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_state() -> (TempDir, DashboardState) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(dir.path(), CrawlMode::All, 64).unwrap());
        let frontier = PriorityFrontier::with_capacity(Arc::clone(&storage), 4);
        let metrics = Arc::new(MetricsCollector::new());

        (
            dir,
            DashboardState {
                metrics,
                storage,
                frontier,
            },
        )
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (_dir, state) = test_state();
        state.metrics.add_urls_processed(3);
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["urls_processed"], 3);
    }

    #[tokio::test]
    async fn test_add_urls_validates_and_pushes() {
        let (_dir, state) = test_state();
        let frontier = Arc::clone(&state.frontier);
        let app = router(state);

        let body = serde_json::json!({
            "urls": ["https://good.local/a", "not a url", "  ", "ftp://bad.local/"]
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/add-urls")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["added"], 1);
        assert_eq!(json["invalid_urls"].as_array().unwrap().len(), 2);
        assert_eq!(frontier.size(), 1);
    }

    #[tokio::test]
    async fn test_add_urls_reports_queue_full() {
        let (_dir, state) = test_state();
        // Capacity 4; the fifth valid URL cannot be admitted
        let urls: Vec<String> = (0..5).map(|i| format!("https://t.local/{}", i)).collect();
        let app = router(state);

        let body = serde_json::json!({ "urls": urls });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/add-urls")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let json = body_json(response).await;
        assert_eq!(json["added"], 4);
        assert_eq!(json["errors"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_add_urls_empty_rejected() {
        let (_dir, state) = test_state();
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/add-urls")
                    .header("content-type", "application/json")
                    .body(Body::from("{\"urls\": []}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_results_flattened_by_type() {
        let (_dir, state) = test_state();

        let mut result = CrawlResult::new("https://src.local/page".to_string());
        result.emails.push("a@x.io".to_string());
        result.dead_links.push("https://gone.invalid/".to_string());
        state.storage.store_result(&result).unwrap();

        let app = router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/results?type=all&limit=10")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let entries = json.as_array().unwrap();
        assert_eq!(entries.len(), 2);

        let types: Vec<&str> = entries
            .iter()
            .map(|e| e["type"].as_str().unwrap())
            .collect();
        assert!(types.contains(&"email"));
        assert!(types.contains(&"dead_link"));
    }

    #[tokio::test]
    async fn test_results_unknown_type_rejected() {
        let (_dir, state) = test_state();
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/results?type=bogus")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_db_view_lists_raw_entries() {
        let (_dir, state) = test_state();
        state
            .storage
            .store_url(&UrlTask::new("https://t.local/a".to_string(), 1))
            .unwrap();

        let app = router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/db-view?limit=10")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let entries = json.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["namespace"], "urls");
        assert_eq!(entries[0]["key"], "url:https://t.local/a");
        assert_eq!(entries[0]["value"]["depth"], 1);
    }

    #[tokio::test]
    async fn test_ws_route_requires_upgrade() {
        let (_dir, state) = test_state();
        let app = router(state);

        // A plain GET without upgrade headers is rejected by the
        // websocket extractor
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/ws")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_ne!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_results_error_entry_shape() {
        let (_dir, state) = test_state();

        let mut result = CrawlResult::new("https://src.local/broken".to_string());
        result.error = Some("connection refused".to_string());
        state.storage.store_result(&result).unwrap();

        let app = router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/results")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let json = body_json(response).await;
        let entries = json.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["type"], "error");
        assert_eq!(entries[0]["source_url"], "https://src.local/broken");
    }
}
