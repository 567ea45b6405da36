//! HTTP server mode for triggering syncs and reading run status

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::engine::SyncEngine;
use crate::error::{Error, Result};

/// App state shared across handlers
pub struct AppState {
    engine: SyncEngine,
    /// Held for the duration of a sync; one run at a time
    running: Mutex<()>,
}

impl AppState {
    /// Wrap an engine
    pub fn new(engine: SyncEngine) -> Self {
        Self {
            engine,
            running: Mutex::new(()),
        }
    }
}

/// Request body for the sync endpoint
#[derive(Debug, Default, Deserialize)]
struct SyncRequest {
    /// Object type to sync; all when absent
    #[serde(default)]
    object_type: Option<String>,
    /// Ignore the stored watermark
    #[serde(default)]
    full_sync: bool,
}

/// Query parameters for run listings
#[derive(Debug, Deserialize)]
struct StatusQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

/// Response wrapper
#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

fn fail(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ApiResponse::<()>::error(msg))).into_response()
}

fn error_response(e: &Error) -> Response {
    let status = match e {
        Error::UnknownObjectType { .. } => StatusCode::NOT_FOUND,
        e if e.is_fatal() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    fail(status, e.to_string())
}

/// Build the router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/objects", get(list_objects))
        .route("/status", get(list_runs))
        .route("/status/:object", get(object_status))
        .route("/sync", post(trigger_sync))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server
pub async fn serve(engine: SyncEngine, port: u16) -> Result<()> {
    let app = router(Arc::new(AppState::new(engine)));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::config(format!("Failed to bind to port {port}: {e}")))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::config(format!("Server error: {e}")))?;

    Ok(())
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Object catalog
async fn list_objects(State(state): State<Arc<AppState>>) -> Response {
    let objects: Vec<_> = state
        .engine
        .catalog()
        .iter()
        .map(|spec| {
            json!({
                "name": spec.name,
                "table": spec.table_name(),
                "incremental": spec.supports_incremental,
            })
        })
        .collect();
    ok(objects)
}

/// Recent runs across all object types
async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> Response {
    match state.engine.tracker().recent(None, query.limit).await {
        Ok(runs) => ok(runs),
        Err(e) => error_response(&e),
    }
}

/// Latest run and watermark of one object type
async fn object_status(
    State(state): State<Arc<AppState>>,
    Path(object): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Response {
    if state.engine.object(&object).is_none() {
        return error_response(&Error::unknown_object(object));
    }

    let tracker = state.engine.tracker();
    let result = async {
        let last = tracker.last_sync(&object).await?;
        let watermark = tracker.last_successful_sync(&object).await?;
        let recent = tracker.recent(Some(&object), query.limit).await?;
        Ok::<_, Error>(json!({
            "object_type": object,
            "last_run": last,
            "watermark": watermark,
            "recent": recent,
        }))
    }
    .await;

    match result {
        Ok(body) => ok(body),
        Err(e) => error_response(&e),
    }
}

/// Run a sync; rejected while another one is running
async fn trigger_sync(
    State(state): State<Arc<AppState>>,
    body: Option<Json<SyncRequest>>,
) -> Response {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let Ok(_guard) = state.running.try_lock() else {
        warn!("Sync requested while another is running");
        return fail(StatusCode::CONFLICT, "A sync is already running");
    };

    match state
        .engine
        .run(request.object_type.as_deref(), request.full_sync)
        .await
    {
        Ok(summary) => ok(summary),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{EndpointKind, ObjectSpec, StaticSource};
    use crate::status::{MemoryStatusStore, SyncStatusTracker};
    use crate::warehouse::MemoryWarehouse;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn app() -> Router {
        let source = StaticSource::new().with_records(
            "owners",
            vec![
                json!({"id": "1", "email": "a@example.com"}),
                json!({"id": "2", "email": "b@example.com"}),
            ],
        );
        let engine = SyncEngine::new(
            Arc::new(source),
            Arc::new(MemoryWarehouse::new()),
            SyncStatusTracker::new(Arc::new(MemoryStatusStore::new())),
        )
        .with_catalog(vec![ObjectSpec::new("owners", EndpointKind::List)]);
        router(Arc::new(AppState::new(engine)))
    }

    async fn read_body(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_sync(body: Value) -> Request<Body> {
        Request::post("/sync")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let resp = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(read_body(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_sync_then_status() {
        let app = app();

        let resp = app
            .clone()
            .oneshot(post_sync(json!({"object_type": "owners", "full_sync": true})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = read_body(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["reports"][0]["rows_loaded"], 2);
        assert_eq!(body["data"]["reports"][0]["status"], "success");

        let resp = app
            .oneshot(Request::get("/status/owners").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = read_body(resp).await;
        assert_eq!(body["data"]["last_run"]["status"], "success");
        assert_eq!(body["data"]["recent"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_unknown_object_is_404() {
        let resp = app()
            .oneshot(post_sync(json!({"object_type": "widgets"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = read_body(resp).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("widgets"));
    }

    #[tokio::test]
    async fn test_status_unknown_object_is_404() {
        let resp = app()
            .oneshot(Request::get("/status/widgets").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sync_without_body_runs_everything() {
        let app = app();
        let resp = app
            .clone()
            .oneshot(Request::post("/sync").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(Request::get("/status?limit=5").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = read_body(resp).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }
}
