//! Operator control surface: checkpoint inspection, backfill start and
//! state reset. The backfill runs detached; callers poll the status
//! endpoint to follow it.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use storesync_common::error::SyncError;
use storesync_state::{Checkpoint, CheckpointPatch, SyncStatus};

use crate::jobs::{self, SyncContext};

#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<SyncContext>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/status", get(status))
        .route("/api/v1/backfill/start", post(start_backfill))
        .route("/api/v1/backfill/reset", post(reset))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "storesync" }))
}

/// The raw checkpoint document is the status response.
async fn status(State(state): State<AppState>) -> Json<Checkpoint> {
    Json(state.ctx.store.read())
}

async fn start_backfill(State(state): State<AppState>) -> Response {
    let checkpoint = state.ctx.store.read();
    if checkpoint.status == SyncStatus::Running {
        return (
            StatusCode::CONFLICT,
            Json(json!({
                "error": "backfill is already running",
                "current_status": checkpoint,
            })),
        )
            .into_response();
    }

    let ctx = state.ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = jobs::backfill::run(&ctx).await {
            tracing::error!(error = %e, "background backfill failed");
        }
    });

    (
        StatusCode::OK,
        Json(json!({
            "message": "backfill started in background",
            "note": "poll /api/v1/status to monitor progress",
        })),
    )
        .into_response()
}

/// Clear a stuck or failed state so a backfill can be retried.
async fn reset(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.ctx.store.write(CheckpointPatch {
        status: Some(SyncStatus::Idle),
        error_message: Some(None),
        cursor: Some(None),
        ..Default::default()
    })?;
    tracing::info!("sync state reset via API");
    Ok(Json(json!({ "message": "state reset, ready to retry" })))
}

pub struct ApiError(SyncError);

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            SyncError::Config(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testutil::test_context;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::tempdir;
    use tower::ServiceExt;

    const CUTOFF: &str = "2025-12-01T00:00:00Z";

    fn app(ctx: SyncContext) -> Router {
        build_router(AppState { ctx: Arc::new(ctx) })
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let dir = tempdir().unwrap();
        let ctx = test_context("http://127.0.0.1:9", "http://127.0.0.1:9", dir.path(), CUTOFF);

        let response = app(ctx)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn status_returns_the_checkpoint_document() {
        let dir = tempdir().unwrap();
        let ctx = test_context("http://127.0.0.1:9", "http://127.0.0.1:9", dir.path(), CUTOFF);
        ctx.store
            .write(CheckpointPatch {
                status: Some(SyncStatus::Completed),
                total_processed: Some(123),
                ..Default::default()
            })
            .unwrap();

        let response = app(ctx)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "COMPLETED");
        assert_eq!(body["total_processed"], 123);
    }

    #[tokio::test]
    async fn start_conflicts_while_a_backfill_is_running() {
        let dir = tempdir().unwrap();
        let ctx = test_context("http://127.0.0.1:9", "http://127.0.0.1:9", dir.path(), CUTOFF);
        ctx.store
            .write(CheckpointPatch {
                status: Some(SyncStatus::Running),
                ..Default::default()
            })
            .unwrap();

        let response = app(ctx)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/backfill/start")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["current_status"]["status"], "RUNNING");
    }

    #[tokio::test]
    async fn start_accepts_when_idle() {
        let dir = tempdir().unwrap();
        let ctx = test_context("http://127.0.0.1:9", "http://127.0.0.1:9", dir.path(), CUTOFF);

        let response = app(ctx)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/backfill/start")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["message"], "backfill started in background");
    }

    #[tokio::test]
    async fn reset_clears_error_state_and_cursor() {
        let dir = tempdir().unwrap();
        let ctx = test_context("http://127.0.0.1:9", "http://127.0.0.1:9", dir.path(), CUTOFF);
        ctx.store
            .write(CheckpointPatch {
                status: Some(SyncStatus::Error),
                error_message: Some(Some("boom".to_owned())),
                cursor: Some(Some("stale".to_owned())),
                total_processed: Some(99),
                ..Default::default()
            })
            .unwrap();
        let store_path = ctx.store.path().to_path_buf();

        let response = app(ctx)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/backfill/reset")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let cp = storesync_state::CheckpointStore::new(store_path).read();
        assert_eq!(cp.status, SyncStatus::Idle);
        assert_eq!(cp.error_message, None);
        assert_eq!(cp.cursor, None);
        // Progress counters survive a reset.
        assert_eq!(cp.total_processed, 99);
    }
}
