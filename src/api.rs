//! HTTP entry point: `POST /api/digests/run` and `GET /health`.
//!
//! The run endpoint is authenticated with the shared cron secret, passed as
//! `Authorization: Bearer <secret>` or `x-cron-secret: <secret>`. The run
//! itself executes in a spawned task, so a caller that hangs up (the
//! fire-and-forget continuation trigger does) never cancels it.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::pipeline::runner::DigestRunner;
use crate::trigger::RUN_PATH;

#[derive(Clone)]
pub struct AppState {
    runner: Arc<DigestRunner>,
    secret: Arc<SecretString>,
}

pub fn digest_routes(runner: Arc<DigestRunner>, secret: SecretString) -> Router {
    let state = AppState {
        runner,
        secret: Arc::new(secret),
    };

    Router::new()
        .route("/health", get(health))
        .route(RUN_PATH, post(run_digest))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "digest-dispatch"
    }))
}

// ── Run ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct RunRequest {
    cursor: Option<usize>,
}

async fn run_digest(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> impl IntoResponse {
    if !authorized(&headers, &state.secret) {
        warn!("Rejected digest run with missing or wrong secret");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Unauthorized" })),
        );
    }

    // Parsed only once the caller is known.
    let query = match Query::<RunRequest>::try_from_uri(&uri) {
        Ok(Query(query)) => query,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("Invalid query string: {e}") })),
            );
        }
    };

    // The body wins over the query string when both carry a cursor.
    let cursor = if body.iter().all(|b| b.is_ascii_whitespace()) {
        query.cursor
    } else {
        match serde_json::from_slice::<RunRequest>(&body) {
            Ok(request) => request.cursor.or(query.cursor),
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("Invalid request body: {e}") })),
                );
            }
        }
    };

    let runner = Arc::clone(&state.runner);
    let handle = tokio::spawn(async move { runner.run(cursor).await });

    match handle.await {
        Ok(Ok(report)) => (StatusCode::OK, Json(json!(report))),
        Ok(Err(aborted)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!(aborted.report)),
        ),
        Err(e) => {
            error!(error = %e, "Digest run task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("Digest run task failed: {e}") })),
            )
        }
    }
}

fn authorized(headers: &HeaderMap, secret: &SecretString) -> bool {
    let expected = secret.expose_secret().trim().as_bytes();
    if expected.is_empty() {
        return false;
    }

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let cron = headers
        .get("x-cron-secret")
        .and_then(|v| v.to_str().ok());

    [bearer, cron]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|given| !given.is_empty())
        .any(|given| bool::from(given.as_bytes().ct_eq(expected)))
}
