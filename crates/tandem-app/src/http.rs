//! Minimal status surface: liveness plus the polling counters.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tandem_engine::{PollStatus, PollStatusHandle};

pub fn router(status: PollStatusHandle) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/poll/status", get(poll_status))
        .with_state(status)
}

async fn health() -> &'static str {
    "ok"
}

async fn poll_status(State(status): State<PollStatusHandle>) -> Json<PollStatus> {
    Json(status.snapshot())
}
