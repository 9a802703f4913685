//! Liveness/readiness probes (§6 [AMBIENT]).

use axum::extract::State;
use axum::response::IntoResponse;

use crate::state::AppState;

pub async fn healthz() -> impl IntoResponse {
    "ok"
}

pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match state.event_store.count(&crate::model::Filter::default()).await {
        Ok(_) => "ok".into_response(),
        Err(_) => (axum::http::StatusCode::SERVICE_UNAVAILABLE, "store unreachable").into_response(),
    }
}
