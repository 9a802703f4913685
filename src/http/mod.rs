//! HTTP surface (§6 [AMBIENT]): health probes plus the read-only relay
//! information document. Admin HTTP endpoints are out of scope (§2).

pub mod health;
pub mod response;

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::http::response::internal_error;
use crate::state::AppState;

/// NIP-11-shaped relay information document (§9 [SUPPLEMENT]). Served at
/// `GET /` when the client negotiates `application/nostr+json`, matching
/// the convention of overloading the root path for relay metadata instead
/// of a dedicated path, so discovery tools that only know to probe `/`
/// still work.
#[derive(Debug, Serialize)]
struct RelayInfoDocument {
    name: String,
    description: String,
    icon: String,
}

pub async fn relay_info(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let wants_json = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("application/nostr+json") || v.contains("application/json"))
        .unwrap_or(false);

    if !wants_json {
        return "this is a relay".into_response();
    }

    match state.policy.relay_metadata().await {
        Ok(meta) => Json(RelayInfoDocument {
            name: meta.name,
            description: meta.description,
            icon: meta.icon,
        })
        .into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}
