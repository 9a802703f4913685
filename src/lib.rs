/*
Copyright © 2018  Isaac Wismer

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with this program.  If not, see <http://www.gnu.org/licenses/>.
*/

pub mod config;
pub mod errors;
pub mod http;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod state;
pub mod store;
pub mod transport;

pub use state::AppState;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

/// Builds the relay's entire route table: the WebSocket endpoint, the two
/// health probes, and the relay information document at `/` (§6, §9
/// [SUPPLEMENT]). Everything else — admin HTTP, metrics exporters — is out
/// of scope (§2).
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(http::relay_info))
        .route("/ws", get(transport::ws_handler))
        .route("/healthz", get(http::health::healthz))
        .route("/readyz", get(http::health::readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
