use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::ws;
use crate::state::AppState;

/// The voice endpoint. Authentication is message-based: the first frame on
/// every connection must be a `session_start` carrying the auth token, and
/// nothing else is accepted until it verifies.
pub fn create_ws_router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::websocket_handler))
        .layer(TraceLayer::new_for_http())
}
