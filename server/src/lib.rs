//! The Loro collaboration hub's HTTP/WebSocket surface. Split from
//! `main.rs` so integration tests can build a router over injected
//! adapters without going through process startup.

pub mod config;
pub mod state;
pub mod websocket;

use axum::routing::get;
use axum::Router;
use state::App;

#[must_use]
pub fn router(state: App) -> Router {
	Router::new()
		.route("/ws", get(websocket::ws_handler))
		.with_state(state)
}
