//! Shared application state, built once at startup and handed to every
//! connection task as an `Arc`.

use crate::config::ServerConfig;
use loro_hub_core::auth::Authenticator;
use loro_hub_core::registry::Registry;
use std::sync::Arc;

pub struct AppState {
	pub registry: Registry,
	pub authenticator: Arc<dyn Authenticator>,
	pub config: ServerConfig,
}

pub type App = Arc<AppState>;
