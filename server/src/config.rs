//! Process-level configuration, assembled the way this codebase's
//! ancestry assembles its own server options: defaults overridable from
//! environment variables at startup, no config file.

use loro_hub_core::config::HubConfig;
use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub listen: SocketAddr,
	pub hub: HubConfig,
	pub jwt_secret: Box<str>,
	pub redb_path: Box<str>,
	/// How often the registry sweeps for idle documents and flushes
	/// pending persistence writes.
	pub maintenance_interval: std::time::Duration,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			listen: "127.0.0.1:8787".parse().unwrap_or_else(|_| {
				std::net::SocketAddr::from(([127, 0, 0, 1], 8787))
			}),
			hub: HubConfig::default(),
			jwt_secret: "change-me".into(),
			redb_path: "./loro-hub.redb".into(),
			maintenance_interval: std::time::Duration::from_secs(1),
		}
	}
}

impl ServerConfig {
	#[must_use]
	pub fn from_env() -> Self {
		let mut cfg = Self::default();
		if let Ok(v) = std::env::var("LORO_HUB_LISTEN") {
			if let Ok(addr) = v.parse() {
				cfg.listen = addr;
			}
		}
		if let Ok(v) = std::env::var("LORO_HUB_JWT_SECRET") {
			cfg.jwt_secret = v.into();
		}
		if let Ok(v) = std::env::var("LORO_HUB_REDB_PATH") {
			cfg.redb_path = v.into();
		}
		cfg.hub = cfg.hub.from_env();
		cfg
	}
}
