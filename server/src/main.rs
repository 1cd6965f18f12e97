use loro_hub_adapter_jwt::JwtAuthenticator;
use loro_hub_adapter_loro::LoroEngine;
use loro_hub_adapter_redb::RedbPersistence;
use loro_hub_core::registry::Registry;
use loro_hub_server::config::ServerConfig;
use loro_hub_server::state::{App, AppState};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_target(false)
		.init();

	let config = ServerConfig::from_env();
	let persistence = Arc::new(RedbPersistence::open(config.redb_path.as_ref())?);
	let authenticator = Arc::new(JwtAuthenticator::from_hmac_secret(config.jwt_secret.as_bytes()));
	let registry = Registry::new(
		persistence,
		Arc::new(|| -> Box<dyn loro_hub_core::engine::CrdtEngine> { Box::new(LoroEngine::new()) }),
		config.hub.clone(),
	);

	let state: App = Arc::new(AppState {
		registry,
		authenticator,
		config: config.clone(),
	});

	let maintenance_state = state.clone();
	let maintenance_interval = config.maintenance_interval;
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(maintenance_interval);
		loop {
			ticker.tick().await;
			maintenance_state.registry.flush_all().await;
			maintenance_state.registry.sweep_idle().await;
			maintenance_state.registry.sweep_ephemeral();
		}
	});

	let app = loro_hub_server::router(state);

	info!(listen = %config.listen, "starting Loro collaboration hub");
	let listener = tokio::net::TcpListener::bind(config.listen).await?;
	axum::serve(listener, app).await?;

	Ok(())
}
