//! Hub-side configuration, assembled the way this codebase's ancestry
//! assembles its own server options: explicit setters with defaults,
//! overridable from the environment at process start rather than from a
//! config file.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HubConfig {
	/// How long an unreferenced document stays loaded before it is
	/// evicted from the registry.
	pub idle_unload: Duration,
	/// How long to wait after the first unpersisted update before
	/// flushing to the persistence hook.
	pub persist_debounce: Duration,
	/// Hard ceiling on debounce delay under sustained write load.
	pub persist_max_debounce: Duration,
	/// Bound on a connection's outbound queue before it is treated as a
	/// slow consumer and closed.
	pub outbound_queue_limit: usize,
	/// TTL applied to ephemeral (presence) entries.
	pub ephemeral_ttl: Duration,
	/// Maximum accepted document name length, in UTF-8 bytes.
	pub max_document_name_len: usize,
	/// Inbound frames larger than this are rejected as a protocol error
	/// before they are even decoded.
	pub max_frame_size: usize,
}

impl Default for HubConfig {
	fn default() -> Self {
		Self {
			idle_unload: Duration::from_secs(30),
			persist_debounce: Duration::from_secs(2),
			persist_max_debounce: Duration::from_secs(10),
			outbound_queue_limit: 256,
			ephemeral_ttl: Duration::from_secs(30),
			max_document_name_len: loro_hub_wire::frame::MAX_DOCUMENT_NAME_LEN,
			max_frame_size: 8 * 1024 * 1024,
		}
	}
}

impl HubConfig {
	/// Overrides defaults from `LORO_HUB_*` environment variables,
	/// leaving unset or unparsable variables at their prior value.
	#[must_use]
	pub fn from_env(mut self) -> Self {
		if let Some(v) = env_secs("LORO_HUB_IDLE_UNLOAD_SECS") {
			self.idle_unload = v;
		}
		if let Some(v) = env_secs("LORO_HUB_PERSIST_DEBOUNCE_SECS") {
			self.persist_debounce = v;
		}
		if let Some(v) = env_secs("LORO_HUB_PERSIST_MAX_DEBOUNCE_SECS") {
			self.persist_max_debounce = v;
		}
		if let Ok(v) = std::env::var("LORO_HUB_OUTBOUND_QUEUE_LIMIT") {
			if let Ok(n) = v.parse() {
				self.outbound_queue_limit = n;
			}
		}
		if let Some(v) = env_secs("LORO_HUB_EPHEMERAL_TTL_SECS") {
			self.ephemeral_ttl = v;
		}
		if let Ok(v) = std::env::var("LORO_HUB_MAX_FRAME_SIZE") {
			if let Ok(n) = v.parse() {
				self.max_frame_size = n;
			}
		}
		self
	}
}

fn env_secs(name: &str) -> Option<Duration> {
	std::env::var(name)
		.ok()
		.and_then(|v| v.parse::<u64>().ok())
		.map(Duration::from_secs)
}
