//! Attaches one local CRDT document to the hub over a [`SharedTransport`].
//!
//! Fixed, typed listener slots rather than a free-form event emitter:
//! callers who need `connect`/`open`/`status`/`close`/`disconnect`/
//! `destroy` notifications set them once at build time. A provider that
//! needs a new kind of notification gets a new field here, not a string
//! key threaded through a generic `on(name, cb)`.

use crate::auth::TokenSource;
use crate::transport::SharedTransport;
use loro_hub_core::engine::CrdtEngine;
use loro_hub_wire::{AuthCode, AuthPayload, Frame};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
	Connecting,
	Synced,
	Disconnected,
}

type Listener = Box<dyn Fn() + Send + Sync>;
type StatusListener = Box<dyn Fn(Status) + Send + Sync>;

#[derive(Default)]
pub struct Listeners {
	pub on_connect: Option<Listener>,
	pub on_open: Option<Listener>,
	pub on_status: Option<StatusListener>,
	pub on_close: Option<Listener>,
	pub on_disconnect: Option<Listener>,
	pub on_destroy: Option<Listener>,
}

pub struct ProviderBuilder {
	document: String,
	url: String,
	token: Option<TokenSource>,
	force_sync_interval: Option<Duration>,
	listeners: Listeners,
}

impl ProviderBuilder {
	#[must_use]
	pub fn new(document: impl Into<String>, url: impl Into<String>) -> Self {
		Self {
			document: document.into(),
			url: url.into(),
			token: None,
			force_sync_interval: Some(Duration::from_millis(15_000)),
			listeners: Listeners::default(),
		}
	}

	#[must_use]
	pub fn token(mut self, token: TokenSource) -> Self {
		self.token = Some(token);
		self
	}

	/// `None` disables the periodic force-sync request entirely.
	#[must_use]
	pub fn force_sync_interval(mut self, interval: Option<Duration>) -> Self {
		self.force_sync_interval = interval;
		self
	}

	#[must_use]
	pub fn on_connect(mut self, cb: impl Fn() + Send + Sync + 'static) -> Self {
		self.listeners.on_connect = Some(Box::new(cb));
		self
	}

	#[must_use]
	pub fn on_open(mut self, cb: impl Fn() + Send + Sync + 'static) -> Self {
		self.listeners.on_open = Some(Box::new(cb));
		self
	}

	#[must_use]
	pub fn on_status(mut self, cb: impl Fn(Status) + Send + Sync + 'static) -> Self {
		self.listeners.on_status = Some(Box::new(cb));
		self
	}

	#[must_use]
	pub fn on_close(mut self, cb: impl Fn() + Send + Sync + 'static) -> Self {
		self.listeners.on_close = Some(Box::new(cb));
		self
	}

	#[must_use]
	pub fn on_disconnect(mut self, cb: impl Fn() + Send + Sync + 'static) -> Self {
		self.listeners.on_disconnect = Some(Box::new(cb));
		self
	}

	#[must_use]
	pub fn on_destroy(mut self, cb: impl Fn() + Send + Sync + 'static) -> Self {
		self.listeners.on_destroy = Some(Box::new(cb));
		self
	}

	/// Dials (or joins) the shared transport, attaches the engine's local
	/// update subscription, and spawns the inbound dispatch and
	/// force-sync tasks.
	pub async fn attach(
		self,
		engine: Arc<dyn CrdtEngine>,
	) -> Result<Arc<Provider>, tokio_tungstenite::tungstenite::Error> {
		let transport = SharedTransport::get_or_connect(&self.url).await?;
		let inbound = transport.register_route(&self.document);

		let provider = Arc::new(Provider {
			document: self.document,
			transport: transport.clone(),
			engine: engine.clone(),
			token: self.token,
			listeners: self.listeners,
			attached: AtomicBool::new(true),
			local_sub: Mutex::new(None),
		});

		if let Some(cb) = &provider.listeners.on_connect {
			cb();
		}
		provider.set_status(Status::Connecting);

		provider.authenticate().await;
		provider.request_sync().await;

		let sub_provider = provider.clone();
		let engine_for_sub = engine.clone();
		let unsubscribe = engine_for_sub.subscribe_local_updates(Box::new(move |update: &[u8]| {
			sub_provider.send_update(update);
		}));
		*provider.local_sub.lock().await = Some(unsubscribe);

		tokio::spawn(Provider::inbound_loop(provider.clone(), inbound));

		if let Some(interval) = self.force_sync_interval {
			tokio::spawn(Provider::force_sync_loop(provider.clone(), interval));
		}

		Ok(provider)
	}
}

pub struct Provider {
	document: String,
	transport: Arc<SharedTransport>,
	engine: Arc<dyn CrdtEngine>,
	token: Option<TokenSource>,
	listeners: Listeners,
	attached: AtomicBool,
	local_sub: Mutex<Option<Box<dyn loro_hub_core::engine::Unsubscribe>>>,
}

impl Provider {
	#[must_use]
	pub fn builder(document: impl Into<String>, url: impl Into<String>) -> ProviderBuilder {
		ProviderBuilder::new(document, url)
	}

	async fn authenticate(&self) {
		let Some(token_source) = &self.token else { return };
		if let Some(token) = token_source.resolve().await {
			self.transport.send(Frame::Auth {
				document: self.document.clone(),
				payload: AuthPayload::Request { token },
			});
		}
	}

	async fn request_sync(&self) {
		let version = self.engine.version_json();
		self.transport.send(Frame::LoroSyncRequest {
			document: self.document.clone(),
			version,
		});
	}

	fn send_update(&self, update: &[u8]) {
		if !self.attached.load(Ordering::Acquire) {
			return;
		}
		self.transport.send(Frame::LoroUpdate {
			document: self.document.clone(),
			update: update.to_vec(),
		});
	}

	pub fn send_ephemeral(&self, payload: Vec<u8>) {
		self.transport.send(Frame::LoroEphemeral {
			document: self.document.clone(),
			payload,
		});
	}

	fn set_status(&self, status: Status) {
		if let Some(cb) = &self.listeners.on_status {
			cb(status);
		}
	}

	async fn inbound_loop(provider: Arc<Provider>, mut inbound: tokio::sync::mpsc::UnboundedReceiver<Frame>) {
		let mut synced = false;
		while let Some(frame) = inbound.recv().await {
			match frame {
				Frame::LoroUpdate { update, .. } => {
					if let Err(e) = provider.engine.import(&update) {
						warn!(document = %provider.document, error = %e, "rejected update from hub");
					}
				}
				Frame::LoroSyncBatch { updates, .. } => {
					for update in updates {
						if let Err(e) = provider.engine.import(&update) {
							warn!(document = %provider.document, error = %e, "rejected batch update from hub");
						}
					}
					if !synced {
						synced = true;
						provider.set_status(Status::Synced);
						if let Some(cb) = &provider.listeners.on_open {
							cb();
						}
					}
				}
				Frame::Auth { payload: AuthPayload::Reply { code, reason }, .. } => match code {
					AuthCode::Authenticated => {
						debug!(document = %provider.document, "authenticated");
					}
					AuthCode::PermissionDenied => {
						warn!(document = %provider.document, reason = %reason, "hub denied authentication");
					}
				},
				Frame::Auth { payload: AuthPayload::Request { .. }, .. } => {
					// Only a client sends an auth request; the hub never does.
				}
				Frame::LoroEphemeral { .. } | Frame::LoroSyncRequest { .. } => {
					// Not meaningful inbound to a client; the hub never sends these.
				}
			}
		}
		debug!(document = %provider.document, "inbound loop ended, transport closed");
		provider.attached.store(false, Ordering::Release);
		provider.set_status(Status::Disconnected);
		if let Some(cb) = &provider.listeners.on_disconnect {
			cb();
		}
	}

	async fn force_sync_loop(provider: Arc<Provider>, interval: Duration) {
		let mut ticker = tokio::time::interval(interval);
		ticker.tick().await; // first tick fires immediately, skip it
		loop {
			ticker.tick().await;
			if !provider.attached.load(Ordering::Acquire) {
				break;
			}
			provider.request_sync().await;
		}
	}

	/// Detaches from the shared transport. Idempotent: a second call is a
	/// no-op.
	pub async fn detach(&self) {
		if !self.attached.swap(false, Ordering::AcqRel) {
			return;
		}
		if let Some(sub) = self.local_sub.lock().await.take() {
			sub.unsubscribe();
		}
		self.transport.unregister_route(&self.document);
		if let Some(cb) = &self.listeners.on_close {
			cb();
		}
	}
}

impl Drop for Provider {
	fn drop(&mut self) {
		if let Some(cb) = &self.listeners.on_destroy {
			cb();
		}
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;
	use crate::transport::SharedTransport;
	use loro_hub_core::engine::{EngineError, ImportOutcome, LocalUpdateCallback, Unsubscribe};
	use std::sync::atomic::AtomicUsize;
	use tokio_tungstenite::tungstenite::Message;

	#[derive(Default)]
	struct StubEngine;

	impl CrdtEngine for StubEngine {
		fn import(&self, _bytes: &[u8]) -> Result<ImportOutcome, EngineError> {
			Ok(ImportOutcome { changed: true })
		}
		fn export_from(&self, _from: Option<&str>) -> Result<Vec<Vec<u8>>, EngineError> {
			Ok(vec![])
		}
		fn version_json(&self) -> String {
			"{}".to_owned()
		}
		fn subscribe_local_updates(&self, _callback: LocalUpdateCallback) -> Box<dyn Unsubscribe> {
			struct NoopUnsubscribe;
			impl Unsubscribe for NoopUnsubscribe {
				fn unsubscribe(self: Box<Self>) {}
			}
			Box::new(NoopUnsubscribe)
		}
	}

	fn test_provider(transport: Arc<SharedTransport>) -> Arc<Provider> {
		Arc::new(Provider {
			document: "doc-1".to_owned(),
			transport,
			engine: Arc::new(StubEngine),
			token: None,
			listeners: Listeners::default(),
			attached: AtomicBool::new(true),
			local_sub: Mutex::new(None),
		})
	}

	/// Drains every queued frame currently in `rx` without blocking.
	fn drain_sync_requests(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Message>) -> usize {
		let mut count = 0;
		while let Ok(msg) = rx.try_recv() {
			let Message::Binary(bytes) = msg else { continue };
			if matches!(Frame::decode(&bytes, loro_hub_wire::Role::Server), Ok(Frame::LoroSyncRequest { .. })) {
				count += 1;
			}
		}
		count
	}

	#[tokio::test(start_paused = true)]
	async fn force_sync_loop_fires_on_every_interval_until_detached() {
		let (transport, mut rx) = SharedTransport::new_detached();
		let _inbound = transport.register_route("doc-1");
		let provider = test_provider(transport);

		let task = tokio::spawn(Provider::force_sync_loop(provider.clone(), Duration::from_millis(100)));

		// The first tick is consumed immediately and skipped, so nothing
		// should have gone out yet.
		tokio::time::advance(Duration::from_millis(1)).await;
		assert_eq!(drain_sync_requests(&mut rx), 0);

		tokio::time::advance(Duration::from_millis(100)).await;
		assert_eq!(drain_sync_requests(&mut rx), 1);

		tokio::time::advance(Duration::from_millis(100)).await;
		assert_eq!(drain_sync_requests(&mut rx), 1);

		provider.detach().await;
		tokio::time::advance(Duration::from_millis(100)).await;
		assert_eq!(drain_sync_requests(&mut rx), 0, "no further sync requests once detached");

		task.await.unwrap();
	}

	#[tokio::test]
	async fn detach_is_idempotent_and_fires_on_close_exactly_once() {
		let (transport, _rx) = SharedTransport::new_detached();
		let _inbound = transport.register_route("doc-1");
		let closes = Arc::new(AtomicUsize::new(0));
		let counter = closes.clone();
		let provider = Arc::new(Provider {
			document: "doc-1".to_owned(),
			transport,
			engine: Arc::new(StubEngine) as Arc<dyn CrdtEngine>,
			token: None,
			listeners: Listeners { on_close: Some(Box::new(move || { counter.fetch_add(1, Ordering::AcqRel); })), ..Listeners::default() },
			attached: AtomicBool::new(true),
			local_sub: Mutex::new(None),
		});

		provider.detach().await;
		provider.detach().await;
		provider.detach().await;

		assert_eq!(closes.load(Ordering::Acquire), 1);
		assert!(!provider.attached.load(Ordering::Acquire));
	}
}
