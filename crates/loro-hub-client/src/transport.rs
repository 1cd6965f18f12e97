//! A single physical WebSocket connection multiplexed across every
//! `Provider` attached to the same URL — the "global WebSocket singleton"
//! shape: the first `attach()` for a URL opens the socket, the last
//! `detach()` closes it.

use futures::{SinkExt, StreamExt};
use loro_hub_wire::{Frame, Role};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex, Weak};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

static TRANSPORTS: LazyLock<Mutex<HashMap<String, Weak<SharedTransport>>>> =
	LazyLock::new(|| Mutex::new(HashMap::new()));

type RouteTx = mpsc::UnboundedSender<Frame>;

pub struct SharedTransport {
	url: String,
	outbound: mpsc::UnboundedSender<Message>,
	routes: Mutex<HashMap<String, RouteTx>>,
	refcount: AtomicUsize,
}

impl SharedTransport {
	/// Returns the transport already open for `url`, or dials a new one
	/// and registers it for subsequent callers to share.
	pub async fn get_or_connect(url: &str) -> Result<Arc<Self>, tokio_tungstenite::tungstenite::Error> {
		if let Some(existing) = TRANSPORTS.lock().unwrap_or_else(|e| e.into_inner()).get(url).and_then(Weak::upgrade) {
			return Ok(existing);
		}

		let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
		let (mut write, mut read) = ws_stream.split();
		let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

		let transport = Arc::new(Self {
			url: url.to_owned(),
			outbound: outbound_tx,
			routes: Mutex::new(HashMap::new()),
			refcount: AtomicUsize::new(0),
		});

		tokio::spawn(async move {
			while let Some(msg) = outbound_rx.recv().await {
				if write.send(msg).await.is_err() {
					break;
				}
			}
		});

		let reader_transport = transport.clone();
		tokio::spawn(async move {
			while let Some(msg) = read.next().await {
				match msg {
					Ok(Message::Binary(bytes)) => match Frame::decode(&bytes, Role::Client) {
						Ok(frame) => reader_transport.dispatch(frame),
						Err(e) => warn!(error = %e, "dropping malformed frame from hub"),
					},
					Ok(Message::Close(_)) => {
						debug!("hub closed connection");
						break;
					}
					Ok(_) => {}
					Err(e) => {
						warn!(error = %e, "transport read error");
						break;
					}
				}
			}
		});

		TRANSPORTS
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.insert(url.to_owned(), Arc::downgrade(&transport));

		Ok(transport)
	}

	pub fn register_route(&self, document: &str) -> mpsc::UnboundedReceiver<Frame> {
		let (tx, rx) = mpsc::unbounded_channel();
		self.routes.lock().unwrap_or_else(|e| e.into_inner()).insert(document.to_owned(), tx);
		self.refcount.fetch_add(1, Ordering::AcqRel);
		rx
	}

	pub fn unregister_route(&self, document: &str) {
		self.routes.lock().unwrap_or_else(|e| e.into_inner()).remove(document);
		let remaining = self.refcount.fetch_sub(1, Ordering::AcqRel) - 1;
		if remaining == 0 {
			TRANSPORTS.lock().unwrap_or_else(|e| e.into_inner()).remove(&self.url);
			let _ = self.outbound.send(Message::Close(None));
		}
	}

	pub fn send(&self, frame: Frame) {
		let _ = self.outbound.send(Message::Binary(frame.encode().into()));
	}

	fn dispatch(&self, frame: Frame) {
		let routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
		if let Some(tx) = routes.get(frame.document()) {
			let _ = tx.send(frame);
		}
	}
}

#[cfg(test)]
impl SharedTransport {
	/// Builds a transport with no underlying socket and hands back its
	/// outbound queue, so `Provider` tests can assert on what a provider
	/// sends without dialing a real connection.
	pub(crate) fn new_detached() -> (Arc<Self>, mpsc::UnboundedReceiver<Message>) {
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Message>();
		let transport = Arc::new(Self {
			url: "test://detached".to_owned(),
			outbound: outbound_tx,
			routes: Mutex::new(HashMap::new()),
			refcount: AtomicUsize::new(0),
		});
		(transport, outbound_rx)
	}
}
