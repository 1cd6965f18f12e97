//! One WebSocket peer's server-side bookkeeping: outbound mailbox,
//! attached-document set, and lifecycle state.

use rand::Rng;
use std::collections::HashSet;
use std::sync::Mutex;
use tokio::sync::{mpsc, Notify};

pub type ConnectionId = u64;

#[must_use]
pub fn random_connection_id() -> ConnectionId {
	rand::rng().random()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
	Normal = 1000,
	ProtocolError = 4400,
	Unauthorized = 4401,
	WriteDenied = 4403,
	NotFound = 4404,
	SlowConsumer = 4408,
	StoreFailure = 4409,
	InternalError = 4500,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Open,
	Closing(CloseCode),
	Closed,
}

/// Outbound bytes queued for the writer task. A connection that cannot
/// drain its queue is a slow consumer and gets closed rather than let its
/// backpressure propagate into the document lock.
#[derive(Debug)]
pub struct Connection {
	pub id: ConnectionId,
	outbound_tx: mpsc::Sender<Vec<u8>>,
	attached: Mutex<HashSet<Box<str>>>,
	state: Mutex<ConnectionState>,
	close_notify: Notify,
}

impl Connection {
	#[must_use]
	pub fn new(outbound_queue_limit: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
		let (tx, rx) = mpsc::channel(outbound_queue_limit);
		let conn = Self {
			id: random_connection_id(),
			outbound_tx: tx,
			attached: Mutex::new(HashSet::new()),
			state: Mutex::new(ConnectionState::Open),
			close_notify: Notify::new(),
		};
		(conn, rx)
	}

	/// Attempts to queue a frame without suspending. A full queue marks
	/// the connection `Closing(SlowConsumer)` and reports failure so the
	/// caller (a document's broadcast loop) never blocks on one slow
	/// reader.
	pub fn try_send(&self, bytes: Vec<u8>) -> bool {
		match self.outbound_tx.try_send(bytes) {
			Ok(()) => true,
			Err(_) => {
				self.mark_closing(CloseCode::SlowConsumer);
				false
			}
		}
	}

	pub fn attach(&self, document: &str) {
		let mut attached = crate::lock!(self.attached, "connection attach");
		attached.insert(document.into());
	}

	pub fn detach(&self, document: &str) {
		let mut attached = crate::lock!(self.attached, "connection detach");
		attached.remove(document);
	}

	#[must_use]
	pub fn is_attached(&self, document: &str) -> bool {
		let attached = crate::lock!(self.attached, "connection is_attached");
		attached.contains(document)
	}

	#[must_use]
	pub fn attached_documents(&self) -> Vec<Box<str>> {
		let attached = crate::lock!(self.attached, "connection attached_documents");
		attached.iter().cloned().collect()
	}

	#[must_use]
	pub fn state(&self) -> ConnectionState {
		*crate::lock!(self.state, "connection state")
	}

	pub fn mark_closing(&self, code: CloseCode) {
		let mut state = crate::lock!(self.state, "connection mark_closing");
		if matches!(*state, ConnectionState::Open) {
			*state = ConnectionState::Closing(code);
		}
	}

	pub fn mark_closed(&self) {
		let mut state = crate::lock!(self.state, "connection mark_closed");
		*state = ConnectionState::Closed;
	}

	/// Marks the connection closing and wakes whoever is waiting on
	/// [`Connection::closed_signal`]. Used when a `Document` needs to tear
	/// a connection down from outside the connection's own read loop, e.g.
	/// after exhausting persistence retries.
	pub fn force_close(&self, code: CloseCode) {
		self.mark_closing(code);
		self.close_notify.notify_waiters();
	}

	/// Resolves once [`Connection::force_close`] is called. Intended to be
	/// raced against the socket read in a `select!` so an externally
	/// triggered close actually tears down the connection's tasks instead
	/// of waiting for the next inbound frame.
	pub async fn closed_signal(&self) {
		self.close_notify.notified().await;
	}
}
