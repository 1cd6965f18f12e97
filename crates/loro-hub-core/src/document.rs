//! A loaded document: its CRDT replica, the connections attached to it,
//! and the debounce/backoff state machine that coalesces writes to the
//! persistence hook.

use crate::connection::{CloseCode, Connection, ConnectionId};
use crate::engine::CrdtEngine;
use crate::ephemeral::{EphemeralStore, TtlEphemeralStore};
use crate::error::{ClResult, Error};
use crate::persistence::{LoadedDocument, Persistence};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::{debug, warn};

pub type DocumentName = Box<str>;

/// Guarded together because every mutating path needs exclusive access to
/// both: importing an update and recording it as pending must not
/// interleave with a concurrent persistence flush reading `pending`.
struct Inner {
	replica: Box<dyn CrdtEngine>,
	pending_updates: Vec<Vec<u8>>,
	last_persisted_vv: Option<String>,
	armed_at: Option<Instant>,
	backoff: Duration,
}

pub struct Document {
	pub name: DocumentName,
	inner: AsyncMutex<Inner>,
	connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
	ephemeral: TtlEphemeralStore,
	refcount: AtomicU32,
	idle_since: Mutex<Option<Instant>>,
	persist_debounce: Duration,
	persist_max_debounce: Duration,
	/// Set once the persistence hook has exhausted its retry budget.
	/// A destroyed document is never flushed again and is evicted from
	/// the registry on the next sweep regardless of refcount.
	destroyed: AtomicBool,
}

impl Document {
	pub async fn load(
		name: DocumentName,
		replica: Box<dyn CrdtEngine>,
		persistence: &dyn Persistence,
		ephemeral_ttl: Duration,
		persist_debounce: Duration,
		persist_max_debounce: Duration,
	) -> ClResult<Self> {
		match persistence
			.load(&name)
			.await
			.map_err(|e| Error::Persistence(e.to_string()))?
		{
			LoadedDocument::Absent => {}
			LoadedDocument::Snapshot(bytes) => {
				replica
					.import(&bytes)
					.map_err(|e| Error::Engine(e.to_string()))?;
			}
			LoadedDocument::Updates(updates) => {
				for update in updates {
					replica
						.import(&update)
						.map_err(|e| Error::Engine(e.to_string()))?;
				}
			}
		}
		let last_persisted_vv = Some(replica.version_json());
		Ok(Self {
			name,
			inner: AsyncMutex::new(Inner {
				replica,
				pending_updates: Vec::new(),
				last_persisted_vv,
				armed_at: None,
				backoff: persist_debounce,
			}),
			connections: Mutex::new(HashMap::new()),
			ephemeral: TtlEphemeralStore::new(ephemeral_ttl),
			refcount: AtomicU32::new(0),
			idle_since: Mutex::new(None),
			persist_debounce,
			persist_max_debounce,
			destroyed: AtomicBool::new(false),
		})
	}

	#[must_use]
	pub fn is_destroyed(&self) -> bool {
		self.destroyed.load(Ordering::Acquire)
	}

	/// Marks the document destroyed and force-closes every attached
	/// connection with `code`, per §4.4's "surface a fatal document
	/// error, mark isDestroyed, and detach all connections" failure path.
	/// Connections tear down asynchronously through their own read loop;
	/// this only signals them, it does not wait for the detach.
	fn destroy(&self, code: CloseCode) {
		self.destroyed.store(true, Ordering::Release);
		let conns = crate::lock!(self.connections, "document destroy");
		for conn in conns.values() {
			conn.force_close(code);
		}
	}

	pub fn acquire(&self) -> u32 {
		let mut idle_since = crate::lock!(self.idle_since, "document acquire");
		*idle_since = None;
		self.refcount.fetch_add(1, Ordering::AcqRel) + 1
	}

	pub fn release(&self) -> u32 {
		let count = self.refcount.fetch_sub(1, Ordering::AcqRel) - 1;
		if count == 0 {
			let mut idle_since = crate::lock!(self.idle_since, "document release");
			*idle_since = Some(Instant::now());
		}
		count
	}

	#[must_use]
	pub fn refcount(&self) -> u32 {
		self.refcount.load(Ordering::Acquire)
	}

	/// `true` once the document has sat at refcount zero for at least
	/// `idle_unload`. Never reports idle while there are unpersisted
	/// updates, even past the deadline — the registry must not evict a
	/// document that still owes the persistence hook a flush. A destroyed
	/// document is the one exception: its persistence hook has already
	/// exhausted its retry budget, so pending updates can never drain and
	/// waiting for them to would leave it loaded forever.
	pub async fn is_idle_past(&self, idle_unload: Duration) -> bool {
		if self.refcount() != 0 {
			return false;
		}
		if !self.is_destroyed() && self.has_pending_updates().await {
			return false;
		}
		let idle_since = crate::lock!(self.idle_since, "document is_idle_past");
		idle_since.is_some_and(|t| t.elapsed() >= idle_unload)
	}

	pub fn attach(&self, connection: Arc<Connection>) {
		connection.attach(&self.name);
		let mut conns = crate::lock!(self.connections, "document attach");
		conns.insert(connection.id, connection);
	}

	pub fn detach(&self, connection_id: ConnectionId) {
		let mut conns = crate::lock!(self.connections, "document detach");
		if let Some(conn) = conns.remove(&connection_id) {
			conn.detach(&self.name);
		}
		self.ephemeral.remove(connection_id);
	}

	#[must_use]
	pub fn connection_count(&self) -> usize {
		crate::lock!(self.connections, "document connection_count").len()
	}

	/// Applies a remote update and fans it out to every attached
	/// connection except `origin` (origin elision). Returns whether the
	/// update changed the replica's version, matching [`crate::engine::ImportOutcome`].
	///
	/// A rejected import is logged and does not abort the broadcast: the
	/// sending peer may hold dependencies the rest of the document's
	/// connections are still missing, so the update still ships.
	pub async fn apply_update(&self, origin: Option<ConnectionId>, update: &[u8]) -> ClResult<bool> {
		let changed = {
			let mut guard = self.inner.lock().await;
			match guard.replica.import(update) {
				Ok(outcome) => {
					if outcome.changed {
						guard.pending_updates.push(update.to_vec());
						if guard.armed_at.is_none() {
							guard.armed_at = Some(Instant::now());
						}
					}
					outcome.changed
				}
				Err(e) => {
					warn!(document = %self.name, error = %e, "replica rejected update, broadcasting anyway");
					false
				}
			}
		};
		self.broadcast(origin, crate::wire_update(&self.name, update));
		Ok(changed)
	}

	/// Diffs the caller's version vector against the replica and returns
	/// the updates it is missing. A version vector that fails to parse is
	/// treated as empty — the caller gets a full sync rather than an
	/// error, since "send me everything" is always a safe fallback.
	pub async fn sync_updates(&self, from_version: &str) -> ClResult<Vec<Vec<u8>>> {
		let guard = self.inner.lock().await;
		if from_version.is_empty() {
			return guard
				.replica
				.export_from(None)
				.map_err(|e| Error::Engine(e.to_string()));
		}
		match guard.replica.export_from(Some(from_version)) {
			Ok(updates) => Ok(updates),
			Err(e) => {
				warn!(
					document = %self.name,
					error = %e,
					"version vector failed to parse, falling back to a full sync"
				);
				guard
					.replica
					.export_from(None)
					.map_err(|e| Error::Engine(e.to_string()))
			}
		}
	}

	pub fn apply_ephemeral(&self, origin: ConnectionId, payload: Vec<u8>) {
		self.ephemeral.apply(origin, payload.clone());
		self.broadcast(Some(origin), crate::wire_ephemeral(&self.name, &payload));
	}

	#[must_use]
	pub fn ephemeral_snapshot(&self) -> Vec<Vec<u8>> {
		self.ephemeral.snapshot()
	}

	pub fn sweep_ephemeral(&self) {
		self.ephemeral.sweep();
	}

	fn broadcast(&self, origin: Option<ConnectionId>, bytes: Vec<u8>) {
		let conns = crate::lock!(self.connections, "document broadcast");
		for (id, conn) in conns.iter() {
			if Some(*id) == origin {
				continue;
			}
			conn.try_send(bytes.clone());
		}
	}

	/// Returns `true` once the current wait window has elapsed and there
	/// is something pending to flush. The window is `guard.backoff`:
	/// `persist_debounce` on a fresh arm, doubled (capped at
	/// `persist_max_debounce * 3`) after each failed attempt, so a retry
	/// actually waits out its backoff instead of firing again on the next
	/// debounce tick.
	async fn should_flush(&self) -> bool {
		let guard = self.inner.lock().await;
		let Some(armed_at) = guard.armed_at else {
			return false;
		};
		armed_at.elapsed() >= guard.backoff
	}

	/// Attempts to flush pending updates through the persistence hook.
	/// On failure, doubles the backoff (bounded by `persist_max_debounce * 3`)
	/// and leaves `pending_updates`/`armed_at` untouched so the next pass
	/// retries the same batch. Once the backoff is already saturated at
	/// that bound and a retry still fails, the budget is exhausted: the
	/// document is marked destroyed and every attached connection is
	/// force-closed with [`CloseCode::StoreFailure`], per §4.4.
	pub async fn try_flush(&self, persistence: &dyn Persistence) -> ClResult<()> {
		if self.is_destroyed() {
			return Ok(());
		}
		if !self.should_flush().await {
			return Ok(());
		}
		let batch = {
			let guard = self.inner.lock().await;
			guard.pending_updates.clone()
		};
		if batch.is_empty() {
			return Ok(());
		}
		let mut combined = Vec::new();
		for update in &batch {
			combined.extend_from_slice(update);
		}
		match persistence.store(&self.name, &combined).await {
			Ok(()) => {
				let mut guard = self.inner.lock().await;
				guard.pending_updates.clear();
				guard.armed_at = None;
				guard.backoff = self.persist_debounce;
				guard.last_persisted_vv = Some(guard.replica.version_json());
				debug!(document = %self.name, updates = batch.len(), "flushed pending updates");
				Ok(())
			}
			Err(e) => {
				let mut guard = self.inner.lock().await;
				let max = self.persist_max_debounce * 3;
				let exhausted = guard.backoff >= max;
				guard.backoff = (guard.backoff * 2).min(max);
				guard.armed_at = Some(Instant::now());
				warn!(document = %self.name, error = %e, backoff = ?guard.backoff, "persistence store failed, backing off");
				drop(guard);
				if exhausted {
					warn!(document = %self.name, "persistence retry budget exhausted, destroying document");
					self.destroy(CloseCode::StoreFailure);
				}
				Err(Error::Persistence(e.to_string()))
			}
		}
	}

	#[must_use]
	pub async fn version_json(&self) -> String {
		self.inner.lock().await.replica.version_json()
	}

	#[must_use]
	pub async fn has_pending_updates(&self) -> bool {
		!self.inner.lock().await.pending_updates.is_empty()
	}
}

impl std::fmt::Debug for Document {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Document")
			.field("name", &self.name)
			.field("refcount", &self.refcount())
			.field("connections", &self.connection_count())
			.finish()
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;
	use crate::connection::ConnectionState;
	use crate::engine::{EngineError, ImportOutcome, LocalUpdateCallback, Unsubscribe};
	use crate::persistence::PersistenceError;
	use std::sync::atomic::AtomicUsize;

	/// Never rejects an import and never produces anything to export;
	/// this crate's tests only exercise the debounce/backoff state
	/// machine, not real CRDT semantics.
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

	struct CountingPersistence {
		store_calls: AtomicUsize,
	}

	impl CountingPersistence {
		fn new() -> Self {
			Self { store_calls: AtomicUsize::new(0) }
		}
	}

	#[async_trait::async_trait]
	impl Persistence for CountingPersistence {
		async fn load(&self, _name: &DocumentName) -> Result<LoadedDocument, PersistenceError> {
			Ok(LoadedDocument::Absent)
		}
		async fn store(&self, _name: &DocumentName, _updates: &[u8]) -> Result<(), PersistenceError> {
			self.store_calls.fetch_add(1, Ordering::AcqRel);
			Ok(())
		}
	}

	/// Always fails, so `try_flush` has to keep backing off.
	#[derive(Default)]
	struct AlwaysFailPersistence;

	#[async_trait::async_trait]
	impl Persistence for AlwaysFailPersistence {
		async fn load(&self, _name: &DocumentName) -> Result<LoadedDocument, PersistenceError> {
			Ok(LoadedDocument::Absent)
		}
		async fn store(&self, _name: &DocumentName, _updates: &[u8]) -> Result<(), PersistenceError> {
			Err(PersistenceError("storage backend unavailable".to_owned()))
		}
	}

	async fn new_doc(persistence: &dyn Persistence, debounce: Duration, max_debounce: Duration) -> Document {
		Document::load("doc-1".into(), Box::new(StubEngine), persistence, Duration::from_secs(30), debounce, max_debounce)
			.await
			.expect("load never fails for a fresh document")
	}

	#[tokio::test(start_paused = true)]
	async fn debounce_fires_after_window_elapses_and_clears_pending() {
		let persistence = CountingPersistence::new();
		let doc = new_doc(&persistence, Duration::from_millis(10), Duration::from_millis(100)).await;

		doc.apply_update(None, b"u1").await.unwrap();
		assert!(doc.has_pending_updates().await);

		// Before the debounce window elapses, nothing is flushed.
		doc.try_flush(&persistence).await.unwrap();
		assert_eq!(persistence.store_calls.load(Ordering::Acquire), 0);
		assert!(doc.has_pending_updates().await);

		tokio::time::advance(Duration::from_millis(15)).await;
		doc.try_flush(&persistence).await.unwrap();
		assert_eq!(persistence.store_calls.load(Ordering::Acquire), 1);
		assert!(!doc.has_pending_updates().await);
	}

	#[tokio::test(start_paused = true)]
	async fn backoff_exhausts_and_destroys_document_closing_connections() {
		let persistence = AlwaysFailPersistence;
		let debounce = Duration::from_millis(10);
		let max_debounce = Duration::from_millis(20);
		let doc = new_doc(&persistence, debounce, max_debounce).await;

		let (conn, _rx) = Connection::new(8);
		let conn = Arc::new(conn);
		doc.attach(conn.clone());

		doc.apply_update(None, b"u1").await.unwrap();

		// backoff: 10ms -> 20ms -> 40ms -> 60ms (capped at max_debounce*3)
		// -> the next failure at the saturated cap exhausts the budget.
		let max_backoff = max_debounce * 3;
		let mut destroyed = false;
		for _ in 0..10 {
			tokio::time::advance(max_backoff).await;
			let _ = doc.try_flush(&persistence).await;
			if doc.is_destroyed() {
				destroyed = true;
				break;
			}
		}

		assert!(destroyed, "document should be destroyed once backoff saturates and a retry still fails");
		assert!(matches!(
			conn.state(),
			ConnectionState::Closing(CloseCode::StoreFailure)
		));
	}

	#[tokio::test(start_paused = true)]
	async fn destroyed_document_is_idle_once_connections_detach_despite_pending_updates() {
		let persistence = AlwaysFailPersistence;
		let doc = new_doc(&persistence, Duration::from_millis(10), Duration::from_millis(20)).await;
		doc.acquire();
		doc.apply_update(None, b"u1").await.unwrap();

		let max_backoff = Duration::from_millis(20) * 3;
		for _ in 0..10 {
			tokio::time::advance(max_backoff).await;
			let _ = doc.try_flush(&persistence).await;
			if doc.is_destroyed() {
				break;
			}
		}
		assert!(doc.is_destroyed());
		assert!(doc.has_pending_updates().await);

		doc.release();
		tokio::time::advance(Duration::from_secs(60)).await;
		assert!(doc.is_idle_past(Duration::from_secs(30)).await);
	}
}
