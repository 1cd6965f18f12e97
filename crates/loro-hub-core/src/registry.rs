//! Load-on-demand document registry: reference counted, coalesces
//! concurrent loads of the same document, and evicts idle documents on a
//! background sweep.

use crate::config::HubConfig;
use crate::document::{Document, DocumentName};
use crate::engine::CrdtEngine;
use crate::error::ClResult;
use crate::persistence::Persistence;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Constructs a fresh, empty engine for a document about to be loaded.
/// Boxed rather than generic so the registry stays adapter-agnostic.
pub type EngineFactory = Arc<dyn Fn() -> Box<dyn CrdtEngine> + Send + Sync>;

/// A slot that is either still loading or holds the loaded document.
/// `OnceCell::get_or_try_init` is what coalesces concurrent `acquire`
/// calls for the same name onto a single load.
type Slot = Arc<OnceCell<Arc<Document>>>;

pub struct Registry {
	slots: Mutex<HashMap<DocumentName, Slot>>,
	persistence: Arc<dyn Persistence>,
	engine_factory: EngineFactory,
	config: HubConfig,
}

impl Registry {
	#[must_use]
	pub fn new(persistence: Arc<dyn Persistence>, engine_factory: EngineFactory, config: HubConfig) -> Self {
		Self {
			slots: Mutex::new(HashMap::new()),
			persistence,
			engine_factory,
			config,
		}
	}

	/// Loads the document if necessary (coalescing concurrent callers for
	/// the same name onto one load) and bumps its reference count. The
	/// caller must call [`Registry::release`] exactly once per successful
	/// `acquire`.
	pub async fn acquire(&self, name: &str) -> ClResult<Arc<Document>> {
		let slot = {
			let mut slots = crate::lock!(self.slots, "registry acquire");
			slots
				.entry(name.into())
				.or_insert_with(|| Arc::new(OnceCell::new()))
				.clone()
		};

		let doc = slot
			.get_or_try_init(|| async {
				info!(document = name, "loading document");
				Document::load(
					name.into(),
					(self.engine_factory)(),
					self.persistence.as_ref(),
					self.config.ephemeral_ttl,
					self.config.persist_debounce,
					self.config.persist_max_debounce,
				)
				.await
				.map(Arc::new)
			})
			.await?;

		doc.acquire();
		Ok(doc.clone())
	}

	pub fn release(&self, document: &Document) {
		document.release();
	}

	/// Evicts documents idle past `config.idle_unload` with nothing
	/// pending. Intended to run on a periodic `tokio::time::interval` in
	/// the hosting binary.
	pub async fn sweep_idle(&self) {
		let names: Vec<DocumentName> = {
			let slots = crate::lock!(self.slots, "registry sweep_idle names");
			slots.keys().cloned().collect()
		};
		for name in names {
			let slot = {
				let slots = crate::lock!(self.slots, "registry sweep_idle lookup");
				slots.get(&name).cloned()
			};
			let Some(slot) = slot else { continue };
			let Some(doc) = slot.get() else { continue };
			if doc.is_idle_past(self.config.idle_unload).await {
				let mut slots = crate::lock!(self.slots, "registry sweep_idle evict");
				// Re-check under the lock: a concurrent acquire may have
				// raced us between the idle check and taking this lock.
				if doc.refcount() == 0 {
					slots.remove(&name);
					info!(document = %name, "unloaded idle document");
				}
			}
		}
	}

	/// Flushes every loaded document's pending updates through the
	/// persistence hook. Intended to run alongside `sweep_idle` on the
	/// same interval.
	pub async fn flush_all(&self) {
		let docs: Vec<Arc<Document>> = {
			let slots = crate::lock!(self.slots, "registry flush_all");
			slots.values().filter_map(|s| s.get().cloned()).collect()
		};
		for doc in docs {
			if doc.is_destroyed() {
				continue;
			}
			if let Err(e) = doc.try_flush(self.persistence.as_ref()).await {
				if doc.is_destroyed() {
					warn!(document = %doc.name, error = %e, "flush retry budget exhausted, document destroyed");
				} else {
					warn!(document = %doc.name, error = %e, "flush failed, will retry");
				}
			}
		}
	}

	/// Sweeps every loaded document's ephemeral store, dropping expired
	/// presence entries. Intended to run alongside `sweep_idle`.
	pub fn sweep_ephemeral(&self) {
		let docs: Vec<Arc<Document>> = {
			let slots = crate::lock!(self.slots, "registry sweep_ephemeral");
			slots.values().filter_map(|s| s.get().cloned()).collect()
		};
		for doc in docs {
			doc.sweep_ephemeral();
		}
	}

	#[must_use]
	pub fn loaded_count(&self) -> usize {
		crate::lock!(self.slots, "registry loaded_count").len()
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;
	use crate::engine::{EngineError, ImportOutcome, LocalUpdateCallback, Unsubscribe};
	use crate::persistence::{LoadedDocument, PersistenceError};
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

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

	/// Counts how many times `load` actually ran, so a test can assert
	/// concurrent `acquire` calls for the same name coalesced onto one.
	struct CountingLoadPersistence {
		loads: AtomicUsize,
	}

	#[async_trait::async_trait]
	impl Persistence for CountingLoadPersistence {
		async fn load(&self, _name: &DocumentName) -> Result<LoadedDocument, PersistenceError> {
			self.loads.fetch_add(1, Ordering::AcqRel);
			// Give concurrent `acquire` callers a chance to race in.
			tokio::time::sleep(Duration::from_millis(20)).await;
			Ok(LoadedDocument::Absent)
		}
		async fn store(&self, _name: &DocumentName, _updates: &[u8]) -> Result<(), PersistenceError> {
			Ok(())
		}
	}

	fn test_registry(persistence: Arc<dyn Persistence>, config: HubConfig) -> Registry {
		Registry::new(
			persistence,
			Arc::new(|| -> Box<dyn CrdtEngine> { Box::new(StubEngine) }),
			config,
		)
	}

	#[tokio::test]
	async fn concurrent_acquire_coalesces_onto_a_single_load() {
		let persistence = Arc::new(CountingLoadPersistence { loads: AtomicUsize::new(0) });
		let registry = Arc::new(test_registry(persistence.clone(), HubConfig::default()));

		let mut handles = Vec::new();
		for _ in 0..8 {
			let registry = registry.clone();
			handles.push(tokio::spawn(async move { registry.acquire("doc-1").await.unwrap() }));
		}
		let mut docs = Vec::new();
		for handle in handles {
			docs.push(handle.await.unwrap());
		}

		assert_eq!(persistence.loads.load(Ordering::Acquire), 1);
		assert_eq!(registry.loaded_count(), 1);
		assert_eq!(docs[0].refcount(), 8);
		for doc in &docs {
			assert!(Arc::ptr_eq(doc, &docs[0]));
		}
	}

	#[tokio::test(start_paused = true)]
	async fn idle_unload_refuses_to_evict_while_updates_are_pending() {
		let persistence: Arc<dyn Persistence> = Arc::new(CountingLoadPersistence { loads: AtomicUsize::new(0) });
		let mut config = HubConfig::default();
		config.idle_unload = Duration::from_millis(10);
		let registry = test_registry(persistence, config);

		let doc = registry.acquire("doc-1").await.unwrap();
		doc.apply_update(None, b"u1").await.unwrap();
		registry.release(&doc);

		tokio::time::advance(Duration::from_secs(1)).await;
		registry.sweep_idle().await;

		assert_eq!(registry.loaded_count(), 1, "document with pending updates must not be evicted");
	}

	#[tokio::test(start_paused = true)]
	async fn idle_unload_evicts_once_refcount_and_pending_updates_are_both_zero() {
		let persistence: Arc<dyn Persistence> = Arc::new(CountingLoadPersistence { loads: AtomicUsize::new(0) });
		let mut config = HubConfig::default();
		config.idle_unload = Duration::from_millis(10);
		let registry = test_registry(persistence, config);

		let doc = registry.acquire("doc-1").await.unwrap();
		registry.release(&doc);

		tokio::time::advance(Duration::from_secs(1)).await;
		registry.sweep_idle().await;

		assert_eq!(registry.loaded_count(), 0);
	}
}
