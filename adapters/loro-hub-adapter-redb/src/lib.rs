//! [`loro_hub_core::persistence::Persistence`] backed by a single `redb`
//! database file. Keys are `"{document}:{seq}"` within one `updates`
//! table, mirroring the sequence-keyed layout this codebase's ancestry
//! uses for its own CRDT persistence adapter, collapsed from per-tenant
//! files to a single shared file since this hub has no tenant concept.

use async_trait::async_trait;
use loro_hub_core::document::DocumentName;
use loro_hub_core::persistence::{LoadedDocument, Persistence, PersistenceError};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

const TABLE_UPDATES: TableDefinition<&str, &[u8]> = TableDefinition::new("updates");
const TABLE_SEQ: TableDefinition<&str, u64> = TableDefinition::new("seq");

pub struct RedbPersistence {
	db: Arc<Database>,
	seq_cache: std::sync::Mutex<std::collections::HashMap<Box<str>, Arc<AtomicU64>>>,
}

impl RedbPersistence {
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
		let path = path.into();
		let db = Database::create(&path).map_err(|e| PersistenceError(e.to_string()))?;
		{
			let write = db.begin_write().map_err(|e| PersistenceError(e.to_string()))?;
			write
				.open_table(TABLE_UPDATES)
				.map_err(|e| PersistenceError(e.to_string()))?;
			write
				.open_table(TABLE_SEQ)
				.map_err(|e| PersistenceError(e.to_string()))?;
			write.commit().map_err(|e| PersistenceError(e.to_string()))?;
		}
		Ok(Self {
			db: Arc::new(db),
			seq_cache: std::sync::Mutex::new(std::collections::HashMap::new()),
		})
	}

	fn next_seq(&self, name: &DocumentName) -> Result<u64, PersistenceError> {
		let counter = {
			let mut cache = crate_lock(&self.seq_cache);
			cache
				.entry(name.clone())
				.or_insert_with(|| Arc::new(AtomicU64::new(0)))
				.clone()
		};
		if counter.load(Ordering::Acquire) == 0 {
			let read = self.db.begin_read().map_err(|e| PersistenceError(e.to_string()))?;
			let table = read.open_table(TABLE_SEQ).map_err(|e| PersistenceError(e.to_string()))?;
			let stored = table
				.get(name.as_ref())
				.map_err(|e| PersistenceError(e.to_string()))?
				.map(|v| v.value())
				.unwrap_or(0);
			counter.store(stored, Ordering::Release);
		}
		Ok(counter.fetch_add(1, Ordering::AcqRel) + 1)
	}

	fn persist_seq(&self, name: &DocumentName, seq: u64) -> Result<(), PersistenceError> {
		let write = self.db.begin_write().map_err(|e| PersistenceError(e.to_string()))?;
		{
			let mut table = write.open_table(TABLE_SEQ).map_err(|e| PersistenceError(e.to_string()))?;
			table
				.insert(name.as_ref(), seq)
				.map_err(|e| PersistenceError(e.to_string()))?;
		}
		write.commit().map_err(|e| PersistenceError(e.to_string()))
	}
}

fn crate_lock<T>(m: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
	match m.lock() {
		Ok(g) => g,
		Err(poisoned) => poisoned.into_inner(),
	}
}

fn make_key(name: &str, seq: u64) -> String {
	format!("{name}:{seq:020}")
}

#[async_trait]
impl Persistence for RedbPersistence {
	async fn load(&self, name: &DocumentName) -> Result<LoadedDocument, PersistenceError> {
		let db = self.db.clone();
		let prefix = format!("{name}:");
		let updates = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<u8>>, PersistenceError> {
			let read = db.begin_read().map_err(|e| PersistenceError(e.to_string()))?;
			let table = read.open_table(TABLE_UPDATES).map_err(|e| PersistenceError(e.to_string()))?;
			let mut out = Vec::new();
			let range = table
				.range(prefix.as_str()..)
				.map_err(|e| PersistenceError(e.to_string()))?;
			for entry in range {
				let (key, value) = entry.map_err(|e| PersistenceError(e.to_string()))?;
				if !key.value().starts_with(&prefix) {
					break;
				}
				out.push(value.value().to_vec());
			}
			Ok(out)
		})
		.await
		.map_err(|e| PersistenceError(e.to_string()))??;

		if updates.is_empty() {
			Ok(LoadedDocument::Absent)
		} else {
			debug!(document = %name, count = updates.len(), "loaded persisted updates");
			Ok(LoadedDocument::Updates(updates))
		}
	}

	async fn store(&self, name: &DocumentName, updates: &[u8]) -> Result<(), PersistenceError> {
		let seq = self.next_seq(name)?;
		let key = make_key(name, seq);
		let db = self.db.clone();
		let payload = updates.to_vec();
		tokio::task::spawn_blocking(move || -> Result<(), PersistenceError> {
			let write = db.begin_write().map_err(|e| PersistenceError(e.to_string()))?;
			{
				let mut table = write.open_table(TABLE_UPDATES).map_err(|e| PersistenceError(e.to_string()))?;
				table
					.insert(key.as_str(), payload.as_slice())
					.map_err(|e| PersistenceError(e.to_string()))?;
			}
			write.commit().map_err(|e| PersistenceError(e.to_string()))
		})
		.await
		.map_err(|e| PersistenceError(e.to_string()))??;
		self.persist_seq(name, seq)
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn store_then_load_returns_updates_in_order() {
		let dir = tempfile::tempdir().unwrap();
		let persistence = RedbPersistence::open(dir.path().join("hub.redb")).unwrap();
		let name: DocumentName = "doc-a".into();

		persistence.store(&name, b"update-1").await.unwrap();
		persistence.store(&name, b"update-2").await.unwrap();

		let loaded = persistence.load(&name).await.unwrap();
		match loaded {
			LoadedDocument::Updates(updates) => {
				assert_eq!(updates, vec![b"update-1".to_vec(), b"update-2".to_vec()]);
			}
			other => panic!("expected Updates, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn unknown_document_is_absent() {
		let dir = tempfile::tempdir().unwrap();
		let persistence = RedbPersistence::open(dir.path().join("hub.redb")).unwrap();
		let loaded = persistence.load(&"missing".into()).await.unwrap();
		assert!(matches!(loaded, LoadedDocument::Absent));
	}
}
