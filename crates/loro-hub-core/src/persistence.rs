//! The durable-storage hook a [`crate::document::Document`] calls through,
//! never touches directly.

use crate::document::DocumentName;
use async_trait::async_trait;
use std::fmt;

#[derive(Debug, Clone)]
pub enum LoadedDocument {
	/// A sequence of updates to replay in order.
	Updates(Vec<Vec<u8>>),
	/// A single compacted snapshot.
	Snapshot(Vec<u8>),
	/// Nothing stored yet; the document starts empty.
	Absent,
}

#[derive(Debug, Clone)]
pub struct PersistenceError(pub String);

impl fmt::Display for PersistenceError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl std::error::Error for PersistenceError {}

#[async_trait]
pub trait Persistence: Send + Sync {
	async fn load(&self, name: &DocumentName) -> Result<LoadedDocument, PersistenceError>;
	async fn store(&self, name: &DocumentName, updates: &[u8]) -> Result<(), PersistenceError>;
}

/// Persists nothing and reports every document as unseen. Useful for
/// tests and for running the hub purely as an in-memory relay.
#[derive(Debug, Default)]
pub struct NullPersistence;

#[async_trait]
impl Persistence for NullPersistence {
	async fn load(&self, _name: &DocumentName) -> Result<LoadedDocument, PersistenceError> {
		Ok(LoadedDocument::Absent)
	}

	async fn store(&self, _name: &DocumentName, _updates: &[u8]) -> Result<(), PersistenceError> {
		Ok(())
	}
}
