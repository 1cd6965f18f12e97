//! The capability interface a CRDT engine must satisfy to back a document.
//!
//! Deliberately small and synchronous: the engine itself is not expected to
//! suspend. An adapter that cannot satisfy this trait fails at construction
//! time, not via a runtime capability probe.

use std::fmt;

pub type LocalUpdateCallback = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Handle returned by `subscribe_local_updates`; dropping it, or calling
/// `unsubscribe`, stops delivery.
pub trait Unsubscribe: Send {
	fn unsubscribe(self: Box<Self>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOutcome {
	/// Whether applying the update advanced the document's version.
	pub changed: bool,
}

#[derive(Debug, Clone)]
pub struct EngineError(pub String);

impl fmt::Display for EngineError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl std::error::Error for EngineError {}

/// One per loaded [`crate::document::Document`]. Not `Clone`; the document
/// owns exactly one engine instance behind its persistence lock.
pub trait CrdtEngine: Send + Sync {
	/// Applies a remote update. Malformed bytes are reported, not panicked
	/// on; the caller logs and continues broadcasting to other peers.
	fn import(&self, bytes: &[u8]) -> Result<ImportOutcome, EngineError>;

	/// Exports updates not reflected in `from` (the caller's version
	/// vector, as produced by [`CrdtEngine::version_json`]), or every
	/// update this engine holds if `from` is `None`.
	fn export_from(&self, from: Option<&str>) -> Result<Vec<Vec<u8>>, EngineError>;

	/// The engine's current version vector, serialized as canonical JSON.
	fn version_json(&self) -> String;

	/// Registers a callback fired for every update originating from a
	/// local `import` or local mutation (never for updates re-exported
	/// from a sync batch).
	fn subscribe_local_updates(&self, callback: LocalUpdateCallback) -> Box<dyn Unsubscribe>;
}
