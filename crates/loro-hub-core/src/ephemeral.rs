//! Presence/awareness relay: last-writer-wins per key, never persisted,
//! expired on a TTL sweep. The hub relays these payloads opaquely — it
//! never inspects their contents, only their key and arrival time.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Identifies one presence slot within a document — typically a
/// connection id, so a disconnecting peer's cursor disappears once its
/// entry ages out.
pub type EphemeralKey = u64;

pub trait EphemeralStore: Send + Sync {
	/// Records `payload` under `key`, overwriting whatever was previously
	/// stored there and resetting its expiry.
	fn apply(&self, key: EphemeralKey, payload: Vec<u8>);

	/// Removes a key immediately, e.g. on graceful disconnect.
	fn remove(&self, key: EphemeralKey);

	/// All non-expired payloads, for replaying state to a newly attached
	/// connection.
	fn snapshot(&self) -> Vec<Vec<u8>>;

	/// Drops entries older than the store's TTL. Called periodically by
	/// the document's background sweep task.
	fn sweep(&self);
}

struct Entry {
	payload: Vec<u8>,
	expires_at: Instant,
}

/// Default in-process implementation: a single `Mutex<HashMap<..>>`
/// guarding entries, matching the registry idiom this codebase's
/// ancestry uses for its own connection-indexed broadcast maps.
pub struct TtlEphemeralStore {
	ttl: Duration,
	entries: Mutex<HashMap<EphemeralKey, Entry>>,
}

impl TtlEphemeralStore {
	#[must_use]
	pub fn new(ttl: Duration) -> Self {
		Self {
			ttl,
			entries: Mutex::new(HashMap::new()),
		}
	}
}

impl Default for TtlEphemeralStore {
	fn default() -> Self {
		Self::new(Duration::from_secs(30))
	}
}

impl EphemeralStore for TtlEphemeralStore {
	fn apply(&self, key: EphemeralKey, payload: Vec<u8>) {
		let expires_at = Instant::now() + self.ttl;
		let mut entries = crate::lock!(self.entries, "ephemeral store apply");
		entries.insert(key, Entry { payload, expires_at });
	}

	fn remove(&self, key: EphemeralKey) {
		let mut entries = crate::lock!(self.entries, "ephemeral store remove");
		entries.remove(&key);
	}

	fn snapshot(&self) -> Vec<Vec<u8>> {
		let now = Instant::now();
		let entries = crate::lock!(self.entries, "ephemeral store snapshot");
		entries
			.values()
			.filter(|e| e.expires_at > now)
			.map(|e| e.payload.clone())
			.collect()
	}

	fn sweep(&self) {
		let now = Instant::now();
		let mut entries = crate::lock!(self.entries, "ephemeral store sweep");
		entries.retain(|_, e| e.expires_at > now);
	}
}
