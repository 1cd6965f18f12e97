//! [`loro_hub_core::engine::CrdtEngine`] backed by the real `loro` CRDT
//! document.

use loro::{ExportMode, LoroDoc, Subscription, VersionVector};
use loro_hub_core::engine::{CrdtEngine, EngineError, ImportOutcome, LocalUpdateCallback, Unsubscribe};

pub struct LoroEngine {
	doc: LoroDoc,
}

impl LoroEngine {
	#[must_use]
	pub fn new() -> Self {
		Self { doc: LoroDoc::new() }
	}
}

impl Default for LoroEngine {
	fn default() -> Self {
		Self::new()
	}
}

struct LoroUnsubscribe(Subscription);

impl Unsubscribe for LoroUnsubscribe {
	fn unsubscribe(self: Box<Self>) {
		self.0.unsubscribe();
	}
}

impl CrdtEngine for LoroEngine {
	fn import(&self, bytes: &[u8]) -> Result<ImportOutcome, EngineError> {
		let status = self
			.doc
			.import(bytes)
			.map_err(|e| EngineError(e.to_string()))?;
		Ok(ImportOutcome {
			changed: !status.success.is_empty(),
		})
	}

	fn export_from(&self, from: Option<&str>) -> Result<Vec<Vec<u8>>, EngineError> {
		let mode = match from {
			None => ExportMode::all_updates(),
			Some(json) => {
				let vv: VersionVector = serde_json::from_str(json)
					.map_err(|e| EngineError(format!("invalid version vector: {e}")))?;
				ExportMode::updates(&vv)
			}
		};
		let bytes = self
			.doc
			.export(mode)
			.map_err(|e| EngineError(e.to_string()))?;
		Ok(if bytes.is_empty() { vec![] } else { vec![bytes] })
	}

	fn version_json(&self) -> String {
		let vv = self.doc.oplog_vv();
		// A version vector always serializes; any failure here indicates
		// a bug in the engine itself, not caller input.
		serde_json::to_string(&vv).unwrap_or_else(|_| "{}".to_owned())
	}

	fn subscribe_local_updates(&self, callback: LocalUpdateCallback) -> Box<dyn Unsubscribe> {
		let sub = self.doc.subscribe_local_update(Box::new(move |bytes: &Vec<u8>| {
			callback(bytes);
			true
		}));
		Box::new(LoroUnsubscribe(sub))
	}
}
