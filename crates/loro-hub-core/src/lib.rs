//! Connection, document, registry, and sync engine for the Loro
//! collaboration hub. The wire format lives in `loro_hub_wire`; this
//! crate is where documents actually get synced, broadcast, and
//! persisted.

pub mod auth;
pub mod config;
pub mod connection;
pub mod document;
pub mod engine;
pub mod ephemeral;
pub mod error;
pub mod persistence;
pub mod registry;

pub use error::{ClResult, Error};
pub use loro_hub_wire as wire;

use loro_hub_wire::Frame;

pub(crate) fn wire_update(document: &str, update: &[u8]) -> Vec<u8> {
	Frame::LoroUpdate {
		document: document.to_owned(),
		update: update.to_owned(),
	}
	.encode()
}

pub(crate) fn wire_ephemeral(document: &str, payload: &[u8]) -> Vec<u8> {
	Frame::LoroEphemeral {
		document: document.to_owned(),
		payload: payload.to_owned(),
	}
	.encode()
}
