//! Message envelope: `varstring(documentName) varuint(kind) payload`.
//!
//! One physical WebSocket binary frame carries exactly one [`Frame`]. The
//! five message kinds below are the complete vocabulary between hub and
//! client; adding a sixth is a wire-format change, not an extension point.

use crate::codec::{DecodeError, Decoder, Encoder};
use std::fmt;

/// Maximum accepted document name length, in UTF-8 bytes.
pub const MAX_DOCUMENT_NAME_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum MessageKind {
	Auth = 0,
	LoroUpdate = 1,
	LoroSyncRequest = 2,
	LoroSyncBatch = 3,
	LoroEphemeral = 4,
}

impl MessageKind {
	fn from_tag(tag: u64) -> Option<Self> {
		match tag {
			0 => Some(Self::Auth),
			1 => Some(Self::LoroUpdate),
			2 => Some(Self::LoroSyncRequest),
			3 => Some(Self::LoroSyncBatch),
			4 => Some(Self::LoroEphemeral),
			_ => None,
		}
	}

	#[must_use]
	pub fn tag(self) -> u64 {
		self as u64
	}
}

/// `Auth`'s reply sub-format's admission code (server→client only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum AuthCode {
	PermissionDenied = 0,
	Authenticated = 1,
}

impl AuthCode {
	fn from_tag(tag: u64) -> Option<Self> {
		match tag {
			0 => Some(Self::PermissionDenied),
			1 => Some(Self::Authenticated),
			_ => None,
		}
	}

	#[must_use]
	pub fn tag(self) -> u64 {
		self as u64
	}
}

/// `Auth` carries a different payload depending on direction: a client
/// asking to be admitted to a document, or the hub's admission decision
/// for that request. The two shapes are not distinguishable from the type
/// tag alone — only from which side of the socket is doing the reading,
/// which is why [`Frame::decode`] takes a [`Role`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthPayload {
	Request { token: String },
	Reply { code: AuthCode, reason: String },
}

/// Which side of the socket is decoding a frame. `Auth` is the only
/// message kind whose payload shape depends on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
	/// Decoding frames received by the hub: `Auth` carries a request.
	Server,
	/// Decoding frames received by a client: `Auth` carries a reply.
	Client,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
	/// Sent client-to-server immediately after the transport connects, or
	/// the hub's reply to it.
	Auth { document: String, payload: AuthPayload },
	/// A single CRDT update, relayed in either direction.
	LoroUpdate { document: String, update: Vec<u8> },
	/// Client asks the hub to diff its state against `version`, a
	/// CRDT-engine-supplied version vector serialized as JSON.
	LoroSyncRequest { document: String, version: String },
	/// Server's reply to a sync request: zero or more updates the
	/// requester is missing.
	LoroSyncBatch { document: String, updates: Vec<Vec<u8>> },
	/// Opaque, non-persisted presence payload (e.g. cursor position).
	LoroEphemeral { document: String, payload: Vec<u8> },
}

impl Frame {
	#[must_use]
	pub fn document(&self) -> &str {
		match self {
			Frame::Auth { document, .. }
			| Frame::LoroUpdate { document, .. }
			| Frame::LoroSyncRequest { document, .. }
			| Frame::LoroSyncBatch { document, .. }
			| Frame::LoroEphemeral { document, .. } => document,
		}
	}

	#[must_use]
	pub fn kind(&self) -> MessageKind {
		match self {
			Frame::Auth { .. } => MessageKind::Auth,
			Frame::LoroUpdate { .. } => MessageKind::LoroUpdate,
			Frame::LoroSyncRequest { .. } => MessageKind::LoroSyncRequest,
			Frame::LoroSyncBatch { .. } => MessageKind::LoroSyncBatch,
			Frame::LoroEphemeral { .. } => MessageKind::LoroEphemeral,
		}
	}

	#[must_use]
	pub fn encode(&self) -> Vec<u8> {
		let mut enc = Encoder::new();
		enc.write_str(self.document());
		enc.write_varuint(self.kind().tag());
		match self {
			Frame::Auth { payload: AuthPayload::Request { token }, .. } => enc.write_str(token),
			Frame::Auth { payload: AuthPayload::Reply { code, reason }, .. } => {
				enc.write_varuint(code.tag());
				enc.write_str(reason);
			}
			Frame::LoroUpdate { update, .. } => enc.write_bytes(update),
			Frame::LoroSyncRequest { version, .. } => enc.write_str(version),
			Frame::LoroSyncBatch { updates, .. } => {
				enc.write_varuint(updates.len() as u64);
				for update in updates {
					enc.write_bytes(update);
				}
			}
			Frame::LoroEphemeral { payload, .. } => enc.write_bytes(payload),
		}
		enc.into_vec()
	}

	pub fn decode(bytes: &[u8], role: Role) -> Result<Self, FrameError> {
		let mut dec = Decoder::new(bytes);
		let document = dec.read_str()?.to_owned();
		if document.is_empty() {
			return Err(FrameError::EmptyDocumentName);
		}
		if document.len() > MAX_DOCUMENT_NAME_LEN {
			return Err(FrameError::DocumentNameTooLong(document.len()));
		}
		let tag = dec.read_varuint()?;
		let kind = MessageKind::from_tag(tag).ok_or(FrameError::UnknownKind(tag))?;

		let frame = match kind {
			MessageKind::Auth => Frame::Auth {
				document,
				payload: match role {
					Role::Server => AuthPayload::Request { token: dec.read_str()?.to_owned() },
					Role::Client => {
						let tag = dec.read_varuint()?;
						let code = AuthCode::from_tag(tag).ok_or(FrameError::UnknownAuthCode(tag))?;
						AuthPayload::Reply { code, reason: dec.read_str()?.to_owned() }
					}
				},
			},
			MessageKind::LoroUpdate => Frame::LoroUpdate {
				document,
				update: dec.read_bytes()?.to_vec(),
			},
			MessageKind::LoroSyncRequest => Frame::LoroSyncRequest {
				document,
				version: dec.read_str()?.to_owned(),
			},
			MessageKind::LoroSyncBatch => {
				let count = dec.read_varuint()?;
				let mut updates = Vec::with_capacity(count.min(4096) as usize);
				for _ in 0..count {
					updates.push(dec.read_bytes()?.to_vec());
				}
				Frame::LoroSyncBatch { document, updates }
			}
			MessageKind::LoroEphemeral => Frame::LoroEphemeral {
				document,
				payload: dec.read_bytes()?.to_vec(),
			},
		};

		if !dec.is_empty() {
			return Err(FrameError::TrailingBytes(dec.remaining()));
		}

		Ok(frame)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
	Decode(DecodeError),
	EmptyDocumentName,
	DocumentNameTooLong(usize),
	UnknownKind(u64),
	UnknownAuthCode(u64),
	TrailingBytes(usize),
}

impl From<DecodeError> for FrameError {
	fn from(value: DecodeError) -> Self {
		FrameError::Decode(value)
	}
}

impl fmt::Display for FrameError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FrameError::Decode(e) => write!(f, "{e}"),
			FrameError::EmptyDocumentName => write!(f, "document name is empty"),
			FrameError::DocumentNameTooLong(len) => {
				write!(f, "document name is {len} bytes, exceeds {MAX_DOCUMENT_NAME_LEN}")
			}
			FrameError::UnknownKind(tag) => write!(f, "unknown message kind tag {tag}"),
			FrameError::UnknownAuthCode(tag) => write!(f, "unknown auth reply code {tag}"),
			FrameError::TrailingBytes(n) => write!(f, "{n} trailing bytes after frame"),
		}
	}
}

impl std::error::Error for FrameError {}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	fn roundtrip_as(frame: Frame, role: Role) {
		let bytes = frame.encode();
		assert_eq!(Frame::decode(&bytes, role).unwrap(), frame);
	}

	fn roundtrip(frame: Frame) {
		roundtrip_as(frame, Role::Server);
	}

	#[test]
	fn auth_request_roundtrip() {
		roundtrip_as(
			Frame::Auth {
				document: "doc-1".into(),
				payload: AuthPayload::Request { token: "jwt.token.value".into() },
			},
			Role::Server,
		);
	}

	#[test]
	fn auth_reply_roundtrip() {
		roundtrip_as(
			Frame::Auth {
				document: "doc-1".into(),
				payload: AuthPayload::Reply { code: AuthCode::Authenticated, reason: String::new() },
			},
			Role::Client,
		);
		roundtrip_as(
			Frame::Auth {
				document: "doc-1".into(),
				payload: AuthPayload::Reply {
					code: AuthCode::PermissionDenied,
					reason: "token expired".into(),
				},
			},
			Role::Client,
		);
	}

	#[test]
	fn update_roundtrip() {
		roundtrip(Frame::LoroUpdate {
			document: "doc-1".into(),
			update: vec![1, 2, 3, 4, 5],
		});
	}

	#[test]
	fn sync_request_roundtrip() {
		roundtrip(Frame::LoroSyncRequest {
			document: "doc-1".into(),
			version: "{\"1\":4,\"2\":7}".into(),
		});
	}

	#[test]
	fn sync_batch_roundtrip_including_empty() {
		roundtrip(Frame::LoroSyncBatch {
			document: "doc-1".into(),
			updates: vec![],
		});
		roundtrip(Frame::LoroSyncBatch {
			document: "doc-1".into(),
			updates: vec![vec![1], vec![2, 2], vec![]],
		});
	}

	#[test]
	fn ephemeral_roundtrip() {
		roundtrip(Frame::LoroEphemeral {
			document: "doc-1".into(),
			payload: vec![9, 9, 9],
		});
	}

	#[test]
	fn empty_document_name_is_rejected() {
		let mut enc = Encoder::new();
		enc.write_str("");
		enc.write_varuint(MessageKind::Auth.tag());
		enc.write_str("tok");
		assert_eq!(
			Frame::decode(&enc.into_vec(), Role::Server),
			Err(FrameError::EmptyDocumentName)
		);
	}

	#[test]
	fn unknown_kind_is_rejected() {
		let mut enc = Encoder::new();
		enc.write_str("doc");
		enc.write_varuint(99);
		assert_eq!(
			Frame::decode(&enc.into_vec(), Role::Server),
			Err(FrameError::UnknownKind(99))
		);
	}

	#[test]
	fn unknown_auth_code_is_rejected() {
		let mut enc = Encoder::new();
		enc.write_str("doc");
		enc.write_varuint(MessageKind::Auth.tag());
		enc.write_varuint(7);
		enc.write_str("reason");
		assert_eq!(
			Frame::decode(&enc.into_vec(), Role::Client),
			Err(FrameError::UnknownAuthCode(7))
		);
	}

	#[test]
	fn trailing_bytes_are_rejected() {
		let mut enc = Encoder::new();
		enc.write_str("doc");
		enc.write_varuint(MessageKind::Auth.tag());
		enc.write_str("tok");
		enc.write_raw(b"extra");
		assert!(matches!(
			Frame::decode(&enc.into_vec(), Role::Server),
			Err(FrameError::TrailingBytes(_))
		));
	}

	#[test]
	fn document_name_too_long_is_rejected() {
		let mut enc = Encoder::new();
		enc.write_str(&"x".repeat(MAX_DOCUMENT_NAME_LEN + 1));
		enc.write_varuint(MessageKind::Auth.tag());
		enc.write_str("tok");
		assert!(matches!(
			Frame::decode(&enc.into_vec(), Role::Server),
			Err(FrameError::DocumentNameTooLong(_))
		));
	}
}
