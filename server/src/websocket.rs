//! WebSocket upgrade and per-connection frame dispatch.
//!
//! One physical connection may multiplex several documents: each frame
//! names its own document, and a connection only gains access to one
//! after an `Auth` frame for it is accepted. Mirrors the reader/writer
//! task pair raced with `tokio::select!` that this codebase's ancestry
//! uses for its own CRDT and realtime-database WebSocket handlers.

use crate::state::App;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use loro_hub_core::connection::{CloseCode, Connection, ConnectionState};
use loro_hub_core::document::Document;
use loro_hub_wire::{AuthCode, AuthPayload, Frame, Role};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub async fn ws_handler(State(app): State<App>, ws: WebSocketUpgrade) -> impl IntoResponse {
	ws.on_upgrade(move |socket| handle_socket(app, socket))
}

struct Attachment {
	can_write: bool,
	document: Arc<Document>,
}

async fn handle_socket(app: App, socket: WebSocket) {
	let (connection, mut outbound_rx) = Connection::new(app.config.hub.outbound_queue_limit);
	let connection = Arc::new(connection);
	let (mut ws_tx, mut ws_rx) = socket.split();

	let writer = tokio::spawn(async move {
		while let Some(bytes) = outbound_rx.recv().await {
			if ws_tx.send(Message::Binary(bytes.into())).await.is_err() {
				break;
			}
		}
	});

	let mut attachments: HashMap<Box<str>, Attachment> = HashMap::new();

	loop {
		let msg = tokio::select! {
			msg = ws_rx.next() => msg,
			() = connection.closed_signal() => {
				debug!(connection = connection.id, "connection force-closed by a document");
				break;
			}
		};
		let Some(msg) = msg else { break };
		let bytes = match msg {
			Ok(Message::Binary(bytes)) => bytes,
			Ok(Message::Close(_)) => break,
			Ok(_) => continue,
			Err(e) => {
				warn!(connection = connection.id, error = %e, "websocket read error");
				break;
			}
		};

		if bytes.len() > app.config.hub.max_frame_size {
			debug!(
				connection = connection.id,
				size = bytes.len(),
				limit = app.config.hub.max_frame_size,
				"closing connection on oversize frame"
			);
			connection.mark_closing(CloseCode::ProtocolError);
			break;
		}

		let frame = match Frame::decode(&bytes, Role::Server) {
			Ok(frame) => frame,
			Err(e) => {
				debug!(connection = connection.id, error = %e, "closing connection on malformed frame");
				connection.mark_closing(CloseCode::ProtocolError);
				break;
			}
		};

		if frame.document().len() > app.config.hub.max_document_name_len {
			debug!(connection = connection.id, "closing connection on oversize document name");
			connection.mark_closing(CloseCode::ProtocolError);
			break;
		}

		if let Err(code) = handle_frame(&app, &connection, &mut attachments, frame).await {
			connection.mark_closing(code);
		}

		if matches!(connection.state(), ConnectionState::Closing(_)) {
			break;
		}
	}

	for (name, attachment) in attachments {
		attachment.document.detach(connection.id);
		app.registry.release(&attachment.document);
		debug!(connection = connection.id, document = %name, "detached on disconnect");
	}
	connection.mark_closed();
	writer.abort();
	info!(connection = connection.id, "connection closed");
}

async fn handle_frame(
	app: &App,
	connection: &Arc<Connection>,
	attachments: &mut HashMap<Box<str>, Attachment>,
	frame: Frame,
) -> Result<(), CloseCode> {
	match frame {
		Frame::Auth { document, payload: AuthPayload::Request { token } } => {
			let doc_name: loro_hub_core::document::DocumentName = document.as_str().into();
			let decision = app.authenticator.authenticate(&doc_name, &token).await;
			if decision.is_denied() {
				connection.try_send(
					Frame::Auth {
						document,
						payload: AuthPayload::Reply {
							code: AuthCode::PermissionDenied,
							reason: "access denied".to_owned(),
						},
					}
					.encode(),
				);
				// Fatal to this document attachment only; the socket and
				// any other document already attached stay open.
				return Ok(());
			}
			let doc = app
				.registry
				.acquire(&document)
				.await
				.map_err(|_| CloseCode::InternalError)?;
			doc.attach(connection.clone());
			connection.try_send(
				Frame::Auth {
					document: document.clone(),
					payload: AuthPayload::Reply { code: AuthCode::Authenticated, reason: String::new() },
				}
				.encode(),
			);
			for payload in doc.ephemeral_snapshot() {
				connection.try_send(loro_hub_wire::Frame::LoroEphemeral {
					document: document.clone(),
					payload,
				}.encode());
			}
			attachments.insert(
				document.into_boxed_str(),
				Attachment { can_write: decision.can_write(), document: doc },
			);
			Ok(())
		}
		Frame::Auth { payload: AuthPayload::Reply { .. }, .. } => {
			// Only the hub emits Auth replies; receiving one is a protocol violation.
			Err(CloseCode::ProtocolError)
		}
		Frame::LoroUpdate { document, update } => {
			let Some(attachment) = attachments.get(document.as_str()) else {
				return Err(CloseCode::Unauthorized);
			};
			if !attachment.can_write {
				return Err(CloseCode::WriteDenied);
			}
			attachment
				.document
				.apply_update(Some(connection.id), &update)
				.await
				.map_err(|_| CloseCode::InternalError)?;
			Ok(())
		}
		Frame::LoroSyncRequest { document, version } => {
			let Some(attachment) = attachments.get(document.as_str()) else {
				return Err(CloseCode::Unauthorized);
			};
			let updates = attachment
				.document
				.sync_updates(&version)
				.await
				.map_err(|_| CloseCode::InternalError)?;
			connection.try_send(Frame::LoroSyncBatch { document, updates }.encode());
			Ok(())
		}
		Frame::LoroEphemeral { document, payload } => {
			let Some(attachment) = attachments.get(document.as_str()) else {
				return Err(CloseCode::Unauthorized);
			};
			attachment.document.apply_ephemeral(connection.id, payload);
			Ok(())
		}
		Frame::LoroSyncBatch { .. } => {
			// Only the hub sends sync batches; receiving one from a
			// client is a protocol violation.
			Err(CloseCode::ProtocolError)
		}
	}
}
