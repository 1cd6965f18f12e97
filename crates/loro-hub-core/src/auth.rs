//! Server-side authentication hook. The hub treats the token as opaque;
//! only the adapter understands its contents.

use crate::document::DocumentName;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
	Denied,
	ReadOnly,
	ReadWrite,
}

impl Decision {
	#[must_use]
	pub fn can_write(self) -> bool {
		matches!(self, Decision::ReadWrite)
	}

	#[must_use]
	pub fn is_denied(self) -> bool {
		matches!(self, Decision::Denied)
	}
}

#[async_trait]
pub trait Authenticator: Send + Sync {
	/// Evaluates a bearer token against a specific document name. Adapters
	/// may treat the document name as a namespace, a capability scope, or
	/// ignore it entirely — the hub does not interpret the result beyond
	/// `Decision`.
	async fn authenticate(&self, document: &DocumentName, token: &str) -> Decision;
}

/// Grants read-write access to anyone, regardless of token. Only suitable
/// for local development or a hub deployed behind its own access control.
#[derive(Debug, Default)]
pub struct OpenAuthenticator;

#[async_trait]
impl Authenticator for OpenAuthenticator {
	async fn authenticate(&self, _document: &DocumentName, _token: &str) -> Decision {
		Decision::ReadWrite
	}
}
