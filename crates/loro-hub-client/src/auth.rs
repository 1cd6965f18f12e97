//! Client-side token plumbing. The hub treats whatever this produces as
//! an opaque bearer string.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The three shapes a client can supply a token in: fixed up front, a
/// cheap synchronous getter (e.g. reading a refreshed token out of a
/// cell), or an async getter that may itself need to talk to a server.
#[derive(Clone)]
pub enum TokenSource {
	Static(Arc<str>),
	Sync(Arc<dyn Fn() -> Option<String> + Send + Sync>),
	Async(Arc<dyn Fn() -> BoxFuture<'static, Option<String>> + Send + Sync>),
}

impl TokenSource {
	pub async fn resolve(&self) -> Option<String> {
		match self {
			TokenSource::Static(token) => Some(token.to_string()),
			TokenSource::Sync(f) => f(),
			TokenSource::Async(f) => f().await,
		}
	}
}

impl std::fmt::Debug for TokenSource {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			TokenSource::Static(_) => write!(f, "TokenSource::Static(..)"),
			TokenSource::Sync(_) => write!(f, "TokenSource::Sync(..)"),
			TokenSource::Async(_) => write!(f, "TokenSource::Async(..)"),
		}
	}
}
