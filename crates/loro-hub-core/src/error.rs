//! Error taxonomy for the hub core.
//!
//! One flat enum, `Display` + `std::error::Error`, and `From` impls at each
//! adapter boundary — the same shape the rest of this codebase's ancestry
//! uses for its own `Error` type, just scoped to what this crate can fail
//! at.

use std::fmt;

pub type ClResult<T> = Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	/// The requested document does not exist and no loader produced one.
	NotFound,
	/// Authentication was attempted and rejected.
	Unauthorized,
	/// The connection attempted a write on a document it only has read
	/// access to.
	WriteDenied,
	/// A frame failed to decode or violated a wire invariant.
	Protocol(loro_hub_wire::FrameError),
	/// The CRDT engine rejected an import or failed to export.
	Engine(String),
	/// The persistence backend failed to load or store a document.
	Persistence(String),
	/// A connection's outbound queue could not keep up.
	SlowConsumer,
	/// Lock was poisoned by a panicking task holding it.
	Poisoned(String),
	/// Any other I/O failure.
	Io(std::io::Error),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::NotFound => write!(f, "document not found"),
			Error::Unauthorized => write!(f, "unauthorized"),
			Error::WriteDenied => write!(f, "write access denied"),
			Error::Protocol(e) => write!(f, "protocol error: {e}"),
			Error::Engine(msg) => write!(f, "CRDT engine error: {msg}"),
			Error::Persistence(msg) => write!(f, "persistence error: {msg}"),
			Error::SlowConsumer => write!(f, "connection outbound queue overflowed"),
			Error::Poisoned(ctx) => write!(f, "lock poisoned: {ctx}"),
			Error::Io(e) => write!(f, "I/O error: {e}"),
		}
	}
}

impl std::error::Error for Error {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Error::Protocol(e) => Some(e),
			Error::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<loro_hub_wire::FrameError> for Error {
	fn from(value: loro_hub_wire::FrameError) -> Self {
		Error::Protocol(value)
	}
}

impl From<std::io::Error> for Error {
	fn from(value: std::io::Error) -> Self {
		Error::Io(value)
	}
}

/// Converts a `PoisonError` from a locked guard into `Error::Poisoned`,
/// recovering the guard rather than aborting the task holding it.
#[macro_export]
macro_rules! lock {
	($mutex:expr) => {
		match $mutex.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		}
	};
	($mutex:expr, $ctx:expr) => {
		match $mutex.lock() {
			Ok(guard) => guard,
			Err(poisoned) => {
				tracing::warn!(context = $ctx, "recovering from poisoned lock");
				poisoned.into_inner()
			}
		}
	};
}
