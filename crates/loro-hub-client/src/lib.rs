//! Client-side `Provider`: attaches a local CRDT document to the hub over
//! a shared WebSocket transport, relays local updates out and remote
//! updates in, and requests a periodic force-sync.

pub mod auth;
pub mod provider;
pub mod transport;

pub use provider::{Listeners, Provider, ProviderBuilder, Status};
pub use transport::SharedTransport;
