//! Wire format for the Loro collaboration hub.
//!
//! A single binary WebSocket frame carries one [`Frame`]: a document name,
//! a message kind tag, and a kind-specific payload. Encoding is LEB128
//! varints plus length-prefixed byte strings, handled by [`codec`].

pub mod codec;
pub mod frame;

pub use codec::{DecodeError, Decoder, Encoder};
pub use frame::{AuthCode, AuthPayload, Frame, FrameError, MessageKind, Role};
