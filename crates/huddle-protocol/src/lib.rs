//! # huddle-protocol
//!
//! Wire protocol definitions for the Huddle chat coordinator.
//!
//! This crate defines the binary protocol spoken between Huddle peers and
//! the coordinator: frame types, error codes, and the codec.
//!
//! ## Frame Types
//!
//! - `Register` / `Unregister` / `Rename` - Name lifecycle
//! - `Broadcast` / `SendPrivate` - Chat messages
//! - `ListActive` / `ActiveList` - Membership query
//! - `Message` / `Presence` - Server-initiated pushes
//! - `Ack` / `Error` - Responses
//!
//! ## Example
//!
//! ```rust
//! use huddle_protocol::{Frame, codec};
//!
//! let frame = Frame::broadcast(1, "Hello, everyone!");
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{codes, Frame, FrameType};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;
