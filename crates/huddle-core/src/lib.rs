//! # huddle-core
//!
//! Presence registry and message distribution for the Huddle chat
//! coordinator.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Registry** - Unique names mapped to delivery handles
//! - **Coordinator** - Register / rename / unregister, broadcast, private routing
//! - **Callback** - The push capability every peer implements
//! - **Message** - Broadcast and private chat messages
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│ Coordinator │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │
//!        │                   ▼
//!        │            ┌─────────────┐
//!        └────────────│  Callback   │
//!                     └─────────────┘
//! ```

pub mod callback;
pub mod coordinator;
pub mod message;
pub mod registry;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use callback::{Callback, ClientCallback, PushError};
pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorError, CoordinatorStats, Delivery};
pub use message::{Message, Scope};
pub use registry::{Registry, RegistryError};
pub use session::{validate_name, ClientSession, SessionId};
