//! Callback capability implemented by every registered peer.
//!
//! The coordinator is the only caller of these methods. Any transport that
//! can carry server-initiated pushes (a WebSocket, a message queue, or an
//! in-process channel in tests) implements this trait for its peers.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by a push to a peer.
///
/// Every variant is treated the same by the coordinator: the peer is reaped.
#[derive(Debug, Clone, Error)]
pub enum PushError {
    /// The peer's end of the transport is gone.
    #[error("Peer disconnected")]
    Disconnected,

    /// The push did not complete within the allowed time.
    #[error("Push timed out after {0:?}")]
    Timeout(Duration),

    /// Any other delivery failure.
    #[error("Push failed: {0}")]
    Failed(String),
}

/// Server-initiated delivery to one peer.
#[async_trait]
pub trait ClientCallback: Send + Sync {
    /// Deliver a chat message.
    async fn push_message(
        &self,
        sender: &str,
        body: &str,
        is_private: bool,
    ) -> Result<(), PushError>;

    /// Deliver the current set of online names.
    async fn push_presence(&self, names: &[String]) -> Result<(), PushError>;
}

/// Owned delivery handle stored in a registry entry.
pub type Callback = Box<dyn ClientCallback>;
