//! Chat message types for Huddle.
//!
//! A message is either broadcast to every registered peer or routed
//! privately to a single recipient.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A unique message identifier.
pub type MessageId = u64;

/// Atomic counter for ensuring unique IDs even within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Milliseconds since the Unix epoch.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Generate a unique message ID.
#[must_use]
pub fn generate_message_id() -> MessageId {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    timestamp.wrapping_add(counter)
}

/// Delivery scope of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Delivered to every registered peer.
    Broadcast,
    /// Delivered to one named recipient.
    Private {
        /// Target peer name.
        recipient: String,
    },
}

/// A chat message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// Name of the sending peer (or the system sender).
    pub sender: String,
    /// Message text.
    pub body: String,
    /// Broadcast or private.
    pub scope: Scope,
    /// Timestamp when the message was created.
    pub timestamp: u64,
}

impl Message {
    fn new(sender: impl Into<String>, body: impl Into<String>, scope: Scope) -> Self {
        Self {
            id: generate_message_id(),
            sender: sender.into(),
            body: body.into(),
            scope,
            timestamp: unix_millis(),
        }
    }

    /// Create a broadcast message.
    #[must_use]
    pub fn broadcast(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(sender, body, Scope::Broadcast)
    }

    /// Create a private message for `recipient`.
    #[must_use]
    pub fn private(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::new(
            sender,
            body,
            Scope::Private {
                recipient: recipient.into(),
            },
        )
    }

    /// Whether the message is tagged private.
    #[must_use]
    pub fn is_private(&self) -> bool {
        matches!(self.scope, Scope::Private { .. })
    }

    /// The recipient, present iff the message is private.
    #[must_use]
    pub fn recipient(&self) -> Option<&str> {
        match &self.scope {
            Scope::Broadcast => None,
            Scope::Private { recipient } => Some(recipient),
        }
    }

    /// The confirmation copy pushed back to the sender of a private message.
    ///
    /// Returns `None` for broadcast messages.
    #[must_use]
    pub fn echo(&self) -> Option<Self> {
        let recipient = self.recipient()?;
        Some(Self::private(
            self.sender.clone(),
            self.sender.clone(),
            format!("To {}: {}", recipient, self.body),
        ))
    }
}
