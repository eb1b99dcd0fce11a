//! Client sessions for Huddle.
//!
//! A session binds a unique peer name to the callback used to reach it.

use crate::callback::{Callback, ClientCallback};
use crate::message::unix_millis;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum peer name length in bytes.
pub const MAX_NAME_LENGTH: usize = 64;

/// Identifies one registration, independently of the name it currently holds.
pub type SessionId = u64;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Validate a peer name.
///
/// # Errors
///
/// Returns an error message if the name is invalid.
pub fn validate_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Name cannot be empty");
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err("Name too long");
    }
    if name.trim() != name {
        return Err("Name cannot start or end with whitespace");
    }
    if name.chars().any(char::is_control) {
        return Err("Name contains control characters");
    }
    Ok(())
}

/// One connected peer.
pub struct ClientSession {
    id: SessionId,
    name: String,
    callback: Callback,
    connected_at: u64,
}

impl ClientSession {
    /// Create a new session.
    #[must_use]
    pub fn new(name: impl Into<String>, callback: Callback) -> Self {
        Self {
            id: SESSION_COUNTER.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            callback,
            connected_at: unix_millis(),
        }
    }

    /// Session identifier; stable across renames.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Delivery handle.
    #[must_use]
    pub fn callback(&self) -> &dyn ClientCallback {
        self.callback.as_ref()
    }

    /// When the session registered (Unix millis).
    #[must_use]
    pub fn connected_at(&self) -> u64 {
        self.connected_at
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}
