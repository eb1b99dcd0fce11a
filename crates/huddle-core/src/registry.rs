//! Name registry for Huddle.
//!
//! The registry is a plain map from name to session. It enforces name
//! uniqueness but performs no I/O; the coordinator wraps it in a lock and
//! drives pushes around each mutation.

use crate::session::{ClientSession, SessionId};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The name is held by another session.
    #[error("Name already taken: {0}")]
    NameTaken(String),

    /// No session holds the name.
    #[error("Name not found: {0}")]
    NotFound(String),
}

/// Mapping of connected names to their sessions.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: HashMap<String, ClientSession>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Check if a name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    /// Get the session holding `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ClientSession> {
        self.sessions.get(name)
    }

    /// Iterate over all sessions.
    pub fn sessions(&self) -> impl Iterator<Item = &ClientSession> {
        self.sessions.values()
    }

    /// Sorted snapshot of the registered names.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Insert a session under its name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NameTaken`] if the name is already present;
    /// the registry is left unchanged.
    pub fn insert(&mut self, session: ClientSession) -> Result<SessionId, RegistryError> {
        if self.sessions.contains_key(session.name()) {
            return Err(RegistryError::NameTaken(session.name().to_string()));
        }

        let id = session.id();
        debug!(name = %session.name(), session = id, "Registry: inserted");
        self.sessions.insert(session.name().to_string(), session);
        Ok(id)
    }

    /// Remove the session holding `name`.
    pub fn remove(&mut self, name: &str) -> Option<ClientSession> {
        let session = self.sessions.remove(name);
        if session.is_some() {
            debug!(name = %name, "Registry: removed");
        }
        session
    }

    /// Move the session held by `old` to `new`, keeping its callback.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NameTaken`] if `new` is present (checked
    /// first) or [`RegistryError::NotFound`] if `old` is absent. Either way
    /// the registry is left unchanged.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), RegistryError> {
        if self.sessions.contains_key(new) {
            return Err(RegistryError::NameTaken(new.to_string()));
        }
        let mut session = self
            .sessions
            .remove(old)
            .ok_or_else(|| RegistryError::NotFound(old.to_string()))?;

        session.set_name(new);
        self.sessions.insert(new.to_string(), session);
        debug!(old = %old, new = %new, "Registry: renamed");
        Ok(())
    }

    /// Remove every listed name in one step.
    ///
    /// Names that are no longer present are skipped. Returns the removed
    /// sessions.
    pub fn reap(&mut self, names: &[String]) -> Vec<ClientSession> {
        names.iter().filter_map(|name| self.remove(name)).collect()
    }
}
