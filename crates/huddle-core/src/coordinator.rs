//! The chat coordinator.
//!
//! The coordinator owns the registry behind a single async lock. Every
//! operation holds that lock from its membership check until its last
//! triggered push has completed or timed out, so operations take effect in
//! a strict total order. Pushes within one operation run concurrently, each
//! bounded by [`CoordinatorConfig::push_timeout`]. Peers whose push fails are
//! reaped once the fan-out pass is over.

use crate::callback::{Callback, PushError};
use crate::message::Message;
use crate::registry::{Registry, RegistryError};
use crate::session::{validate_name, ClientSession, SessionId};
use futures_util::future::join_all;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

/// Coordinator errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    /// The requested name is malformed or reserved.
    #[error("Invalid name: {0}")]
    InvalidName(&'static str),

    /// Another session holds the name.
    #[error("Name already taken: {0}")]
    NameTaken(String),

    /// No session holds the name.
    #[error("Name not found: {0}")]
    NotFound(String),

    /// The private message recipient is not registered.
    #[error("Recipient {0} is not online")]
    RecipientOffline(String),

    /// A push failed during the operation; the peer has been reaped.
    #[error("Failed to reach {name}: {reason}")]
    RemoteUnavailable {
        /// Reaped peer.
        name: String,
        /// Why the push failed.
        reason: String,
    },

    /// Maximum number of members reached.
    #[error("Maximum members reached")]
    CapacityReached,

    /// The name is absent or held by a different session.
    #[error("{0} is not held by this session")]
    NotOwner(String),
}

impl From<RegistryError> for CoordinatorError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NameTaken(name) => Self::NameTaken(name),
            RegistryError::NotFound(name) => Self::NotFound(name),
        }
    }
}

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Upper bound on a single push to one peer.
    pub push_timeout: Duration,
    /// Maximum number of registered names.
    pub max_members: usize,
    /// Sender name used for join/leave/rename announcements. Reserved.
    pub system_sender: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            push_timeout: Duration::from_secs(5),
            max_members: 10_000,
            system_sender: "SERVER".to_string(),
        }
    }
}

/// Outcome of a broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Peers that accepted the message.
    pub delivered: usize,
    /// Peers removed because a push to them failed.
    pub reaped: Vec<String>,
}

/// Coordinator statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStats {
    /// Currently registered names.
    pub members: usize,
    /// Sessions reaped since start.
    pub reaped_total: u64,
}

/// Presence registry and message distribution.
pub struct Coordinator {
    registry: Mutex<Registry>,
    members: AtomicUsize,
    reaped_total: AtomicU64,
    config: CoordinatorConfig,
}

impl Coordinator {
    /// Create a new coordinator with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CoordinatorConfig::default())
    }

    /// Create a new coordinator with custom configuration.
    #[must_use]
    pub fn with_config(config: CoordinatorConfig) -> Self {
        info!("Creating coordinator with config: {:?}", config);
        Self {
            registry: Mutex::new(Registry::new()),
            members: AtomicUsize::new(0),
            reaped_total: AtomicU64::new(0),
            config,
        }
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Get coordinator statistics without waiting for the registry lock.
    /// The member count may trail an operation still in flight.
    #[must_use]
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            members: self.members.load(Ordering::Relaxed),
            reaped_total: self.reaped_total.load(Ordering::Relaxed),
        }
    }

    /// Register `name`, announce the join, and push presence to everyone.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName`, `NameTaken`, or `CapacityReached`, in which case
    /// no state changes and nothing is pushed. Returns `RemoteUnavailable` if
    /// the newcomer itself failed a push during the join announcement; it has
    /// been reaped and the name is free again.
    pub async fn register(
        &self,
        name: &str,
        callback: Callback,
    ) -> Result<SessionId, CoordinatorError> {
        self.check_name(name)?;

        let mut registry = self.registry.lock().await;
        if registry.contains(name) {
            return Err(CoordinatorError::NameTaken(name.to_string()));
        }
        if registry.len() >= self.config.max_members {
            return Err(CoordinatorError::CapacityReached);
        }

        let session = registry.insert(ClientSession::new(name, callback))?;
        self.track(&registry);
        info!(name = %name, session, "Client registered");

        self.announce(&mut registry, format!("{name} has joined the chat."))
            .await;
        if !owns(&registry, name, session) {
            return Err(CoordinatorError::RemoteUnavailable {
                name: name.to_string(),
                reason: "unreachable during join".to_string(),
            });
        }
        Ok(session)
    }

    /// Unregister `name`. Does nothing if the name is absent.
    pub async fn unregister(&self, name: &str) {
        let mut registry = self.registry.lock().await;
        self.remove_member(&mut registry, name).await;
    }

    /// Unregister `name` only if it is still held by `session`.
    ///
    /// Transports call this when a connection drops, so a name that was
    /// reaped and then taken by someone else is left alone.
    /// Returns `true` if the name was removed.
    pub async fn disconnect(&self, name: &str, session: SessionId) -> bool {
        let mut registry = self.registry.lock().await;
        if !owns(&registry, name, session) {
            debug!(name = %name, session, "Disconnect for a session that no longer holds the name");
            return false;
        }
        self.remove_member(&mut registry, name).await
    }

    /// Move the session held by `old` to `new`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` for a malformed `new`, `NameTaken` if `new` is
    /// held, or `NotFound` if `old` is absent. On error `old` stays intact.
    pub async fn rename(&self, old: &str, new: &str) -> Result<(), CoordinatorError> {
        self.check_name(new)?;

        let mut registry = self.registry.lock().await;
        self.rename_locked(&mut registry, old, new).await
    }

    /// [`rename`](Self::rename) on behalf of `session`.
    ///
    /// # Errors
    ///
    /// Returns `NotOwner` if `old` is not held by `session`, otherwise the
    /// errors of [`rename`](Self::rename).
    pub async fn rename_session(
        &self,
        old: &str,
        new: &str,
        session: SessionId,
    ) -> Result<(), CoordinatorError> {
        self.check_name(new)?;

        let mut registry = self.registry.lock().await;
        check_owner(&registry, old, session)?;
        self.rename_locked(&mut registry, old, new).await
    }

    /// Sorted snapshot of the registered names.
    pub async fn list_active(&self) -> Vec<String> {
        self.registry.lock().await.names()
    }

    /// Deliver a message to every registered peer.
    ///
    /// Peers whose push fails are removed after the fan-out, and the
    /// survivors receive one presence update. Never fails.
    pub async fn broadcast(&self, sender: &str, body: &str) -> Delivery {
        let mut registry = self.registry.lock().await;
        self.broadcast_locked(&mut registry, sender, body).await
    }

    /// [`broadcast`](Self::broadcast) on behalf of `session`.
    ///
    /// # Errors
    ///
    /// Returns `NotOwner` if `sender` is not held by `session`. Nothing is
    /// pushed in that case.
    pub async fn broadcast_as(
        &self,
        sender: &str,
        session: SessionId,
        body: &str,
    ) -> Result<Delivery, CoordinatorError> {
        let mut registry = self.registry.lock().await;
        check_owner(&registry, sender, session)?;
        Ok(self.broadcast_locked(&mut registry, sender, body).await)
    }

    /// Deliver a private message, echoing a confirmation to the sender.
    ///
    /// # Errors
    ///
    /// Returns `RecipientOffline` if `recipient` is not registered (nothing
    /// is pushed), or `RemoteUnavailable` if the push to `recipient` failed
    /// (the recipient is reaped). A failed echo reaps the sender but does
    /// not fail the call.
    pub async fn send_private(
        &self,
        sender: &str,
        recipient: &str,
        body: &str,
    ) -> Result<(), CoordinatorError> {
        let mut registry = self.registry.lock().await;
        self.send_private_locked(&mut registry, sender, recipient, body)
            .await
    }

    /// [`send_private`](Self::send_private) on behalf of `session`.
    ///
    /// # Errors
    ///
    /// Returns `NotOwner` if `sender` is not held by `session`, otherwise the
    /// errors of [`send_private`](Self::send_private).
    pub async fn send_private_as(
        &self,
        sender: &str,
        session: SessionId,
        recipient: &str,
        body: &str,
    ) -> Result<(), CoordinatorError> {
        let mut registry = self.registry.lock().await;
        check_owner(&registry, sender, session)?;
        self.send_private_locked(&mut registry, sender, recipient, body)
            .await
    }

    fn check_name(&self, name: &str) -> Result<(), CoordinatorError> {
        validate_name(name).map_err(CoordinatorError::InvalidName)?;
        if name == self.config.system_sender {
            return Err(CoordinatorError::InvalidName("Name is reserved"));
        }
        Ok(())
    }

    async fn rename_locked(
        &self,
        registry: &mut Registry,
        old: &str,
        new: &str,
    ) -> Result<(), CoordinatorError> {
        registry.rename(old, new)?;
        info!(old = %old, new = %new, "Client renamed");

        self.announce(registry, format!("{old} has changed their username to {new}"))
            .await;
        Ok(())
    }

    async fn broadcast_locked(
        &self,
        registry: &mut Registry,
        sender: &str,
        body: &str,
    ) -> Delivery {
        let message = Message::broadcast(sender, body);
        debug!(id = message.id, sender = %sender, members = registry.len(), "Broadcasting");

        let (delivered, dead) = self.fan_out(registry, &message).await;
        let mut reaped = self.reap(registry, dead);
        if !reaped.is_empty() {
            reaped.extend(self.sync_presence(registry).await);
        }

        Delivery { delivered, reaped }
    }

    async fn send_private_locked(
        &self,
        registry: &mut Registry,
        sender: &str,
        recipient: &str,
        body: &str,
    ) -> Result<(), CoordinatorError> {
        let message = Message::private(sender, recipient, body);

        let outcome = match registry.get(recipient) {
            Some(session) => self.push_message(session, &message).await,
            None => return Err(CoordinatorError::RecipientOffline(recipient.to_string())),
        };
        if let Err(err) = outcome {
            warn!(id = message.id, recipient = %recipient, error = %err, "Private delivery failed");
            self.reap(registry, vec![recipient.to_string()]);
            self.sync_presence(registry).await;
            return Err(CoordinatorError::RemoteUnavailable {
                name: recipient.to_string(),
                reason: err.to_string(),
            });
        }
        debug!(id = message.id, sender = %sender, recipient = %recipient, "Private message delivered");

        if let Some(echo) = message.echo() {
            let outcome = match registry.get(sender) {
                Some(session) => self.push_message(session, &echo).await,
                None => Ok(()),
            };
            if let Err(err) = outcome {
                warn!(id = message.id, sender = %sender, error = %err, "Private echo failed");
                self.reap(registry, vec![sender.to_string()]);
                self.sync_presence(registry).await;
            }
        }

        Ok(())
    }

    async fn remove_member(&self, registry: &mut Registry, name: &str) -> bool {
        if registry.remove(name).is_none() {
            return false;
        }
        self.track(registry);
        info!(name = %name, "Client unregistered");

        self.announce(registry, format!("{name} has left the chat."))
            .await;
        true
    }

    /// System broadcast followed by a presence sync, reaping along the way.
    async fn announce(&self, registry: &mut Registry, text: String) {
        let message = Message::broadcast(self.config.system_sender.clone(), text);
        let (_, dead) = self.fan_out(registry, &message).await;
        self.reap(registry, dead);
        self.sync_presence(registry).await;
    }

    /// Push `message` to every member. Returns the delivered count and the
    /// names whose push failed.
    async fn fan_out(&self, registry: &Registry, message: &Message) -> (usize, Vec<String>) {
        let pushes = registry.sessions().map(|session| async move {
            (session.name(), self.push_message(session, message).await)
        });

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (name, result) in join_all(pushes).await {
            match result {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(id = message.id, name = %name, error = %err, "Push failed, marking dead");
                    dead.push(name.to_string());
                }
            }
        }

        (delivered, dead)
    }

    /// Push the current membership to every member until a round completes
    /// with no failures. Returns the names reaped along the way.
    async fn sync_presence(&self, registry: &mut Registry) -> Vec<String> {
        let mut reaped = Vec::new();

        while !registry.is_empty() {
            let snapshot = registry.names();
            let names = snapshot.as_slice();
            let pushes = registry.sessions().map(|session| async move {
                let result = self.bounded(session.callback().push_presence(names)).await;
                (session.name().to_string(), result)
            });

            let dead: Vec<String> = join_all(pushes)
                .await
                .into_iter()
                .filter_map(|(name, result)| {
                    let err = result.err()?;
                    warn!(name = %name, error = %err, "Presence push failed, marking dead");
                    Some(name)
                })
                .collect();

            if dead.is_empty() {
                trace!(members = names.len(), "Presence synced");
                break;
            }
            reaped.extend(self.reap(registry, dead));
        }

        reaped
    }

    fn reap(&self, registry: &mut Registry, dead: Vec<String>) -> Vec<String> {
        let removed: Vec<String> = registry
            .reap(&dead)
            .iter()
            .map(|session| session.name().to_string())
            .collect();

        if !removed.is_empty() {
            self.track(registry);
            self.reaped_total
                .fetch_add(removed.len() as u64, Ordering::Relaxed);
            warn!(reaped = ?removed, "Reaped unreachable peers");
        }
        removed
    }

    fn track(&self, registry: &Registry) {
        self.members.store(registry.len(), Ordering::Relaxed);
    }

    async fn push_message(
        &self,
        session: &ClientSession,
        message: &Message,
    ) -> Result<(), PushError> {
        trace!(id = message.id, to = %session.name(), "Pushing message");
        self.bounded(session.callback().push_message(
            &message.sender,
            &message.body,
            message.is_private(),
        ))
        .await
    }

    async fn bounded<F>(&self, push: F) -> Result<(), PushError>
    where
        F: Future<Output = Result<(), PushError>>,
    {
        match tokio::time::timeout(self.config.push_timeout, push).await {
            Ok(result) => result,
            Err(_) => Err(PushError::Timeout(self.config.push_timeout)),
        }
    }
}

fn owns(registry: &Registry, name: &str, session: SessionId) -> bool {
    registry.get(name).map(ClientSession::id) == Some(session)
}

fn check_owner(registry: &Registry, name: &str, session: SessionId) -> Result<(), CoordinatorError> {
    if owns(registry, name, session) {
        return Ok(());
    }
    debug!(name = %name, session, "Request from a session that no longer holds the name");
    Err(CoordinatorError::NotOwner(name.to_string()))
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Inbox, Push};
    use std::sync::Arc;

    fn joined(name: &str) -> (String, String, bool) {
        (
            "SERVER".to_string(),
            format!("{name} has joined the chat."),
            false,
        )
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn with_peers(coordinator: &Coordinator, peers: &[&str]) -> Vec<Inbox> {
        let mut inboxes = Vec::new();
        for name in peers {
            let inbox = Inbox::new();
            coordinator.register(name, inbox.peer()).await.unwrap();
            inboxes.push(inbox);
        }
        for inbox in &inboxes {
            inbox.clear();
        }
        inboxes
    }

    #[tokio::test]
    async fn test_distinct_registrations_all_succeed() {
        let coordinator = Coordinator::new();

        for name in ["dave", "alice", "carol", "bob"] {
            assert!(coordinator.register(name, Inbox::new().peer()).await.is_ok());
        }

        assert_eq!(
            coordinator.list_active().await,
            names(&["alice", "bob", "carol", "dave"])
        );
    }

    #[tokio::test]
    async fn test_register_announces_and_pushes_presence() {
        let coordinator = Coordinator::new();
        let alice = Inbox::new();
        coordinator.register("alice", alice.peer()).await.unwrap();
        alice.clear();

        let bob = Inbox::new();
        coordinator.register("bob", bob.peer()).await.unwrap();

        for inbox in [&alice, &bob] {
            assert_eq!(inbox.messages(), vec![joined("bob")]);
            assert_eq!(inbox.presences(), vec![names(&["alice", "bob"])]);
        }
    }

    #[tokio::test]
    async fn test_register_duplicate_name() {
        let coordinator = Coordinator::new();
        let peers = with_peers(&coordinator, &["alice"]).await;
        let impostor = Inbox::new();

        let result = coordinator.register("alice", impostor.peer()).await;

        assert_eq!(result, Err(CoordinatorError::NameTaken("alice".to_string())));
        assert_eq!(coordinator.list_active().await, names(&["alice"]));
        assert_eq!(impostor.attempts(), 0);
        assert_eq!(peers[0].attempts(), 0);
    }

    #[tokio::test]
    async fn test_register_invalid_and_reserved_names() {
        let coordinator = Coordinator::new();

        assert!(matches!(
            coordinator.register("", Inbox::new().peer()).await,
            Err(CoordinatorError::InvalidName(_))
        ));
        assert!(matches!(
            coordinator.register("SERVER", Inbox::new().peer()).await,
            Err(CoordinatorError::InvalidName(_))
        ));
        assert!(coordinator.list_active().await.is_empty());
    }

    #[tokio::test]
    async fn test_register_capacity() {
        let coordinator = Coordinator::with_config(CoordinatorConfig {
            max_members: 2,
            ..Default::default()
        });
        with_peers(&coordinator, &["alice", "bob"]).await;

        assert_eq!(
            coordinator.register("carol", Inbox::new().peer()).await,
            Err(CoordinatorError::CapacityReached)
        );

        coordinator.unregister("bob").await;
        assert!(coordinator.register("carol", Inbox::new().peer()).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_registration_of_one_name() {
        let coordinator = Arc::new(Coordinator::new());

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move {
                    coordinator
                        .register("alice", Inbox::new().peer())
                        .await
                        .is_ok()
                })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(coordinator.list_active().await, names(&["alice"]));
    }

    #[tokio::test]
    async fn test_unregister_absent_is_silent() {
        let coordinator = Coordinator::new();
        let peers = with_peers(&coordinator, &["alice", "bob"]).await;

        coordinator.unregister("nobody").await;

        assert_eq!(coordinator.list_active().await, names(&["alice", "bob"]));
        assert!(peers.iter().all(|inbox| inbox.attempts() == 0));
    }

    #[tokio::test]
    async fn test_unregister_announces_departure() {
        let coordinator = Coordinator::new();
        let peers = with_peers(&coordinator, &["alice", "bob"]).await;

        coordinator.unregister("bob").await;

        assert_eq!(
            peers[0].messages(),
            vec![(
                "SERVER".to_string(),
                "bob has left the chat.".to_string(),
                false
            )]
        );
        assert_eq!(peers[0].presences(), vec![names(&["alice"])]);
        assert_eq!(peers[1].attempts(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_ignores_stale_session() {
        let coordinator = Coordinator::new();
        let first = coordinator
            .register("alice", Inbox::new().peer())
            .await
            .unwrap();
        coordinator.unregister("alice").await;
        let second = coordinator
            .register("alice", Inbox::new().peer())
            .await
            .unwrap();

        assert!(!coordinator.disconnect("alice", first).await);
        assert_eq!(coordinator.list_active().await, names(&["alice"]));

        assert!(coordinator.disconnect("alice", second).await);
        assert!(coordinator.list_active().await.is_empty());
    }

    #[tokio::test]
    async fn test_rename_frees_old_name() {
        let coordinator = Coordinator::new();
        let peers = with_peers(&coordinator, &["alice", "bob"]).await;

        coordinator.rename("alice", "al").await.unwrap();

        assert_eq!(coordinator.list_active().await, names(&["al", "bob"]));
        assert!(coordinator.register("alice", Inbox::new().peer()).await.is_ok());

        // The renamed session keeps its callback.
        assert_eq!(
            peers[0].pushes()[0],
            Push::Message {
                sender: "SERVER".to_string(),
                body: "alice has changed their username to al".to_string(),
                private: false,
            }
        );
        assert_eq!(peers[0].presences()[0], names(&["al", "bob"]));
    }

    #[tokio::test]
    async fn test_rename_to_taken_name() {
        let coordinator = Coordinator::new();
        let peers = with_peers(&coordinator, &["alice", "bob"]).await;

        assert_eq!(
            coordinator.rename("alice", "bob").await,
            Err(CoordinatorError::NameTaken("bob".to_string()))
        );
        assert_eq!(coordinator.list_active().await, names(&["alice", "bob"]));
        assert!(peers.iter().all(|inbox| inbox.attempts() == 0));

        // alice is still reachable under the old name.
        coordinator.broadcast("bob", "still there?").await;
        assert_eq!(peers[0].messages().len(), 1);
    }

    #[tokio::test]
    async fn test_rename_absent_name() {
        let coordinator = Coordinator::new();

        assert_eq!(
            coordinator.rename("ghost", "casper").await,
            Err(CoordinatorError::NotFound("ghost".to_string()))
        );
        assert!(coordinator.list_active().await.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let coordinator = Coordinator::new();
        let peers = with_peers(&coordinator, &["alice", "bob"]).await;

        let delivery = coordinator.broadcast("alice", "hi").await;

        assert_eq!(delivery.delivered, 2);
        assert!(delivery.reaped.is_empty());
        for inbox in &peers {
            assert_eq!(
                inbox.pushes(),
                vec![Push::Message {
                    sender: "alice".to_string(),
                    body: "hi".to_string(),
                    private: false,
                }]
            );
        }
        assert_eq!(coordinator.list_active().await, names(&["alice", "bob"]));
    }

    #[tokio::test]
    async fn test_broadcast_reaps_dead_peer() {
        let coordinator = Coordinator::new();
        let peers = with_peers(&coordinator, &["alice", "bob", "carol", "dave"]).await;
        peers[2].fail_messages();

        let delivery = coordinator.broadcast("alice", "hi").await;

        assert_eq!(delivery.delivered, 3);
        assert_eq!(delivery.reaped, names(&["carol"]));
        assert_eq!(
            coordinator.list_active().await,
            names(&["alice", "bob", "dave"])
        );

        for inbox in [&peers[0], &peers[1], &peers[3]] {
            assert_eq!(
                inbox.messages(),
                vec![("alice".to_string(), "hi".to_string(), false)]
            );
            assert_eq!(inbox.presences(), vec![names(&["alice", "bob", "dave"])]);
        }
        assert_eq!(coordinator.stats().reaped_total, 1);
    }

    #[tokio::test]
    async fn test_broadcast_reaps_several_in_one_update() {
        let coordinator = Coordinator::new();
        let peers = with_peers(&coordinator, &["alice", "bob", "carol"]).await;
        peers[1].fail_messages();
        peers[2].fail_messages();

        let delivery = coordinator.broadcast("alice", "anyone?").await;

        assert_eq!(delivery.delivered, 1);
        assert_eq!(delivery.reaped.len(), 2);
        assert_eq!(peers[0].presences(), vec![names(&["alice"])]);
    }

    #[tokio::test]
    async fn test_presence_failure_triggers_another_round() {
        let coordinator = Coordinator::new();
        let peers = with_peers(&coordinator, &["alice", "bob", "carol"]).await;
        peers[1].fail_messages();
        peers[2].fail_presence();

        let delivery = coordinator.broadcast("alice", "hi").await;

        assert_eq!(delivery.reaped, names(&["bob", "carol"]));
        assert_eq!(
            peers[0].presences(),
            vec![names(&["alice", "carol"]), names(&["alice"])]
        );
        assert_eq!(coordinator.list_active().await, names(&["alice"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_peer_times_out() {
        let coordinator = Coordinator::with_config(CoordinatorConfig {
            push_timeout: Duration::from_millis(200),
            ..Default::default()
        });
        let peers = with_peers(&coordinator, &["alice", "bob", "carol"]).await;
        peers[1].hang();

        let delivery = coordinator.broadcast("alice", "hi").await;

        assert_eq!(delivery.delivered, 2);
        assert_eq!(delivery.reaped, names(&["bob"]));
        assert_eq!(coordinator.list_active().await, names(&["alice", "carol"]));
    }

    #[tokio::test]
    async fn test_private_to_offline_recipient() {
        let coordinator = Coordinator::new();
        let peers = with_peers(&coordinator, &["alice", "bob"]).await;

        let result = coordinator.send_private("alice", "carol", "psst").await;

        assert_eq!(
            result,
            Err(CoordinatorError::RecipientOffline("carol".to_string()))
        );
        assert!(peers.iter().all(|inbox| inbox.attempts() == 0));
    }

    #[tokio::test]
    async fn test_private_delivery_and_echo() {
        let coordinator = Coordinator::new();
        let peers = with_peers(&coordinator, &["alice", "bob", "carol"]).await;

        coordinator
            .send_private("alice", "bob", "psst")
            .await
            .unwrap();

        assert_eq!(
            peers[1].messages(),
            vec![("alice".to_string(), "psst".to_string(), true)]
        );
        assert_eq!(
            peers[0].messages(),
            vec![("alice".to_string(), "To bob: psst".to_string(), true)]
        );
        assert_eq!(peers[2].attempts(), 0);
    }

    #[tokio::test]
    async fn test_private_from_unregistered_sender() {
        let coordinator = Coordinator::new();
        let peers = with_peers(&coordinator, &["bob"]).await;

        coordinator
            .send_private("stranger", "bob", "hello")
            .await
            .unwrap();

        assert_eq!(peers[0].attempts(), 1);
    }

    #[tokio::test]
    async fn test_private_to_dead_recipient() {
        let coordinator = Coordinator::new();
        let peers = with_peers(&coordinator, &["alice", "bob", "carol"]).await;
        peers[1].fail_messages();

        let result = coordinator.send_private("alice", "bob", "psst").await;

        assert!(matches!(
            result,
            Err(CoordinatorError::RemoteUnavailable { ref name, .. }) if name == "bob"
        ));
        assert_eq!(coordinator.list_active().await, names(&["alice", "carol"]));
        assert!(peers[0].messages().is_empty());
        assert_eq!(peers[0].presences(), vec![names(&["alice", "carol"])]);
        assert_eq!(peers[2].presences(), vec![names(&["alice", "carol"])]);
    }

    #[tokio::test]
    async fn test_private_echo_failure_reaps_sender() {
        let coordinator = Coordinator::new();
        let peers = with_peers(&coordinator, &["alice", "bob"]).await;
        peers[0].fail_messages();

        let result = coordinator.send_private("alice", "bob", "psst").await;

        assert!(result.is_ok());
        assert_eq!(coordinator.list_active().await, names(&["bob"]));
        assert_eq!(
            peers[1].pushes(),
            vec![
                Push::Message {
                    sender: "alice".to_string(),
                    body: "psst".to_string(),
                    private: true,
                },
                Push::Presence(names(&["bob"])),
            ]
        );
    }

    #[tokio::test]
    async fn test_stats() {
        let coordinator = Coordinator::new();
        with_peers(&coordinator, &["alice", "bob"]).await;

        let stats = coordinator.stats();
        assert_eq!(stats.members, 2);
        assert_eq!(stats.reaped_total, 0);
    }

    #[tokio::test]
    async fn test_register_unreachable_newcomer() {
        let coordinator = Coordinator::new();
        let peers = with_peers(&coordinator, &["alice"]).await;
        let bob = Inbox::new();
        bob.fail_messages();

        let result = coordinator.register("bob", bob.peer()).await;

        assert!(matches!(
            result,
            Err(CoordinatorError::RemoteUnavailable { ref name, .. }) if name == "bob"
        ));
        assert_eq!(coordinator.list_active().await, names(&["alice"]));
        assert_eq!(
            peers[0].presences(),
            vec![names(&["alice"])],
            "alice only ever sees the membership without bob"
        );
        assert!(coordinator.register("bob", Inbox::new().peer()).await.is_ok());
    }

    #[tokio::test]
    async fn test_session_checked_operations_reject_previous_owner() {
        let coordinator = Coordinator::new();
        let bob = with_peers(&coordinator, &["bob"]).await.remove(0);
        let old_session = coordinator
            .register("alice", Inbox::new().peer())
            .await
            .unwrap();
        coordinator.unregister("alice").await;
        let alice = Inbox::new();
        let new_session = coordinator.register("alice", alice.peer()).await.unwrap();
        alice.clear();
        bob.clear();

        let not_owner = Err(CoordinatorError::NotOwner("alice".to_string()));
        assert_eq!(
            coordinator
                .rename_session("alice", "hijacked", old_session)
                .await,
            not_owner
        );
        assert_eq!(
            coordinator.broadcast_as("alice", old_session, "hi").await,
            Err(CoordinatorError::NotOwner("alice".to_string()))
        );
        assert_eq!(
            coordinator
                .send_private_as("alice", old_session, "bob", "psst")
                .await,
            not_owner
        );

        assert_eq!(coordinator.list_active().await, names(&["alice", "bob"]));
        assert_eq!(alice.attempts(), 0);
        assert_eq!(bob.attempts(), 0);

        coordinator
            .rename_session("alice", "al", new_session)
            .await
            .unwrap();
        let delivery = coordinator.broadcast_as("al", new_session, "hi").await;
        assert_eq!(delivery.map(|d| d.delivered), Ok(2));
    }

    #[tokio::test]
    async fn test_session_checked_rename_of_absent_name() {
        let coordinator = Coordinator::new();

        assert_eq!(
            coordinator.rename_session("ghost", "spirit", 1).await,
            Err(CoordinatorError::NotOwner("ghost".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_waits_for_broadcast_reap() {
        let coordinator = Arc::new(Coordinator::with_config(CoordinatorConfig {
            push_timeout: Duration::from_millis(200),
            ..Default::default()
        }));
        let peers = with_peers(&coordinator, &["alice", "bob", "carol"]).await;
        peers[1].hang();

        let broadcasting = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.broadcast("alice", "hi").await })
        };
        // Let the broadcast take the lock and stall on bob.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let dave = Inbox::new();
        let joining = {
            let coordinator = Arc::clone(&coordinator);
            let peer = dave.peer();
            tokio::spawn(async move { coordinator.register("dave", peer).await })
        };

        let delivery = broadcasting.await.unwrap();
        joining.await.unwrap().unwrap();

        assert_eq!(delivery.reaped, names(&["bob"]));
        assert_eq!(dave.messages(), vec![joined("dave")]);
        assert_eq!(dave.presences(), vec![names(&["alice", "carol", "dave"])]);
        for inbox in [&peers[0], &peers[2]] {
            assert_eq!(
                inbox.presences(),
                vec![names(&["alice", "carol"]), names(&["alice", "carol", "dave"])]
            );
        }
    }

    #[tokio::test]
    async fn test_stats_follow_reaps_without_locking() {
        let coordinator = Coordinator::new();
        let peers = with_peers(&coordinator, &["alice", "bob", "carol"]).await;
        peers[2].fail_messages();

        coordinator.broadcast("alice", "hi").await;
        let _held = coordinator.registry.lock().await;

        let stats = coordinator.stats();
        assert_eq!(stats.members, 2);
        assert_eq!(stats.reaped_total, 1);
    }
}
