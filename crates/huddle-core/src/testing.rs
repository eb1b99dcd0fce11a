//! In-process peers for exercising the coordinator.

use crate::callback::{Callback, ClientCallback, PushError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A push observed by a recording peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Push {
    Message {
        sender: String,
        body: String,
        private: bool,
    },
    Presence(Vec<String>),
}

#[derive(Default)]
struct InboxState {
    pushes: Mutex<Vec<Push>>,
    attempts: AtomicUsize,
    fail_messages: AtomicBool,
    fail_presence: AtomicBool,
    hang: AtomicBool,
}

/// Shared view of everything pushed to one peer, plus failure switches.
#[derive(Clone, Default)]
pub struct Inbox {
    state: Arc<InboxState>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback that records into this inbox.
    pub fn peer(&self) -> Callback {
        Box::new(RecordingPeer {
            inbox: self.clone(),
        })
    }

    pub fn pushes(&self) -> Vec<Push> {
        self.state.pushes.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<(String, String, bool)> {
        self.pushes()
            .into_iter()
            .filter_map(|push| match push {
                Push::Message {
                    sender,
                    body,
                    private,
                } => Some((sender, body, private)),
                Push::Presence(_) => None,
            })
            .collect()
    }

    pub fn presences(&self) -> Vec<Vec<String>> {
        self.pushes()
            .into_iter()
            .filter_map(|push| match push {
                Push::Presence(names) => Some(names),
                Push::Message { .. } => None,
            })
            .collect()
    }

    /// Number of pushes attempted, successful or not.
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.state.pushes.lock().unwrap().clear();
        self.state.attempts.store(0, Ordering::SeqCst);
    }

    pub fn fail_messages(&self) {
        self.state.fail_messages.store(true, Ordering::SeqCst);
    }

    pub fn fail_presence(&self) {
        self.state.fail_presence.store(true, Ordering::SeqCst);
    }

    /// Make every later push block forever.
    pub fn hang(&self) {
        self.state.hang.store(true, Ordering::SeqCst);
    }

    async fn attempt(&self, fail: &AtomicBool, push: Push) -> Result<(), PushError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        if self.state.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if fail.load(Ordering::SeqCst) {
            return Err(PushError::Failed("injected failure".to_string()));
        }
        self.state.pushes.lock().unwrap().push(push);
        Ok(())
    }
}

struct RecordingPeer {
    inbox: Inbox,
}

#[async_trait]
impl ClientCallback for RecordingPeer {
    async fn push_message(
        &self,
        sender: &str,
        body: &str,
        is_private: bool,
    ) -> Result<(), PushError> {
        let push = Push::Message {
            sender: sender.to_string(),
            body: body.to_string(),
            private: is_private,
        };
        self.inbox
            .attempt(&self.inbox.state.fail_messages, push)
            .await
    }

    async fn push_presence(&self, names: &[String]) -> Result<(), PushError> {
        let push = Push::Presence(names.to_vec());
        self.inbox
            .attempt(&self.inbox.state.fail_presence, push)
            .await
    }
}
