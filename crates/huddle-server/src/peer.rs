//! WebSocket connections as coordinator callbacks.

use async_trait::async_trait;
use huddle_core::{ClientCallback, PushError, SessionId};
use huddle_protocol::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Callback that queues pushes on a connection's outbound channel.
///
/// A full queue makes the push wait, which the coordinator bounds with its
/// push timeout. Clears the shared `live` flag when dropped, which happens
/// when the coordinator removes the session.
pub struct WsPeer {
    outbound: mpsc::Sender<Frame>,
    live: Arc<AtomicBool>,
}

impl WsPeer {
    /// Create a peer and the flag that tracks its registration.
    #[must_use]
    pub fn new(outbound: mpsc::Sender<Frame>) -> (Self, Arc<AtomicBool>) {
        let live = Arc::new(AtomicBool::new(true));
        let peer = Self {
            outbound,
            live: Arc::clone(&live),
        };
        (peer, live)
    }

    async fn push(&self, frame: Frame) -> Result<(), PushError> {
        trace!(frame_type = ?frame.frame_type(), "Queueing push");
        self.outbound
            .send(frame)
            .await
            .map_err(|_| PushError::Disconnected)
    }
}

#[async_trait]
impl ClientCallback for WsPeer {
    async fn push_message(
        &self,
        sender: &str,
        body: &str,
        is_private: bool,
    ) -> Result<(), PushError> {
        self.push(Frame::message(sender, body, is_private)).await
    }

    async fn push_presence(&self, names: &[String]) -> Result<(), PushError> {
        self.push(Frame::presence(names.to_vec())).await
    }
}

impl Drop for WsPeer {
    fn drop(&mut self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

/// The name a connection holds, if any.
#[derive(Debug)]
pub struct Identity {
    /// Current name.
    pub name: String,
    /// Registration that owns the name.
    pub session: SessionId,
    live: Arc<AtomicBool>,
}

impl Identity {
    /// Create an identity for a freshly registered peer.
    #[must_use]
    pub fn new(name: String, session: SessionId, live: Arc<AtomicBool>) -> Self {
        Self {
            name,
            session,
            live,
        }
    }

    /// Whether the coordinator still holds this registration.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}
