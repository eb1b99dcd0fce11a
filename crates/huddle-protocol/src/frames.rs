//! Frame types for the Huddle protocol.
//!
//! Frames are the fundamental unit of communication in Huddle.
//! Each frame is serialized using MessagePack for efficient binary encoding.
//!
//! Requests carry an `id` that the matching `Ack`, `Error`, or `ActiveList`
//! response echoes. `Message` and `Presence` are server-initiated pushes and
//! carry no id.

use serde::{Deserialize, Serialize};

/// Error codes carried by [`Frame::Error`].
pub mod codes {
    pub const NAME_TAKEN: u16 = 1001;
    pub const NOT_FOUND: u16 = 1002;
    pub const RECIPIENT_OFFLINE: u16 = 1003;
    pub const REMOTE_UNAVAILABLE: u16 = 1004;
    pub const INVALID_NAME: u16 = 1005;
    pub const CAPACITY_REACHED: u16 = 1006;
    pub const NOT_REGISTERED: u16 = 1007;
    pub const ALREADY_REGISTERED: u16 = 1008;
    pub const INVALID_FRAME: u16 = 1009;
}

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Register = 0x01,
    Unregister = 0x02,
    Rename = 0x03,
    Broadcast = 0x04,
    SendPrivate = 0x05,
    ListActive = 0x06,
    Ack = 0x07,
    Error = 0x08,
    ActiveList = 0x09,
    Message = 0x0A,
    Presence = 0x0B,
    Ping = 0x0C,
    Pong = 0x0D,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Register),
            0x02 => Ok(FrameType::Unregister),
            0x03 => Ok(FrameType::Rename),
            0x04 => Ok(FrameType::Broadcast),
            0x05 => Ok(FrameType::SendPrivate),
            0x06 => Ok(FrameType::ListActive),
            0x07 => Ok(FrameType::Ack),
            0x08 => Ok(FrameType::Error),
            0x09 => Ok(FrameType::ActiveList),
            0x0A => Ok(FrameType::Message),
            0x0B => Ok(FrameType::Presence),
            0x0C => Ok(FrameType::Ping),
            0x0D => Ok(FrameType::Pong),
            _ => Err("Invalid frame type"),
        }
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Claim a name for this connection.
    #[serde(rename = "register")]
    Register {
        /// Request ID.
        id: u64,
        /// Requested name.
        name: String,
    },

    /// Release this connection's name.
    #[serde(rename = "unregister")]
    Unregister {
        /// Request ID.
        id: u64,
    },

    /// Change this connection's name.
    #[serde(rename = "rename")]
    Rename {
        /// Request ID.
        id: u64,
        /// New name.
        new_name: String,
    },

    /// Send a message to everyone.
    #[serde(rename = "broadcast")]
    Broadcast {
        /// Request ID.
        id: u64,
        /// Message text.
        body: String,
    },

    /// Send a message to one peer.
    #[serde(rename = "send_private")]
    SendPrivate {
        /// Request ID.
        id: u64,
        /// Target name.
        recipient: String,
        /// Message text.
        body: String,
    },

    /// Ask for the names currently online.
    #[serde(rename = "list_active")]
    ListActive {
        /// Request ID.
        id: u64,
    },

    /// Acknowledgment of a request.
    #[serde(rename = "ack")]
    Ack {
        /// ID of the acknowledged request.
        id: u64,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        /// Error code, see [`codes`].
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Response to `ListActive`.
    #[serde(rename = "active_list")]
    ActiveList {
        /// ID of the request.
        id: u64,
        /// Names online.
        names: Vec<String>,
    },

    /// Pushed chat message.
    #[serde(rename = "message")]
    Message {
        /// Sending peer, or the system sender for announcements.
        sender: String,
        /// Message text.
        body: String,
        /// Whether this is a private message or echo.
        private: bool,
    },

    /// Pushed presence snapshot.
    #[serde(rename = "presence")]
    Presence {
        /// Names online.
        names: Vec<String>,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional timestamp.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Register { .. } => FrameType::Register,
            Frame::Unregister { .. } => FrameType::Unregister,
            Frame::Rename { .. } => FrameType::Rename,
            Frame::Broadcast { .. } => FrameType::Broadcast,
            Frame::SendPrivate { .. } => FrameType::SendPrivate,
            Frame::ListActive { .. } => FrameType::ListActive,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Error { .. } => FrameType::Error,
            Frame::ActiveList { .. } => FrameType::ActiveList,
            Frame::Message { .. } => FrameType::Message,
            Frame::Presence { .. } => FrameType::Presence,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    /// The request ID, for frames that carry one.
    #[must_use]
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Frame::Register { id, .. }
            | Frame::Unregister { id }
            | Frame::Rename { id, .. }
            | Frame::Broadcast { id, .. }
            | Frame::SendPrivate { id, .. }
            | Frame::ListActive { id }
            | Frame::Ack { id }
            | Frame::Error { id, .. }
            | Frame::ActiveList { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Create a new Register frame.
    #[must_use]
    pub fn register(id: u64, name: impl Into<String>) -> Self {
        Frame::Register {
            id,
            name: name.into(),
        }
    }

    /// Create a new Rename frame.
    #[must_use]
    pub fn rename(id: u64, new_name: impl Into<String>) -> Self {
        Frame::Rename {
            id,
            new_name: new_name.into(),
        }
    }

    /// Create a new Broadcast frame.
    #[must_use]
    pub fn broadcast(id: u64, body: impl Into<String>) -> Self {
        Frame::Broadcast {
            id,
            body: body.into(),
        }
    }

    /// Create a new SendPrivate frame.
    #[must_use]
    pub fn send_private(id: u64, recipient: impl Into<String>, body: impl Into<String>) -> Self {
        Frame::SendPrivate {
            id,
            recipient: recipient.into(),
            body: body.into(),
        }
    }

    /// Create a new Ack frame.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Create a new ActiveList frame.
    #[must_use]
    pub fn active_list(id: u64, names: Vec<String>) -> Self {
        Frame::ActiveList { id, names }
    }

    /// Create a new Message push.
    #[must_use]
    pub fn message(sender: impl Into<String>, body: impl Into<String>, private: bool) -> Self {
        Frame::Message {
            sender: sender.into(),
            body: body.into(),
            private,
        }
    }

    /// Create a new Presence push.
    #[must_use]
    pub fn presence(names: Vec<String>) -> Self {
        Frame::Presence { names }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}
