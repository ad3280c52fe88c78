use serde::{Deserialize, Serialize};
use std::fmt;

pub const PROTOCOL_VERSION: u32 = 4;
pub const MAX_FRAME_LEN: usize = 2 * 1024 * 1024;
pub const FRAME_HEADER_LEN: usize = 4;

/// Phase of a connection. Decides which packets are legal and which handler
/// table a session dispatches against.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolState {
    Handshake,
    Status,
    Login,
    Play,
}

impl ProtocolState {
    /// Whether a session may move from `self` to `next`.
    ///
    /// Staying in the same state is always allowed. Otherwise the only legal
    /// steps are Handshake -> Status, Handshake -> Login and Login -> Play.
    pub fn can_advance_to(self, next: ProtocolState) -> bool {
        use ProtocolState::*;
        matches!(
            (self, next),
            (Handshake, Handshake)
                | (Status, Status)
                | (Login, Login)
                | (Play, Play)
                | (Handshake, Status)
                | (Handshake, Login)
                | (Login, Play)
        )
    }

    /// Handshake and Status have no kick packet on the wire.
    pub fn has_kick_message(self) -> bool {
        matches!(self, ProtocolState::Login | ProtocolState::Play)
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolState::Handshake => "handshake",
            ProtocolState::Status => "status",
            ProtocolState::Login => "login",
            ProtocolState::Play => "play",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BlockPlacement {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub direction: i8,
    pub held_item: i16,
}

/// Minimal JSON text component used by kick and status payloads.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TextComponent {
    pub text: String,
}

impl TextComponent {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn to_json(&self) -> String {
        // A struct with one string field always serializes.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{\"text\":\"\"}"))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Handshake {
        protocol_version: u32,
        address: String,
        port: u16,
        next_state: ProtocolState,
    },

    StatusRequest,
    StatusResponse {
        json: String,
    },
    Ping {
        time: i64,
    },

    LoginStart {
        name: String,
    },
    LoginSuccess {
        name: String,
    },

    KeepAlive {
        id: i32,
    },
    Chat {
        message: String,
    },
    BlockPlacement(BlockPlacement),
    Kick {
        json: String,
    },
}

/// Fieldless mirror of [`Packet`], used as the dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Handshake,
    StatusRequest,
    StatusResponse,
    Ping,
    LoginStart,
    LoginSuccess,
    KeepAlive,
    Chat,
    BlockPlacement,
    Kick,
}

impl Packet {
    /// Structured disconnect carrying `reason` as its single text field.
    pub fn kick(reason: &str) -> Self {
        Packet::Kick {
            json: TextComponent::new(reason).to_json(),
        }
    }

    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Handshake { .. } => PacketKind::Handshake,
            Packet::StatusRequest => PacketKind::StatusRequest,
            Packet::StatusResponse { .. } => PacketKind::StatusResponse,
            Packet::Ping { .. } => PacketKind::Ping,
            Packet::LoginStart { .. } => PacketKind::LoginStart,
            Packet::LoginSuccess { .. } => PacketKind::LoginSuccess,
            Packet::KeepAlive { .. } => PacketKind::KeepAlive,
            Packet::Chat { .. } => PacketKind::Chat,
            Packet::BlockPlacement(_) => PacketKind::BlockPlacement,
            Packet::Kick { .. } => PacketKind::Kick,
        }
    }

    pub fn is_handshake(&self) -> bool {
        self.kind() == PacketKind::Handshake
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("frame of {0} bytes exceeds the 2 MiB limit")]
    TooLarge(usize),
}

/// Serializes a packet behind a big-endian `u32` length prefix.
pub fn encode_frame(packet: &Packet) -> Result<Vec<u8>, FrameError> {
    let body = bincode::serialize(packet)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(body.len()));
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub fn check_frame_len(len: usize) -> Result<(), FrameError> {
    if len > MAX_FRAME_LEN {
        Err(FrameError::TooLarge(len))
    } else {
        Ok(())
    }
}

pub fn decode_body(body: &[u8]) -> Result<Packet, FrameError> {
    Ok(bincode::deserialize(body)?)
}
