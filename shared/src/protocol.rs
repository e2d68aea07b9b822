//! Message-type table and payload layouts of the wire protocol.
//!
//! Payloads travel as JSON documents. Field names follow the protocol's
//! camelCase naming so peers built against the same table interoperate.

use crate::codec::CodecError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Single-byte message discriminator carried in every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    // Connection
    PlayerJoin = 1,
    PlayerLeave = 2,

    // Lobby
    PlayerInfo = 10,
    PlayerReady = 11,
    GameStart = 12,
    LobbyState = 13,

    // Game
    PlayerInput = 20,
    GameState = 21,
    PlayerUpdate = 22,
    PaintStroke = 23,

    // System
    Ping = 30,
    Pong = 31,
}

impl MessageType {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let kind = match value {
            1 => MessageType::PlayerJoin,
            2 => MessageType::PlayerLeave,
            10 => MessageType::PlayerInfo,
            11 => MessageType::PlayerReady,
            12 => MessageType::GameStart,
            13 => MessageType::LobbyState,
            20 => MessageType::PlayerInput,
            21 => MessageType::GameState,
            22 => MessageType::PlayerUpdate,
            23 => MessageType::PaintStroke,
            30 => MessageType::Ping,
            31 => MessageType::Pong,
            other => return Err(CodecError::UnknownMessageType(other)),
        };
        Ok(kind)
    }
}

/// A typed message as it crosses the transport: header fields plus raw payload.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkMessage {
    pub kind: MessageType,
    pub player_id: u32,
    pub payload: Vec<u8>,
}

impl NetworkMessage {
    /// Creates a message with an empty payload.
    pub fn new(kind: MessageType, player_id: u32) -> Self {
        Self {
            kind,
            player_id,
            payload: Vec::new(),
        }
    }

    /// Creates a message whose payload is the JSON encoding of `body`.
    pub fn with_body<T: Serialize>(
        kind: MessageType,
        player_id: u32,
        body: &T,
    ) -> Result<Self, CodecError> {
        let payload = serde_json::to_vec(body).map_err(CodecError::Payload)?;
        Ok(Self {
            kind,
            player_id,
            payload,
        })
    }

    /// Decodes the JSON payload into `T`.
    pub fn body<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        serde_json::from_slice(&self.payload).map_err(CodecError::Payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// RGBA colour, one byte per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const RED: Color = Color::rgb(230, 41, 55);
    pub const GREEN: Color = Color::rgb(0, 228, 48);
    pub const BLUE: Color = Color::rgb(0, 121, 241);
    pub const ORANGE: Color = Color::rgb(255, 161, 0);
    pub const PURPLE: Color = Color::rgb(200, 122, 255);
    pub const YELLOW: Color = Color::rgb(253, 249, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::BLUE
    }
}

/// Lobby roster entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub player_id: u32,
    pub username: String,
    pub color: Color,
    pub is_ready: bool,
}

impl PlayerInfo {
    pub fn new(player_id: u32, username: impl Into<String>, color: Color) -> Self {
        Self {
            player_id,
            username: username.into(),
            color,
            is_ready: false,
        }
    }
}

/// Control flags sampled on a client, stamped with a per-client sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInput {
    pub player_id: u32,
    pub rotate_left: bool,
    pub rotate_right: bool,
    pub input_sequence: u32,
}

/// Authoritative per-player state inside a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub player_id: u32,
    pub position: Vec2,
    pub velocity: Vec2,
    /// Heading in degrees.
    pub rotation: f32,
    pub is_in_collision: bool,
}

/// Snapshot of every live player at one state sequence.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub players: Vec<PlayerState>,
    /// Milliseconds since the game started.
    pub game_time: u32,
    pub state_sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyState {
    pub players: Vec<PlayerInfo>,
    pub game_starting: bool,
    /// Whole seconds left before the game starts.
    pub countdown: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStartInfo {
    pub players: Vec<PlayerInfo>,
    pub game_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaintStroke {
    pub player_id: u32,
    pub position: Vec2,
    pub radius: f32,
    pub color: Color,
}

/// Body of `Ping` and `Pong`; the pong echoes the ping's timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingBody {
    pub timestamp: u64,
}
