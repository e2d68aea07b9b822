//! Wire protocol shared by every peer: message table, payload layouts, frame
//! codec and protocol defaults.

pub mod codec;
pub mod protocol;

pub use codec::{decode_frame, encode_frame, CodecError, FrameDecoder, HEADER_LEN, MAX_PAYLOAD_LEN};
pub use protocol::{
    Color, GameStartInfo, GameState, LobbyState, MessageType, NetworkMessage, PaintStroke,
    PingBody, PlayerInfo, PlayerInput, PlayerState, Vec2,
};

/// Id the server always reports for itself.
pub const SERVER_PLAYER_ID: u32 = 0;
pub const DEFAULT_PORT: u16 = 7777;
pub const DEFAULT_MAX_CLIENTS: usize = 4;
pub const SNAPSHOT_INTERVAL_MS: u64 = 50;
pub const COUNTDOWN_SECS: u64 = 3;
pub const MIN_PLAYERS: usize = 2;
pub const INPUT_HISTORY_CAPACITY: usize = 60;

pub const WORLD_WIDTH: f32 = 1280.0;
pub const WORLD_HEIGHT: f32 = 720.0;

/// Spawn slots by roster order: top-left, top-right, bottom-right, bottom-left.
pub const SPAWN_SLOTS: [Vec2; 4] = [
    Vec2::new(100.0, 100.0),
    Vec2::new(1180.0, 100.0),
    Vec2::new(1180.0, 620.0),
    Vec2::new(100.0, 620.0),
];

/// Spawn position for the player at `index` in the roster.
///
/// Past the four corners this is a plain offset row, not a layout algorithm.
pub fn spawn_position(index: usize) -> Vec2 {
    match SPAWN_SLOTS.get(index) {
        Some(slot) => *slot,
        None => Vec2::new(400.0 + index as f32 * 100.0, 300.0),
    }
}
