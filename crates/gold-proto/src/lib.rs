// SPDX-License-Identifier: Apache-2.0
//! gold-proto: wire schema for Gold Rush lobbies and lockstep sessions.
//!
//! Every packet starts with a one-byte message type; multi-byte integers are
//! little-endian; strings on the wire are NUL-padded fixed-width buffers.
//! This crate owns the layouts only; transport and session state live in
//! gold-net.

pub mod lobby;
pub mod message;
pub mod strings;

pub use lobby::{LobbyInfo, LOBBY_INFO_WIRE_SIZE, SCANNER_PORT, SCANNER_PROBE};
pub use message::{Message, PlayerState, ProtoError};
pub use strings::{get_fixed_string, put_fixed_string};

/// Application version string; peers must match exactly.
pub const APP_VERSION: &str = "0.4.0";

/// First port a LAN host tries to bind.
pub const BASE_PORT: u16 = 6530;

/// Fixed wire width of a username.
pub const PLAYER_NAME_BUFFER_SIZE: usize = 36;
/// Fixed wire width of the app version.
pub const APP_VERSION_BUFFER_SIZE: usize = 16;
/// Fixed wire width of a lobby name; display truncates at 40.
pub const LOBBY_NAME_BUFFER_SIZE: usize = 64;
/// Fixed wire width of a chat line.
pub const CHAT_BUFFER_SIZE: usize = 128;

/// Number of match settings carried in the lobby.
pub const MATCH_SETTING_COUNT: usize = 2;
/// Setting index: teams enabled/disabled.
pub const MATCH_SETTING_TEAMS: u8 = 0;
/// Setting index: map size preset.
pub const MATCH_SETTING_MAP_SIZE: u8 = 1;
