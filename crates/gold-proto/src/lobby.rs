// SPDX-License-Identifier: Apache-2.0
//! LAN lobby discovery beacon.
//!
//! A server binds a UDP socket on [`SCANNER_PORT`] and answers any datagram
//! with a [`LobbyInfo`]; clients broadcast a one-byte probe and accumulate
//! the replies.

use bytes::{Buf, BufMut};

use crate::strings::{get_fixed_string, put_fixed_string};
use crate::LOBBY_NAME_BUFFER_SIZE;

/// Well-known UDP port the discovery beacon listens on.
pub const SCANNER_PORT: u16 = 6529;

/// The one-byte datagram clients broadcast to find lobbies.
pub const SCANNER_PROBE: u8 = 3;

/// Serialized size of a [`LobbyInfo`].
pub const LOBBY_INFO_WIRE_SIZE: usize = LOBBY_NAME_BUFFER_SIZE + 4;

/// A beacon reply describing one joinable lobby.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LobbyInfo {
    /// Lobby display name.
    pub name: String,
    /// Game port on the replying host.
    pub port: u16,
    /// Players currently in the lobby.
    pub player_count: u8,
}

impl LobbyInfo {
    /// Encode to the fixed wire layout.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(LOBBY_INFO_WIRE_SIZE);
        put_fixed_string(&mut out, &self.name, LOBBY_NAME_BUFFER_SIZE);
        out.put_u16_le(self.port);
        out.put_u8(self.player_count);
        out.put_u8(0); // padding
        out
    }

    /// Decode from the fixed wire layout.
    #[must_use]
    pub fn decode(mut buf: &[u8]) -> Option<Self> {
        let name = get_fixed_string(&mut buf, LOBBY_NAME_BUFFER_SIZE)?;
        if buf.remaining() < 4 {
            return None;
        }
        let port = buf.get_u16_le();
        let player_count = buf.get_u8();
        let _padding = buf.get_u8();
        Some(Self {
            name,
            port,
            player_count,
        })
    }
}
