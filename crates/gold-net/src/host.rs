// SPDX-License-Identifier: Apache-2.0
//! The pluggable peer transport.
//!
//! A [`Host`] owns the sockets and delivers reliable, per-peer-ordered
//! datagrams; everything above it (lobby, lockstep, match) is
//! transport-agnostic. Implementations must never block: `service` polls,
//! and timeouts are the caller's tick counters. Connection info is opaque
//! bytes that only the producing implementation understands.

use gold_proto::LobbyInfo;

/// Transport-level peer handle, dense per host.
pub type PeerId = u16;

/// Player id marker for "not identified yet".
pub const PEER_PLAYER_UNKNOWN: u8 = u8::MAX;

/// Who may join an open lobby.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LobbyPrivacy {
    /// Anyone who can reach the host.
    Public,
    /// Invite-only on transports that support it.
    Friends,
    /// Nobody; used for offline play.
    Singleplayer,
}

/// Events a host surfaces to the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostEvent {
    /// `open_lobby` finished and the lobby is joinable.
    LobbyCreateSuccess,
    /// `open_lobby` failed; the session should surface an error.
    LobbyCreateFailed,
    /// A lobby beacon answered a scan.
    LobbyDiscovered {
        /// The advertised lobby.
        info: LobbyInfo,
        /// Opaque bytes to pass to `connect`.
        connection_info: Vec<u8>,
    },
    /// A peer finished the transport handshake.
    Connected(PeerId),
    /// A peer went away; carries the player id it had been tagged with, or
    /// [`PEER_PLAYER_UNKNOWN`].
    Disconnected {
        /// Tagged player id of the lost peer.
        player_id: u8,
    },
    /// A reliable-ordered datagram arrived.
    Received {
        /// Sending peer.
        peer: PeerId,
        /// Whole packet, type byte first.
        data: Vec<u8>,
    },
}

/// A reliable-ordered peer transport.
pub trait Host {
    /// Open a joinable lobby. Completion is reported via
    /// [`HostEvent::LobbyCreateSuccess`] or [`HostEvent::LobbyCreateFailed`].
    fn open_lobby(&mut self, name: &str, privacy: LobbyPrivacy);

    /// Stop accepting new peers.
    fn close_lobby(&mut self);

    /// Dial a peer from opaque connection info. Returns false when the info
    /// is unintelligible; success/failure of the dial itself arrives as an
    /// event.
    fn connect(&mut self, connection_info: &[u8]) -> bool;

    /// Number of peer slots in use (connected or in handshake).
    fn peer_count(&self) -> u16;

    /// Player id a peer was tagged with, or [`PEER_PLAYER_UNKNOWN`].
    fn peer_player_id(&self, peer: PeerId) -> u8;

    /// Tag a peer with the player id the session assigned it.
    fn set_peer_player_id(&mut self, peer: PeerId, player_id: u8);

    /// Whether a peer finished its handshake and still answers.
    fn is_peer_connected(&self, peer: PeerId) -> bool;

    /// Connection info another machine can use to dial this peer. The server
    /// forwards this to existing clients when a newcomer joins.
    fn peer_connection_info(&self, peer: PeerId) -> Vec<u8>;

    /// Drop every peer: polite FINs when `gently`, hard reset otherwise.
    fn disconnect_peers(&mut self, gently: bool);

    /// Queue a reliable-ordered datagram to one peer.
    fn send(&mut self, peer: PeerId, data: &[u8]);

    /// Queue a reliable-ordered datagram to every connected peer.
    fn broadcast(&mut self, data: &[u8]);

    /// Push queued datagrams onto the wire now.
    fn flush(&mut self);

    /// Pump the transport: read sockets, run retransmits, surface events.
    /// Never blocks.
    fn service(&mut self);

    /// Pop the next pending event.
    fn poll_event(&mut self) -> Option<HostEvent>;

    /// Broadcast a discovery probe; replies arrive as
    /// [`HostEvent::LobbyDiscovered`]. A no-op on transports without LAN
    /// discovery.
    fn scan_for_lobbies(&mut self) {}

    /// Update the player count advertised by the lobby beacon.
    fn set_lobby_player_count(&mut self, _count: u8) {}
}
