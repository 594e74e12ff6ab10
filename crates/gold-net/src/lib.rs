// SPDX-License-Identifier: Apache-2.0
//! gold-net: peer transports, the lobby session, and the lockstep barrier.
//!
//! The [`Host`] trait is the only seam the rest of the game sees; LAN UDP
//! and the in-process loopback hub implement it today, and a relay-assisted
//! internet transport slots in behind the same surface. Above it,
//! [`Session`] runs the greet/welcome lobby protocol and [`Lockstep`] gates
//! the simulation on the per-turn input barrier.

pub mod host;
pub mod lan;
pub mod lockstep;
pub mod loopback;
pub mod session;

pub use host::{Host, HostEvent, LobbyPrivacy, PeerId, PEER_PLAYER_UNKNOWN};
pub use lan::LanHost;
pub use lockstep::{Lockstep, LockstepTick, DISCONNECT_GRACE, TURN_DURATION, TURN_OFFSET};
pub use loopback::{LoopbackHost, LoopbackHub};
pub use session::{
    NetPlayer, NetworkEvent, NetworkStatus, PlayerStatus, Session, SessionError,
};
