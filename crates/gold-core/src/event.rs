// SPDX-License-Identifier: Apache-2.0
//! Events the match emits for the surrounding shell.
//!
//! The event list is append-only during a tick, drained by the shell each
//! frame, and is not part of simulation state: it is never checksummed and
//! never read back by the update.

use crate::fixed::IVec2;
use crate::id_array::EntityId;

/// Sounds the shell may play.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SoundName {
    /// Construction/repair knock.
    Hammer,
    /// Rifle shot.
    Gun,
    /// Cannon shot.
    Cannon,
    /// Land mine or cannonball burst.
    Explosion,
    /// Unit death.
    Death,
    /// Gold mine collapse rumble.
    GoldMineCollapse,
    /// Smoke bomb pop.
    Smoke,
}

/// Minimap alert categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertKind {
    /// A friendly entity took damage.
    Attack,
    /// A building finished.
    Building,
    /// A unit finished training.
    Unit,
    /// Research completed.
    Research,
    /// A goldmine ran dry.
    MineCollapse,
}

/// Status-bar messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusMessage {
    /// Pathfinding toward a build site gave up.
    CantBuild,
    /// Not enough gold for the order.
    NotEnoughGold,
    /// The building's production queue is full.
    QueueFull,
    /// The build site is blocked or uneven.
    InvalidBuildSite,
    /// A goldmine collapsed.
    MineCollapsed,
}

impl StatusMessage {
    /// Display text.
    #[must_use]
    pub fn text(self) -> &'static str {
        match self {
            Self::CantBuild => "Can't build there.",
            Self::NotEnoughGold => "Not enough gold.",
            Self::QueueFull => "Queue is full.",
            Self::InvalidBuildSite => "Invalid build site.",
            Self::MineCollapsed => "A gold mine has collapsed.",
        }
    }
}

/// One match event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchEvent {
    /// Play a positional sound.
    Sound {
        /// Which sound.
        sound: SoundName,
        /// Pixel-space source.
        position: IVec2,
    },
    /// Show a minimap alert.
    Alert {
        /// Category.
        kind: AlertKind,
        /// Player the alert belongs to.
        player_id: u8,
        /// Alert cell.
        cell: IVec2,
        /// Alert footprint.
        cell_size: i32,
    },
    /// Show a status message to one player.
    Status {
        /// Recipient.
        player_id: u8,
        /// Message.
        message: StatusMessage,
    },
    /// Swap a player's selection from one entity to another (train spawn,
    /// builder entering a site).
    SelectionHandoff {
        /// Player whose selection moves.
        player_id: u8,
        /// Entity leaving selection.
        to_deselect: EntityId,
        /// Entity replacing it.
        to_select: EntityId,
    },
    /// An upgrade finished.
    ResearchComplete {
        /// Owning player.
        player_id: u8,
        /// Upgrade bit.
        upgrade: u32,
    },
}
