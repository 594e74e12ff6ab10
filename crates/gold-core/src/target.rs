// SPDX-License-Identifier: Apache-2.0
//! Orders an entity can carry.

use crate::entity::EntityType;
use crate::fixed::IVec2;
use crate::id_array::EntityId;

/// A single order. The head of the queue is the active target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Target {
    /// No order.
    #[default]
    None,
    /// Walk to a cell.
    Cell(IVec2),
    /// Walk to a cell, engaging enemies on the way.
    AttackCell(IVec2),
    /// Interact with an entity (mine, garrison, deposit).
    Entity(EntityId),
    /// Attack an entity.
    AttackEntity(EntityId),
    /// Repair a friendly building.
    Repair(EntityId),
    /// Carry garrisoned units to a cell and drop them.
    Unload(IVec2),
    /// Walk to `unit_cell` and place a building at `building_cell`.
    Build {
        /// What to construct.
        building: EntityType,
        /// Where the builder stands (or enters).
        unit_cell: IVec2,
        /// Building footprint origin.
        building_cell: IVec2,
    },
    /// Join an in-progress construction led by another builder.
    BuildAssist(EntityId),
    /// Throw a smoke bomb at a cell.
    Smoke(IVec2),
}

/// Upper bound on queued orders per entity.
pub const TARGET_QUEUE_MAX: usize = 16;

impl Target {
    /// Entity referenced by the order, if any.
    #[must_use]
    pub fn id(&self) -> Option<EntityId> {
        match self {
            Self::Entity(id) | Self::AttackEntity(id) | Self::Repair(id) | Self::BuildAssist(id) => {
                Some(*id)
            }
            _ => None,
        }
    }

    /// Canonical tag byte for the checksum stream.
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Cell(_) => 1,
            Self::AttackCell(_) => 2,
            Self::Entity(_) => 3,
            Self::AttackEntity(_) => 4,
            Self::Repair(_) => 5,
            Self::Unload(_) => 6,
            Self::Build { .. } => 7,
            Self::BuildAssist(_) => 8,
            Self::Smoke(_) => 9,
        }
    }
}
