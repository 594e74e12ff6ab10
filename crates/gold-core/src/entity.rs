// SPDX-License-Identifier: Apache-2.0
//! Entity model: types, modes, flags, the static stats table, and the entity
//! record itself.

use crate::animation::{Animation, AnimationName};
use crate::fixed::{Direction, FVec2, Fixed, IVec2, Rect};
use crate::id_array::{EntityId, ID_NULL};
use crate::target::Target;

/// Pixels per tile; sub-tile positions live in pixel space.
pub const TILE_SIZE: i32 = 16;

/// Everything that can stand on the map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum EntityType {
    /// Worker: mines gold, builds and repairs buildings.
    Miner = 0,
    /// Ranged infantry.
    Soldier = 1,
    /// Slow siege piece.
    Cannon = 2,
    /// Transport; carries units and throws smoke bombs.
    Wagon = 3,
    /// Town hall: trains miners, accepts gold deposits.
    Hall = 4,
    /// Trains soldiers.
    Saloon = 5,
    /// Trains cannons and wagons.
    Workshop = 6,
    /// Researches upgrades.
    Smith = 7,
    /// Garrison post with detection.
    Bunker = 8,
    /// Hidden explosive charge.
    LandMine = 9,
    /// Neutral gold source.
    Goldmine = 10,
}

/// Number of [`EntityType`] variants.
pub const ENTITY_TYPE_COUNT: usize = 11;

impl EntityType {
    /// Decode from a wire byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Miner),
            1 => Some(Self::Soldier),
            2 => Some(Self::Cannon),
            3 => Some(Self::Wagon),
            4 => Some(Self::Hall),
            5 => Some(Self::Saloon),
            6 => Some(Self::Workshop),
            7 => Some(Self::Smith),
            8 => Some(Self::Bunker),
            9 => Some(Self::LandMine),
            10 => Some(Self::Goldmine),
            _ => None,
        }
    }

    /// Whether the type moves under its own power.
    #[must_use]
    pub fn is_unit(self) -> bool {
        matches!(self, Self::Miner | Self::Soldier | Self::Cannon | Self::Wagon)
    }

    /// Whether the type is a player-built structure.
    #[must_use]
    pub fn is_building(self) -> bool {
        !self.is_unit() && self != Self::Goldmine
    }
}

/// What an entity is currently doing. Unit modes drive the per-tick state
/// machine; building and mine modes gate their passive behaviors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EntityMode {
    /// Unit waiting for or evaluating an order.
    UnitIdle = 0,
    /// Unit stuck; counts `timer` down then retries.
    UnitBlocked = 1,
    /// Unit walking its path.
    UnitMove = 2,
    /// Unit arrived; clears the order next step.
    UnitMoveFinished = 3,
    /// Builder working inside/beside a construction site.
    UnitBuild = 4,
    /// Unit repairing a building.
    UnitRepair = 5,
    /// Attack animation in flight; damage lands when it completes.
    UnitAttackWindup = 6,
    /// Miner inside a goldmine.
    UnitInMine = 7,
    /// Death animation.
    UnitDeath = 8,
    /// Corpse fading; removed when `timer` hits zero.
    UnitDeathFade = 9,
    /// Building under construction.
    BuildingInProgress = 10,
    /// Building operating.
    BuildingFinished = 11,
    /// Building collapse sequence; removed when it ends.
    BuildingDestroyed = 12,
    /// Land mine fuse burning.
    MinePrime = 13,
    /// Goldmine with gold left.
    Goldmine = 14,
    /// Goldmine collapse sequence; removed when it ends.
    GoldmineCollapsed = 15,
}

/// Entity flag: ignore movement toward targets.
pub const ENTITY_FLAG_HOLD_POSITION: u32 = 1;
/// Entity flag: white damage flash, toggled by the flicker timer.
pub const ENTITY_FLAG_DAMAGE_FLICKER: u32 = 1 << 1;
/// Entity flag: hidden from enemies unless detected.
pub const ENTITY_FLAG_INVISIBLE: u32 = 1 << 2;
/// Entity flag: building burning below half health.
pub const ENTITY_FLAG_ON_FIRE: u32 = 1 << 3;

/// Static, per-type data. Immutable for the program lifetime.
#[derive(Clone, Copy, Debug)]
pub struct EntityData {
    /// Display name.
    pub name: &'static str,
    /// Square footprint side in cells.
    pub cell_size: i32,
    /// Sight radius (Chebyshev).
    pub sight: i32,
    /// Health ceiling.
    pub max_health: i32,
    /// Flat damage reduction.
    pub armor: i32,
    /// Damage per landed attack.
    pub attack_damage: i32,
    /// Squared attack range; `1` means melee adjacency.
    pub range_squared: i32,
    /// Ticks between attacks.
    pub attack_cooldown: u32,
    /// Movement per tick, pixel space.
    pub speed: Fixed,
    /// Price to train or place.
    pub gold_cost: u32,
    /// Ticks to train (units only).
    pub train_duration: u32,
    /// How many units fit inside.
    pub garrison_capacity: u32,
    /// Whether the type reveals invisible enemies around it.
    pub has_detection: bool,
}

const fn speed_raw(raw: i32) -> Fixed {
    Fixed::from_raw(raw)
}

static ENTITY_DATA: [EntityData; ENTITY_TYPE_COUNT] = [
    EntityData {
        name: "Miner",
        cell_size: 1,
        sight: 7,
        max_health: 30,
        armor: 0,
        attack_damage: 3,
        range_squared: 1,
        attack_cooldown: 22,
        speed: speed_raw(52429), // 0.8
        gold_cost: 50,
        train_duration: 480,
        garrison_capacity: 0,
        has_detection: false,
    },
    EntityData {
        name: "Soldier",
        cell_size: 1,
        sight: 7,
        max_health: 45,
        armor: 0,
        attack_damage: 8,
        range_squared: 18,
        attack_cooldown: 40,
        speed: speed_raw(45875), // 0.7
        gold_cost: 100,
        train_duration: 600,
        garrison_capacity: 0,
        has_detection: false,
    },
    EntityData {
        name: "Cannon",
        cell_size: 2,
        sight: 9,
        max_health: 60,
        armor: 1,
        attack_damage: 25,
        range_squared: 49,
        attack_cooldown: 90,
        speed: speed_raw(32768), // 0.5
        gold_cost: 250,
        train_duration: 900,
        garrison_capacity: 0,
        has_detection: false,
    },
    EntityData {
        name: "Wagon",
        cell_size: 2,
        sight: 9,
        max_health: 80,
        armor: 1,
        attack_damage: 0,
        range_squared: 1,
        attack_cooldown: 0,
        speed: speed_raw(65536), // 1.0
        gold_cost: 200,
        train_duration: 720,
        garrison_capacity: 4,
        has_detection: false,
    },
    EntityData {
        name: "Town Hall",
        cell_size: 4,
        sight: 9,
        max_health: 600,
        armor: 2,
        attack_damage: 0,
        range_squared: 0,
        attack_cooldown: 0,
        speed: Fixed::ZERO,
        gold_cost: 400,
        train_duration: 0,
        garrison_capacity: 0,
        has_detection: false,
    },
    EntityData {
        name: "Saloon",
        cell_size: 3,
        sight: 7,
        max_health: 400,
        armor: 1,
        attack_damage: 0,
        range_squared: 0,
        attack_cooldown: 0,
        speed: Fixed::ZERO,
        gold_cost: 150,
        train_duration: 0,
        garrison_capacity: 0,
        has_detection: false,
    },
    EntityData {
        name: "Workshop",
        cell_size: 3,
        sight: 7,
        max_health: 400,
        armor: 1,
        attack_damage: 0,
        range_squared: 0,
        attack_cooldown: 0,
        speed: Fixed::ZERO,
        gold_cost: 250,
        train_duration: 0,
        garrison_capacity: 0,
        has_detection: false,
    },
    EntityData {
        name: "Blacksmith",
        cell_size: 2,
        sight: 7,
        max_health: 300,
        armor: 1,
        attack_damage: 0,
        range_squared: 0,
        attack_cooldown: 0,
        speed: Fixed::ZERO,
        gold_cost: 200,
        train_duration: 0,
        garrison_capacity: 0,
        has_detection: false,
    },
    EntityData {
        name: "Bunker",
        cell_size: 2,
        sight: 7,
        max_health: 250,
        armor: 2,
        attack_damage: 0,
        range_squared: 0,
        attack_cooldown: 0,
        speed: Fixed::ZERO,
        gold_cost: 100,
        train_duration: 0,
        garrison_capacity: 4,
        has_detection: true,
    },
    EntityData {
        name: "Land Mine",
        cell_size: 1,
        sight: 2,
        max_health: 5,
        armor: 0,
        attack_damage: 40,
        range_squared: 0,
        attack_cooldown: 0,
        speed: Fixed::ZERO,
        gold_cost: 20,
        train_duration: 0,
        garrison_capacity: 0,
        has_detection: false,
    },
    EntityData {
        name: "Gold Mine",
        cell_size: 3,
        sight: 0,
        max_health: 0,
        armor: 0,
        attack_damage: 0,
        range_squared: 0,
        attack_cooldown: 0,
        speed: Fixed::ZERO,
        gold_cost: 0,
        train_duration: 0,
        garrison_capacity: 0,
        has_detection: false,
    },
];

/// Static data for a type.
#[must_use]
pub fn entity_data(entity_type: EntityType) -> &'static EntityData {
    &ENTITY_DATA[entity_type as usize]
}

/// A queued production job inside a building.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildingJob {
    /// Train a unit.
    Train(EntityType),
    /// Research an upgrade bit.
    Research(u32),
}

/// One entity record. Owned by the match's id arena; entities reference each
/// other only by id.
#[derive(Clone, Debug)]
pub struct Entity {
    /// Static type.
    pub entity_type: EntityType,
    /// Current mode.
    pub mode: EntityMode,
    /// Owning player, or `PLAYER_NONE` for neutrals.
    pub player_id: u8,
    /// Flag bit set.
    pub flags: u32,
    /// Footprint origin cell.
    pub cell: IVec2,
    /// Sub-tile position, pixel space.
    pub position: FVec2,
    /// Facing.
    pub direction: Direction,
    /// Current health.
    pub health: i32,
    /// Active order.
    pub target: Target,
    /// Pending orders, oldest first.
    pub target_queue: Vec<Target>,
    /// Remaining path cells, next step first.
    pub path: Vec<IVec2>,
    /// Consecutive failed pathfinds toward the active order.
    pub pathfind_attempts: u32,
    /// Mode-specific countdown (blocked wait, fade, fuse, mine trip).
    pub timer: u32,
    /// Ticks until the next attack may land.
    pub cooldown_timer: u32,
    /// Ticks until the smoke bomb is ready again.
    pub ability_cooldown_timer: u32,
    /// Remaining invisibility granted by a smoke bomb.
    pub smoke_timer: u32,
    /// Gold carried (miner) or held (goldmine).
    pub gold_held: u32,
    /// Goldmine this miner shuttles to.
    pub gold_mine_id: EntityId,
    /// Entity this one sits inside, or [`ID_NULL`].
    pub garrison_id: EntityId,
    /// Units sitting inside this one.
    pub garrisoned_units: Vec<EntityId>,
    /// Where trained units walk after spawning.
    pub rally_point: IVec2,
    /// Production queue (buildings).
    pub queue: Vec<BuildingJob>,
    /// Ticks left on the head production job.
    pub queue_timer: u32,
    /// Damage flashes left to show.
    pub taking_damage_counter: u32,
    /// Ticks until the next flicker toggle.
    pub taking_damage_timer: u32,
    /// Ticks until the next regen point.
    pub health_regen_timer: u32,
    /// Current animation.
    pub animation: Animation,
}

impl Entity {
    /// Footprint rect.
    #[must_use]
    pub fn rect(&self) -> Rect {
        Rect::square(self.cell, entity_data(self.entity_type).cell_size)
    }

    /// Whether a flag is set.
    #[must_use]
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    /// Set or clear a flag.
    pub fn set_flag(&mut self, flag: u32, value: bool) {
        if value {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }

    /// Whether the entity can be selected and targeted: alive, not fading
    /// out, not hidden inside a mine or garrison.
    #[must_use]
    pub fn is_selectable(&self) -> bool {
        !matches!(
            self.mode,
            EntityMode::UnitDeath
                | EntityMode::UnitDeathFade
                | EntityMode::UnitInMine
                | EntityMode::BuildingDestroyed
                | EntityMode::GoldmineCollapsed
        ) && self.garrison_id == ID_NULL
    }

    /// Pixel-space position the entity is walking toward: the origin of its
    /// current cell.
    #[must_use]
    pub fn target_position(&self) -> FVec2 {
        FVec2::from_ivec2(self.cell * TILE_SIZE)
    }

    /// Animation a unit should be playing for its mode.
    #[must_use]
    pub fn expected_animation(&self) -> AnimationName {
        match self.mode {
            EntityMode::UnitMove => {
                if matches!(self.entity_type, EntityType::Cannon | EntityType::Wagon) {
                    AnimationName::UnitMoveSlow
                } else {
                    AnimationName::UnitMove
                }
            }
            EntityMode::UnitBuild | EntityMode::UnitRepair => AnimationName::UnitBuild,
            EntityMode::UnitAttackWindup => match self.entity_type {
                EntityType::Soldier => AnimationName::SoldierRangedAttack,
                EntityType::Cannon => AnimationName::CannonAttack,
                _ => AnimationName::UnitAttack,
            },
            EntityMode::UnitDeath => AnimationName::UnitDeath,
            EntityMode::UnitDeathFade => AnimationName::UnitDeathFade,
            _ => AnimationName::UnitIdle,
        }
    }
}
