// SPDX-License-Identifier: Apache-2.0
//! Sprite animation state and the static frame tables.
//!
//! Tables are immutable program-lifetime data keyed by [`AnimationName`];
//! they are never rebuilt per match. `loops_remaining == 0` is exactly "not
//! playing"; an animation with zero loops is a static frame.

use crate::fixed::IVec2;

/// Sentinel loop count for animations that run until replaced.
pub const ANIMATION_LOOPS_INDEFINITELY: i32 = -1;

/// Every animation the simulation can request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AnimationName {
    /// Static idle frame.
    UnitIdle,
    /// Walking cycle.
    UnitMove,
    /// Heavy walking cycle (wagons, cannons).
    UnitMoveSlow,
    /// Melee swing; damage lands when it completes.
    UnitAttack,
    /// Rifle volley; damage lands when it completes.
    SoldierRangedAttack,
    /// Cannon shot; damage lands when it completes.
    CannonAttack,
    /// Pickaxe swing used for building and repairing.
    UnitBuild,
    /// Unit death sequence.
    UnitDeath,
    /// Corpse fade-out.
    UnitDeathFade,
    /// Building collapse.
    BuildingDestroyed,
    /// Land mine priming fuse.
    MinePrime,
    /// Goldmine collapse.
    GoldmineCollapse,
    /// Smoke bomb throw.
    SmokeThrow,
}

/// One frame of an animation strip.
#[derive(Clone, Copy, Debug)]
pub struct AnimationFrame {
    /// Horizontal frame index on the sprite sheet.
    pub hframe: i32,
    /// Ticks the frame stays up.
    pub duration: u32,
}

struct AnimationData {
    vframe: i32,
    frames: &'static [AnimationFrame],
    loops: i32,
}

const fn frame(hframe: i32, duration: u32) -> AnimationFrame {
    AnimationFrame { hframe, duration }
}

const UNIT_IDLE_FRAMES: &[AnimationFrame] = &[frame(0, 0)];
const UNIT_MOVE_FRAMES: &[AnimationFrame] =
    &[frame(1, 8), frame(2, 8), frame(3, 8), frame(4, 8)];
const UNIT_MOVE_SLOW_FRAMES: &[AnimationFrame] =
    &[frame(1, 10), frame(2, 10), frame(3, 10), frame(4, 10)];
const UNIT_ATTACK_FRAMES: &[AnimationFrame] = &[frame(5, 8), frame(6, 8), frame(7, 8)];
const SOLDIER_RANGED_ATTACK_FRAMES: &[AnimationFrame] = &[
    frame(15, 8),
    frame(16, 32),
    frame(17, 32),
    frame(18, 8),
    frame(19, 8),
];
const CANNON_ATTACK_FRAMES: &[AnimationFrame] = &[
    frame(9, 8),
    frame(10, 8),
    frame(11, 8),
    frame(12, 8),
    frame(13, 8),
];
const UNIT_DEATH_FRAMES: &[AnimationFrame] = &[frame(26, 10), frame(27, 10), frame(28, 10)];
const UNIT_DEATH_FADE_FRAMES: &[AnimationFrame] =
    &[frame(29, 30), frame(30, 30), frame(31, 30)];
const BUILDING_DESTROYED_FRAMES: &[AnimationFrame] =
    &[frame(0, 12), frame(1, 12), frame(2, 12), frame(3, 12)];
const MINE_PRIME_FRAMES: &[AnimationFrame] = &[frame(0, 4), frame(1, 4)];
const GOLDMINE_COLLAPSE_FRAMES: &[AnimationFrame] =
    &[frame(0, 10), frame(1, 10), frame(2, 10), frame(3, 10)];
const SMOKE_THROW_FRAMES: &[AnimationFrame] = &[frame(20, 6), frame(21, 6), frame(22, 6)];

fn animation_data(name: AnimationName) -> AnimationData {
    match name {
        AnimationName::UnitIdle => AnimationData {
            vframe: -1,
            frames: UNIT_IDLE_FRAMES,
            loops: 0,
        },
        AnimationName::UnitMove => AnimationData {
            vframe: -1,
            frames: UNIT_MOVE_FRAMES,
            loops: ANIMATION_LOOPS_INDEFINITELY,
        },
        AnimationName::UnitMoveSlow => AnimationData {
            vframe: -1,
            frames: UNIT_MOVE_SLOW_FRAMES,
            loops: ANIMATION_LOOPS_INDEFINITELY,
        },
        AnimationName::UnitAttack => AnimationData {
            vframe: -1,
            frames: UNIT_ATTACK_FRAMES,
            loops: 1,
        },
        AnimationName::SoldierRangedAttack => AnimationData {
            vframe: -1,
            frames: SOLDIER_RANGED_ATTACK_FRAMES,
            loops: 1,
        },
        AnimationName::CannonAttack => AnimationData {
            vframe: -1,
            frames: CANNON_ATTACK_FRAMES,
            loops: 1,
        },
        AnimationName::UnitBuild => AnimationData {
            vframe: -1,
            frames: UNIT_ATTACK_FRAMES,
            loops: ANIMATION_LOOPS_INDEFINITELY,
        },
        AnimationName::UnitDeath => AnimationData {
            vframe: -1,
            frames: UNIT_DEATH_FRAMES,
            loops: 1,
        },
        AnimationName::UnitDeathFade => AnimationData {
            vframe: -1,
            frames: UNIT_DEATH_FADE_FRAMES,
            loops: 1,
        },
        AnimationName::BuildingDestroyed => AnimationData {
            vframe: 0,
            frames: BUILDING_DESTROYED_FRAMES,
            loops: 1,
        },
        AnimationName::MinePrime => AnimationData {
            vframe: 0,
            frames: MINE_PRIME_FRAMES,
            loops: 2,
        },
        AnimationName::GoldmineCollapse => AnimationData {
            vframe: 0,
            frames: GOLDMINE_COLLAPSE_FRAMES,
            loops: 1,
        },
        AnimationName::SmokeThrow => AnimationData {
            vframe: -1,
            frames: SMOKE_THROW_FRAMES,
            loops: 1,
        },
    }
}

/// Live animation state on an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Animation {
    /// Which strip is playing.
    pub name: AnimationName,
    /// Current `(hframe, vframe)` for the renderer.
    pub frame: IVec2,
    frame_index: usize,
    timer: u32,
    /// Loops left; `-1` loops forever, `0` means stopped.
    pub loops_remaining: i32,
}

impl Animation {
    /// Start an animation from its table entry.
    #[must_use]
    pub fn create(name: AnimationName) -> Self {
        let data = animation_data(name);
        Self {
            name,
            frame: IVec2::new(data.frames[0].hframe, data.vframe),
            frame_index: 0,
            timer: data.frames[0].duration,
            loops_remaining: data.loops,
        }
    }

    /// Whether the animation still advances.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.loops_remaining != 0
    }

    /// Advance one tick.
    pub fn update(&mut self) {
        if !self.is_playing() {
            return;
        }
        let data = animation_data(self.name);
        if self.timer > 0 {
            self.timer -= 1;
        }
        if self.timer > 0 {
            return;
        }

        if self.frame_index + 1 < data.frames.len() {
            self.frame_index += 1;
        } else {
            if self.loops_remaining != ANIMATION_LOOPS_INDEFINITELY {
                self.loops_remaining -= 1;
            }
            if !self.is_playing() {
                return;
            }
            self.frame_index = 0;
        }
        self.frame.x = data.frames[self.frame_index].hframe;
        self.timer = data.frames[self.frame_index].duration;
    }
}
