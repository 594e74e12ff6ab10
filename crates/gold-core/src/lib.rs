// SPDX-License-Identifier: Apache-2.0
//! gold-core: the deterministic lockstep match engine for Gold Rush.
//!
//! Everything peers must agree on lives here: fixed-point arithmetic, the
//! seeded LCG, the map and pathfinder, fog of war, the entity state machine,
//! the input codec, the replay log, and the Adler-32 state checksum. Nothing
//! in this crate touches a socket, a clock, or a float.

pub mod animation;
pub mod checksum;
pub mod entity;
pub mod event;
pub mod fixed;
pub mod fog;
pub mod id_array;
pub mod input;
pub mod map;
pub mod noise;
pub mod path;
pub mod player;
pub mod replay;
pub mod rng;
pub mod state;
pub mod target;
pub mod upgrade;

pub use checksum::{adler32, adler32_scalar, match_checksum, serialize_match_state};
pub use entity::{entity_data, Entity, EntityMode, EntityType, TILE_SIZE};
pub use fixed::{Direction, FVec2, Fixed, IVec2, Rect};
pub use fog::{FogGrid, FogLevel};
pub use id_array::{EntityId, IdArray, ID_NULL};
pub use input::{deserialize_inputs, serialize_inputs, InputDecodeError, MatchInput, MoveInput};
pub use map::{Map, MapSize};
pub use noise::Noise;
pub use player::{MatchPlayer, MAX_PLAYERS, PLAYER_NONE};
pub use replay::{Replay, ReplayRecord, ReplayWriter};
pub use rng::Lcg;
pub use state::{match_handle_input, match_init, match_update, MatchState};
pub use target::Target;
