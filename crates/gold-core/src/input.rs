// SPDX-License-Identifier: Apache-2.0
//! Player commands and their wire codec.
//!
//! Each input is one tag byte followed by kind-specific fields, all
//! little-endian. A player's per-turn contribution is zero or more inputs
//! concatenated into one datagram; a turn with no user action still carries
//! exactly one [`MatchInput::None`] so the receiver can see the player has
//! advanced.

use bytes::{Buf, BufMut};
use thiserror::Error;

use crate::entity::EntityType;
use crate::fixed::IVec2;
use crate::id_array::EntityId;

/// Hard cap on one player's serialized inputs per turn.
pub const INPUT_BUFFER_MAX: usize = 1024;
/// Upper bound on entity ids per command.
pub const INPUT_ENTITY_MAX: usize = 255;
/// Longest chat message carried by an input.
pub const CHAT_MESSAGE_MAX: usize = 128;

/// Shared payload of every move-flavored command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MoveInput {
    /// Queue behind existing orders instead of replacing them.
    pub shift: bool,
    /// Destination cell (ignored when `target_id` resolves).
    pub target_cell: IVec2,
    /// Destination entity, or [`crate::id_array::ID_NULL`].
    pub target_id: EntityId,
    /// Commanded units.
    pub entity_ids: Vec<EntityId>,
}

/// One player command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchInput {
    /// Turn keep-alive; no action.
    None,
    /// Walk to a cell.
    MoveCell(MoveInput),
    /// Interact with an entity.
    MoveEntity(MoveInput),
    /// Attack-move to a cell.
    MoveAttackCell(MoveInput),
    /// Attack an entity.
    MoveAttackEntity(MoveInput),
    /// Repair a building.
    MoveRepair(MoveInput),
    /// Carry garrisoned units to a cell and unload.
    MoveUnload(MoveInput),
    /// Throw a smoke bomb at a cell.
    MoveSmoke(MoveInput),
    /// Halt and clear orders.
    Stop {
        /// Commanded units.
        entity_ids: Vec<EntityId>,
    },
    /// Halt and hold position.
    Defend {
        /// Commanded units.
        entity_ids: Vec<EntityId>,
    },
    /// Send builders to construct a building.
    Build {
        /// Queue behind existing orders.
        shift: bool,
        /// Building type to place.
        building: EntityType,
        /// Footprint origin.
        target_cell: IVec2,
        /// Builders.
        entity_ids: Vec<EntityId>,
    },
    /// Cancel an in-progress building.
    BuildCancel {
        /// The site to cancel.
        building_id: EntityId,
    },
    /// Enqueue a unit in a production building.
    Train {
        /// Producing building.
        building_id: EntityId,
        /// Unit type.
        unit: EntityType,
    },
    /// Enqueue an upgrade in a research building.
    Research {
        /// Researching building.
        building_id: EntityId,
        /// Upgrade bit.
        upgrade: u32,
    },
    /// Set the rally point of production buildings.
    Rally {
        /// Rally cell.
        cell: IVec2,
        /// Buildings.
        building_ids: Vec<EntityId>,
    },
    /// In-match chat line; recorded to the replay, ignored by the update.
    Chat {
        /// Message text.
        message: String,
    },
}

const TAG_NONE: u8 = 0;
const TAG_MOVE_CELL: u8 = 1;
const TAG_MOVE_ENTITY: u8 = 2;
const TAG_MOVE_ATTACK_CELL: u8 = 3;
const TAG_MOVE_ATTACK_ENTITY: u8 = 4;
const TAG_MOVE_REPAIR: u8 = 5;
const TAG_MOVE_UNLOAD: u8 = 6;
const TAG_MOVE_SMOKE: u8 = 7;
const TAG_STOP: u8 = 8;
const TAG_DEFEND: u8 = 9;
const TAG_BUILD: u8 = 10;
const TAG_BUILD_CANCEL: u8 = 11;
const TAG_TRAIN: u8 = 12;
const TAG_RESEARCH: u8 = 13;
const TAG_RALLY: u8 = 14;
const TAG_CHAT: u8 = 15;

/// Why a datagram failed to decode.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputDecodeError {
    /// The tag byte matched no command.
    #[error("unknown input tag {0}")]
    UnknownTag(u8),
    /// A field referenced an undefined entity type.
    #[error("unknown entity type {0}")]
    UnknownEntityType(u8),
    /// The buffer ended mid-field.
    #[error("input buffer truncated")]
    Truncated,
    /// Chat text was not valid UTF-8.
    #[error("chat text is not utf-8")]
    BadChatText,
}

fn take_u8(buf: &mut &[u8]) -> Result<u8, InputDecodeError> {
    if buf.remaining() < 1 {
        return Err(InputDecodeError::Truncated);
    }
    Ok(buf.get_u8())
}

fn take_u32(buf: &mut &[u8]) -> Result<u32, InputDecodeError> {
    if buf.remaining() < 4 {
        return Err(InputDecodeError::Truncated);
    }
    Ok(buf.get_u32_le())
}

fn take_i32(buf: &mut &[u8]) -> Result<i32, InputDecodeError> {
    if buf.remaining() < 4 {
        return Err(InputDecodeError::Truncated);
    }
    Ok(buf.get_i32_le())
}

fn take_cell(buf: &mut &[u8]) -> Result<IVec2, InputDecodeError> {
    let x = take_i32(buf)?;
    let y = take_i32(buf)?;
    Ok(IVec2::new(x, y))
}

fn take_ids(buf: &mut &[u8]) -> Result<Vec<EntityId>, InputDecodeError> {
    let count = take_u8(buf)? as usize;
    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        ids.push(take_u32(buf)?);
    }
    Ok(ids)
}

fn put_ids(out: &mut Vec<u8>, ids: &[EntityId]) {
    debug_assert!(ids.len() <= INPUT_ENTITY_MAX);
    out.put_u8(ids.len() as u8);
    for id in ids {
        out.put_u32_le(*id);
    }
}

fn put_cell(out: &mut Vec<u8>, cell: IVec2) {
    out.put_i32_le(cell.x);
    out.put_i32_le(cell.y);
}

fn put_move(out: &mut Vec<u8>, tag: u8, input: &MoveInput) {
    out.put_u8(tag);
    out.put_u8(u8::from(input.shift));
    put_cell(out, input.target_cell);
    out.put_u32_le(input.target_id);
    put_ids(out, &input.entity_ids);
}

fn take_move(buf: &mut &[u8]) -> Result<MoveInput, InputDecodeError> {
    let shift = take_u8(buf)? != 0;
    let target_cell = take_cell(buf)?;
    let target_id = take_u32(buf)?;
    let entity_ids = take_ids(buf)?;
    Ok(MoveInput {
        shift,
        target_cell,
        target_id,
        entity_ids,
    })
}

impl MatchInput {
    /// Append the wire form to a buffer.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        match self {
            Self::None => out.put_u8(TAG_NONE),
            Self::MoveCell(m) => put_move(out, TAG_MOVE_CELL, m),
            Self::MoveEntity(m) => put_move(out, TAG_MOVE_ENTITY, m),
            Self::MoveAttackCell(m) => put_move(out, TAG_MOVE_ATTACK_CELL, m),
            Self::MoveAttackEntity(m) => put_move(out, TAG_MOVE_ATTACK_ENTITY, m),
            Self::MoveRepair(m) => put_move(out, TAG_MOVE_REPAIR, m),
            Self::MoveUnload(m) => put_move(out, TAG_MOVE_UNLOAD, m),
            Self::MoveSmoke(m) => put_move(out, TAG_MOVE_SMOKE, m),
            Self::Stop { entity_ids } => {
                out.put_u8(TAG_STOP);
                put_ids(out, entity_ids);
            }
            Self::Defend { entity_ids } => {
                out.put_u8(TAG_DEFEND);
                put_ids(out, entity_ids);
            }
            Self::Build {
                shift,
                building,
                target_cell,
                entity_ids,
            } => {
                out.put_u8(TAG_BUILD);
                out.put_u8(u8::from(*shift));
                out.put_u8(*building as u8);
                put_cell(out, *target_cell);
                put_ids(out, entity_ids);
            }
            Self::BuildCancel { building_id } => {
                out.put_u8(TAG_BUILD_CANCEL);
                out.put_u32_le(*building_id);
            }
            Self::Train { building_id, unit } => {
                out.put_u8(TAG_TRAIN);
                out.put_u32_le(*building_id);
                out.put_u8(*unit as u8);
            }
            Self::Research {
                building_id,
                upgrade,
            } => {
                out.put_u8(TAG_RESEARCH);
                out.put_u32_le(*building_id);
                out.put_u32_le(*upgrade);
            }
            Self::Rally { cell, building_ids } => {
                out.put_u8(TAG_RALLY);
                put_cell(out, *cell);
                put_ids(out, building_ids);
            }
            Self::Chat { message } => {
                out.put_u8(TAG_CHAT);
                let bytes = message.as_bytes();
                let len = bytes.len().min(CHAT_MESSAGE_MAX);
                out.put_u8(len as u8);
                out.put_slice(&bytes[..len]);
            }
        }
    }

    /// Decode one input, advancing the buffer past it.
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, InputDecodeError> {
        let tag = take_u8(buf)?;
        match tag {
            TAG_NONE => Ok(Self::None),
            TAG_MOVE_CELL => Ok(Self::MoveCell(take_move(buf)?)),
            TAG_MOVE_ENTITY => Ok(Self::MoveEntity(take_move(buf)?)),
            TAG_MOVE_ATTACK_CELL => Ok(Self::MoveAttackCell(take_move(buf)?)),
            TAG_MOVE_ATTACK_ENTITY => Ok(Self::MoveAttackEntity(take_move(buf)?)),
            TAG_MOVE_REPAIR => Ok(Self::MoveRepair(take_move(buf)?)),
            TAG_MOVE_UNLOAD => Ok(Self::MoveUnload(take_move(buf)?)),
            TAG_MOVE_SMOKE => Ok(Self::MoveSmoke(take_move(buf)?)),
            TAG_STOP => Ok(Self::Stop {
                entity_ids: take_ids(buf)?,
            }),
            TAG_DEFEND => Ok(Self::Defend {
                entity_ids: take_ids(buf)?,
            }),
            TAG_BUILD => {
                let shift = take_u8(buf)? != 0;
                let building_byte = take_u8(buf)?;
                let building = EntityType::from_byte(building_byte)
                    .ok_or(InputDecodeError::UnknownEntityType(building_byte))?;
                let target_cell = take_cell(buf)?;
                let entity_ids = take_ids(buf)?;
                Ok(Self::Build {
                    shift,
                    building,
                    target_cell,
                    entity_ids,
                })
            }
            TAG_BUILD_CANCEL => Ok(Self::BuildCancel {
                building_id: take_u32(buf)?,
            }),
            TAG_TRAIN => {
                let building_id = take_u32(buf)?;
                let unit_byte = take_u8(buf)?;
                let unit = EntityType::from_byte(unit_byte)
                    .ok_or(InputDecodeError::UnknownEntityType(unit_byte))?;
                Ok(Self::Train { building_id, unit })
            }
            TAG_RESEARCH => Ok(Self::Research {
                building_id: take_u32(buf)?,
                upgrade: take_u32(buf)?,
            }),
            TAG_RALLY => Ok(Self::Rally {
                cell: take_cell(buf)?,
                building_ids: take_ids(buf)?,
            }),
            TAG_CHAT => {
                let len = take_u8(buf)? as usize;
                if buf.remaining() < len {
                    return Err(InputDecodeError::Truncated);
                }
                let message = std::str::from_utf8(&buf[..len])
                    .map_err(|_| InputDecodeError::BadChatText)?
                    .to_owned();
                buf.advance(len);
                Ok(Self::Chat { message })
            }
            other => Err(InputDecodeError::UnknownTag(other)),
        }
    }
}

/// Serialize a turn's inputs into one datagram body.
#[must_use]
pub fn serialize_inputs(inputs: &[MatchInput]) -> Vec<u8> {
    let mut out = Vec::new();
    for input in inputs {
        input.serialize(&mut out);
    }
    debug_assert!(out.len() <= INPUT_BUFFER_MAX, "input datagram too large");
    out
}

/// Decode a whole datagram body back into inputs.
pub fn deserialize_inputs(mut buf: &[u8]) -> Result<Vec<MatchInput>, InputDecodeError> {
    let mut inputs = Vec::new();
    while !buf.is_empty() {
        inputs.push(MatchInput::deserialize(&mut buf)?);
    }
    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id_array::ID_NULL;
    use proptest::prelude::*;

    fn round_trip(input: &MatchInput) {
        let mut bytes = Vec::new();
        input.serialize(&mut bytes);
        let mut slice = bytes.as_slice();
        let decoded = MatchInput::deserialize(&mut slice).unwrap();
        assert!(slice.is_empty(), "trailing bytes after {input:?}");
        assert_eq!(&decoded, input);
    }

    #[test]
    fn all_kinds_round_trip() {
        let move_input = MoveInput {
            shift: true,
            target_cell: IVec2::new(-3, 117),
            target_id: 42,
            entity_ids: vec![1, 2, 3],
        };
        for input in [
            MatchInput::None,
            MatchInput::MoveCell(move_input.clone()),
            MatchInput::MoveEntity(move_input.clone()),
            MatchInput::MoveAttackCell(move_input.clone()),
            MatchInput::MoveAttackEntity(move_input.clone()),
            MatchInput::MoveRepair(move_input.clone()),
            MatchInput::MoveUnload(move_input.clone()),
            MatchInput::MoveSmoke(move_input),
            MatchInput::Stop {
                entity_ids: vec![9, 10],
            },
            MatchInput::Defend { entity_ids: vec![] },
            MatchInput::Build {
                shift: false,
                building: EntityType::Hall,
                target_cell: IVec2::new(7, 8),
                entity_ids: vec![5],
            },
            MatchInput::BuildCancel { building_id: 77 },
            MatchInput::Train {
                building_id: 4,
                unit: EntityType::Soldier,
            },
            MatchInput::Research {
                building_id: 6,
                upgrade: 2,
            },
            MatchInput::Rally {
                cell: IVec2::new(30, 1),
                building_ids: vec![4, 6],
            },
            MatchInput::Chat {
                message: "howdy".to_owned(),
            },
        ] {
            round_trip(&input);
        }
    }

    #[test]
    fn move_wire_layout_is_exact() {
        let input = MatchInput::MoveCell(MoveInput {
            shift: false,
            target_cell: IVec2::new(3, 5),
            target_id: ID_NULL,
            entity_ids: vec![7],
        });
        let mut bytes = Vec::new();
        input.serialize(&mut bytes);
        let mut expected = vec![1u8, 0];
        expected.extend_from_slice(&3i32.to_le_bytes());
        expected.extend_from_slice(&5i32.to_le_bytes());
        expected.extend_from_slice(&ID_NULL.to_le_bytes());
        expected.push(1);
        expected.extend_from_slice(&7u32.to_le_bytes());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn truncated_buffers_are_rejected() {
        let mut bytes = Vec::new();
        MatchInput::MoveCell(MoveInput::default()).serialize(&mut bytes);
        for cut in 1..bytes.len() {
            let mut slice = &bytes[..cut];
            assert_eq!(
                MatchInput::deserialize(&mut slice),
                Err(InputDecodeError::Truncated),
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut slice = [200u8].as_slice();
        assert_eq!(
            MatchInput::deserialize(&mut slice),
            Err(InputDecodeError::UnknownTag(200))
        );
    }

    proptest! {
        #[test]
        fn move_inputs_round_trip(
            shift in any::<bool>(),
            x in -1000i32..1000,
            y in -1000i32..1000,
            target in any::<u32>(),
            ids in prop::collection::vec(any::<u32>(), 0..20),
        ) {
            let input = MatchInput::MoveAttackEntity(MoveInput {
                shift,
                target_cell: IVec2::new(x, y),
                target_id: target,
                entity_ids: ids,
            });
            let mut bytes = Vec::new();
            input.serialize(&mut bytes);
            let decoded = deserialize_inputs(&bytes).unwrap();
            prop_assert_eq!(decoded, vec![input]);
        }
    }
}
