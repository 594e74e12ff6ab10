// SPDX-License-Identifier: Apache-2.0
//! Append-only replay log.
//!
//! A replay is the match-load payload plus every turn's inputs and chat, so
//! reading one reconstructs the whole match by replaying `match_init` and
//! each turn through the normal input path. Files closed mid-match are valid
//! replays up to their last flushed turn.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use bytes::{Buf, BufMut};
use thiserror::Error;

use crate::input::{deserialize_inputs, serialize_inputs, InputDecodeError, MatchInput};
use crate::map::MapSize;
use crate::noise::Noise;
use crate::player::{MatchPlayer, MAX_PLAYERS};

/// File magic.
pub const REPLAY_MAGIC: &[u8; 8] = b"GOLDRPLY";
/// Format version.
pub const REPLAY_VERSION: u32 = 1;
/// Fixed width of a player name in the header.
pub const REPLAY_NAME_BUFFER: usize = 36;

const RECORD_TAG_INPUT: u8 = 0;
const RECORD_TAG_CHAT: u8 = 1;

/// One player slot in the header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplayPlayer {
    /// Zero for an empty slot.
    pub status: u8,
    /// Lobby recolor.
    pub recolor_id: u8,
    /// Team index.
    pub team: u8,
    /// Player name, truncated to the header width.
    pub name: String,
}

/// One record after the header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplayRecord {
    /// A player's inputs for one turn.
    Input {
        /// Turn counter at execution.
        turn: u32,
        /// Acting player.
        player_id: u8,
        /// Decoded inputs.
        inputs: Vec<MatchInput>,
    },
    /// A chat line.
    Chat {
        /// Turn the line arrived on.
        turn: u32,
        /// Speaking player.
        player_id: u8,
        /// Message text.
        text: String,
    },
}

/// Why a replay failed to parse.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// Underlying I/O failure.
    #[error("replay io: {0}")]
    Io(#[from] io::Error),
    /// Magic bytes did not match.
    #[error("not a replay file")]
    BadMagic,
    /// Unsupported format version.
    #[error("unsupported replay version {0}")]
    BadVersion(u32),
    /// The byte stream ended mid-structure.
    #[error("replay truncated")]
    Truncated,
    /// An input record failed to decode.
    #[error("replay input record: {0}")]
    Input(#[from] InputDecodeError),
}

/// Streaming replay writer.
#[derive(Debug)]
pub struct ReplayWriter<W: Write> {
    out: W,
}

impl ReplayWriter<BufWriter<File>> {
    /// Create a replay file and write its header.
    pub fn create(
        path: &Path,
        lcg_seed: i32,
        map_size: MapSize,
        noise: &Noise,
        players: &[MatchPlayer; MAX_PLAYERS],
    ) -> io::Result<Self> {
        let file = BufWriter::new(File::create(path)?);
        Self::new(file, lcg_seed, map_size, noise, players)
    }
}

impl<W: Write> ReplayWriter<W> {
    /// Wrap a sink and write the header.
    pub fn new(
        mut out: W,
        lcg_seed: i32,
        map_size: MapSize,
        noise: &Noise,
        players: &[MatchPlayer; MAX_PLAYERS],
    ) -> io::Result<Self> {
        let mut header = Vec::new();
        header.put_slice(REPLAY_MAGIC);
        header.put_u32_le(REPLAY_VERSION);
        header.put_i32_le(lcg_seed);
        header.put_u8(map_size as u8);
        header.put_u32_le(noise.width);
        header.put_u32_le(noise.height);
        for value in &noise.values {
            header.put_i8(*value);
        }
        for player in players {
            header.put_u8(u8::from(player.active));
            header.put_u8(player.recolor_id);
            header.put_u8(player.team);
            let mut name = [0u8; REPLAY_NAME_BUFFER];
            let bytes = player.name.as_bytes();
            let len = bytes.len().min(REPLAY_NAME_BUFFER - 1);
            name[..len].copy_from_slice(&bytes[..len]);
            header.put_slice(&name);
        }
        out.write_all(&header)?;
        Ok(Self { out })
    }

    /// Append one player's inputs for a turn.
    pub fn write_inputs(
        &mut self,
        turn: u32,
        player_id: u8,
        inputs: &[MatchInput],
    ) -> io::Result<()> {
        let body = serialize_inputs(inputs);
        self.write_record(RECORD_TAG_INPUT, turn, player_id, &body)
    }

    /// Append a chat line.
    pub fn write_chat(&mut self, turn: u32, player_id: u8, text: &str) -> io::Result<()> {
        self.write_record(RECORD_TAG_CHAT, turn, player_id, text.as_bytes())
    }

    fn write_record(&mut self, tag: u8, turn: u32, player_id: u8, body: &[u8]) -> io::Result<()> {
        debug_assert!(body.len() <= u16::MAX as usize);
        let mut record = Vec::with_capacity(8 + body.len());
        record.put_u8(tag);
        record.put_u32_le(turn);
        record.put_u8(player_id);
        record.put_u16_le(body.len() as u16);
        record.put_slice(body);
        self.out.write_all(&record)
    }

    /// Flush buffered records to the sink.
    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    /// Flush and drop the writer.
    pub fn finish(mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// A fully parsed replay.
#[derive(Clone, Debug)]
pub struct Replay {
    /// Seed broadcast in MATCH_LOAD.
    pub lcg_seed: i32,
    /// Map size setting.
    pub map_size: MapSize,
    /// Noise broadcast in MATCH_LOAD.
    pub noise: Noise,
    /// Player header records.
    pub players: [ReplayPlayer; MAX_PLAYERS],
    /// All records in append order.
    pub records: Vec<ReplayRecord>,
}

impl Replay {
    /// Parse a replay file.
    pub fn read_file(path: &Path) -> Result<Self, ReplayError> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;
        Self::read(&bytes)
    }

    /// Parse a replay byte stream. Trailing partial records (an interrupted
    /// write) terminate the record list without failing the parse.
    pub fn read(mut buf: &[u8]) -> Result<Self, ReplayError> {
        if buf.remaining() < REPLAY_MAGIC.len() {
            return Err(ReplayError::Truncated);
        }
        if &buf[..REPLAY_MAGIC.len()] != REPLAY_MAGIC {
            return Err(ReplayError::BadMagic);
        }
        buf.advance(REPLAY_MAGIC.len());

        if buf.remaining() < 4 + 4 + 1 + 8 {
            return Err(ReplayError::Truncated);
        }
        let version = buf.get_u32_le();
        if version != REPLAY_VERSION {
            return Err(ReplayError::BadVersion(version));
        }
        let lcg_seed = buf.get_i32_le();
        let map_size = MapSize::from_byte(buf.get_u8());
        let width = buf.get_u32_le();
        let height = buf.get_u32_le();
        let sample_count = (width as usize) * (height as usize);
        if buf.remaining() < sample_count {
            return Err(ReplayError::Truncated);
        }
        let mut values = Vec::with_capacity(sample_count);
        for _ in 0..sample_count {
            values.push(buf.get_i8());
        }
        let noise = Noise {
            width,
            height,
            values,
        };

        let mut players: [ReplayPlayer; MAX_PLAYERS] = Default::default();
        for player in &mut players {
            if buf.remaining() < 3 + REPLAY_NAME_BUFFER {
                return Err(ReplayError::Truncated);
            }
            player.status = buf.get_u8();
            player.recolor_id = buf.get_u8();
            player.team = buf.get_u8();
            let name_bytes = &buf[..REPLAY_NAME_BUFFER];
            let end = name_bytes
                .iter()
                .position(|b| *b == 0)
                .unwrap_or(REPLAY_NAME_BUFFER);
            player.name = String::from_utf8_lossy(&name_bytes[..end]).into_owned();
            buf.advance(REPLAY_NAME_BUFFER);
        }

        let mut records = Vec::new();
        while buf.remaining() >= 8 {
            let tag = buf.get_u8();
            let turn = buf.get_u32_le();
            let player_id = buf.get_u8();
            let length = buf.get_u16_le() as usize;
            if buf.remaining() < length {
                // Interrupted write; keep what we have.
                break;
            }
            let body = &buf[..length];
            match tag {
                RECORD_TAG_INPUT => records.push(ReplayRecord::Input {
                    turn,
                    player_id,
                    inputs: deserialize_inputs(body)?,
                }),
                RECORD_TAG_CHAT => records.push(ReplayRecord::Chat {
                    turn,
                    player_id,
                    text: String::from_utf8_lossy(body).into_owned(),
                }),
                _ => {}
            }
            buf.advance(length);
        }

        Ok(Self {
            lcg_seed,
            map_size,
            noise,
            players,
            records,
        })
    }

    /// Convert the header players back into match players.
    #[must_use]
    pub fn match_players(&self) -> [MatchPlayer; MAX_PLAYERS] {
        let mut players: [MatchPlayer; MAX_PLAYERS] = Default::default();
        for (slot, header) in players.iter_mut().zip(self.players.iter()) {
            slot.active = header.status != 0;
            slot.name = header.name.clone();
            slot.team = header.team;
            slot.recolor_id = header.recolor_id;
        }
        players
    }

    /// Highest turn number among input records.
    #[must_use]
    pub fn last_turn(&self) -> u32 {
        self.records
            .iter()
            .map(|record| match record {
                ReplayRecord::Input { turn, .. } | ReplayRecord::Chat { turn, .. } => *turn,
            })
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::IVec2;
    use crate::id_array::ID_NULL;
    use crate::input::MoveInput;

    fn players() -> [MatchPlayer; MAX_PLAYERS] {
        let mut players: [MatchPlayer; MAX_PLAYERS] = Default::default();
        players[0].active = true;
        players[0].name = "A".to_owned();
        players[1].active = true;
        players[1].name = "B".to_owned();
        players[1].team = 1;
        players[1].recolor_id = 1;
        players
    }

    #[test]
    fn write_then_read_round_trips() {
        let noise = Noise::zeroed(8, 8);
        let mut bytes = Vec::new();
        let mut writer =
            ReplayWriter::new(&mut bytes, 42, MapSize::Small, &noise, &players()).unwrap();
        let inputs = vec![MatchInput::MoveCell(MoveInput {
            shift: false,
            target_cell: IVec2::new(3, 5),
            target_id: ID_NULL,
            entity_ids: vec![2],
        })];
        writer.write_inputs(5, 1, &inputs).unwrap();
        writer.write_chat(6, 0, "gl hf").unwrap();
        writer.finish().unwrap();

        let replay = Replay::read(&bytes).unwrap();
        assert_eq!(replay.lcg_seed, 42);
        assert_eq!(replay.map_size, MapSize::Small);
        assert_eq!(replay.noise, noise);
        assert_eq!(replay.players[0].name, "A");
        assert_eq!(replay.players[1].team, 1);
        assert_eq!(replay.records.len(), 2);
        assert_eq!(
            replay.records[0],
            ReplayRecord::Input {
                turn: 5,
                player_id: 1,
                inputs,
            }
        );
        assert_eq!(replay.last_turn(), 6);
    }

    #[test]
    fn partial_tail_is_tolerated() {
        let noise = Noise::zeroed(4, 4);
        let mut bytes = Vec::new();
        let mut writer =
            ReplayWriter::new(&mut bytes, 7, MapSize::Small, &noise, &players()).unwrap();
        writer.write_inputs(1, 0, &[MatchInput::None]).unwrap();
        writer.finish().unwrap();
        // Simulate a crash mid-record.
        bytes.extend_from_slice(&[RECORD_TAG_INPUT, 9, 0]);
        let replay = Replay::read(&bytes).unwrap();
        assert_eq!(replay.records.len(), 1);
    }

    #[test]
    fn bad_magic_is_rejected() {
        assert!(matches!(
            Replay::read(b"NOTAFILE"),
            Err(ReplayError::BadMagic)
        ));
    }
}
