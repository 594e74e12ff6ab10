// SPDX-License-Identifier: Apache-2.0
//! Session messages.
//!
//! The INPUT payload is opaque here: the input plane's own codec (gold-core)
//! produces and consumes it, this layer only frames it.

use bytes::{Buf, BufMut};
use thiserror::Error;

use crate::strings::{get_fixed_string, put_fixed_string};
use crate::{
    APP_VERSION_BUFFER_SIZE, CHAT_BUFFER_SIZE, LOBBY_NAME_BUFFER_SIZE, PLAYER_NAME_BUFFER_SIZE,
};

const MESSAGE_GREET_SERVER: u8 = 0;
const MESSAGE_INVALID_VERSION: u8 = 1;
const MESSAGE_GAME_ALREADY_STARTED: u8 = 2;
const MESSAGE_WELCOME: u8 = 3;
const MESSAGE_NEW_PLAYER: u8 = 4;
const MESSAGE_GREET: u8 = 5;
const MESSAGE_READY: u8 = 6;
const MESSAGE_NOT_READY: u8 = 7;
const MESSAGE_COLOR: u8 = 8;
const MESSAGE_MATCH_SETTING: u8 = 9;
const MESSAGE_LOBBY_CHAT: u8 = 10;
const MESSAGE_MATCH_LOAD: u8 = 11;
const MESSAGE_TEAM: u8 = 12;
const MESSAGE_INPUT: u8 = 13;
const MESSAGE_CHECKSUM: u8 = 14;

/// Lobby-visible state of one player, carried by GREET.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlayerState {
    /// Player status byte (see gold-net's `PlayerStatus`).
    pub status: u8,
    /// Chosen recolor.
    pub recolor_id: u8,
    /// Chosen team.
    pub team: u8,
    /// Username.
    pub name: String,
}

/// Every message that crosses a session connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Client's hello after the transport connects.
    GreetServer {
        /// Client username.
        username: String,
        /// Client build version.
        app_version: String,
    },
    /// Server rejection: version mismatch.
    InvalidVersion,
    /// Server rejection: match already underway.
    GameAlreadyStarted,
    /// Server acceptance with the new player's assignments.
    Welcome {
        /// Assigned player id.
        player_id: u8,
        /// Assigned recolor.
        recolor_id: u8,
        /// Assigned team.
        team: u8,
        /// Server's recolor.
        server_recolor_id: u8,
        /// Server's team.
        server_team: u8,
        /// Server's username.
        server_username: String,
        /// Lobby display name.
        lobby_name: String,
    },
    /// Server tells existing clients how to dial a newcomer.
    NewPlayer {
        /// Opaque transport connection info.
        connection_info: Vec<u8>,
    },
    /// Existing client introduces itself to a newcomer, peer to peer.
    Greet {
        /// The sender's player id.
        player_id: u8,
        /// The sender's lobby state.
        player: PlayerState,
    },
    /// Sender is ready to start.
    Ready,
    /// Sender withdrew readiness.
    NotReady,
    /// Sender changed recolor.
    Color {
        /// New recolor.
        recolor_id: u8,
    },
    /// Sender changed team.
    Team {
        /// New team.
        team: u8,
    },
    /// Host changed a match setting.
    MatchSetting {
        /// Setting index.
        setting: u8,
        /// New value.
        value: u8,
    },
    /// Lobby chat line.
    LobbyChat {
        /// Message text.
        message: String,
    },
    /// Host starts the match: seed plus the serialized noise buffer.
    MatchLoad {
        /// Simulation seed.
        lcg_seed: i32,
        /// Noise width in tiles.
        noise_width: u32,
        /// Noise height in tiles.
        noise_height: u32,
        /// Row-major noise samples.
        noise: Vec<u8>,
    },
    /// One player's serialized inputs for one turn.
    Input {
        /// Concatenated input-plane bytes.
        inputs: Vec<u8>,
    },
    /// One player's state checksum for one turn.
    Checksum {
        /// Turn the checksum was taken on.
        turn: u32,
        /// Adler-32 of the canonical state.
        value: u32,
    },
}

/// Why a packet failed to decode.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    /// The type byte matched no message.
    #[error("unknown message type {0}")]
    UnknownType(u8),
    /// The packet ended mid-field.
    #[error("packet truncated")]
    Truncated,
}

fn need(buf: &[u8], bytes: usize) -> Result<(), ProtoError> {
    if buf.remaining() < bytes {
        return Err(ProtoError::Truncated);
    }
    Ok(())
}

fn take_string(buf: &mut &[u8], width: usize) -> Result<String, ProtoError> {
    get_fixed_string(buf, width).ok_or(ProtoError::Truncated)
}

impl Message {
    /// Encode into a packet, type byte first.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Self::GreetServer {
                username,
                app_version,
            } => {
                out.put_u8(MESSAGE_GREET_SERVER);
                put_fixed_string(&mut out, username, PLAYER_NAME_BUFFER_SIZE);
                put_fixed_string(&mut out, app_version, APP_VERSION_BUFFER_SIZE);
            }
            Self::InvalidVersion => out.put_u8(MESSAGE_INVALID_VERSION),
            Self::GameAlreadyStarted => out.put_u8(MESSAGE_GAME_ALREADY_STARTED),
            Self::Welcome {
                player_id,
                recolor_id,
                team,
                server_recolor_id,
                server_team,
                server_username,
                lobby_name,
            } => {
                out.put_u8(MESSAGE_WELCOME);
                out.put_u8(*player_id);
                out.put_u8(*recolor_id);
                out.put_u8(*team);
                out.put_u8(*server_recolor_id);
                out.put_u8(*server_team);
                put_fixed_string(&mut out, server_username, PLAYER_NAME_BUFFER_SIZE);
                put_fixed_string(&mut out, lobby_name, LOBBY_NAME_BUFFER_SIZE);
            }
            Self::NewPlayer { connection_info } => {
                out.put_u8(MESSAGE_NEW_PLAYER);
                out.put_u16_le(connection_info.len() as u16);
                out.put_slice(connection_info);
            }
            Self::Greet { player_id, player } => {
                out.put_u8(MESSAGE_GREET);
                out.put_u8(*player_id);
                out.put_u8(player.status);
                out.put_u8(player.recolor_id);
                out.put_u8(player.team);
                put_fixed_string(&mut out, &player.name, PLAYER_NAME_BUFFER_SIZE);
            }
            Self::Ready => out.put_u8(MESSAGE_READY),
            Self::NotReady => out.put_u8(MESSAGE_NOT_READY),
            Self::Color { recolor_id } => {
                out.put_u8(MESSAGE_COLOR);
                out.put_u8(*recolor_id);
            }
            Self::Team { team } => {
                out.put_u8(MESSAGE_TEAM);
                out.put_u8(*team);
            }
            Self::MatchSetting { setting, value } => {
                out.put_u8(MESSAGE_MATCH_SETTING);
                out.put_u8(*setting);
                out.put_u8(*value);
            }
            Self::LobbyChat { message } => {
                out.put_u8(MESSAGE_LOBBY_CHAT);
                put_fixed_string(&mut out, message, CHAT_BUFFER_SIZE);
            }
            Self::MatchLoad {
                lcg_seed,
                noise_width,
                noise_height,
                noise,
            } => {
                out.put_u8(MESSAGE_MATCH_LOAD);
                out.put_i32_le(*lcg_seed);
                out.put_u32_le(*noise_width);
                out.put_u32_le(*noise_height);
                out.put_slice(noise);
            }
            Self::Input { inputs } => {
                out.put_u8(MESSAGE_INPUT);
                out.put_slice(inputs);
            }
            Self::Checksum { turn, value } => {
                out.put_u8(MESSAGE_CHECKSUM);
                out.put_u32_le(*turn);
                out.put_u32_le(*value);
            }
        }
        out
    }

    /// Decode a whole packet.
    pub fn decode(packet: &[u8]) -> Result<Self, ProtoError> {
        let mut buf = packet;
        need(buf, 1)?;
        let message_type = buf.get_u8();
        match message_type {
            MESSAGE_GREET_SERVER => {
                let username = take_string(&mut buf, PLAYER_NAME_BUFFER_SIZE)?;
                let app_version = take_string(&mut buf, APP_VERSION_BUFFER_SIZE)?;
                Ok(Self::GreetServer {
                    username,
                    app_version,
                })
            }
            MESSAGE_INVALID_VERSION => Ok(Self::InvalidVersion),
            MESSAGE_GAME_ALREADY_STARTED => Ok(Self::GameAlreadyStarted),
            MESSAGE_WELCOME => {
                need(buf, 5)?;
                let player_id = buf.get_u8();
                let recolor_id = buf.get_u8();
                let team = buf.get_u8();
                let server_recolor_id = buf.get_u8();
                let server_team = buf.get_u8();
                let server_username = take_string(&mut buf, PLAYER_NAME_BUFFER_SIZE)?;
                let lobby_name = take_string(&mut buf, LOBBY_NAME_BUFFER_SIZE)?;
                Ok(Self::Welcome {
                    player_id,
                    recolor_id,
                    team,
                    server_recolor_id,
                    server_team,
                    server_username,
                    lobby_name,
                })
            }
            MESSAGE_NEW_PLAYER => {
                need(buf, 2)?;
                let length = buf.get_u16_le() as usize;
                need(buf, length)?;
                let connection_info = buf[..length].to_vec();
                Ok(Self::NewPlayer { connection_info })
            }
            MESSAGE_GREET => {
                need(buf, 4)?;
                let player_id = buf.get_u8();
                let status = buf.get_u8();
                let recolor_id = buf.get_u8();
                let team = buf.get_u8();
                let name = take_string(&mut buf, PLAYER_NAME_BUFFER_SIZE)?;
                Ok(Self::Greet {
                    player_id,
                    player: PlayerState {
                        status,
                        recolor_id,
                        team,
                        name,
                    },
                })
            }
            MESSAGE_READY => Ok(Self::Ready),
            MESSAGE_NOT_READY => Ok(Self::NotReady),
            MESSAGE_COLOR => {
                need(buf, 1)?;
                Ok(Self::Color {
                    recolor_id: buf.get_u8(),
                })
            }
            MESSAGE_TEAM => {
                need(buf, 1)?;
                Ok(Self::Team {
                    team: buf.get_u8(),
                })
            }
            MESSAGE_MATCH_SETTING => {
                need(buf, 2)?;
                let setting = buf.get_u8();
                let value = buf.get_u8();
                Ok(Self::MatchSetting { setting, value })
            }
            MESSAGE_LOBBY_CHAT => {
                let message = take_string(&mut buf, CHAT_BUFFER_SIZE)?;
                Ok(Self::LobbyChat { message })
            }
            MESSAGE_MATCH_LOAD => {
                need(buf, 12)?;
                let lcg_seed = buf.get_i32_le();
                let noise_width = buf.get_u32_le();
                let noise_height = buf.get_u32_le();
                let sample_count = (noise_width as usize)
                    .checked_mul(noise_height as usize)
                    .ok_or(ProtoError::Truncated)?;
                need(buf, sample_count)?;
                let noise = buf[..sample_count].to_vec();
                Ok(Self::MatchLoad {
                    lcg_seed,
                    noise_width,
                    noise_height,
                    noise,
                })
            }
            MESSAGE_INPUT => Ok(Self::Input {
                inputs: buf.to_vec(),
            }),
            MESSAGE_CHECKSUM => {
                need(buf, 8)?;
                let turn = buf.get_u32_le();
                let value = buf.get_u32_le();
                Ok(Self::Checksum { turn, value })
            }
            other => Err(ProtoError::UnknownType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(message: Message) {
        let bytes = message.encode();
        assert_eq!(Message::decode(&bytes), Ok(message));
    }

    #[test]
    fn every_message_round_trips() {
        round_trip(Message::GreetServer {
            username: "tex".to_owned(),
            app_version: "0.4.0".to_owned(),
        });
        round_trip(Message::InvalidVersion);
        round_trip(Message::GameAlreadyStarted);
        round_trip(Message::Welcome {
            player_id: 2,
            recolor_id: 1,
            team: 1,
            server_recolor_id: 0,
            server_team: 0,
            server_username: "host".to_owned(),
            lobby_name: "host's Game".to_owned(),
        });
        round_trip(Message::NewPlayer {
            connection_info: vec![192, 168, 1, 7, 0x82, 0x19],
        });
        round_trip(Message::Greet {
            player_id: 1,
            player: PlayerState {
                status: 2,
                recolor_id: 3,
                team: 1,
                name: "sal".to_owned(),
            },
        });
        round_trip(Message::Ready);
        round_trip(Message::NotReady);
        round_trip(Message::Color { recolor_id: 5 });
        round_trip(Message::Team { team: 1 });
        round_trip(Message::MatchSetting {
            setting: 1,
            value: 2,
        });
        round_trip(Message::LobbyChat {
            message: "gl hf".to_owned(),
        });
        round_trip(Message::MatchLoad {
            lcg_seed: -42,
            noise_width: 2,
            noise_height: 2,
            noise: vec![1, 2, 3, 4],
        });
        round_trip(Message::Input {
            inputs: vec![0, 1, 2, 3],
        });
        round_trip(Message::Checksum {
            turn: 30,
            value: 0xDEAD_BEEF,
        });
    }

    #[test]
    fn first_byte_is_the_message_type() {
        assert_eq!(Message::Ready.encode(), vec![MESSAGE_READY]);
        assert_eq!(
            Message::Checksum { turn: 1, value: 2 }.encode()[0],
            MESSAGE_CHECKSUM
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert_eq!(Message::decode(&[99]), Err(ProtoError::UnknownType(99)));
        assert_eq!(Message::decode(&[]), Err(ProtoError::Truncated));
    }

    #[test]
    fn truncated_welcome_is_rejected() {
        let bytes = Message::Welcome {
            player_id: 1,
            recolor_id: 0,
            team: 0,
            server_recolor_id: 0,
            server_team: 0,
            server_username: String::new(),
            lobby_name: String::new(),
        }
        .encode();
        assert_eq!(
            Message::decode(&bytes[..bytes.len() - 1]),
            Err(ProtoError::Truncated)
        );
    }
}
