// SPDX-License-Identifier: Apache-2.0
//! Lobby and match session state over a [`Host`].
//!
//! One `Session` drives the whole peer lifecycle: greet/welcome handshake,
//! peer-mesh introductions, ready flags, settings, chat, match load, input
//! relay, and the per-turn checksum exchange. All transport failures surface
//! as events; nothing here panics or blocks.

use std::collections::{BTreeMap, VecDeque};

use tracing::{info, trace, warn};

use gold_core::player::MAX_PLAYERS;
use gold_proto::{Message, PlayerState, ProtoError, APP_VERSION, MATCH_SETTING_COUNT};

use crate::host::{Host, HostEvent, LobbyPrivacy, PeerId, PEER_PLAYER_UNKNOWN};

/// How many turn checksums to retain for cross-peer comparison.
const CHECKSUM_HISTORY: usize = 64;

/// Connection lifecycle of the local session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkStatus {
    /// No lobby, no peers.
    Offline,
    /// Hosting a lobby.
    Server,
    /// Dialing a server.
    Connecting,
    /// Joined a lobby as a client.
    Connected,
    /// Waiting for a polite goodbye to finish.
    Disconnecting,
}

/// Lobby status of one player slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum PlayerStatus {
    /// Empty slot.
    #[default]
    None = 0,
    /// The lobby host.
    Host = 1,
    /// Joined, not ready.
    NotReady = 2,
    /// Joined and ready.
    Ready = 3,
    /// Lost during a match.
    Disconnected = 4,
}

/// One player slot as the lobby sees it.
#[derive(Clone, Debug, Default)]
pub struct NetPlayer {
    /// Slot status.
    pub status: PlayerStatus,
    /// Chosen recolor.
    pub recolor_id: u8,
    /// Chosen team.
    pub team: u8,
    /// Username.
    pub name: String,
}

/// Named lobby constraint violations, surfaced to the shell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Someone has not readied up.
    #[error("not all players are ready")]
    NotAllReady,
    /// Two players picked the same recolor.
    #[error("two players share a color")]
    SameColor,
}

/// Events the session surfaces to the shell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkEvent {
    /// A LAN scan found a lobby.
    LobbyDiscovered {
        /// The advertised lobby.
        info: gold_proto::LobbyInfo,
        /// Bytes to dial it with.
        connection_info: Vec<u8>,
    },
    /// The dial failed before the lobby answered.
    ConnectionFailed,
    /// This session joined a lobby.
    JoinedLobby,
    /// The server rejected us: build mismatch.
    InvalidVersion,
    /// The server rejected us: match already running.
    GameAlreadyStarted,
    /// A player dropped.
    PlayerDisconnected {
        /// Which player.
        player_id: u8,
    },
    /// A chat line arrived.
    LobbyChat {
        /// Speaking player, or [`PEER_PLAYER_UNKNOWN`].
        player_id: u8,
        /// Message text.
        message: String,
    },
    /// The host started the match.
    MatchLoad {
        /// Simulation seed.
        lcg_seed: i32,
        /// Serialized noise buffer.
        noise: gold_core::Noise,
    },
    /// A peer's turn inputs arrived.
    Input {
        /// Acting player.
        player_id: u8,
        /// Input-plane payload (without the message type byte).
        inputs: Vec<u8>,
    },
    /// A peer's checksum disagreed with ours: the match is over for them.
    Desync {
        /// Offending player.
        player_id: u8,
        /// Turn the states diverged on.
        turn: u32,
    },
}

/// The local peer's lobby/session state machine.
pub struct Session {
    host: Box<dyn Host>,
    status: NetworkStatus,
    player_id: u8,
    players: [NetPlayer; MAX_PLAYERS],
    username: String,
    lobby_name: String,
    settings: [u8; MATCH_SETTING_COUNT],
    events: VecDeque<NetworkEvent>,
    local_checksums: BTreeMap<u32, u32>,
}

impl Session {
    /// Host a lobby.
    pub fn server_create(
        mut host: Box<dyn Host>,
        username: &str,
        privacy: LobbyPrivacy,
    ) -> Self {
        let lobby_name = format!("{username}'s Game");
        host.open_lobby(&lobby_name, privacy);
        let mut players: [NetPlayer; MAX_PLAYERS] = Default::default();
        players[0] = NetPlayer {
            status: PlayerStatus::Host,
            recolor_id: 0,
            team: 0,
            name: username.to_owned(),
        };
        info!(lobby = %lobby_name, "created server");
        Self {
            host,
            status: NetworkStatus::Server,
            player_id: 0,
            players,
            username: username.to_owned(),
            lobby_name,
            settings: [0; MATCH_SETTING_COUNT],
            events: VecDeque::new(),
            local_checksums: BTreeMap::new(),
        }
    }

    /// Dial a lobby.
    pub fn client_create(
        mut host: Box<dyn Host>,
        username: &str,
        connection_info: &[u8],
    ) -> Self {
        let status = if host.connect(connection_info) {
            NetworkStatus::Connecting
        } else {
            NetworkStatus::Offline
        };
        let mut session = Self {
            host,
            status,
            player_id: PEER_PLAYER_UNKNOWN,
            players: Default::default(),
            username: username.to_owned(),
            lobby_name: String::new(),
            settings: [0; MATCH_SETTING_COUNT],
            events: VecDeque::new(),
            local_checksums: BTreeMap::new(),
        };
        if session.status == NetworkStatus::Offline {
            session.events.push_back(NetworkEvent::ConnectionFailed);
        }
        session
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> NetworkStatus {
        self.status
    }

    /// Whether this session hosts the lobby.
    #[must_use]
    pub fn is_server(&self) -> bool {
        self.status == NetworkStatus::Server
    }

    /// The local player id.
    #[must_use]
    pub fn player_id(&self) -> u8 {
        self.player_id
    }

    /// A player slot.
    #[must_use]
    pub fn player(&self, player_id: u8) -> &NetPlayer {
        &self.players[player_id as usize]
    }

    /// All player slots.
    #[must_use]
    pub fn players(&self) -> &[NetPlayer; MAX_PLAYERS] {
        &self.players
    }

    /// Lobby display name.
    #[must_use]
    pub fn lobby_name(&self) -> &str {
        &self.lobby_name
    }

    /// A match setting byte.
    #[must_use]
    pub fn setting(&self, setting: u8) -> u8 {
        self.settings[setting as usize]
    }

    /// Whether every filled slot is ready (the host counts as ready).
    #[must_use]
    pub fn are_all_players_ready(&self) -> bool {
        self.players
            .iter()
            .all(|p| p.status != PlayerStatus::NotReady)
    }

    /// First lobby constraint currently violated, if any.
    #[must_use]
    pub fn get_error(&self) -> Option<SessionError> {
        for (index, player) in self.players.iter().enumerate() {
            if player.status == PlayerStatus::None {
                continue;
            }
            if player.status == PlayerStatus::NotReady {
                return Some(SessionError::NotAllReady);
            }
            for other in self.players.iter().skip(index + 1) {
                if other.status != PlayerStatus::None && other.recolor_id == player.recolor_id {
                    return Some(SessionError::SameColor);
                }
            }
        }
        None
    }

    /// Kick off a LAN lobby scan.
    pub fn scan_for_lobbies(&mut self) {
        self.host.scan_for_lobbies();
    }

    /// Pump the transport and fold host events into session state.
    pub fn service(&mut self) {
        self.host.service();
        while let Some(event) = self.host.poll_event() {
            match event {
                HostEvent::LobbyCreateSuccess => {}
                HostEvent::LobbyCreateFailed => {
                    warn!("lobby create failed");
                    self.status = NetworkStatus::Offline;
                    self.events.push_back(NetworkEvent::ConnectionFailed);
                }
                HostEvent::LobbyDiscovered {
                    info,
                    connection_info,
                } => {
                    self.events.push_back(NetworkEvent::LobbyDiscovered {
                        info,
                        connection_info,
                    });
                }
                HostEvent::Connected(peer) => self.handle_peer_connected(peer),
                HostEvent::Disconnected { player_id } => {
                    if self.status == NetworkStatus::Connecting {
                        self.status = NetworkStatus::Offline;
                        self.events.push_back(NetworkEvent::ConnectionFailed);
                    } else if player_id != PEER_PLAYER_UNKNOWN {
                        info!(player_id, "player disconnected");
                        self.players[player_id as usize].status = PlayerStatus::Disconnected;
                        self.events
                            .push_back(NetworkEvent::PlayerDisconnected { player_id });
                    } else {
                        warn!("unidentified peer disconnected");
                    }
                }
                HostEvent::Received { peer, data } => match Message::decode(&data) {
                    Ok(message) => self.handle_message(peer, message),
                    Err(ProtoError::UnknownType(message_type)) => {
                        warn!(message_type, "dropping unknown message");
                    }
                    Err(error) => warn!(%error, "dropping malformed packet"),
                },
            }
        }
    }

    fn handle_peer_connected(&mut self, peer: PeerId) {
        match self.status {
            NetworkStatus::Connecting => {
                // Greet the server; everything else waits for WELCOME.
                info!("connected to server, greeting");
                let greeting = Message::GreetServer {
                    username: self.username.clone(),
                    app_version: APP_VERSION.to_owned(),
                };
                self.host.send(peer, &greeting.encode());
                self.host.flush();
            }
            NetworkStatus::Connected => {
                // A fellow client dialed us after a NEW_PLAYER notice;
                // introduce ourselves.
                let greeting = Message::Greet {
                    player_id: self.player_id,
                    player: PlayerState {
                        status: self.players[self.player_id as usize].status as u8,
                        recolor_id: self.players[self.player_id as usize].recolor_id,
                        team: self.players[self.player_id as usize].team,
                        name: self.username.clone(),
                    },
                };
                self.host.send(peer, &greeting.encode());
                self.host.flush();
            }
            _ => {}
        }
    }

    fn handle_message(&mut self, peer: PeerId, message: Message) {
        match message {
            Message::GreetServer {
                username,
                app_version,
            } => self.handle_greet_server(peer, &username, &app_version),
            Message::InvalidVersion => {
                info!("server rejected us: version mismatch");
                self.events.push_back(NetworkEvent::InvalidVersion);
            }
            Message::GameAlreadyStarted => {
                info!("server rejected us: game already started");
                self.events.push_back(NetworkEvent::GameAlreadyStarted);
            }
            Message::Welcome {
                player_id,
                recolor_id,
                team,
                server_recolor_id,
                server_team,
                server_username,
                lobby_name,
            } => {
                if self.status != NetworkStatus::Connecting
                    || player_id as usize >= MAX_PLAYERS
                {
                    return;
                }
                info!(player_id, "joined lobby");
                self.status = NetworkStatus::Connected;
                self.player_id = player_id;
                self.players[player_id as usize] = NetPlayer {
                    status: PlayerStatus::NotReady,
                    recolor_id,
                    team,
                    name: self.username.clone(),
                };
                self.players[0] = NetPlayer {
                    status: PlayerStatus::Host,
                    recolor_id: server_recolor_id,
                    team: server_team,
                    name: server_username,
                };
                self.host.set_peer_player_id(peer, 0);
                self.lobby_name = lobby_name;
                self.events.push_back(NetworkEvent::JoinedLobby);
            }
            Message::NewPlayer { connection_info } => {
                if self.status != NetworkStatus::Connected {
                    return;
                }
                if !self.host.connect(&connection_info) {
                    warn!("unable to dial new player");
                }
            }
            Message::Greet { player_id, player } => {
                if self.status != NetworkStatus::Connected || player_id as usize >= MAX_PLAYERS {
                    return;
                }
                self.players[player_id as usize] = NetPlayer {
                    status: match player.status {
                        1 => PlayerStatus::Host,
                        3 => PlayerStatus::Ready,
                        _ => PlayerStatus::NotReady,
                    },
                    recolor_id: player.recolor_id,
                    team: player.team,
                    name: player.name,
                };
                self.host.set_peer_player_id(peer, player_id);
            }
            Message::Ready | Message::NotReady => {
                let player_id = self.host.peer_player_id(peer);
                if player_id == PEER_PLAYER_UNKNOWN {
                    return;
                }
                if player_id as usize >= MAX_PLAYERS {
                    return;
                }
                self.players[player_id as usize].status = if message == Message::Ready {
                    PlayerStatus::Ready
                } else {
                    PlayerStatus::NotReady
                };
            }
            Message::Color { recolor_id } => {
                let player_id = self.host.peer_player_id(peer);
                if (player_id as usize) < MAX_PLAYERS {
                    self.players[player_id as usize].recolor_id = recolor_id;
                }
            }
            Message::Team { team } => {
                let player_id = self.host.peer_player_id(peer);
                if (player_id as usize) < MAX_PLAYERS {
                    self.players[player_id as usize].team = team;
                }
            }
            Message::MatchSetting { setting, value } => {
                if (setting as usize) < MATCH_SETTING_COUNT {
                    self.settings[setting as usize] = value;
                }
            }
            Message::LobbyChat { message } => {
                self.events.push_back(NetworkEvent::LobbyChat {
                    player_id: self.host.peer_player_id(peer),
                    message,
                });
            }
            Message::MatchLoad {
                lcg_seed,
                noise_width,
                noise_height,
                noise,
            } => {
                if self.status != NetworkStatus::Connected {
                    return;
                }
                self.begin_match_load();
                self.events.push_back(NetworkEvent::MatchLoad {
                    lcg_seed,
                    noise: gold_core::Noise {
                        width: noise_width,
                        height: noise_height,
                        values: noise.iter().map(|b| *b as i8).collect(),
                    },
                });
            }
            Message::Input { inputs } => {
                let player_id = self.host.peer_player_id(peer);
                if player_id == PEER_PLAYER_UNKNOWN {
                    trace!("ignoring input from unidentified peer");
                    return;
                }
                self.events.push_back(NetworkEvent::Input { player_id, inputs });
            }
            Message::Checksum { turn, value } => {
                let player_id = self.host.peer_player_id(peer);
                if player_id == PEER_PLAYER_UNKNOWN {
                    return;
                }
                if let Some(local) = self.local_checksums.get(&turn) {
                    if *local != value {
                        warn!(player_id, turn, "desync detected");
                        self.events.push_back(NetworkEvent::Desync { player_id, turn });
                    }
                }
            }
        }
    }

    fn handle_greet_server(&mut self, peer: PeerId, username: &str, app_version: &str) {
        if self.status != NetworkStatus::Server {
            return;
        }
        // A started match admits nobody new.
        if self.players[0].status != PlayerStatus::Host {
            info!("client greeted after match start, rejecting");
            self.host.send(peer, &Message::GameAlreadyStarted.encode());
            self.host.flush();
            return;
        }
        if app_version != APP_VERSION {
            info!(client_version = %app_version, "client version mismatch, rejecting");
            self.host.send(peer, &Message::InvalidVersion.encode());
            self.host.flush();
            return;
        }
        // Lowest free slot; full lobby rejects like a started game rejects.
        let Some(player_id) = self
            .players
            .iter()
            .position(|p| p.status == PlayerStatus::None)
        else {
            info!("lobby full, rejecting client");
            self.host.send(peer, &Message::GameAlreadyStarted.encode());
            self.host.flush();
            return;
        };
        let player_id = player_id as u8;

        // Lowest recolor not in use.
        let mut recolor_id = 0u8;
        while self
            .players
            .iter()
            .any(|p| p.status != PlayerStatus::None && p.recolor_id == recolor_id)
        {
            recolor_id += 1;
        }

        // Smaller team, first team on ties.
        let team_counts = self.players.iter().fold([0u8; 2], |mut counts, p| {
            if p.status != PlayerStatus::None {
                counts[(p.team % 2) as usize] += 1;
            }
            counts
        });
        let team = u8::from(team_counts[0] > team_counts[1]);

        self.players[player_id as usize] = NetPlayer {
            status: PlayerStatus::NotReady,
            recolor_id,
            team,
            name: username.to_owned(),
        };
        self.host.set_peer_player_id(peer, player_id);
        info!(player_id, recolor_id, "client greeted us");

        let welcome = Message::Welcome {
            player_id,
            recolor_id,
            team,
            server_recolor_id: self.players[0].recolor_id,
            server_team: self.players[0].team,
            server_username: self.players[0].name.clone(),
            lobby_name: self.lobby_name.clone(),
        };
        self.host.send(peer, &welcome.encode());

        // Tell the other clients how to dial the newcomer.
        let newcomer_info = self.host.peer_connection_info(peer);
        let notice = Message::NewPlayer {
            connection_info: newcomer_info,
        }
        .encode();
        for other in 0..self.host.peer_count() {
            if other == peer || !self.host.is_peer_connected(other) {
                continue;
            }
            self.host.send(other, &notice);
        }
        self.host.flush();
        self.advertise_player_count();
    }

    fn begin_match_load(&mut self) {
        for player in &mut self.players {
            if player.status != PlayerStatus::None {
                player.status = PlayerStatus::NotReady;
            }
        }
        self.local_checksums.clear();
    }

    fn advertise_player_count(&mut self) {
        let count = self
            .players
            .iter()
            .filter(|p| p.status != PlayerStatus::None)
            .count() as u8;
        self.host.set_lobby_player_count(count);
    }

    /// Pop the next session event.
    pub fn poll_event(&mut self) -> Option<NetworkEvent> {
        self.events.pop_front()
    }

    /// Flip the local ready flag and tell the peers.
    pub fn set_ready(&mut self, ready: bool) {
        if self.player_id as usize >= MAX_PLAYERS {
            return;
        }
        // A lobby host is implicitly ready; past match load every slot
        // (the host's included) re-readies explicitly.
        let slot = &mut self.players[self.player_id as usize];
        if slot.status != PlayerStatus::Host {
            slot.status = if ready {
                PlayerStatus::Ready
            } else {
                PlayerStatus::NotReady
            };
        }
        let message = if ready {
            Message::Ready
        } else {
            Message::NotReady
        };
        self.host.broadcast(&message.encode());
        self.host.flush();
    }

    /// Change recolor and tell the peers.
    pub fn set_color(&mut self, recolor_id: u8) {
        if self.player_id as usize >= MAX_PLAYERS {
            return;
        }
        self.players[self.player_id as usize].recolor_id = recolor_id;
        self.host.broadcast(&Message::Color { recolor_id }.encode());
    }

    /// Change team and tell the peers.
    pub fn set_team(&mut self, team: u8) {
        if self.player_id as usize >= MAX_PLAYERS {
            return;
        }
        self.players[self.player_id as usize].team = team;
        self.host.broadcast(&Message::Team { team }.encode());
    }

    /// Change a match setting (host only) and tell the peers.
    pub fn set_setting(&mut self, setting: u8, value: u8) {
        if (setting as usize) < MATCH_SETTING_COUNT {
            self.settings[setting as usize] = value;
            self.host
                .broadcast(&Message::MatchSetting { setting, value }.encode());
        }
    }

    /// Broadcast a chat line.
    pub fn send_chat(&mut self, message: &str) {
        self.host.broadcast(
            &Message::LobbyChat {
                message: message.to_owned(),
            }
            .encode(),
        );
        // Local echo: the sender sees their own line too.
        self.events.push_back(NetworkEvent::LobbyChat {
            player_id: self.player_id,
            message: message.to_owned(),
        });
    }

    /// Start the match (host only): pick of seed and noise is the caller's,
    /// the broadcast and the local state flip happen here.
    pub fn start_match(
        &mut self,
        lcg_seed: i32,
        noise: &gold_core::Noise,
    ) -> Result<(), SessionError> {
        if !self.are_all_players_ready() {
            return Err(SessionError::NotAllReady);
        }
        let message = Message::MatchLoad {
            lcg_seed,
            noise_width: noise.width,
            noise_height: noise.height,
            noise: noise.values.iter().map(|v| *v as u8).collect(),
        };
        self.host.broadcast(&message.encode());
        self.host.flush();
        self.begin_match_load();
        self.events.push_back(NetworkEvent::MatchLoad {
            lcg_seed,
            noise: noise.clone(),
        });
        Ok(())
    }

    /// Broadcast one turn's serialized inputs.
    pub fn send_input(&mut self, inputs: &[u8]) {
        self.host.broadcast(
            &Message::Input {
                inputs: inputs.to_vec(),
            }
            .encode(),
        );
        self.host.flush();
    }

    /// Record the local checksum for a turn and broadcast it for comparison.
    pub fn send_checksum(&mut self, turn: u32, value: u32) {
        self.local_checksums.insert(turn, value);
        while self.local_checksums.len() > CHECKSUM_HISTORY {
            let oldest = *self.local_checksums.keys().next().unwrap_or(&0);
            self.local_checksums.remove(&oldest);
        }
        self.host.broadcast(&Message::Checksum { turn, value }.encode());
    }

    /// Leave whatever we're in: polite FINs when settled, hard reset while
    /// connecting or disconnecting.
    pub fn disconnect(&mut self) {
        if self.status == NetworkStatus::Offline {
            warn!("disconnect while offline");
            return;
        }
        let gently = matches!(
            self.status,
            NetworkStatus::Server | NetworkStatus::Connected
        );
        self.host.disconnect_peers(gently);
        self.host.close_lobby();
        self.status = NetworkStatus::Offline;
        self.players = Default::default();
    }
}
