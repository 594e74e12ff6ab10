// SPDX-License-Identifier: Apache-2.0
//! Headless Gold Rush shell.
//!
//! Drives the full stack without a renderer: host or join a LAN lobby, run
//! the lockstep match loop at a fixed cadence, append the replay, exchange
//! checksums, and verify replay files offline. The tick loop follows the
//! fixed phase order: transport service, session events, turn barrier,
//! simulation step, replay append, checksum.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::Rng;
use tracing::{info, warn};

use gold_core::player::MAX_PLAYERS;
use gold_core::state::{match_handle_input, match_init, match_update};
use gold_core::{
    match_checksum, FogLevel, IVec2, MapSize, MatchInput, MatchPlayer, MatchState, Noise, Replay,
    ReplayRecord, ReplayWriter,
};
use gold_net::{
    LanHost, LobbyPrivacy, Lockstep, LockstepTick, NetworkEvent, PlayerStatus, Session,
    TURN_DURATION,
};

/// Wall-clock budget per simulation tick (60 Hz).
const TICK_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Parser)]
#[command(name = "goldrush", about = "Gold Rush headless lockstep driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Host a LAN lobby and run the match.
    Host {
        /// Player name.
        #[arg(long, default_value = "host")]
        name: String,
        /// Start once this many players are in the lobby.
        #[arg(long, default_value_t = 2)]
        players: u8,
        /// Stop after this many lockstep turns.
        #[arg(long, default_value_t = 200)]
        turns: u32,
        /// Map size: small, medium, or large.
        #[arg(long, default_value = "small")]
        map_size: String,
        /// Replay output path.
        #[arg(long)]
        replay: Option<PathBuf>,
    },
    /// Join a LAN lobby at ip:port and run the match.
    Join {
        /// Player name.
        #[arg(long, default_value = "guest")]
        name: String,
        /// Server address, `ip:port`.
        addr: String,
        /// Stop after this many lockstep turns.
        #[arg(long, default_value_t = 200)]
        turns: u32,
        /// Replay output path.
        #[arg(long)]
        replay: Option<PathBuf>,
    },
    /// Re-simulate a replay file and print its per-turn checksums.
    Replay {
        /// Replay file.
        file: PathBuf,
        /// Print every turn's checksum, not just the last.
        #[arg(long)]
        verbose: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Host {
            name,
            players,
            turns,
            map_size,
            replay,
        } => run_host(&name, players, turns, &map_size, replay),
        Command::Join {
            name,
            addr,
            turns,
            replay,
        } => run_join(&name, &addr, turns, replay),
        Command::Replay { file, verbose } => run_replay(&file, verbose),
    }
}

fn parse_map_size(value: &str) -> Result<MapSize> {
    match value {
        "small" => Ok(MapSize::Small),
        "medium" => Ok(MapSize::Medium),
        "large" => Ok(MapSize::Large),
        other => bail!("unknown map size {other:?}"),
    }
}

fn run_host(
    name: &str,
    players: u8,
    turns: u32,
    map_size: &str,
    replay: Option<PathBuf>,
) -> Result<()> {
    let map_size = parse_map_size(map_size)?;
    let host = LanHost::new();
    let mut session = Session::server_create(Box::new(host), name, LobbyPrivacy::Public);
    info!(lobby = session.lobby_name(), "waiting for players");

    // Lobby phase: wait for the table to fill and ready up.
    loop {
        let started = Instant::now();
        session.service();
        while session.poll_event().is_some() {}

        let joined = session
            .players()
            .iter()
            .filter(|p| p.status != PlayerStatus::None)
            .count() as u8;
        if joined >= players && session.are_all_players_ready() {
            break;
        }
        sleep_until(started + TICK_INTERVAL);
    }

    // Pick the seed and noise, tell everyone, and go.
    let lcg_seed: i32 = rand::rng().random();
    let side = map_size.tiles();
    let noise = Noise::generate(side, side, &mut gold_core::Lcg::new(lcg_seed));
    session
        .start_match(lcg_seed, &noise)
        .context("match start refused")?;

    run_match(session, turns, replay)
}

fn run_join(name: &str, addr: &str, turns: u32, replay: Option<PathBuf>) -> Result<()> {
    let host = LanHost::new();
    let mut session = Session::client_create(Box::new(host), name, addr.as_bytes());
    info!(addr, "joining lobby");

    loop {
        let started = Instant::now();
        session.service();
        let mut joined = false;
        while let Some(event) = session.poll_event() {
            match event {
                NetworkEvent::JoinedLobby => joined = true,
                NetworkEvent::InvalidVersion => bail!("server rejected us: version mismatch"),
                NetworkEvent::GameAlreadyStarted => {
                    bail!("server rejected us: game already started")
                }
                NetworkEvent::ConnectionFailed => bail!("connection failed"),
                _ => {}
            }
        }
        if joined {
            break;
        }
        sleep_until(started + TICK_INTERVAL);
    }
    session.set_ready(true);

    run_match(session, turns, replay)
}

/// Drive the lockstep loop until `max_turns` or a fatal event.
fn run_match(mut session: Session, max_turns: u32, replay: Option<PathBuf>) -> Result<()> {
    let mut state: Option<MatchState> = None;
    let mut lockstep: Option<Lockstep> = None;
    let mut writer: Option<ReplayWriter<_>> = None;

    loop {
        let started = Instant::now();

        // 1-2) Transport service and session events.
        session.service();
        while let Some(event) = session.poll_event() {
            match event {
                NetworkEvent::MatchLoad { lcg_seed, noise } => {
                    let map_size = match noise.width {
                        96 => MapSize::Medium,
                        128 => MapSize::Large,
                        _ => MapSize::Small,
                    };
                    let mut match_players: [MatchPlayer; MAX_PLAYERS] = Default::default();
                    let mut active = [false; MAX_PLAYERS];
                    for (player_id, net_player) in session.players().iter().enumerate() {
                        if net_player.status == PlayerStatus::None {
                            continue;
                        }
                        match_players[player_id].active = true;
                        match_players[player_id].name = net_player.name.clone();
                        match_players[player_id].team = net_player.team;
                        match_players[player_id].recolor_id = net_player.recolor_id;
                        active[player_id] = true;
                    }

                    let path = replay.clone().unwrap_or_else(|| {
                        PathBuf::from(format!("goldrush-{lcg_seed}.replay"))
                    });
                    writer = Some(
                        ReplayWriter::create(&path, lcg_seed, map_size, &noise, &match_players)
                            .context("replay create")?,
                    );
                    info!(seed = lcg_seed, replay = %path.display(), "match loading");

                    state = Some(match_init(lcg_seed, &noise, match_players));
                    lockstep = Some(Lockstep::new(active, session.player_id()));
                    session.set_ready(true);
                }
                NetworkEvent::Input { player_id, inputs } => {
                    if let Some(lockstep) = &mut lockstep {
                        lockstep.on_input_received(player_id, &inputs);
                    }
                }
                NetworkEvent::PlayerDisconnected { player_id } => {
                    warn!(player_id, "player lost; their turns proceed empty");
                    if let Some(lockstep) = &mut lockstep {
                        lockstep.drop_player(player_id);
                    }
                }
                NetworkEvent::Desync { player_id, turn } => {
                    warn!(player_id, turn, "desync: leaving match, replay preserved");
                    leave_match(&mut session, writer.take());
                    bail!("desync on turn {turn}");
                }
                NetworkEvent::LobbyChat { player_id, message } => {
                    info!(player_id, %message, "chat");
                }
                _ => {}
            }
        }

        // 3-6) Turn barrier, simulation, replay append, checksum.
        if let (Some(lockstep_ref), Some(state_ref)) = (&mut lockstep, &mut state) {
            if session.are_all_players_ready() {
                let session_ref = &mut session;
                match lockstep_ref.tick(|payload| session_ref.send_input(payload)) {
                    LockstepTick::TurnStarted { turn, inputs } => {
                        for (player_id, player_inputs) in &inputs {
                            if let Some(writer) = &mut writer {
                                writer.write_inputs(turn, *player_id, player_inputs)?;
                            }
                            for input in player_inputs {
                                if let MatchInput::Chat { message } = input {
                                    info!(player_id, %message, "match chat");
                                    if let Some(writer) = &mut writer {
                                        writer.write_chat(turn, *player_id, message)?;
                                    }
                                    continue;
                                }
                                match_handle_input(state_ref, input);
                            }
                        }
                        match_update(state_ref);
                        state_ref.events.clear();

                        let checksum = match_checksum(state_ref);
                        session.send_checksum(turn, checksum);
                        if turn % 50 == 0 {
                            info!(turn, checksum = format_args!("{checksum:08x}"), "turn");
                        }
                        if turn >= max_turns {
                            info!(
                                turn,
                                checksum = format_args!("{checksum:08x}"),
                                "match complete"
                            );
                            print_fog_summary(state_ref);
                            leave_match(&mut session, writer.take());
                            return Ok(());
                        }
                    }
                    LockstepTick::Run => {
                        match_update(state_ref);
                        state_ref.events.clear();
                    }
                    LockstepTick::Stalled {
                        waiting_on,
                        grace_exceeded,
                        ..
                    } => {
                        if grace_exceeded {
                            for player_id in waiting_on {
                                warn!(player_id, "input barrier gave up on player");
                                lockstep_ref.drop_player(player_id);
                            }
                        }
                    }
                }
            }
        }

        sleep_until(started + TICK_INTERVAL);
    }
}

fn leave_match(
    session: &mut Session,
    writer: Option<ReplayWriter<std::io::BufWriter<std::fs::File>>>,
) {
    if let Some(writer) = writer {
        if let Err(error) = writer.finish() {
            warn!(%error, "replay close failed");
        }
    }
    session.disconnect();
}

/// How much of the map each team has seen. `GOLD_DEBUG_FOG_DISABLED` reveals
/// everything in this view without touching simulation state.
fn print_fog_summary(state: &MatchState) {
    let fog_disabled = std::env::var_os("GOLD_DEBUG_FOG_DISABLED").is_some();
    let cells = (state.map.width * state.map.height) as f64;
    for (team, fog) in state.fog.iter().enumerate() {
        if !state.players.iter().any(|p| p.active && p.team == team as u8) {
            continue;
        }
        let explored = if fog_disabled {
            cells as u64
        } else {
            let mut seen = 0u64;
            for y in 0..state.map.height {
                for x in 0..state.map.width {
                    if fog.level(IVec2::new(x, y)) != FogLevel::Hidden {
                        seen += 1;
                    }
                }
            }
            seen
        };
        info!(
            team,
            explored_percent = (explored as f64 * 100.0 / cells) as u32,
            "fog summary"
        );
    }
}

fn run_replay(file: &std::path::Path, verbose: bool) -> Result<()> {
    let replay = Replay::read_file(file).context("replay read")?;
    info!(
        seed = replay.lcg_seed,
        turns = replay.last_turn(),
        "replaying"
    );

    let mut state = match_init(replay.lcg_seed, &replay.noise, replay.match_players());
    for turn in 1..=replay.last_turn() {
        for record in &replay.records {
            match record {
                ReplayRecord::Input {
                    turn: record_turn,
                    inputs,
                    ..
                } if *record_turn == turn => {
                    for input in inputs {
                        match_handle_input(&mut state, input);
                    }
                }
                ReplayRecord::Chat {
                    turn: record_turn,
                    player_id,
                    text,
                } if *record_turn == turn => {
                    info!(player_id = *player_id, %text, "chat");
                }
                _ => {}
            }
        }
        for _ in 0..TURN_DURATION {
            match_update(&mut state);
        }
        state.events.clear();
        if verbose {
            let checksum = match_checksum(&state);
            info!(turn, checksum = format_args!("{checksum:08x}"), "turn");
        }
    }

    let checksum = match_checksum(&state);
    info!(
        checksum = format_args!("{checksum:08x}"),
        entities = state.entities.len(),
        "replay complete"
    );
    print_fog_summary(&state);
    Ok(())
}

fn sleep_until(deadline: Instant) {
    let now = Instant::now();
    if deadline > now {
        std::thread::sleep(deadline - now);
    }
}
