// SPDX-License-Identifier: Apache-2.0

//! Two full peers over the loopback hub: lobby, match load, thirty lockstep
//! turns with a mid-match move order, and checksum agreement throughout.

#![allow(missing_docs)]

use gold_core::input::MoveInput;
use gold_core::player::MAX_PLAYERS;
use gold_core::state::{match_handle_input, match_init, match_update};
use gold_core::{
    match_checksum, EntityType, IVec2, MatchInput, MatchPlayer, MatchState, Noise, ID_NULL,
};
use gold_net::{
    LobbyPrivacy, Lockstep, LockstepTick, LoopbackHub, NetworkEvent, Session,
};

struct Peer {
    session: Session,
    lockstep: Option<Lockstep>,
    state: Option<MatchState>,
    checksums: Vec<(u32, u32)>,
    desync: bool,
}

impl Peer {
    fn new(session: Session) -> Self {
        Self {
            session,
            lockstep: None,
            state: None,
            checksums: Vec::new(),
            desync: false,
        }
    }

    /// One pass of the §5 tick loop: transport, events, turn barrier,
    /// simulation, checksum.
    fn tick(&mut self) {
        self.session.service();
        while let Some(event) = self.session.poll_event() {
            match event {
                NetworkEvent::MatchLoad { lcg_seed, noise } => {
                    let mut players: [MatchPlayer; MAX_PLAYERS] = Default::default();
                    let mut active = [false; MAX_PLAYERS];
                    for (player_id, net_player) in self.session.players().iter().enumerate() {
                        if net_player.status == gold_net::PlayerStatus::None {
                            continue;
                        }
                        players[player_id].active = true;
                        players[player_id].name = net_player.name.clone();
                        players[player_id].team = player_id as u8;
                        players[player_id].recolor_id = net_player.recolor_id;
                        active[player_id] = true;
                    }
                    self.state = Some(match_init(lcg_seed, &noise, players));
                    self.lockstep = Some(Lockstep::new(active, self.session.player_id()));
                    self.session.set_ready(true);
                }
                NetworkEvent::Input { player_id, inputs } => {
                    if let Some(lockstep) = &mut self.lockstep {
                        lockstep.on_input_received(player_id, &inputs);
                    }
                }
                NetworkEvent::Desync { .. } => {
                    self.desync = true;
                }
                _ => {}
            }
        }

        let (Some(lockstep), Some(state)) = (&mut self.lockstep, &mut self.state) else {
            return;
        };
        if !self.session.are_all_players_ready() {
            return;
        }

        let session = &mut self.session;
        match lockstep.tick(|payload| session.send_input(payload)) {
            LockstepTick::TurnStarted { turn, inputs } => {
                for (_, player_inputs) in &inputs {
                    for input in player_inputs {
                        match_handle_input(state, input);
                    }
                }
                match_update(state);
                state.events.clear();
                let checksum = match_checksum(state);
                self.checksums.push((turn, checksum));
                session.send_checksum(turn, checksum);
            }
            LockstepTick::Run => {
                match_update(state);
                state.events.clear();
            }
            LockstepTick::Stalled { .. } => {}
        }
    }
}

#[test]
fn two_peers_stay_in_lockstep_for_thirty_turns() {
    let hub = LoopbackHub::new();
    let server_host = hub.register();
    let client_host = hub.register();
    let server_info = server_host.connection_info();

    let mut host_peer = Peer::new(Session::server_create(
        Box::new(server_host),
        "A",
        LobbyPrivacy::Public,
    ));
    let mut client_peer = Peer::new(Session::client_create(
        Box::new(client_host),
        "B",
        &server_info,
    ));

    // Lobby phase.
    for _ in 0..20 {
        host_peer.session.service();
        client_peer.session.service();
    }
    while client_peer.session.poll_event().is_some() {}
    while host_peer.session.poll_event().is_some() {}
    client_peer.session.set_ready(true);
    for _ in 0..10 {
        host_peer.session.service();
        client_peer.session.service();
    }

    let noise = Noise::zeroed(64, 64);
    host_peer.session.start_match(42, &noise).unwrap();

    // Give both peers time to load and ready up, then run the match.
    let mut move_sent = false;
    for _ in 0..400 {
        host_peer.tick();
        client_peer.tick();

        // On turn 5 the client orders its miner toward (3, 5).
        if !move_sent {
            if let (Some(lockstep), Some(state)) =
                (&mut client_peer.lockstep, &client_peer.state)
            {
                if lockstep.turn() == 5 {
                    let miner = state
                        .entities
                        .iter_with_ids()
                        .find(|(_, e)| {
                            e.entity_type == EntityType::Miner && e.player_id == 1
                        })
                        .map(|(id, _)| id)
                        .unwrap();
                    lockstep.queue_input(MatchInput::MoveCell(MoveInput {
                        shift: false,
                        target_cell: IVec2::new(3, 5),
                        target_id: ID_NULL,
                        entity_ids: vec![miner],
                    }));
                    move_sent = true;
                }
            }
        }

        let done = host_peer
            .lockstep
            .as_ref()
            .is_some_and(|l| l.turn() >= 30)
            && client_peer
                .lockstep
                .as_ref()
                .is_some_and(|l| l.turn() >= 30);
        if done {
            break;
        }
    }

    assert!(move_sent, "the move order never went out");
    assert!(!host_peer.desync, "host flagged a desync");
    assert!(!client_peer.desync, "client flagged a desync");

    let turns = host_peer.checksums.len().min(client_peer.checksums.len());
    assert!(turns >= 30, "only {turns} turns completed");
    for turn in 0..turns {
        assert_eq!(
            host_peer.checksums[turn], client_peer.checksums[turn],
            "checksum mismatch on turn {}",
            turn + 1
        );
    }
}

#[test]
fn tampered_state_raises_a_desync() {
    let hub = LoopbackHub::new();
    let server_host = hub.register();
    let client_host = hub.register();
    let server_info = server_host.connection_info();

    let mut host_peer = Peer::new(Session::server_create(
        Box::new(server_host),
        "A",
        LobbyPrivacy::Public,
    ));
    let mut client_peer = Peer::new(Session::client_create(
        Box::new(client_host),
        "B",
        &server_info,
    ));

    for _ in 0..20 {
        host_peer.session.service();
        client_peer.session.service();
    }
    client_peer.session.set_ready(true);
    for _ in 0..10 {
        host_peer.session.service();
        client_peer.session.service();
    }
    let noise = Noise::zeroed(64, 64);
    host_peer.session.start_match(7, &noise).unwrap();

    for step in 0..200 {
        host_peer.tick();
        client_peer.tick();
        // Mid-match, quietly hand the client extra gold.
        if step == 60 {
            if let Some(state) = &mut client_peer.state {
                state.players[1].gold += 1000;
            }
        }
        if host_peer.desync || client_peer.desync {
            break;
        }
    }
    assert!(
        host_peer.desync || client_peer.desync,
        "nobody noticed the divergence"
    );
}
