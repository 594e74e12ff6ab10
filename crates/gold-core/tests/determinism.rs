// SPDX-License-Identifier: Apache-2.0

//! End-to-end determinism scenarios: identical inputs produce identical
//! checksums, blocked paths recover, and replays reconstruct the match.

#![allow(missing_docs)]

use gold_core::entity::EntityMode;
use gold_core::input::MoveInput;
use gold_core::map::{Cell, CellLayer};
use gold_core::state::{create_entity, match_handle_input, match_init, match_update, MatchState};
use gold_core::{
    match_checksum, EntityType, IVec2, MatchInput, MatchPlayer, Noise, ReplayWriter, Target,
    ID_NULL, MAX_PLAYERS,
};

/// Simulation ticks per lockstep turn.
const TURN_DURATION: u32 = 4;

fn two_players() -> [MatchPlayer; MAX_PLAYERS] {
    let mut players: [MatchPlayer; MAX_PLAYERS] = Default::default();
    players[0].active = true;
    players[0].name = "A".to_owned();
    players[1].active = true;
    players[1].name = "B".to_owned();
    players[1].team = 1;
    players[1].recolor_id = 1;
    players
}

fn miner_of(state: &MatchState, player_id: u8) -> u32 {
    state
        .entities
        .iter_with_ids()
        .find(|(_, e)| e.entity_type == EntityType::Miner && e.player_id == player_id)
        .map(|(id, _)| id)
        .unwrap()
}

fn clear_area(state: &mut MatchState, origin: IVec2, w: i32, h: i32) {
    for y in origin.y..origin.y + h {
        for x in origin.x..origin.x + w {
            state
                .map
                .set_cell_rect(CellLayer::Ground, IVec2::new(x, y), 1, Cell::EMPTY);
        }
    }
}

/// Inputs for one turn of the two-peer sync scenario: on turn 5 the second
/// player moves their miner to (3, 5).
fn scenario_inputs(turn: u32, miner_id: u32) -> Vec<(u8, Vec<MatchInput>)> {
    let mut per_player = vec![(0u8, vec![MatchInput::None]), (1u8, vec![MatchInput::None])];
    if turn == 5 {
        per_player[1].1 = vec![MatchInput::MoveCell(MoveInput {
            shift: false,
            target_cell: IVec2::new(3, 5),
            target_id: ID_NULL,
            entity_ids: vec![miner_id],
        })];
    }
    per_player
}

fn run_turn(state: &mut MatchState, inputs: &[(u8, Vec<MatchInput>)]) {
    for (_, player_inputs) in inputs {
        for input in player_inputs {
            match_handle_input(state, input);
        }
    }
    for _ in 0..TURN_DURATION {
        match_update(state);
    }
    state.events.clear();
}

#[test]
fn two_peer_sync_checksums_agree_every_turn() {
    let noise = Noise::zeroed(64, 64);
    let mut host = match_init(42, &noise, two_players());
    let mut client = match_init(42, &noise, two_players());
    assert_eq!(match_checksum(&host), match_checksum(&client));

    let host_miner = miner_of(&host, 1);
    let client_miner = miner_of(&client, 1);
    assert_eq!(host_miner, client_miner);

    for turn in 1..=30u32 {
        let inputs = scenario_inputs(turn, host_miner);
        run_turn(&mut host, &inputs);
        run_turn(&mut client, &inputs);
        assert_eq!(
            match_checksum(&host),
            match_checksum(&client),
            "desync at turn {turn}"
        );
    }
}

#[test]
fn blocked_path_waits_then_routes_around() {
    let noise = Noise::zeroed(64, 64);
    let mut state = match_init(7, &noise, two_players());
    clear_area(&mut state, IVec2::new(0, 0), 8, 14);

    let walker = create_entity(&mut state, EntityType::Miner, IVec2::new(2, 2), 0);
    match_handle_input(
        &mut state,
        &MatchInput::MoveCell(MoveInput {
            shift: false,
            target_cell: IVec2::new(2, 10),
            target_id: ID_NULL,
            entity_ids: vec![walker],
        }),
    );

    // Let the walker commit to the straight route, then drop a blocker on it.
    let mut blocker_placed = false;
    let mut saw_blocked_mode = false;
    for _ in 0..600 {
        match_update(&mut state);
        let (entity_cell, entity_mode) = {
            let entity = state.entities.get(walker).unwrap();
            (entity.cell, entity.mode)
        };
        if !blocker_placed && entity_cell == IVec2::new(2, 3) {
            create_entity(&mut state, EntityType::Miner, IVec2::new(2, 5), 1);
            blocker_placed = true;
        }
        if entity_mode == EntityMode::UnitBlocked {
            saw_blocked_mode = true;
        }
        if blocker_placed && entity_cell == IVec2::new(2, 10) {
            break;
        }
    }

    assert!(blocker_placed, "walker never reached the ambush point");
    assert!(saw_blocked_mode, "walker never entered the blocked state");
    let entity = state.entities.get(walker).unwrap();
    assert_eq!(entity.cell, IVec2::new(2, 10), "walker never arrived");
    // The blocker kept its ground.
    assert!(state
        .map
        .is_cell_rect_occupied(IVec2::new(2, 5), 1, IVec2::NONE, true));
}

#[test]
fn replay_round_trips_the_match() {
    let noise = Noise::zeroed(64, 64);
    let players = two_players();
    let mut live = match_init(42, &noise, players.clone());
    let miner = miner_of(&live, 1);

    let mut replay_bytes = Vec::new();
    let mut writer = ReplayWriter::new(
        &mut replay_bytes,
        42,
        gold_core::MapSize::Small,
        &noise,
        &players,
    )
    .unwrap();

    let mut live_checksums = Vec::new();
    for turn in 1..=30u32 {
        let inputs = scenario_inputs(turn, miner);
        for (player_id, player_inputs) in &inputs {
            writer.write_inputs(turn, *player_id, player_inputs).unwrap();
        }
        run_turn(&mut live, &inputs);
        live_checksums.push(match_checksum(&live));
    }
    writer.finish().unwrap();

    // Reconstruct from the replay alone.
    let replay = gold_core::Replay::read(&replay_bytes).unwrap();
    assert_eq!(replay.lcg_seed, 42);
    let mut reconstructed = match_init(replay.lcg_seed, &replay.noise, replay.match_players());

    // The first input record on turn 5 is the move to (3, 5).
    let turn5_input = replay
        .records
        .iter()
        .find_map(|record| match record {
            gold_core::ReplayRecord::Input {
                turn: 5,
                player_id: 1,
                inputs,
            } => inputs.first(),
            _ => None,
        })
        .unwrap();
    match turn5_input {
        MatchInput::MoveCell(m) => assert_eq!(m.target_cell, IVec2::new(3, 5)),
        other => panic!("unexpected turn-5 record {other:?}"),
    }

    for turn in 1..=replay.last_turn() {
        let mut inputs: Vec<(u8, Vec<MatchInput>)> = Vec::new();
        for record in &replay.records {
            if let gold_core::ReplayRecord::Input {
                turn: record_turn,
                player_id,
                inputs: player_inputs,
            } = record
            {
                if *record_turn == turn {
                    inputs.push((*player_id, player_inputs.clone()));
                }
            }
        }
        run_turn(&mut reconstructed, &inputs);
        assert_eq!(
            match_checksum(&reconstructed),
            live_checksums[(turn - 1) as usize],
            "replay diverged at turn {turn}"
        );
    }
}

#[test]
fn entity_target_moves_track_the_walker() {
    let noise = Noise::zeroed(64, 64);
    let mut state = match_init(11, &noise, two_players());
    clear_area(&mut state, IVec2::new(20, 20), 12, 12);
    let hunter = create_entity(&mut state, EntityType::Soldier, IVec2::new(21, 21), 0);
    let prey = create_entity(&mut state, EntityType::Miner, IVec2::new(28, 28), 0);

    match_handle_input(
        &mut state,
        &MatchInput::MoveEntity(MoveInput {
            shift: false,
            target_cell: IVec2::NONE,
            target_id: prey,
            entity_ids: vec![hunter],
        }),
    );
    assert_eq!(
        state.entities.get(hunter).map(|e| e.target),
        Some(Target::Entity(prey))
    );
    for _ in 0..600 {
        match_update(&mut state);
    }
    let hunter_entity = state.entities.get(hunter).unwrap();
    let prey_entity = state.entities.get(prey).unwrap();
    assert!(
        hunter_entity.rect().is_adjacent_to(&prey_entity.rect()),
        "hunter at {:?} never reached prey at {:?}",
        hunter_entity.cell,
        prey_entity.cell
    );
}
