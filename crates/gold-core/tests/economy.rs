// SPDX-License-Identifier: Apache-2.0

//! The gold loop and combat, end to end on a flat map.

#![allow(missing_docs)]

use gold_core::entity::{entity_data, EntityMode};
use gold_core::input::MoveInput;
use gold_core::map::{Cell, CellLayer};
use gold_core::state::{
    create_entity, create_goldmine, match_handle_input, match_init, match_update, MatchState,
};
use gold_core::{EntityType, IVec2, MatchInput, MatchPlayer, Noise, ID_NULL, MAX_PLAYERS};

fn two_players() -> [MatchPlayer; MAX_PLAYERS] {
    let mut players: [MatchPlayer; MAX_PLAYERS] = Default::default();
    players[0].active = true;
    players[0].name = "A".to_owned();
    players[1].active = true;
    players[1].name = "B".to_owned();
    players[1].team = 1;
    players
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

#[test]
fn miner_shuttles_gold_from_mine_to_hall() {
    let mut state = match_init(3, &Noise::zeroed(64, 64), two_players());
    clear_area(&mut state, IVec2::new(18, 18), 20, 20);

    let hall = create_entity(&mut state, EntityType::Hall, IVec2::new(20, 20), 0);
    let mine = create_goldmine(&mut state, IVec2::new(30, 20), 200);
    let miner = create_entity(&mut state, EntityType::Miner, IVec2::new(26, 21), 0);

    let gold_before = state.players[0].gold;
    match_handle_input(
        &mut state,
        &MatchInput::MoveEntity(MoveInput {
            shift: false,
            target_cell: IVec2::NONE,
            target_id: mine,
            entity_ids: vec![miner],
        }),
    );

    let mut entered_mine = false;
    for _ in 0..4000 {
        match_update(&mut state);
        if state
            .entities
            .get(miner)
            .is_some_and(|e| e.mode == EntityMode::UnitInMine)
        {
            entered_mine = true;
        }
        if state.players[0].gold >= gold_before + 30 {
            break;
        }
    }

    assert!(entered_mine, "miner never entered the mine");
    let delivered = state.players[0].gold - gold_before;
    assert!(delivered >= 30, "only {delivered} gold delivered");
    let mine_entity = state.entities.get(mine).unwrap();
    let miner_entity = state.entities.get(miner).unwrap();
    // Conservation: mined gold is either banked, carried, or still in the
    // ground.
    assert_eq!(
        200 - mine_entity.gold_held,
        delivered + miner_entity.gold_held
    );
    let _ = hall;
}

#[test]
fn goldmine_collapses_when_emptied() {
    let mut state = match_init(5, &Noise::zeroed(64, 64), two_players());
    clear_area(&mut state, IVec2::new(18, 18), 20, 20);

    create_entity(&mut state, EntityType::Hall, IVec2::new(20, 20), 0);
    let mine = create_goldmine(&mut state, IVec2::new(30, 20), 20);
    let miner = create_entity(&mut state, EntityType::Miner, IVec2::new(27, 21), 0);

    match_handle_input(
        &mut state,
        &MatchInput::MoveEntity(MoveInput {
            shift: false,
            target_cell: IVec2::NONE,
            target_id: mine,
            entity_ids: vec![miner],
        }),
    );

    let mut collapsed = false;
    for _ in 0..4000 {
        match_update(&mut state);
        match state.entities.get(mine) {
            Some(entity) if entity.mode == EntityMode::GoldmineCollapsed => collapsed = true,
            None => {
                collapsed = true;
                break;
            }
            _ => {}
        }
    }
    assert!(collapsed, "mine never collapsed");
    // Its footprint is walkable again.
    assert!(!state
        .map
        .is_cell_rect_occupied(IVec2::new(30, 20), 3, IVec2::NONE, true));
}

#[test]
fn soldiers_fight_to_the_death() {
    let mut state = match_init(9, &Noise::zeroed(64, 64), two_players());
    clear_area(&mut state, IVec2::new(18, 18), 16, 16);

    let attacker = create_entity(&mut state, EntityType::Soldier, IVec2::new(20, 20), 0);
    let defender = create_entity(&mut state, EntityType::Miner, IVec2::new(24, 20), 1);

    match_handle_input(
        &mut state,
        &MatchInput::MoveAttackEntity(MoveInput {
            shift: false,
            target_cell: IVec2::NONE,
            target_id: defender,
            entity_ids: vec![attacker],
        }),
    );

    let mut defender_died = false;
    for _ in 0..4000 {
        match_update(&mut state);
        if state.entities.get(defender).is_none() {
            defender_died = true;
            break;
        }
    }
    assert!(defender_died, "defender survived");
    // The corpse's cell is released for traffic.
    let attacker_entity = state.entities.get(attacker).unwrap();
    assert!(attacker_entity.health > 0);
}

#[test]
fn buildings_burn_when_damaged_and_collapse_at_zero() {
    use gold_core::entity::ENTITY_FLAG_ON_FIRE;
    use gold_core::state::deal_damage;

    let mut state = match_init(13, &Noise::zeroed(64, 64), two_players());
    clear_area(&mut state, IVec2::new(18, 18), 12, 12);
    let bunker = create_entity(&mut state, EntityType::Bunker, IVec2::new(20, 20), 0);

    let max = entity_data(EntityType::Bunker).max_health;
    deal_damage(&mut state, bunker, max / 2 + 10);
    assert!(state
        .entities
        .get(bunker)
        .is_some_and(|e| e.has_flag(ENTITY_FLAG_ON_FIRE)));

    deal_damage(&mut state, bunker, max);
    assert!(state
        .entities
        .get(bunker)
        .is_some_and(|e| e.mode == EntityMode::BuildingDestroyed));
    for _ in 0..100 {
        match_update(&mut state);
    }
    assert!(state.entities.get(bunker).is_none(), "wreck never cleared");
}

#[test]
fn build_order_constructs_a_building() {
    let mut state = match_init(17, &Noise::zeroed(64, 64), two_players());
    clear_area(&mut state, IVec2::new(18, 18), 16, 16);
    state.players[0].gold = 500;

    let builder = create_entity(&mut state, EntityType::Miner, IVec2::new(20, 20), 0);
    match_handle_input(
        &mut state,
        &MatchInput::Build {
            shift: false,
            building: EntityType::Bunker,
            target_cell: IVec2::new(24, 20),
            entity_ids: vec![builder],
        },
    );
    assert_eq!(
        state.players[0].gold,
        500 - entity_data(EntityType::Bunker).gold_cost
    );

    let mut finished = false;
    for _ in 0..2000 {
        match_update(&mut state);
        let done = state
            .entities
            .iter()
            .any(|e| e.entity_type == EntityType::Bunker && e.mode == EntityMode::BuildingFinished);
        if done {
            finished = true;
            break;
        }
    }
    assert!(finished, "bunker never finished");
    // The builder came back out with no orders.
    let builder_entity = state.entities.get(builder).unwrap();
    assert_eq!(builder_entity.mode, EntityMode::UnitIdle);
    assert_eq!(builder_entity.garrison_id, ID_NULL);
}
