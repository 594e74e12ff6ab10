// SPDX-License-Identifier: Apache-2.0
//! The lockstep turn barrier.
//!
//! Peers only exchange commands; every peer runs the same simulation. Once
//! per [`TURN_DURATION`] ticks the local pending commands are flushed and
//! broadcast, and a turn begins only when the head of every active player's
//! queue is populated. Queues are primed [`TURN_OFFSET`] turns deep so peers
//! produce inputs for turn T while executing turn T-2; a missing head stalls
//! the match and runs the disconnect timer instead.

use std::collections::VecDeque;

use tracing::warn;

use gold_core::input::{deserialize_inputs, serialize_inputs};
use gold_core::player::MAX_PLAYERS;
use gold_core::MatchInput;

/// Simulation ticks per lockstep turn.
pub const TURN_DURATION: u32 = 4;
/// Turns of input latency between issuing and executing a command.
pub const TURN_OFFSET: u32 = 2;
/// Stalled ticks before the missing player is declared gone.
pub const DISCONNECT_GRACE: u32 = 600;

/// What one call to [`Lockstep::tick`] decided.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LockstepTick {
    /// Mid-turn; run one simulation tick.
    Run,
    /// A new turn began: apply these inputs (player id, inputs), in player
    /// order, then run one simulation tick.
    TurnStarted {
        /// The new turn number.
        turn: u32,
        /// Every active player's inputs for this turn.
        inputs: Vec<(u8, Vec<MatchInput>)>,
    },
    /// Input from at least one player is missing; the simulation must wait.
    Stalled {
        /// Players whose queue head is empty.
        waiting_on: Vec<u8>,
        /// Ticks spent stalled so far.
        stalled_ticks: u32,
        /// Whether the grace period is exhausted.
        grace_exceeded: bool,
    },
}

/// Per-player turn input queues plus the local pending buffer.
#[derive(Debug)]
pub struct Lockstep {
    active: [bool; MAX_PLAYERS],
    local_player: u8,
    queues: [VecDeque<Vec<MatchInput>>; MAX_PLAYERS],
    pending: Vec<MatchInput>,
    turn_timer: u32,
    turn_counter: u32,
    disconnect_timer: u32,
}

impl Lockstep {
    /// Set up queues for the active players, primed with empty turns so the
    /// pipeline has [`TURN_OFFSET`] turns of slack.
    #[must_use]
    pub fn new(active: [bool; MAX_PLAYERS], local_player: u8) -> Self {
        let mut queues: [VecDeque<Vec<MatchInput>>; MAX_PLAYERS] = Default::default();
        for (player, queue) in queues.iter_mut().enumerate() {
            if active[player] {
                for _ in 0..TURN_OFFSET - 1 {
                    queue.push_back(vec![MatchInput::None]);
                }
            }
        }
        Self {
            active,
            local_player,
            queues,
            pending: Vec::new(),
            turn_timer: 0,
            turn_counter: 0,
            disconnect_timer: 0,
        }
    }

    /// Current turn number.
    #[must_use]
    pub fn turn(&self) -> u32 {
        self.turn_counter
    }

    /// Queue a local command for the next flush.
    pub fn queue_input(&mut self, input: MatchInput) {
        self.pending.push(input);
    }

    /// Deliver a remote player's serialized turn inputs.
    pub fn on_input_received(&mut self, player_id: u8, payload: &[u8]) {
        if player_id as usize >= MAX_PLAYERS || !self.active[player_id as usize] {
            return;
        }
        match deserialize_inputs(payload) {
            Ok(inputs) => self.queues[player_id as usize].push_back(inputs),
            Err(error) => {
                // A malformed input stream would desync us anyway; treat the
                // sender as hostile and drop the payload.
                warn!(player_id, %error, "dropping malformed turn inputs");
            }
        }
    }

    /// Mark a player inactive; future turns proceed without their inputs.
    pub fn drop_player(&mut self, player_id: u8) {
        if (player_id as usize) < MAX_PLAYERS {
            self.active[player_id as usize] = false;
            self.queues[player_id as usize].clear();
        }
    }

    /// Advance the barrier by one tick.
    ///
    /// On a turn boundary this drains the local pending buffer into
    /// `flush(serialized)` for broadcast, pushes it onto the local queue, and
    /// pops one turn of inputs for every active player.
    pub fn tick(&mut self, mut flush: impl FnMut(&[u8])) -> LockstepTick {
        if self.turn_timer == 0 {
            let waiting_on: Vec<u8> = (0..MAX_PLAYERS)
                .filter(|player| {
                    self.active[*player]
                        && self.queues[*player]
                            .front()
                            .is_none_or(std::vec::Vec::is_empty)
                })
                .map(|player| player as u8)
                .collect();
            if !waiting_on.is_empty() {
                self.disconnect_timer += 1;
                return LockstepTick::Stalled {
                    waiting_on,
                    stalled_ticks: self.disconnect_timer,
                    grace_exceeded: self.disconnect_timer >= DISCONNECT_GRACE,
                };
            }
            self.disconnect_timer = 0;

            // All heads present: begin the next turn.
            self.turn_timer = TURN_DURATION;
            self.turn_counter += 1;

            let mut inputs = Vec::new();
            for player in 0..MAX_PLAYERS {
                if !self.active[player] {
                    continue;
                }
                if let Some(turn_inputs) = self.queues[player].pop_front() {
                    inputs.push((player as u8, turn_inputs));
                }
            }

            // Flush local pending commands; always at least a NONE so the
            // peers can tell we advanced.
            if self.pending.is_empty() {
                self.pending.push(MatchInput::None);
            }
            let payload = serialize_inputs(&self.pending);
            self.queues[self.local_player as usize]
                .push_back(std::mem::take(&mut self.pending));
            flush(&payload);

            self.turn_timer -= 1;
            return LockstepTick::TurnStarted {
                turn: self.turn_counter,
                inputs,
            };
        }

        self.turn_timer -= 1;
        LockstepTick::Run
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_active() -> [bool; MAX_PLAYERS] {
        let mut active = [false; MAX_PLAYERS];
        active[0] = true;
        active[1] = true;
        active
    }

    #[test]
    fn primed_queues_let_the_first_turn_start() {
        let mut lockstep = Lockstep::new(two_active(), 0);
        let mut sent = Vec::new();
        let result = lockstep.tick(|payload| sent.push(payload.to_vec()));
        match result {
            LockstepTick::TurnStarted { turn, inputs } => {
                assert_eq!(turn, 1);
                assert_eq!(inputs.len(), 2);
            }
            other => panic!("expected a turn, got {other:?}"),
        }
        assert_eq!(sent.len(), 1);
    }

    #[test]
    fn stalls_when_a_head_is_missing() {
        let mut lockstep = Lockstep::new(two_active(), 0);
        // Consume the primed turn, then run out player 1's queue.
        let _ = lockstep.tick(|_| {});
        for _ in 0..TURN_DURATION - 1 {
            assert_eq!(lockstep.tick(|_| {}), LockstepTick::Run);
        }
        // Player 0 (local) flushed its own inputs, player 1 sent nothing.
        let result = lockstep.tick(|_| {});
        match result {
            LockstepTick::Stalled {
                waiting_on,
                grace_exceeded,
                ..
            } => {
                assert_eq!(waiting_on, vec![1]);
                assert!(!grace_exceeded);
            }
            other => panic!("expected a stall, got {other:?}"),
        }
    }

    #[test]
    fn remote_inputs_unblock_the_barrier() {
        let mut lockstep = Lockstep::new(two_active(), 0);
        let _ = lockstep.tick(|_| {});
        for _ in 0..TURN_DURATION - 1 {
            let _ = lockstep.tick(|_| {});
        }
        assert!(matches!(
            lockstep.tick(|_| {}),
            LockstepTick::Stalled { .. }
        ));

        let payload = serialize_inputs(&[MatchInput::None]);
        lockstep.on_input_received(1, &payload);
        assert!(matches!(
            lockstep.tick(|_| {}),
            LockstepTick::TurnStarted { turn: 2, .. }
        ));
    }

    #[test]
    fn dropped_players_no_longer_block() {
        let mut lockstep = Lockstep::new(two_active(), 0);
        let _ = lockstep.tick(|_| {});
        for _ in 0..TURN_DURATION - 1 {
            let _ = lockstep.tick(|_| {});
        }
        assert!(matches!(
            lockstep.tick(|_| {}),
            LockstepTick::Stalled { .. }
        ));
        lockstep.drop_player(1);
        match lockstep.tick(|_| {}) {
            LockstepTick::TurnStarted { inputs, .. } => {
                assert_eq!(inputs.len(), 1);
                assert_eq!(inputs[0].0, 0);
            }
            other => panic!("expected a turn, got {other:?}"),
        }
    }

    #[test]
    fn local_inputs_ride_the_next_flush() {
        let mut lockstep = Lockstep::new(two_active(), 0);
        lockstep.queue_input(MatchInput::Stop {
            entity_ids: vec![3],
        });
        let mut sent = Vec::new();
        let _ = lockstep.tick(|payload| sent.push(payload.to_vec()));
        let decoded = deserialize_inputs(&sent[0]).unwrap();
        assert_eq!(
            decoded,
            vec![MatchInput::Stop {
                entity_ids: vec![3]
            }]
        );
    }
}
