//! Snapshot construction on the server, snapshot application and input
//! sampling on clients.

use crate::world::{ControlFlags, EntityAccess, EntityHandle, Kinematics};
use log::{debug, warn};
use shared::{GameState, PlayerInput, PlayerState};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// Gates snapshot broadcasts on accumulated simulation time.
#[derive(Debug)]
pub struct SnapshotScheduler {
    interval: Duration,
    accumulated: Duration,
    sequence: u32,
}

impl SnapshotScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            accumulated: Duration::ZERO,
            sequence: 0,
        }
    }

    /// Adds `dt`; returns `true` when a snapshot is due.
    ///
    /// The accumulator restarts from zero rather than carrying the remainder.
    pub fn tick(&mut self, dt: Duration) -> bool {
        self.accumulated += dt;
        if self.accumulated >= self.interval {
            self.accumulated = Duration::ZERO;
            true
        } else {
            false
        }
    }

    /// Sequence numbers are not expected to wrap within one session.
    pub fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn reset(&mut self) {
        self.accumulated = Duration::ZERO;
        self.sequence = 0;
    }
}

/// Gathers the state of every live player entity, in id order.
pub fn build_snapshot<W: EntityAccess + ?Sized>(
    world: &W,
    entities: &BTreeMap<u32, EntityHandle>,
    sequence: u32,
    game_time: Duration,
) -> GameState {
    let players = entities
        .iter()
        .filter_map(|(&player_id, &entity)| match world.kinematics(entity) {
            Some(k) => Some(PlayerState {
                player_id,
                position: k.position,
                velocity: k.velocity,
                rotation: k.rotation,
                is_in_collision: k.in_collision,
            }),
            None => {
                warn!("Player {} has no live entity, left out of snapshot", player_id);
                None
            }
        })
        .collect();

    GameState {
        players,
        game_time: u32::try_from(game_time.as_millis()).unwrap_or(u32::MAX),
        state_sequence: sequence,
    }
}

/// Rejects snapshots that are not strictly newer than the last applied one.
#[derive(Debug, Default)]
pub struct SnapshotFilter {
    last_applied: u32,
}

impl SnapshotFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `sequence` and returns `true` if it is newer.
    pub fn accept(&mut self, sequence: u32) -> bool {
        if sequence > self.last_applied {
            self.last_applied = sequence;
            true
        } else {
            debug!(
                "Ignoring old game state (sequence {} <= {})",
                sequence, self.last_applied
            );
            false
        }
    }

    pub fn last_applied(&self) -> u32 {
        self.last_applied
    }

    pub fn reset(&mut self) {
        self.last_applied = 0;
    }
}

/// Overwrites local entities with the snapshot's state, verbatim.
pub fn apply_snapshot<W: EntityAccess + ?Sized>(
    world: &mut W,
    entities: &BTreeMap<u32, EntityHandle>,
    snapshot: &GameState,
) {
    for state in &snapshot.players {
        let Some(&entity) = entities.get(&state.player_id) else {
            warn!("Snapshot references unknown player {}", state.player_id);
            continue;
        };
        world.set_kinematics(
            entity,
            Kinematics {
                position: state.position,
                velocity: state.velocity,
                rotation: state.rotation,
                in_collision: state.is_in_collision,
            },
        );
    }
}

/// Server side: an input simply overwrites the entity's control flags.
pub fn apply_input<W: EntityAccess + ?Sized>(world: &mut W, entity: EntityHandle, input: &PlayerInput) {
    world.set_controls(
        entity,
        ControlFlags {
            rotate_left: input.rotate_left,
            rotate_right: input.rotate_right,
        },
    );
}

/// Detects control changes and numbers the resulting inputs.
///
/// Sent inputs are kept in a bounded history for a future replay step; nothing
/// reads the history back yet.
#[derive(Debug)]
pub struct InputTracker {
    previous: ControlFlags,
    sequence: u32,
    history: VecDeque<PlayerInput>,
    capacity: usize,
}

impl InputTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            previous: ControlFlags::default(),
            sequence: 0,
            history: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns an input to send if `flags` differ from the previous sample.
    pub fn sample(&mut self, player_id: u32, flags: ControlFlags) -> Option<PlayerInput> {
        if flags == self.previous {
            return None;
        }
        Some(self.record(player_id, flags))
    }

    /// Numbers and records an input unconditionally.
    pub fn record(&mut self, player_id: u32, flags: ControlFlags) -> PlayerInput {
        self.previous = flags;
        self.sequence = self.sequence.wrapping_add(1);

        let input = PlayerInput {
            player_id,
            rotate_left: flags.rotate_left,
            rotate_right: flags.rotate_right,
            input_sequence: self.sequence,
        };

        if self.capacity > 0 {
            if self.history.len() == self.capacity {
                self.history.pop_front();
            }
            self.history.push_back(input.clone());
        }
        input
    }

    pub fn history(&self) -> &VecDeque<PlayerInput> {
        &self.history
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn reset(&mut self) {
        self.previous = ControlFlags::default();
        self.sequence = 0;
        self.history.clear();
    }
}
