//! Server-authoritative lobby roster and start countdown.

use log::info;
use shared::{GameStartInfo, LobbyState, PlayerInfo};
use std::time::Duration;
use tokio::time::Instant;

/// What the countdown is doing at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownTick {
    Idle,
    /// Whole seconds still to go.
    Remaining(u32),
    Elapsed,
}

/// The roster plus the wall-clock countdown that turns it into a game.
#[derive(Debug)]
pub struct Lobby {
    state: LobbyState,
    countdown_started: Option<Instant>,
    countdown: Duration,
    min_players: usize,
}

impl Lobby {
    pub fn new(countdown: Duration, min_players: usize) -> Self {
        Self {
            state: LobbyState::default(),
            countdown_started: None,
            countdown,
            min_players,
        }
    }

    pub fn state(&self) -> &LobbyState {
        &self.state
    }

    pub fn players(&self) -> &[PlayerInfo] {
        &self.state.players
    }

    pub fn player(&self, player_id: u32) -> Option<&PlayerInfo> {
        self.state.players.iter().find(|p| p.player_id == player_id)
    }

    /// Replaces the entry with the same id, or appends a new one.
    pub fn upsert(&mut self, info: PlayerInfo) {
        match self
            .state
            .players
            .iter_mut()
            .find(|p| p.player_id == info.player_id)
        {
            Some(existing) => *existing = info,
            None => {
                info!(
                    "Player {} ({}) joined the lobby",
                    info.player_id, info.username
                );
                self.state.players.push(info);
            }
        }
    }

    /// Updates only the ready flag of an entry; an unknown id is inserted whole.
    pub fn set_ready(&mut self, info: PlayerInfo) {
        match self
            .state
            .players
            .iter_mut()
            .find(|p| p.player_id == info.player_id)
        {
            Some(existing) => existing.is_ready = info.is_ready,
            None => self.upsert(info),
        }
    }

    pub fn remove(&mut self, player_id: u32) -> bool {
        let before = self.state.players.len();
        self.state.players.retain(|p| p.player_id != player_id);
        before != self.state.players.len()
    }

    /// Client side: adopts the server's roster wholesale.
    pub fn mirror(&mut self, state: LobbyState) {
        self.state = state;
    }

    pub fn is_counting_down(&self) -> bool {
        self.countdown_started.is_some()
    }

    fn everyone_ready(&self) -> bool {
        self.state.players.len() >= self.min_players
            && self.state.players.iter().all(|p| p.is_ready)
    }

    fn countdown_secs(&self) -> u32 {
        u32::try_from(self.countdown.as_secs()).unwrap_or(u32::MAX)
    }

    /// Starts the countdown if the roster is full enough and all ready.
    ///
    /// Returns `true` only when this call started it. A running countdown is
    /// never restarted or cancelled here.
    pub fn check_ready(&mut self, now: Instant) -> bool {
        if self.countdown_started.is_some() || !self.everyone_ready() {
            return false;
        }

        self.countdown_started = Some(now);
        self.state.game_starting = true;
        self.state.countdown = self.countdown_secs();
        info!(
            "All {} players ready, game starts in {}s",
            self.state.players.len(),
            self.state.countdown
        );
        true
    }

    /// Recomputes the remaining whole seconds from elapsed wall-clock time.
    pub fn tick(&mut self, now: Instant) -> CountdownTick {
        let Some(started) = self.countdown_started else {
            return CountdownTick::Idle;
        };

        let elapsed = now.saturating_duration_since(started);
        if elapsed >= self.countdown {
            return CountdownTick::Elapsed;
        }

        let remaining = self.countdown.as_secs().saturating_sub(elapsed.as_secs());
        self.state.countdown = u32::try_from(remaining).unwrap_or(u32::MAX);
        CountdownTick::Remaining(self.state.countdown)
    }

    /// Ends the countdown and snapshots the roster for `GameStart`.
    pub fn finish(&mut self, game_id: u32) -> GameStartInfo {
        self.countdown_started = None;
        self.state.game_starting = false;
        self.state.countdown = 0;
        GameStartInfo {
            players: self.state.players.clone(),
            game_id,
        }
    }

    pub fn reset(&mut self) {
        self.state = LobbyState::default();
        self.countdown_started = None;
    }
}
