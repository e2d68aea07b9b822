//! The session state machine: lobby, countdown, game start and the
//! synchronisation loop, on top of any [`Transport`].
//!
//! Gameplay code talks only to [`SessionManager`]. It calls
//! [`SessionManager::update`] once per tick and then drains the resulting
//! [`SessionEvent`]s; nothing calls back into gameplay code mid-update except
//! through the world passed in.

use crate::config::NetConfig;
use crate::error::SessionError;
use crate::lobby::{CountdownTick, Lobby};
use crate::relay::PaintRelay;
use crate::sync::{self, InputTracker, SnapshotFilter, SnapshotScheduler};
use crate::transport::{ConnectionStatus, Transport, TransportEvent};
use crate::world::{ControlFlags, EntityHandle, GameWorld};
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use shared::{
    Color, GameStartInfo, GameState, LobbyState, MessageType, NetworkMessage, PaintStroke,
    PingBody, PlayerInfo, PlayerInput, Vec2, SERVER_PLAYER_ID,
};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Game-level phase, one layer above [`ConnectionStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    InLobby,
    InGame,
}

/// Notifications for the host application, drained after `update()`.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PhaseChanged(SessionPhase),
    LobbyUpdated(LobbyState),
    GameStarted(GameStartInfo),
    PlayerLeft(u32),
    PongReceived { rtt: Duration },
}

pub struct SessionManager<T: Transport> {
    transport: T,
    config: NetConfig,
    phase: SessionPhase,
    local_info: PlayerInfo,

    lobby: Lobby,
    entities: BTreeMap<u32, EntityHandle>,
    game_started: Option<Instant>,

    scheduler: SnapshotScheduler,
    filter: SnapshotFilter,
    inputs: InputTracker,
    relay: PaintRelay,

    epoch: Instant,
    last_rtt: Option<Duration>,
    events: VecDeque<SessionEvent>,
}

impl<T: Transport> SessionManager<T> {
    pub fn new(transport: T, config: NetConfig) -> Self {
        Self {
            transport,
            phase: SessionPhase::Disconnected,
            local_info: PlayerInfo::new(SERVER_PLAYER_ID, "", Color::default()),
            lobby: Lobby::new(config.countdown(), config.min_players),
            entities: BTreeMap::new(),
            game_started: None,
            scheduler: SnapshotScheduler::new(config.snapshot_interval()),
            filter: SnapshotFilter::new(),
            inputs: InputTracker::new(config.input_history_capacity),
            relay: PaintRelay::new(),
            epoch: Instant::now(),
            last_rtt: None,
            events: VecDeque::new(),
            config,
        }
    }

    /// Starts hosting. The server goes straight to the lobby.
    pub fn start_server(&mut self, port: u16) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Disconnected {
            return Err(SessionError::AlreadyActive(self.phase));
        }

        self.transport.start_server(port, self.config.max_clients)?;

        self.local_info.player_id = SERVER_PLAYER_ID;
        self.local_info.is_ready = true;
        if self.local_info.username.is_empty() {
            self.local_info.username = "Host".to_string();
        }
        if self.config.host_participates {
            self.lobby.upsert(self.local_info.clone());
        }

        self.set_phase(SessionPhase::InLobby);
        Ok(())
    }

    /// Begins connecting; the outcome arrives through a later `update()`.
    pub fn connect_to_server(&mut self, host: &str, port: u16) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Disconnected {
            return Err(SessionError::AlreadyActive(self.phase));
        }

        self.transport.connect_to_server(host, port)?;
        self.set_phase(SessionPhase::Connecting);
        Ok(())
    }

    /// Leaves the session and destroys every player entity. Idempotent.
    pub fn disconnect<W: GameWorld + ?Sized>(&mut self, world: &mut W) {
        self.transport.disconnect();
        self.teardown(world);
    }

    pub fn set_player_info(
        &mut self,
        username: impl Into<String>,
        color: Color,
    ) -> Result<(), SessionError> {
        self.local_info.username = username.into();
        self.local_info.color = color;

        if self.phase != SessionPhase::InLobby {
            return Ok(());
        }
        if self.transport.is_server() {
            if self.config.host_participates {
                self.lobby.upsert(self.local_info.clone());
                self.broadcast_lobby(true)?;
            }
        } else {
            let message =
                NetworkMessage::with_body(MessageType::PlayerInfo, self.local_id(), &self.local_info)?;
            self.transport.send_message(&message);
        }
        Ok(())
    }

    pub fn set_player_ready(&mut self, ready: bool) -> Result<(), SessionError> {
        self.local_info.is_ready = ready;

        if self.phase != SessionPhase::InLobby {
            return Ok(());
        }
        if self.transport.is_server() {
            if self.config.host_participates {
                self.lobby.set_ready(self.local_info.clone());
                self.broadcast_lobby(true)?;
                if self.lobby.check_ready(Instant::now()) {
                    self.broadcast_lobby(true)?;
                }
            }
        } else {
            let message = NetworkMessage::with_body(
                MessageType::PlayerReady,
                self.local_id(),
                &self.local_info,
            )?;
            self.transport.send_message(&message);
        }
        Ok(())
    }

    /// Sends the given control flags immediately, whether or not they changed.
    pub fn send_player_input(&mut self, controls: ControlFlags) -> Result<(), SessionError> {
        if self.phase != SessionPhase::InGame || self.transport.is_server() {
            return Ok(());
        }
        let local_id = self.local_id();
        let input = self.inputs.record(local_id, controls);
        self.send_input(&input)
    }

    pub fn send_paint_stroke(
        &mut self,
        position: Vec2,
        radius: f32,
        color: Color,
    ) -> Result<(), SessionError> {
        if self.transport.status() != ConnectionStatus::Connected {
            return Ok(());
        }

        let stroke = PaintStroke {
            player_id: self.local_id(),
            position,
            radius,
            color,
        };
        let message = NetworkMessage::with_body(MessageType::PaintStroke, stroke.player_id, &stroke)?;
        if self.transport.is_server() {
            self.transport.broadcast_message(&message);
        } else {
            self.transport.send_message(&message);
        }
        Ok(())
    }

    /// Strokes received from other peers since the last call.
    pub fn take_paint_strokes(&mut self) -> Vec<PaintStroke> {
        self.relay.take()
    }

    /// Sends a `Ping`; the answer shows up as [`SessionEvent::PongReceived`].
    pub fn ping(&mut self) -> Result<(), SessionError> {
        if self.transport.status() != ConnectionStatus::Connected {
            return Ok(());
        }

        let body = PingBody {
            timestamp: self.clock_ms(Instant::now()),
        };
        let message = NetworkMessage::with_body(MessageType::Ping, self.local_id(), &body)?;
        if self.transport.is_server() {
            self.transport.broadcast_message(&message);
        } else {
            self.transport.send_message(&message);
        }
        Ok(())
    }

    pub fn last_rtt(&self) -> Option<Duration> {
        self.last_rtt
    }

    /// Runs one tick: drains the transport, then advances the lobby or game.
    pub fn update<W: GameWorld + ?Sized>(&mut self, world: &mut W, dt: Duration) {
        for event in self.transport.update() {
            self.handle_transport_event(world, event);
        }

        let now = Instant::now();
        let is_server = self.transport.is_server();
        let phase = self.phase;
        match phase {
            SessionPhase::InLobby if is_server => self.update_server_lobby(world, now),
            SessionPhase::InGame if is_server => self.update_server_game(world, dt, now),
            SessionPhase::InGame => self.update_client_game(world),
            _ => {}
        }
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn lobby_state(&self) -> &LobbyState {
        self.lobby.state()
    }

    pub fn local_player(&self) -> &PlayerInfo {
        &self.local_info
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.transport.status()
    }

    pub fn is_server(&self) -> bool {
        self.transport.is_server()
    }

    pub fn is_in_game(&self) -> bool {
        self.phase == SessionPhase::InGame
    }

    pub fn local_player_id(&self) -> u32 {
        self.transport.local_player_id()
    }

    pub fn is_local_player_entity(&self, entity: EntityHandle) -> bool {
        self.entities.get(&self.local_id()) == Some(&entity)
    }

    pub fn player_entity(&self, player_id: u32) -> Option<EntityHandle> {
        self.entities.get(&player_id).copied()
    }

    /// Last snapshot sequence broadcast (server) or applied (client).
    pub fn last_state_sequence(&self) -> u32 {
        if self.transport.is_server() {
            self.scheduler.sequence()
        } else {
            self.filter.last_applied()
        }
    }

    /// Inputs sent recently, oldest first.
    pub fn pending_inputs(&self) -> &VecDeque<PlayerInput> {
        self.inputs.history()
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn local_id(&self) -> u32 {
        self.transport.local_player_id()
    }

    fn clock_ms(&self, now: Instant) -> u64 {
        u64::try_from(now.saturating_duration_since(self.epoch).as_millis()).unwrap_or(u64::MAX)
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase == phase {
            return;
        }
        info!("Session phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
        self.events.push_back(SessionEvent::PhaseChanged(phase));
    }

    fn teardown<W: GameWorld + ?Sized>(&mut self, world: &mut W) {
        let destroyed = self.entities.len();
        for (_, entity) in std::mem::take(&mut self.entities) {
            world.destroy(entity);
        }
        if destroyed > 0 {
            info!("Destroyed {} player entities", destroyed);
        }

        self.lobby.reset();
        self.game_started = None;
        self.scheduler.reset();
        self.filter.reset();
        self.inputs.reset();
        self.relay.clear();
        self.local_info.player_id = SERVER_PLAYER_ID;
        self.local_info.is_ready = false;
        self.set_phase(SessionPhase::Disconnected);
    }

    fn broadcast_lobby(&mut self, notify: bool) -> Result<(), SessionError> {
        let state = self.lobby.state().clone();
        let message = NetworkMessage::with_body(MessageType::LobbyState, SERVER_PLAYER_ID, &state)?;
        self.transport.broadcast_message(&message);
        if notify {
            self.events.push_back(SessionEvent::LobbyUpdated(state));
        }
        Ok(())
    }

    fn send_input(&mut self, input: &PlayerInput) -> Result<(), SessionError> {
        let message = NetworkMessage::with_body(MessageType::PlayerInput, input.player_id, input)?;
        self.transport.send_message(&message);
        debug!(
            "Sent input {} (left={}, right={})",
            input.input_sequence, input.rotate_left, input.rotate_right
        );
        Ok(())
    }

    fn handle_transport_event<W: GameWorld + ?Sized>(&mut self, world: &mut W, event: TransportEvent) {
        match event {
            TransportEvent::StatusChanged(ConnectionStatus::Connected) => {
                if self.phase != SessionPhase::Connecting {
                    return;
                }
                self.local_info.player_id = self.local_id();
                if self.local_info.username.is_empty() {
                    self.local_info.username = format!("Player_{}", self.local_info.player_id);
                }
                self.set_phase(SessionPhase::InLobby);

                match NetworkMessage::with_body(
                    MessageType::PlayerInfo,
                    self.local_info.player_id,
                    &self.local_info,
                ) {
                    Ok(message) => self.transport.send_message(&message),
                    Err(e) => error!("Failed to send player info: {}", e),
                }
            }
            TransportEvent::StatusChanged(
                status @ (ConnectionStatus::Disconnected | ConnectionStatus::Failed),
            ) => {
                info!("Transport reported {:?}, leaving session", status);
                self.teardown(world);
            }
            TransportEvent::StatusChanged(ConnectionStatus::Connecting) => {}
            TransportEvent::PeerConnected(id) => {
                debug!("Peer {} connected, waiting for player info", id);
            }
            TransportEvent::PeerDisconnected(id) => self.remove_player(world, id),
            TransportEvent::Message(message) => self.handle_message(world, message),
        }
    }

    fn destroy_entity<W: GameWorld + ?Sized>(&mut self, world: &mut W, player_id: u32) -> bool {
        match self.entities.remove(&player_id) {
            Some(entity) => {
                world.destroy(entity);
                true
            }
            None => false,
        }
    }

    fn remove_player<W: GameWorld + ?Sized>(&mut self, world: &mut W, player_id: u32) {
        let was_listed = self.lobby.remove(player_id);
        let had_entity = self.destroy_entity(world, player_id);
        if !was_listed && !had_entity {
            debug!("Peer {} left before sending player info", player_id);
            return;
        }
        info!("Player {} left", player_id);

        if was_listed {
            if let Err(e) = self.broadcast_lobby(true) {
                error!("Failed to broadcast lobby: {}", e);
            }
        }
        self.events.push_back(SessionEvent::PlayerLeft(player_id));
    }

    /// Client side: the roster itself only changes through `LobbyState`.
    fn on_player_leave<W: GameWorld + ?Sized>(&mut self, world: &mut W, player_id: u32) {
        let was_listed = self.lobby.player(player_id).is_some();
        let had_entity = self.destroy_entity(world, player_id);
        if !was_listed && !had_entity {
            debug!("Ignoring leave for unknown player {}", player_id);
            return;
        }
        info!("Player {} left", player_id);
        self.events.push_back(SessionEvent::PlayerLeft(player_id));
    }

    fn decode<B: DeserializeOwned>(message: &NetworkMessage) -> Option<B> {
        match message.body() {
            Ok(body) => Some(body),
            Err(e) => {
                warn!(
                    "Dropping {:?} from player {}: {}",
                    message.kind, message.player_id, e
                );
                None
            }
        }
    }

    fn handle_message<W: GameWorld + ?Sized>(&mut self, world: &mut W, message: NetworkMessage) {
        let is_server = self.transport.is_server();
        let result = match message.kind {
            MessageType::PlayerInfo if is_server => self.on_player_info(&message),
            MessageType::PlayerReady if is_server => self.on_player_ready(&message),
            MessageType::PlayerInput if is_server => {
                self.on_player_input(world, &message);
                Ok(())
            }
            MessageType::LobbyState if !is_server => {
                if let Some(state) = Self::decode::<LobbyState>(&message) {
                    self.lobby.mirror(state.clone());
                    self.events.push_back(SessionEvent::LobbyUpdated(state));
                }
                Ok(())
            }
            MessageType::GameStart if !is_server => {
                if let Some(start) = Self::decode::<GameStartInfo>(&message) {
                    self.start_game(world, start, Instant::now());
                }
                Ok(())
            }
            MessageType::GameState if !is_server => {
                if let Some(snapshot) = Self::decode::<GameState>(&message) {
                    if self.filter.accept(snapshot.state_sequence) {
                        sync::apply_snapshot(world, &self.entities, &snapshot);
                    }
                }
                Ok(())
            }
            MessageType::PlayerLeave if !is_server => {
                self.on_player_leave(world, message.player_id);
                Ok(())
            }
            MessageType::PaintStroke => {
                if let Some(stroke) = Self::decode::<PaintStroke>(&message) {
                    if is_server {
                        self.transport.broadcast_message(&message);
                    }
                    let local_id = self.local_id();
                    self.relay.accept(local_id, stroke);
                }
                Ok(())
            }
            MessageType::Ping => {
                let pong = NetworkMessage {
                    kind: MessageType::Pong,
                    player_id: self.local_id(),
                    payload: message.payload.clone(),
                };
                if is_server {
                    self.transport.send_message_to_client(message.player_id, &pong);
                } else {
                    self.transport.send_message(&pong);
                }
                Ok(())
            }
            MessageType::Pong => {
                if let Some(body) = Self::decode::<PingBody>(&message) {
                    let now = self.clock_ms(Instant::now());
                    let rtt = Duration::from_millis(now.saturating_sub(body.timestamp));
                    debug!("Pong from player {}: {:?}", message.player_id, rtt);
                    self.last_rtt = Some(rtt);
                    self.events.push_back(SessionEvent::PongReceived { rtt });
                }
                Ok(())
            }
            MessageType::PlayerUpdate => {
                debug!("Ignoring reserved PlayerUpdate from {}", message.player_id);
                Ok(())
            }
            kind => {
                debug!(
                    "Ignoring {:?} from {} in {} role",
                    kind,
                    message.player_id,
                    if is_server { "server" } else { "client" }
                );
                Ok(())
            }
        };

        if let Err(e) = result {
            error!("Failed to handle {:?}: {}", message.kind, e);
        }
    }

    fn on_player_info(&mut self, message: &NetworkMessage) -> Result<(), SessionError> {
        let Some(mut info) = Self::decode::<PlayerInfo>(message) else {
            return Ok(());
        };
        info.player_id = message.player_id;
        self.lobby.upsert(info);
        self.broadcast_lobby(true)
    }

    fn on_player_ready(&mut self, message: &NetworkMessage) -> Result<(), SessionError> {
        let Some(mut info) = Self::decode::<PlayerInfo>(message) else {
            return Ok(());
        };
        info.player_id = message.player_id;
        info!("Player {} ready: {}", info.player_id, info.is_ready);
        self.lobby.set_ready(info);
        self.broadcast_lobby(true)?;

        if self.phase == SessionPhase::InLobby && self.lobby.check_ready(Instant::now()) {
            self.broadcast_lobby(true)?;
        }
        Ok(())
    }

    fn on_player_input<W: GameWorld + ?Sized>(&mut self, world: &mut W, message: &NetworkMessage) {
        let Some(input) = Self::decode::<PlayerInput>(message) else {
            return;
        };
        if input.player_id != message.player_id {
            debug!(
                "Input claims player {} but came from {}",
                input.player_id, message.player_id
            );
        }

        match self.entities.get(&message.player_id) {
            Some(&entity) => {
                debug!(
                    "Applying input {} from player {}",
                    input.input_sequence, message.player_id
                );
                sync::apply_input(world, entity, &input);
            }
            None => warn!("Input from player {} with no entity", message.player_id),
        }
    }

    fn update_server_lobby<W: GameWorld + ?Sized>(&mut self, world: &mut W, now: Instant) {
        let shown = self.lobby.state().countdown;
        let result = match self.lobby.tick(now) {
            CountdownTick::Idle => Ok(()),
            CountdownTick::Remaining(secs) => self.broadcast_lobby(secs != shown),
            CountdownTick::Elapsed => {
                let start = self.lobby.finish(rand::random());
                info!(
                    "Starting game {} with {} players",
                    start.game_id,
                    start.players.len()
                );
                match NetworkMessage::with_body(MessageType::GameStart, SERVER_PLAYER_ID, &start) {
                    Ok(message) => {
                        self.transport.broadcast_message(&message);
                        self.start_game(world, start, now);
                        Ok(())
                    }
                    Err(e) => Err(SessionError::from(e)),
                }
            }
        };

        if let Err(e) = result {
            error!("Lobby update failed: {}", e);
        }
    }

    fn start_game<W: GameWorld + ?Sized>(&mut self, world: &mut W, start: GameStartInfo, now: Instant) {
        self.set_phase(SessionPhase::InGame);
        world.request_transition(SessionPhase::InGame);

        let local_id = self.local_id();
        for (index, player) in start.players.iter().enumerate() {
            let position = shared::spawn_position(index);
            let entity = world.spawn_player(player, position, player.player_id == local_id);
            world.tag_entity(entity, SessionPhase::InGame);
            if let Some(previous) = self.entities.insert(player.player_id, entity) {
                world.destroy(previous);
            }
        }

        self.game_started = Some(now);
        self.events.push_back(SessionEvent::GameStarted(start));
    }

    fn update_server_game<W: GameWorld + ?Sized>(&mut self, world: &mut W, dt: Duration, now: Instant) {
        if !self.scheduler.tick(dt) {
            return;
        }

        let sequence = self.scheduler.next_sequence();
        let game_time = self
            .game_started
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or_default();
        let snapshot = sync::build_snapshot(world, &self.entities, sequence, game_time);

        match NetworkMessage::with_body(MessageType::GameState, SERVER_PLAYER_ID, &snapshot) {
            Ok(message) => {
                debug!(
                    "Broadcasting game state {} with {} players",
                    sequence,
                    snapshot.players.len()
                );
                self.transport.broadcast_message(&message);
            }
            Err(e) => error!("Failed to encode game state: {}", e),
        }
    }

    fn update_client_game<W: GameWorld + ?Sized>(&mut self, world: &mut W) {
        let local_id = self.local_id();
        let Some(&entity) = self.entities.get(&local_id) else {
            return;
        };
        let Some(controls) = world.controls(entity) else {
            return;
        };

        if let Some(input) = self.inputs.sample(local_id, controls) {
            if let Err(e) = self.send_input(&input) {
                error!("Failed to send input: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryNetwork, MemoryTransport};
    use crate::world::{EntityAccess, HeadlessWorld};
    use assert_approx_eq::assert_approx_eq;
    use tokio_test::{assert_err, assert_ok};

    const TICK: Duration = Duration::from_millis(16);

    struct Peer {
        session: SessionManager<MemoryTransport>,
        world: HeadlessWorld,
    }

    impl Peer {
        fn new(network: &MemoryNetwork, config: NetConfig) -> Self {
            Self {
                session: SessionManager::new(network.endpoint(), config),
                world: HeadlessWorld::new(),
            }
        }

        fn update(&mut self, dt: Duration) {
            self.session.update(&mut self.world, dt);
        }
    }

    /// Runs enough rounds for request/response chains to settle.
    fn settle(server: &mut Peer, clients: &mut [Peer]) {
        for _ in 0..4 {
            server.update(Duration::ZERO);
            for client in clients.iter_mut() {
                client.update(Duration::ZERO);
            }
        }
    }

    fn hosted() -> (MemoryNetwork, Peer) {
        let network = MemoryNetwork::new();
        let mut server = Peer::new(&network, NetConfig::default());
        assert_ok!(server.session.start_server(7777));
        (network, server)
    }

    fn join(network: &MemoryNetwork, server: &mut Peer, name: &str, color: Color) -> Peer {
        let mut client = Peer::new(network, NetConfig::default());
        assert_ok!(client.session.set_player_info(name, color));
        assert_ok!(client.session.connect_to_server("localhost", 7777));
        settle(server, std::slice::from_mut(&mut client));
        client
    }

    #[test]
    fn test_server_enters_lobby() {
        let (_network, mut server) = hosted();
        assert_eq!(server.session.phase(), SessionPhase::InLobby);
        assert!(server.session.is_server());
        assert_eq!(server.session.local_player_id(), 0);
        assert_eq!(
            server.session.drain_events(),
            vec![SessionEvent::PhaseChanged(SessionPhase::InLobby)]
        );
        assert!(server.session.lobby_state().players.is_empty());
    }

    #[test]
    fn test_start_while_active_fails() {
        let (_network, mut server) = hosted();
        assert!(matches!(
            server.session.start_server(7778),
            Err(SessionError::AlreadyActive(SessionPhase::InLobby))
        ));
        assert_err!(server.session.connect_to_server("localhost", 7777));
    }

    #[test]
    fn test_client_joins_lobby_with_info() {
        let (network, mut server) = hosted();
        let client = join(&network, &mut server, "Ann", Color::RED);

        assert_eq!(client.session.phase(), SessionPhase::InLobby);
        assert_eq!(client.session.local_player_id(), 1);

        let roster = &server.session.lobby_state().players;
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].player_id, 1);
        assert_eq!(roster[0].username, "Ann");
        assert_eq!(roster[0].color, Color::RED);
        assert_eq!(client.session.lobby_state(), server.session.lobby_state());
    }

    #[test]
    fn test_refused_connect_returns_to_disconnected() {
        let network = MemoryNetwork::new();
        let mut client = Peer::new(&network, NetConfig::default());

        client.session.connect_to_server("localhost", 7777).unwrap();
        assert_eq!(client.session.phase(), SessionPhase::Connecting);

        client.update(TICK);
        assert_eq!(client.session.phase(), SessionPhase::Disconnected);
        assert_eq!(client.session.connection_status(), ConnectionStatus::Failed);
        assert_eq!(
            client.session.drain_events(),
            vec![
                SessionEvent::PhaseChanged(SessionPhase::Connecting),
                SessionEvent::PhaseChanged(SessionPhase::Disconnected)
            ]
        );
    }

    #[test]
    fn test_default_username_uses_id() {
        let (network, mut server) = hosted();
        let mut client = Peer::new(&network, NetConfig::default());
        client.session.connect_to_server("localhost", 7777).unwrap();
        settle(&mut server, std::slice::from_mut(&mut client));

        assert_eq!(client.session.local_player().username, "Player_1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_players_start_game() {
        let (network, mut server) = hosted();
        let mut clients = vec![
            join(&network, &mut server, "Ann", Color::RED),
            join(&network, &mut server, "Bob", Color::GREEN),
        ];

        clients[0].session.set_player_ready(true).unwrap();
        settle(&mut server, &mut clients);
        assert!(!server.session.lobby_state().game_starting);

        clients[1].session.set_player_ready(true).unwrap();
        settle(&mut server, &mut clients);
        assert!(server.session.lobby_state().game_starting);
        assert_eq!(clients[0].session.lobby_state().countdown, 3);

        tokio::time::advance(Duration::from_secs(3)).await;
        settle(&mut server, &mut clients);

        assert!(server.session.is_in_game());
        assert_eq!(server.world.transitions(), &[SessionPhase::InGame]);
        for client in &clients {
            assert!(client.session.is_in_game());
            assert_eq!(client.world.entity_count(), 2);
        }

        let own = clients[1].session.player_entity(2).unwrap();
        assert!(clients[1].session.is_local_player_entity(own));
        assert!(clients[1].world.entity(own).unwrap().locally_controlled);
        let other = clients[1].session.player_entity(1).unwrap();
        assert!(!clients[1].session.is_local_player_entity(other));
        let position = clients[1].world.kinematics(other).unwrap().position;
        assert_approx_eq!(position.x, 100.0);
        assert_approx_eq!(position.y, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshots_and_inputs_flow() {
        let (network, mut server) = hosted();
        let mut clients = vec![
            join(&network, &mut server, "Ann", Color::RED),
            join(&network, &mut server, "Bob", Color::GREEN),
        ];
        for client in clients.iter_mut() {
            client.session.set_player_ready(true).unwrap();
        }
        settle(&mut server, &mut clients);
        tokio::time::advance(Duration::from_secs(3)).await;
        settle(&mut server, &mut clients);

        // Client steers its own entity; the change goes out as an input.
        let own = clients[0].session.player_entity(1).unwrap();
        clients[0].world.set_controls(
            own,
            ControlFlags {
                rotate_left: true,
                rotate_right: false,
            },
        );
        clients[0].update(TICK);
        assert_eq!(clients[0].session.pending_inputs().len(), 1);

        server.update(TICK);
        let on_server = server.session.player_entity(1).unwrap();
        assert!(server.world.controls(on_server).unwrap().rotate_left);

        // Move the authoritative entity, then let a snapshot go out.
        let mut k = server.world.kinematics(on_server).unwrap();
        k.position = Vec2::new(640.0, 360.0);
        server.world.set_kinematics(on_server, k);
        server.update(Duration::from_millis(50));
        assert_eq!(server.session.last_state_sequence(), 1);

        clients[1].update(TICK);
        assert_eq!(clients[1].session.last_state_sequence(), 1);
        let mirrored = clients[1].session.player_entity(1).unwrap();
        assert_approx_eq!(clients[1].world.kinematics(mirrored).unwrap().position.x, 640.0);
    }

    #[test]
    fn test_paint_echo_filtered() {
        let (network, mut server) = hosted();
        let mut clients = vec![
            join(&network, &mut server, "Ann", Color::RED),
            join(&network, &mut server, "Bob", Color::GREEN),
        ];

        clients[0]
            .session
            .send_paint_stroke(Vec2::new(5.0, 5.0), 10.0, Color::RED)
            .unwrap();
        settle(&mut server, &mut clients);

        assert!(clients[0].session.take_paint_strokes().is_empty());
        let received = clients[1].session.take_paint_strokes();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].player_id, 1);
        assert_eq!(server.session.take_paint_strokes().len(), 1);
    }

    #[test]
    fn test_paint_not_sent_while_connecting() {
        let (network, mut server) = hosted();
        let mut client = Peer::new(&network, NetConfig::default());
        client.session.connect_to_server("localhost", 7777).unwrap();
        client
            .session
            .send_paint_stroke(Vec2::ZERO, 4.0, Color::BLUE)
            .unwrap();

        settle(&mut server, std::slice::from_mut(&mut client));
        assert!(server.session.take_paint_strokes().is_empty());
    }

    #[test]
    fn test_peer_loss_updates_roster() {
        let (network, mut server) = hosted();
        let a = join(&network, &mut server, "Ann", Color::RED);
        let mut b = join(&network, &mut server, "Bob", Color::GREEN);
        settle(&mut server, std::slice::from_mut(&mut b));
        b.session.drain_events();

        drop(a);
        settle(&mut server, std::slice::from_mut(&mut b));

        let roster = &server.session.lobby_state().players;
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].player_id, 2);
        assert!(b
            .session
            .drain_events()
            .contains(&SessionEvent::PlayerLeft(1)));
        assert_eq!(b.session.lobby_state().players.len(), 1);
    }

    #[test]
    fn test_malformed_payload_dropped() {
        let (network, mut server) = hosted();
        let mut client = join(&network, &mut server, "Ann", Color::RED);

        client
            .session
            .transport_mut()
            .send_message(&NetworkMessage {
                kind: MessageType::PlayerInfo,
                player_id: 1,
                payload: b"{not json".to_vec(),
            });
        settle(&mut server, std::slice::from_mut(&mut client));

        assert_eq!(server.session.lobby_state().players[0].username, "Ann");
        assert_eq!(server.session.phase(), SessionPhase::InLobby);
    }

    #[test]
    fn test_ping_reports_rtt() {
        let (network, mut server) = hosted();
        let mut client = join(&network, &mut server, "Ann", Color::RED);
        client.session.drain_events();

        client.session.ping().unwrap();
        settle(&mut server, std::slice::from_mut(&mut client));

        assert!(client.session.last_rtt().is_some());
        assert!(client
            .session
            .drain_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::PongReceived { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_participates_in_roster() {
        let network = MemoryNetwork::new();
        let config = NetConfig {
            host_participates: true,
            ..NetConfig::default()
        };
        let mut server = Peer::new(&network, config);
        server.session.start_server(7777).unwrap();
        assert_eq!(server.session.lobby_state().players[0].player_id, 0);
        assert!(server.session.lobby_state().players[0].is_ready);

        let mut clients = vec![join(&network, &mut server, "Ann", Color::RED)];
        clients[0].session.set_player_ready(true).unwrap();
        settle(&mut server, &mut clients);
        assert!(server.session.lobby_state().game_starting);

        tokio::time::advance(Duration::from_secs(3)).await;
        settle(&mut server, &mut clients);

        let host_entity = server.session.player_entity(0).unwrap();
        assert!(server.session.is_local_player_entity(host_entity));
        assert_eq!(clients[0].world.entity_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_destroys_entities() {
        let (network, mut server) = hosted();
        let mut clients = vec![
            join(&network, &mut server, "Ann", Color::RED),
            join(&network, &mut server, "Bob", Color::GREEN),
        ];
        for client in clients.iter_mut() {
            client.session.set_player_ready(true).unwrap();
        }
        settle(&mut server, &mut clients);
        tokio::time::advance(Duration::from_secs(3)).await;
        settle(&mut server, &mut clients);
        assert_eq!(clients[0].world.entity_count(), 2);

        let Peer { session, world } = &mut clients[0];
        session.disconnect(world);
        session.disconnect(world);

        assert_eq!(clients[0].world.entity_count(), 0);
        assert_eq!(clients[0].session.phase(), SessionPhase::Disconnected);
        assert_eq!(clients[0].session.last_state_sequence(), 0);
        assert!(clients[0].session.pending_inputs().is_empty());
    }

    #[test]
    fn test_server_shutdown_drops_clients() {
        let (network, mut server) = hosted();
        let mut client = join(&network, &mut server, "Ann", Color::RED);

        let Peer { session, world } = &mut server;
        session.disconnect(world);
        client.update(TICK);

        assert_eq!(client.session.phase(), SessionPhase::Disconnected);
        assert!(client.session.lobby_state().players.is_empty());
    }

    #[test]
    fn test_unregistered_peer_leaves_silently() {
        let (network, mut server) = hosted();
        let mut client = join(&network, &mut server, "Ann", Color::RED);

        // Connects at the transport level but never sends player info.
        let mut stray = network.endpoint();
        stray.connect_to_server("localhost", 7777).unwrap();
        server.update(Duration::ZERO);
        stray.update();
        server.session.drain_events();
        client.session.drain_events();

        drop(stray);
        settle(&mut server, std::slice::from_mut(&mut client));

        let left = |events: Vec<SessionEvent>| {
            events
                .iter()
                .any(|e| matches!(e, SessionEvent::PlayerLeft(_)))
        };
        assert!(!left(server.session.drain_events()));
        assert!(!left(client.session.drain_events()));
        assert_eq!(server.session.lobby_state().players.len(), 1);
        assert_eq!(client.session.lobby_state(), server.session.lobby_state());
    }

    #[test]
    fn test_leave_notice_keeps_mirrored_roster() {
        let (network, mut server) = hosted();
        let _a = join(&network, &mut server, "Ann", Color::RED);
        let mut b = join(&network, &mut server, "Bob", Color::GREEN);
        settle(&mut server, std::slice::from_mut(&mut b));
        b.session.drain_events();

        server
            .session
            .transport_mut()
            .send_message_to_client(2, &NetworkMessage::new(MessageType::PlayerLeave, 1));
        b.update(Duration::ZERO);

        assert_eq!(b.session.drain_events(), vec![SessionEvent::PlayerLeft(1)]);
        assert_eq!(b.session.lobby_state().players.len(), 2);
        assert_eq!(b.session.lobby_state(), server.session.lobby_state());
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_sees_every_countdown_second() {
        let (network, mut server) = hosted();
        let mut clients = vec![
            join(&network, &mut server, "Ann", Color::RED),
            join(&network, &mut server, "Bob", Color::GREEN),
        ];
        for client in clients.iter_mut() {
            client.session.set_player_ready(true).unwrap();
        }
        settle(&mut server, &mut clients);

        let mut countdowns = Vec::new();
        let mut collect = |server: &mut Peer| {
            for event in server.session.drain_events() {
                if let SessionEvent::LobbyUpdated(state) = event {
                    if state.game_starting {
                        countdowns.push(state.countdown);
                    }
                }
            }
        };
        collect(&mut server);
        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(1)).await;
            settle(&mut server, &mut clients);
            collect(&mut server);
        }

        assert_eq!(countdowns, vec![3, 2, 1]);
        assert!(server.session.is_in_game());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_snapshot_not_applied() {
        let (network, mut server) = hosted();
        let mut clients = vec![
            join(&network, &mut server, "Ann", Color::RED),
            join(&network, &mut server, "Bob", Color::GREEN),
        ];
        for client in clients.iter_mut() {
            client.session.set_player_ready(true).unwrap();
        }
        settle(&mut server, &mut clients);
        tokio::time::advance(Duration::from_secs(3)).await;
        settle(&mut server, &mut clients);
        assert!(clients[0].session.is_in_game());

        let on_server = server.session.player_entity(2).unwrap();
        let mut k = server.world.kinematics(on_server).unwrap();
        k.position = Vec2::new(640.0, 360.0);
        server.world.set_kinematics(on_server, k);
        let newer = sync::build_snapshot(&server.world, &server.session.entities, 11, Duration::ZERO);
        k.position = Vec2::new(200.0, 200.0);
        server.world.set_kinematics(on_server, k);
        let older = sync::build_snapshot(&server.world, &server.session.entities, 10, Duration::ZERO);

        for snapshot in [&newer, &older] {
            let message = NetworkMessage::with_body(MessageType::GameState, 0, snapshot).unwrap();
            server.session.transport_mut().send_message_to_client(1, &message);
        }
        clients[0].update(Duration::ZERO);

        assert_eq!(clients[0].session.last_state_sequence(), 11);
        let mirrored = clients[0].session.player_entity(2).unwrap();
        let position = clients[0].world.kinematics(mirrored).unwrap().position;
        assert_approx_eq!(position.x, 640.0);
        assert_approx_eq!(position.y, 360.0);
    }
}
