use crate::input::Autopilot;
use log::{debug, info, warn};
use netcode::{
    EntityAccess, HeadlessWorld, NetConfig, SessionEvent, SessionManager, SessionPhase,
    TcpTransport, Transport,
};
use shared::Color;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Ticks between two paint strokes while in game.
pub const STROKE_EVERY_TICKS: u64 = 6;
pub const STROKE_RADIUS: f32 = 8.0;
pub const PING_INTERVAL: Duration = Duration::from_secs(1);

/// Headless client: joins a lobby, readies up and plays on autopilot.
pub struct Client<T: Transport = TcpTransport> {
    session: SessionManager<T>,
    world: HeadlessWorld,
    autopilot: Autopilot,
    host: String,
    port: u16,
    color: Color,

    tick: u64,
    since_ping: Duration,
    strokes_received: usize,
    joined: bool,
}

impl Client<TcpTransport> {
    pub fn new(
        host: &str,
        config: NetConfig,
        username: &str,
        color: Color,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let transport = TcpTransport::new()?;
        Self::with_transport(transport, host, config, username, color)
    }
}

impl<T: Transport> Client<T> {
    pub fn with_transport(
        transport: T,
        host: &str,
        config: NetConfig,
        username: &str,
        color: Color,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let port = config.port;
        let mut session = SessionManager::new(transport, config);
        session.set_player_info(username, color)?;

        Ok(Client {
            session,
            world: HeadlessWorld::new(),
            autopilot: Autopilot::new(),
            host: host.to_string(),
            port,
            color,
            tick: 0,
            since_ping: Duration::ZERO,
            strokes_received: 0,
            joined: false,
        })
    }

    pub fn with_autopilot(mut self, autopilot: Autopilot) -> Self {
        self.autopilot = autopilot;
        self
    }

    pub fn session(&self) -> &SessionManager<T> {
        &self.session
    }

    pub fn world(&self) -> &HeadlessWorld {
        &self.world
    }

    pub fn strokes_received(&self) -> usize {
        self.strokes_received
    }

    /// True once the session dropped or the connection attempt failed.
    pub fn is_finished(&self) -> bool {
        self.session.phase() == SessionPhase::Disconnected
    }

    pub fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to server...");
        self.session.connect_to_server(&self.host, self.port)?;
        Ok(())
    }

    /// Runs one client tick of length `dt`.
    pub fn step(&mut self, dt: Duration) -> Result<(), Box<dyn std::error::Error>> {
        self.session.update(&mut self.world, dt);

        for event in self.session.drain_events() {
            self.handle_event(event)?;
        }

        if self.session.is_in_game() {
            self.drive(dt)?;
        }

        self.strokes_received += self.session.take_paint_strokes().len();

        self.since_ping += dt;
        if self.since_ping >= PING_INTERVAL {
            self.since_ping = Duration::ZERO;
            self.session.ping()?;
        }

        self.tick += 1;
        Ok(())
    }

    fn handle_event(&mut self, event: SessionEvent) -> Result<(), Box<dyn std::error::Error>> {
        match event {
            SessionEvent::PhaseChanged(SessionPhase::InLobby) => {
                info!(
                    "Connected! Player ID: {}",
                    self.session.local_player_id()
                );
                self.joined = true;
                self.session.set_player_ready(true)?;
            }
            SessionEvent::PhaseChanged(SessionPhase::Disconnected) => {
                if self.joined {
                    warn!("Disconnected from server");
                } else {
                    warn!("Could not connect to {}:{}", self.host, self.port);
                }
            }
            SessionEvent::PhaseChanged(phase) => debug!("Session is now {:?}", phase),
            SessionEvent::LobbyUpdated(lobby) => {
                if lobby.game_starting {
                    info!("Game starting in {}...", lobby.countdown);
                } else {
                    info!("Lobby has {} players", lobby.players.len());
                }
            }
            SessionEvent::GameStarted(start) => {
                info!(
                    "Game {} started with {} players",
                    start.game_id,
                    start.players.len()
                );
            }
            SessionEvent::PlayerLeft(id) => info!("Player {} left", id),
            SessionEvent::PongReceived { rtt } => debug!("Ping: {}ms", rtt.as_millis()),
        }
        Ok(())
    }

    /// Steers and paints with the local entity.
    fn drive(&mut self, dt: Duration) -> Result<(), Box<dyn std::error::Error>> {
        let Some(entity) = self.session.player_entity(self.session.local_player_id()) else {
            return Ok(());
        };

        if let Some(controls) = self.autopilot.update(dt) {
            self.world.set_controls(entity, controls);
        }
        self.world.advance(dt.as_secs_f32());

        if self.tick % STROKE_EVERY_TICKS == 0 {
            if let Some(k) = self.world.kinematics(entity) {
                self.session
                    .send_paint_stroke(k.position, STROKE_RADIUS, self.color)?;
            }
        }
        Ok(())
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.connect()?;

        let mut tick_interval = interval(Duration::from_millis(16));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick);
                    last_tick = now;

                    self.step(dt)?;
                    if self.is_finished() {
                        break;
                    }
                },

                _ = &mut shutdown => {
                    info!("Shutting down client");
                    break;
                },
            }
        }

        self.session.disconnect(&mut self.world);
        info!("Received {} strokes from other players", self.strokes_received);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Leg;
    use netcode::{ControlFlags, MemoryNetwork, MemoryTransport};

    const TICK: Duration = Duration::from_millis(16);

    fn memory_client(network: &MemoryNetwork, name: &str) -> Client<MemoryTransport> {
        let autopilot = Autopilot::with_pattern(vec![Leg {
            controls: ControlFlags {
                rotate_left: true,
                rotate_right: false,
            },
            duration: Duration::from_secs(60),
        }]);
        Client::with_transport(
            network.endpoint(),
            "localhost",
            NetConfig::default(),
            name,
            Color::ORANGE,
        )
        .unwrap()
        .with_autopilot(autopilot)
    }

    fn memory_host(network: &MemoryNetwork) -> SessionManager<MemoryTransport> {
        let mut host = SessionManager::new(network.endpoint(), NetConfig::default());
        host.start_server(7777).unwrap();
        host
    }

    #[test]
    fn test_failed_connect_finishes() {
        let network = MemoryNetwork::new();
        let mut client = memory_client(&network, "Ann");

        client.connect().unwrap();
        assert!(!client.is_finished());
        client.step(TICK).unwrap();
        assert!(client.is_finished());
    }

    #[test]
    fn test_client_readies_on_join() {
        let network = MemoryNetwork::new();
        let mut host = memory_host(&network);
        let mut host_world = HeadlessWorld::new();
        let mut client = memory_client(&network, "Ann");
        client.connect().unwrap();

        for _ in 0..4 {
            host.update(&mut host_world, TICK);
            client.step(TICK).unwrap();
        }

        let roster = &host.lobby_state().players;
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].username, "Ann");
        assert!(roster[0].is_ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_autopilot_steers_local_entity() {
        let network = MemoryNetwork::new();
        let mut host = memory_host(&network);
        let mut host_world = HeadlessWorld::new();
        let mut clients = vec![memory_client(&network, "Ann"), memory_client(&network, "Bob")];
        for client in clients.iter_mut() {
            client.connect().unwrap();
        }

        for _ in 0..6 {
            host.update(&mut host_world, Duration::ZERO);
            for client in clients.iter_mut() {
                client.step(Duration::ZERO).unwrap();
            }
        }
        tokio::time::advance(Duration::from_secs(3)).await;
        host.update(&mut host_world, Duration::ZERO);
        for client in clients.iter_mut() {
            client.step(Duration::ZERO).unwrap();
        }
        assert!(clients[0].session().is_in_game());

        // One tick to set the flags, one more for the input to go out.
        clients[0].step(TICK).unwrap();
        clients[0].step(TICK).unwrap();
        host.update(&mut host_world, Duration::ZERO);

        let entity = host.player_entity(1).unwrap();
        assert!(host_world.controls(entity).unwrap().rotate_left);
    }
}
