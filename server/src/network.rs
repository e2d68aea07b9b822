//! Server tick loop: drives the session and the headless world.

use log::{debug, info, warn};
use netcode::{
    HeadlessWorld, NetConfig, SessionEvent, SessionManager, SessionPhase, TcpTransport, Transport,
};
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Ticks between periodic status lines.
const STATUS_INTERVAL_TICKS: u64 = 300;

/// Authoritative server hosting one session.
pub struct Server<T: Transport = TcpTransport> {
    session: SessionManager<T>,
    world: HeadlessWorld,
    port: u16,
    tick_duration: Duration,
    tick: u64,
    strokes_relayed: usize,
}

impl Server<TcpTransport> {
    /// Creates a server over TCP on the current tokio runtime.
    pub fn new(config: NetConfig, tick_duration: Duration) -> Result<Self, Box<dyn std::error::Error>> {
        let transport = TcpTransport::new()?;
        Ok(Self::with_transport(transport, config, tick_duration))
    }
}

impl<T: Transport> Server<T> {
    pub fn with_transport(transport: T, config: NetConfig, tick_duration: Duration) -> Self {
        let port = config.port;
        Self {
            session: SessionManager::new(transport, config),
            world: HeadlessWorld::new(),
            port,
            tick_duration,
            tick: 0,
            strokes_relayed: 0,
        }
    }

    pub fn session(&self) -> &SessionManager<T> {
        &self.session
    }

    pub fn world(&self) -> &HeadlessWorld {
        &self.world
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn strokes_relayed(&self) -> usize {
        self.strokes_relayed
    }

    /// Starts listening on the configured port.
    pub fn start(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.session.start_server(self.port)?;
        info!("Server started on port {}", self.port);
        Ok(())
    }

    /// Runs one simulation tick of length `dt`.
    pub fn step(&mut self, dt: Duration) {
        self.session.update(&mut self.world, dt);

        if self.session.is_in_game() {
            self.world.advance(dt.as_secs_f32());
        }

        self.strokes_relayed += self.session.take_paint_strokes().len();
        for event in self.session.drain_events() {
            self.log_event(event);
        }

        self.tick += 1;
        if self.tick % STATUS_INTERVAL_TICKS == 0 {
            debug!(
                "Tick {}: phase {:?}, {} clients, {} entities, snapshot {}",
                self.tick,
                self.session.phase(),
                self.session.transport().connected_clients().len(),
                self.world.entity_count(),
                self.session.last_state_sequence()
            );
        }
    }

    fn log_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::PhaseChanged(phase) => info!("Session is now {:?}", phase),
            SessionEvent::LobbyUpdated(lobby) => {
                let ready = lobby.players.iter().filter(|p| p.is_ready).count();
                info!("Lobby: {}/{} players ready", ready, lobby.players.len());
            }
            SessionEvent::GameStarted(start) => {
                info!(
                    "Game {} started with {} players",
                    start.game_id,
                    start.players.len()
                );
            }
            SessionEvent::PlayerLeft(id) => {
                if self.session.phase() == SessionPhase::InGame {
                    warn!("Player {} left mid-game", id);
                } else {
                    info!("Player {} left", id);
                }
            }
            SessionEvent::PongReceived { rtt } => debug!("Pong after {:?}", rtt),
        }
    }

    /// Main server loop: ticks until Ctrl+C, then disconnects everyone.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.start()?;

        let mut tick_interval = interval(self.tick_duration);
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
                    self.step(dt);
                },

                result = &mut shutdown => {
                    if let Err(e) = result {
                        warn!("Failed to listen for shutdown signal: {}", e);
                    }
                    info!("Server shutting down");
                    break;
                },
            }
        }

        self.session.disconnect(&mut self.world);
        Ok(())
    }
}
