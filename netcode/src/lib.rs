//! Netcode core: transports, lobby and session state machine, and state
//! synchronisation for a server-authoritative multiplayer session.

pub mod config;
pub mod error;
pub mod lobby;
pub mod registry;
pub mod relay;
pub mod session;
pub mod sync;
pub mod transport;
pub mod world;

pub use config::NetConfig;
pub use error::{ConfigError, SessionError, TransportError};
pub use session::{SessionEvent, SessionManager, SessionPhase};
pub use transport::{
    ConnectionStatus, MemoryNetwork, MemoryTransport, TcpTransport, Transport, TransportEvent,
};
pub use world::{
    ControlFlags, EntityAccess, EntityHandle, GameWorld, HeadlessWorld, Kinematics,
    SessionLifecycle,
};
