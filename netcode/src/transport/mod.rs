//! Connection lifecycle and reliable, ordered delivery of frames.
//!
//! The transport knows nothing about game semantics. All network activity is
//! surfaced through [`Transport::update`], which drains whatever arrived since
//! the previous call and never blocks.

pub mod memory;
pub mod tcp;

use crate::error::TransportError;
use shared::NetworkMessage;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::TcpTransport;

/// Transport-level connection state, independent of the session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Something that happened on the wire since the last `update()`.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StatusChanged(ConnectionStatus),
    Message(NetworkMessage),
    /// Server role: a peer finished the handshake under this id.
    PeerConnected(u32),
    /// Server role: a peer went away; `PlayerLeave` was already broadcast.
    PeerDisconnected(u32),
}

pub trait Transport {
    /// Binds a listening endpoint and enters the server role.
    ///
    /// Fails without changing state when already active or when binding fails.
    fn start_server(&mut self, port: u16, max_clients: usize) -> Result<(), TransportError>;

    /// Begins an asynchronous handshake with a server.
    ///
    /// Only local failures are returned here. Refusal or an unreachable host is
    /// reported later as `StatusChanged(Failed)`.
    fn connect_to_server(&mut self, host: &str, port: u16) -> Result<(), TransportError>;

    /// Tears down every peer and returns to `Disconnected`. Idempotent.
    fn disconnect(&mut self);

    fn status(&self) -> ConnectionStatus;

    /// Client role: sends to the server.
    fn send_message(&mut self, message: &NetworkMessage);

    /// Server role: sends to one connected client.
    fn send_message_to_client(&mut self, client_id: u32, message: &NetworkMessage);

    /// Server role: sends to every connected client.
    fn broadcast_message(&mut self, message: &NetworkMessage);

    /// Drains pending events. Must be called once per simulation tick.
    fn update(&mut self) -> Vec<TransportEvent>;

    fn is_server(&self) -> bool;

    /// 0 for the server; the assigned id once a client is connected.
    fn local_player_id(&self) -> u32;

    fn connected_clients(&self) -> Vec<u32>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn start_server(&mut self, port: u16, max_clients: usize) -> Result<(), TransportError> {
        (**self).start_server(port, max_clients)
    }

    fn connect_to_server(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        (**self).connect_to_server(host, port)
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn status(&self) -> ConnectionStatus {
        (**self).status()
    }

    fn send_message(&mut self, message: &NetworkMessage) {
        (**self).send_message(message)
    }

    fn send_message_to_client(&mut self, client_id: u32, message: &NetworkMessage) {
        (**self).send_message_to_client(client_id, message)
    }

    fn broadcast_message(&mut self, message: &NetworkMessage) {
        (**self).broadcast_message(message)
    }

    fn update(&mut self) -> Vec<TransportEvent> {
        (**self).update()
    }

    fn is_server(&self) -> bool {
        (**self).is_server()
    }

    fn local_player_id(&self) -> u32 {
        (**self).local_player_id()
    }

    fn connected_clients(&self) -> Vec<u32> {
        (**self).connected_clients()
    }
}
