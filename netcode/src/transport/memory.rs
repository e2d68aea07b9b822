//! In-process transport for deterministic protocol tests.
//!
//! Endpoints created from one [`MemoryNetwork`] exchange real encoded frames
//! through per-endpoint inboxes. Nothing moves until the receiving endpoint
//! calls `update()`, so a test controls the exact interleaving of peers.

use super::{ConnectionStatus, Transport, TransportEvent};
use crate::error::TransportError;
use crate::registry::ConnectionRegistry;
use log::{debug, info, warn};
use shared::{decode_frame, encode_frame, MessageType, NetworkMessage, SERVER_PLAYER_ID};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

type NodeId = u64;

#[derive(Debug)]
enum Wire {
    Connect { from: NodeId },
    Refused,
    Frame { from: NodeId, bytes: Vec<u8> },
    Closed { from: NodeId },
}

#[derive(Debug, Default)]
struct Hub {
    listeners: HashMap<u16, NodeId>,
    inboxes: HashMap<NodeId, VecDeque<Wire>>,
    next_node: NodeId,
}

impl Hub {
    fn deliver(&mut self, to: NodeId, wire: Wire) {
        match self.inboxes.get_mut(&to) {
            Some(inbox) => inbox.push_back(wire),
            None => debug!("Dropping delivery to closed endpoint {}", to),
        }
    }
}

/// A virtual network that endpoints attach to.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a fresh, idle endpoint.
    pub fn endpoint(&self) -> MemoryTransport {
        let node = {
            let mut hub = self.lock();
            let node = hub.next_node;
            hub.next_node += 1;
            hub.inboxes.insert(node, VecDeque::new());
            node
        };

        MemoryTransport {
            network: self.clone(),
            node,
            role: Role::Idle,
            registry: ConnectionRegistry::new(0),
            status: ConnectionStatus::Disconnected,
            local_player_id: SERVER_PLAYER_ID,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Idle,
    Server { port: u16 },
    Client { server: NodeId },
}

pub struct MemoryTransport {
    network: MemoryNetwork,
    node: NodeId,
    role: Role,
    registry: ConnectionRegistry<NodeId>,
    status: ConnectionStatus,
    local_player_id: u32,
}

impl MemoryTransport {
    fn ensure_idle(&self) -> Result<(), TransportError> {
        match self.status {
            ConnectionStatus::Disconnected | ConnectionStatus::Failed => Ok(()),
            active => Err(TransportError::AlreadyActive(active)),
        }
    }

    fn encode(message: &NetworkMessage) -> Option<Vec<u8>> {
        match encode_frame(message) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Failed to encode {:?} frame: {}", message.kind, e);
                None
            }
        }
    }

    /// Client role: pushes raw bytes to the server as if they were a frame.
    pub fn send_raw_frame(&mut self, bytes: Vec<u8>) {
        if let Role::Client { server } = self.role {
            self.network.lock().deliver(
                server,
                Wire::Frame {
                    from: self.node,
                    bytes,
                },
            );
        }
    }

    fn reset(&mut self, status: ConnectionStatus) {
        self.role = Role::Idle;
        self.status = status;
        self.local_player_id = SERVER_PLAYER_ID;
    }

    fn handle_server_wire(&mut self, wire: Wire, events: &mut Vec<TransportEvent>) {
        match wire {
            Wire::Connect { from } => match self.registry.add_client(from) {
                Some(id) => {
                    info!("Client connected, assigned player ID: {}", id);
                    let welcome = NetworkMessage::new(MessageType::PlayerJoin, id);
                    if let Some(bytes) = Self::encode(&welcome) {
                        self.network.lock().deliver(
                            from,
                            Wire::Frame {
                                from: self.node,
                                bytes,
                            },
                        );
                    }
                    events.push(TransportEvent::PeerConnected(id));
                }
                None => {
                    warn!("Server full, refusing connection");
                    self.network
                        .lock()
                        .deliver(from, Wire::Closed { from: self.node });
                }
            },
            Wire::Frame { from, bytes } => {
                let Some(id) = self.registry.find_client(|node| *node == from) else {
                    debug!("Frame from unregistered endpoint {}", from);
                    return;
                };
                match decode_frame(&bytes) {
                    Ok(mut message) => {
                        message.player_id = id;
                        events.push(TransportEvent::Message(message));
                    }
                    Err(e) => warn!("Dropping malformed frame from player {}: {}", id, e),
                }
            }
            Wire::Closed { from } => {
                if let Some(id) = self.registry.find_client(|node| *node == from) {
                    self.registry.remove_client(id);
                    info!("Client disconnected, player ID: {}", id);
                    self.broadcast_message(&NetworkMessage::new(MessageType::PlayerLeave, id));
                    events.push(TransportEvent::PeerDisconnected(id));
                }
            }
            Wire::Refused => {}
        }
    }

    fn handle_client_wire(&mut self, wire: Wire, events: &mut Vec<TransportEvent>) {
        match wire {
            Wire::Refused => {
                warn!("Connection refused");
                self.reset(ConnectionStatus::Failed);
                events.push(TransportEvent::StatusChanged(ConnectionStatus::Failed));
            }
            Wire::Frame { bytes, .. } => match decode_frame(&bytes) {
                Ok(message)
                    if self.status == ConnectionStatus::Connecting
                        && message.kind == MessageType::PlayerJoin =>
                {
                    self.local_player_id = message.player_id;
                    self.status = ConnectionStatus::Connected;
                    info!("Connected to server as player {}", self.local_player_id);
                    events.push(TransportEvent::StatusChanged(ConnectionStatus::Connected));
                }
                Ok(message) => events.push(TransportEvent::Message(message)),
                Err(e) => warn!("Dropping malformed frame from server: {}", e),
            },
            Wire::Closed { .. } => {
                let status = if self.status == ConnectionStatus::Connecting {
                    ConnectionStatus::Failed
                } else {
                    ConnectionStatus::Disconnected
                };
                info!("Disconnected from server");
                self.reset(status);
                events.push(TransportEvent::StatusChanged(status));
            }
            Wire::Connect { .. } => {}
        }
    }
}

impl Transport for MemoryTransport {
    fn start_server(&mut self, port: u16, max_clients: usize) -> Result<(), TransportError> {
        self.ensure_idle()?;

        {
            let mut hub = self.network.lock();
            if hub.listeners.contains_key(&port) {
                return Err(TransportError::Bind {
                    port,
                    source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
                });
            }
            hub.listeners.insert(port, self.node);
        }

        self.registry.set_max_clients(max_clients);
        self.role = Role::Server { port };
        self.status = ConnectionStatus::Connected;
        self.local_player_id = SERVER_PLAYER_ID;
        info!("Server started on port {} with max {} clients", port, max_clients);
        Ok(())
    }

    fn connect_to_server(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        self.ensure_idle()?;

        let mut hub = self.network.lock();
        match hub.listeners.get(&port).copied() {
            Some(server) => {
                hub.deliver(server, Wire::Connect { from: self.node });
                self.role = Role::Client { server };
            }
            None => {
                hub.deliver(self.node, Wire::Refused);
                self.role = Role::Idle;
            }
        }
        drop(hub);

        self.status = ConnectionStatus::Connecting;
        info!("Attempting to connect to {}:{}", host, port);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.status == ConnectionStatus::Disconnected {
            return;
        }

        let mut hub = self.network.lock();
        match self.role {
            Role::Server { port } => {
                for (_, node) in self.registry.drain() {
                    hub.deliver(node, Wire::Closed { from: self.node });
                }
                hub.listeners.remove(&port);
            }
            Role::Client { server } => hub.deliver(server, Wire::Closed { from: self.node }),
            Role::Idle => {}
        }
        if let Some(inbox) = hub.inboxes.get_mut(&self.node) {
            inbox.clear();
        }
        drop(hub);

        self.reset(ConnectionStatus::Disconnected);
        info!("Disconnected from network");
    }

    fn status(&self) -> ConnectionStatus {
        self.status
    }

    fn send_message(&mut self, message: &NetworkMessage) {
        if let Role::Client { .. } = self.role {
            if let Some(bytes) = Self::encode(message) {
                self.send_raw_frame(bytes);
            }
        }
    }

    fn send_message_to_client(&mut self, client_id: u32, message: &NetworkMessage) {
        if !self.is_server() {
            return;
        }
        let Some(node) = self.registry.peer(client_id).copied() else {
            return;
        };
        if let Some(bytes) = Self::encode(message) {
            self.network.lock().deliver(
                node,
                Wire::Frame {
                    from: self.node,
                    bytes,
                },
            );
        }
    }

    fn broadcast_message(&mut self, message: &NetworkMessage) {
        if !self.is_server() {
            return;
        }
        let Some(bytes) = Self::encode(message) else {
            return;
        };

        let mut hub = self.network.lock();
        for (_, node) in self.registry.peers() {
            hub.deliver(
                *node,
                Wire::Frame {
                    from: self.node,
                    bytes: bytes.clone(),
                },
            );
        }
    }

    fn update(&mut self) -> Vec<TransportEvent> {
        let pending: Vec<Wire> = {
            let mut hub = self.network.lock();
            match hub.inboxes.get_mut(&self.node) {
                Some(inbox) => inbox.drain(..).collect(),
                None => Vec::new(),
            }
        };

        let mut events = Vec::new();
        for wire in pending {
            match self.role {
                Role::Server { .. } => self.handle_server_wire(wire, &mut events),
                Role::Client { .. } => self.handle_client_wire(wire, &mut events),
                Role::Idle if matches!(wire, Wire::Refused) => {
                    self.handle_client_wire(wire, &mut events)
                }
                Role::Idle => {}
            }
        }
        events
    }

    fn is_server(&self) -> bool {
        matches!(self.role, Role::Server { .. })
    }

    fn local_player_id(&self) -> u32 {
        self.local_player_id
    }

    fn connected_clients(&self) -> Vec<u32> {
        self.registry.client_ids()
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.disconnect();
        self.network.lock().inboxes.remove(&self.node);
    }
}
