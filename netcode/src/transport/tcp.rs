//! Production transport over TCP, driven by tokio tasks.
//!
//! Socket work happens on spawned accept, reader and writer tasks. They report
//! back through an unbounded channel that `update()` drains without blocking,
//! so the game loop stays synchronous.

use super::{ConnectionStatus, Transport, TransportEvent};
use crate::error::TransportError;
use crate::registry::ConnectionRegistry;
use log::{debug, error, info, warn};
use shared::{
    encode_frame, CodecError, FrameDecoder, MessageType, NetworkMessage, SERVER_PLAYER_ID,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const READ_BUFFER_SIZE: usize = 4096;

/// Reports from socket tasks to the owning transport.
#[derive(Debug)]
enum LinkEvent {
    Accepted(u32),
    Frame {
        from: u32,
        result: Result<NetworkMessage, CodecError>,
    },
    Closed(u32),
    ConnectFailed(String),
}

/// Server-side handle to one connected client.
#[derive(Debug)]
struct PeerLink {
    addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    reader: Option<JoinHandle<()>>,
}

impl PeerLink {
    fn close(self) {
        if let Some(reader) = self.reader {
            reader.abort();
        }
        // Dropping `outbound` ends the writer task, which closes the socket.
    }
}

enum Role {
    Idle,
    Server {
        accept: JoinHandle<()>,
    },
    Client {
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        reader: JoinHandle<()>,
    },
}

type SharedRegistry = Arc<Mutex<ConnectionRegistry<PeerLink>>>;

fn lock(registry: &SharedRegistry) -> MutexGuard<'_, ConnectionRegistry<PeerLink>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct TcpTransport {
    runtime: Handle,
    role: Role,
    status: ConnectionStatus,
    local_player_id: u32,
    local_addr: Option<SocketAddr>,
    registry: SharedRegistry,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: mpsc::UnboundedReceiver<LinkEvent>,
}

impl TcpTransport {
    /// Creates a transport on the tokio runtime of the calling context.
    pub fn new() -> Result<Self, TransportError> {
        let runtime = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
        Ok(Self::with_handle(runtime))
    }

    pub fn with_handle(runtime: Handle) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            runtime,
            role: Role::Idle,
            status: ConnectionStatus::Disconnected,
            local_player_id: SERVER_PLAYER_ID,
            local_addr: None,
            registry: Arc::new(Mutex::new(ConnectionRegistry::new(0))),
            events_tx,
            events_rx,
        }
    }

    /// Address the server is listening on, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

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
                error!("Failed to encode {:?} frame: {}", message.kind, e);
                None
            }
        }
    }

    fn reset(&mut self, status: ConnectionStatus) {
        match std::mem::replace(&mut self.role, Role::Idle) {
            Role::Server { accept } => accept.abort(),
            Role::Client { reader, .. } => reader.abort(),
            Role::Idle => {}
        }

        // Anything still in flight belongs to the old session. Closing the old
        // channel before draining stops a concurrent accept from registering.
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.events_tx = events_tx;
        self.events_rx = events_rx;

        for (_, link) in lock(&self.registry).drain() {
            link.close();
        }

        self.status = status;
        self.local_player_id = SERVER_PLAYER_ID;
        self.local_addr = None;
    }

    fn handle_server_event(&mut self, event: LinkEvent, events: &mut Vec<TransportEvent>) {
        match event {
            LinkEvent::Accepted(id) => events.push(TransportEvent::PeerConnected(id)),
            LinkEvent::Frame { from, result } => match result {
                Ok(mut message) => {
                    if lock(&self.registry).peer(from).is_none() {
                        debug!("Dropping frame from departed player {}", from);
                        return;
                    }
                    message.player_id = from;
                    events.push(TransportEvent::Message(message));
                }
                Err(e) => warn!("Dropping malformed frame from player {}: {}", from, e),
            },
            LinkEvent::Closed(id) => {
                let removed = lock(&self.registry).remove_client(id);
                if let Some(link) = removed {
                    info!("Client {} at {} disconnected", id, link.addr);
                    link.close();
                    self.broadcast_message(&NetworkMessage::new(MessageType::PlayerLeave, id));
                    events.push(TransportEvent::PeerDisconnected(id));
                }
            }
            LinkEvent::ConnectFailed(_) => {}
        }
    }

    fn handle_client_event(&mut self, event: LinkEvent, events: &mut Vec<TransportEvent>) {
        match event {
            LinkEvent::Frame { result, .. } => match result {
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
            LinkEvent::Closed(_) => {
                let status = if self.status == ConnectionStatus::Connecting {
                    warn!("Server closed the connection during handshake");
                    ConnectionStatus::Failed
                } else {
                    info!("Disconnected from server");
                    ConnectionStatus::Disconnected
                };
                self.reset(status);
                events.push(TransportEvent::StatusChanged(status));
            }
            LinkEvent::ConnectFailed(reason) => {
                warn!("Failed to connect: {}", reason);
                self.reset(ConnectionStatus::Failed);
                events.push(TransportEvent::StatusChanged(ConnectionStatus::Failed));
            }
            LinkEvent::Accepted(_) => {}
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: SharedRegistry,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Error accepting connection: {}", e);
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                continue;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle for {}: {}", addr, e);
        }
        let (read_half, write_half) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let id = {
            let mut registry = lock(&registry);
            if events.is_closed() {
                debug!("Transport reset, dropping connection from {}", addr);
                return;
            }
            let Some(id) = registry.add_client(PeerLink {
                addr,
                outbound: outbound.clone(),
                reader: None,
            }) else {
                warn!("Server full, refusing connection from {}", addr);
                continue;
            };

            let welcome = NetworkMessage::new(MessageType::PlayerJoin, id);
            match encode_frame(&welcome) {
                Ok(bytes) => {
                    let _ = outbound.send(bytes);
                }
                Err(e) => error!("Failed to encode welcome for player {}: {}", id, e),
            }

            tokio::spawn(write_loop(write_half, outbound_rx));
            let reader = tokio::spawn(read_loop(read_half, id, events.clone()));
            if let Some(link) = registry.peer_mut(id) {
                link.reader = Some(reader);
            }
            id
        };

        info!("Client connected from {}, assigned player ID: {}", addr, id);
        if events.send(LinkEvent::Accepted(id)).is_err() {
            break;
        }
    }
}

async fn connect_task(
    host: String,
    port: u16,
    outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let stream = match TcpStream::connect((host.as_str(), port)).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = events.send(LinkEvent::ConnectFailed(format!("{}:{}: {}", host, port, e)));
            return;
        }
    };

    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not disable Nagle: {}", e);
    }
    let (read_half, write_half) = stream.into_split();
    tokio::spawn(write_loop(write_half, outbound));
    read_loop(read_half, SERVER_PLAYER_ID, events).await;
}

async fn write_loop(mut writer: OwnedWriteHalf, mut outbound: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            warn!("Error writing frame: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Reassembles frames from one stream until it closes or desynchronises.
async fn read_loop(
    mut reader: OwnedReadHalf,
    from: u32,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let mut decoder = FrameDecoder::new();
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(len) => {
                decoder.push(&buffer[..len]);
                while let Some(result) = decoder.next_frame() {
                    if let Err(e) = &result {
                        if e.is_fatal() {
                            warn!("Unrecoverable stream from peer {}: {}", from, e);
                            let _ = events.send(LinkEvent::Closed(from));
                            return;
                        }
                    }
                    if events.send(LinkEvent::Frame { from, result }).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                debug!("Read error from peer {}: {}", from, e);
                break;
            }
        }
    }

    let _ = events.send(LinkEvent::Closed(from));
}

impl Transport for TcpTransport {
    fn start_server(&mut self, port: u16, max_clients: usize) -> Result<(), TransportError> {
        self.ensure_idle()?;

        let bind_error = |source| TransportError::Bind { port, source };
        let std_listener = std::net::TcpListener::bind(("0.0.0.0", port)).map_err(bind_error)?;
        std_listener.set_nonblocking(true).map_err(bind_error)?;
        let local_addr = std_listener.local_addr().map_err(bind_error)?;

        let listener = {
            let _context = self.runtime.enter();
            TcpListener::from_std(std_listener).map_err(bind_error)?
        };

        lock(&self.registry).set_max_clients(max_clients);
        let accept = self.runtime.spawn(accept_loop(
            listener,
            Arc::clone(&self.registry),
            self.events_tx.clone(),
        ));

        self.role = Role::Server { accept };
        self.status = ConnectionStatus::Connected;
        self.local_player_id = SERVER_PLAYER_ID;
        self.local_addr = Some(local_addr);
        info!(
            "Server listening on {} with max {} clients",
            local_addr, max_clients
        );
        Ok(())
    }

    fn connect_to_server(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        self.ensure_idle()?;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let reader = self.runtime.spawn(connect_task(
            host.to_string(),
            port,
            outbound_rx,
            self.events_tx.clone(),
        ));

        self.role = Role::Client { outbound, reader };
        self.status = ConnectionStatus::Connecting;
        info!("Connecting to {}:{}...", host, port);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.status == ConnectionStatus::Disconnected {
            return;
        }
        self.reset(ConnectionStatus::Disconnected);
        info!("Disconnected from network");
    }

    fn status(&self) -> ConnectionStatus {
        self.status
    }

    fn send_message(&mut self, message: &NetworkMessage) {
        let Role::Client { outbound, .. } = &self.role else {
            return;
        };
        if let Some(bytes) = Self::encode(message) {
            let _ = outbound.send(bytes);
        }
    }

    fn send_message_to_client(&mut self, client_id: u32, message: &NetworkMessage) {
        if !self.is_server() {
            return;
        }
        let Some(bytes) = Self::encode(message) else {
            return;
        };
        if let Some(link) = lock(&self.registry).peer(client_id) {
            let _ = link.outbound.send(bytes);
        }
    }

    fn broadcast_message(&mut self, message: &NetworkMessage) {
        if !self.is_server() {
            return;
        }
        let Some(bytes) = Self::encode(message) else {
            return;
        };
        for (_, link) in lock(&self.registry).peers() {
            let _ = link.outbound.send(bytes.clone());
        }
    }

    fn update(&mut self) -> Vec<TransportEvent> {
        let mut pending = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            pending.push(event);
        }

        let mut events = Vec::new();
        for event in pending {
            if self.is_server() {
                self.handle_server_event(event, &mut events);
            } else if matches!(self.role, Role::Client { .. }) {
                self.handle_client_event(event, &mut events);
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
        lock(&self.registry).client_ids()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}
