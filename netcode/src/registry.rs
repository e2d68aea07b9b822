//! Server-side mapping between transport peer handles and player ids.
//!
//! Ids start at 1 (the server is implicitly 0) and come from a monotonic
//! counter: an id freed by a disconnect is never handed out again while the
//! process runs.

use log::info;
use std::collections::BTreeMap;

/// A registered peer and the id it was assigned.
#[derive(Debug)]
pub struct Connection<P> {
    pub id: u32,
    pub peer: P,
}

/// Tracks connected peers and enforces the client capacity limit.
#[derive(Debug)]
pub struct ConnectionRegistry<P> {
    /// Connections indexed by player id, iterated in id (= arrival) order.
    connections: BTreeMap<u32, Connection<P>>,
    next_player_id: u32,
    max_clients: usize,
}

impl<P> ConnectionRegistry<P> {
    pub fn new(max_clients: usize) -> Self {
        Self {
            connections: BTreeMap::new(),
            next_player_id: 1,
            max_clients,
        }
    }

    /// Registers a peer and returns its id, or `None` at capacity.
    ///
    /// A rejected peer does not consume an id.
    pub fn add_client(&mut self, peer: P) -> Option<u32> {
        if self.connections.len() >= self.max_clients {
            return None;
        }

        let id = self.next_player_id;
        self.next_player_id += 1;

        self.connections.insert(id, Connection { id, peer });
        info!("Registered client, assigned player id {}", id);
        Some(id)
    }

    /// Removes a peer, handing its handle back for teardown.
    pub fn remove_client(&mut self, id: u32) -> Option<P> {
        let connection = self.connections.remove(&id)?;
        info!("Unregistered player id {}", connection.id);
        Some(connection.peer)
    }

    pub fn peer(&self, id: u32) -> Option<&P> {
        self.connections.get(&id).map(|c| &c.peer)
    }

    pub fn peer_mut(&mut self, id: u32) -> Option<&mut P> {
        self.connections.get_mut(&id).map(|c| &mut c.peer)
    }

    pub fn find_client<F>(&self, mut matches: F) -> Option<u32>
    where
        F: FnMut(&P) -> bool,
    {
        self.connections
            .values()
            .find(|c| matches(&c.peer))
            .map(|c| c.id)
    }

    /// Connected ids in ascending order.
    pub fn client_ids(&self) -> Vec<u32> {
        self.connections.keys().copied().collect()
    }

    pub fn peers(&self) -> impl Iterator<Item = (u32, &P)> {
        self.connections.values().map(|c| (c.id, &c.peer))
    }

    /// Removes every connection; the id counter keeps counting.
    pub fn drain(&mut self) -> Vec<(u32, P)> {
        std::mem::take(&mut self.connections)
            .into_values()
            .map(|c| (c.id, c.peer))
            .collect()
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    pub fn set_max_clients(&mut self, max_clients: usize) {
        self.max_clients = max_clients;
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
