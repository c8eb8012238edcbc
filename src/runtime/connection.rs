//! Connection table for the socket transport.
//!
//! Connections live in a slab. Each insert stamps a fresh generation, so a
//! `ConnHandle` names exactly one connection even after its slot is reused.

use crate::transport::ConnHandle;
use bytes::BytesMut;
use slab::Slab;
use std::net::SocketAddr;

/// A single accepted peer.
#[derive(Debug)]
pub struct Connection<S> {
    pub stream: S,
    pub peer: SocketAddr,
    pub generation: u64,
    /// Registered for readiness and delivering notifications to the server.
    pub attached: bool,
    /// Bytes copied in by the server and not yet written to the socket.
    pub outgoing: BytesMut,
    /// The peer sent EOF; nothing more is read.
    pub read_closed: bool,
    /// Close once `outgoing` is empty.
    pub closing: bool,
}

/// Registry of open connections with O(1) insert, lookup and remove.
pub struct ConnectionTable<S> {
    connections: Slab<Connection<S>>,
    next_generation: u64,
    max_connections: usize,
}

impl<S> ConnectionTable<S> {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            next_generation: 1,
            max_connections,
        }
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    /// Insert a newly accepted stream.
    ///
    /// Returns `None` (dropping the stream) if the table is at capacity.
    pub fn insert(&mut self, stream: S, peer: SocketAddr) -> Option<ConnHandle> {
        if self.is_full() {
            return None;
        }
        let generation = self.next_generation;
        self.next_generation += 1;
        let slot = self.connections.insert(Connection {
            stream,
            peer,
            generation,
            attached: false,
            outgoing: BytesMut::new(),
            read_closed: false,
            closing: false,
        });
        Some(ConnHandle::new(slot, generation))
    }

    /// Look up `handle`, refusing stale generations.
    pub fn get_mut(&mut self, handle: ConnHandle) -> Option<&mut Connection<S>> {
        self.connections
            .get_mut(handle.slot())
            .filter(|conn| conn.generation == handle.generation())
    }

    /// Current handle for whatever occupies `slot`.
    pub fn handle_at(&self, slot: usize) -> Option<ConnHandle> {
        self.connections
            .get(slot)
            .map(|conn| ConnHandle::new(slot, conn.generation))
    }

    pub fn remove(&mut self, handle: ConnHandle) -> Option<Connection<S>> {
        self.get_mut(handle)?;
        Some(self.connections.remove(handle.slot()))
    }

    /// Handles of connections with bytes waiting to be written.
    pub fn pending_writes(&self) -> Vec<ConnHandle> {
        self.connections
            .iter()
            .filter(|(_, conn)| !conn.outgoing.is_empty())
            .map(|(slot, conn)| ConnHandle::new(slot, conn.generation))
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
