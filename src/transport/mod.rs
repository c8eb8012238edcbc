//! Boundary between the server core and the packet transport.
//!
//! The transport owns sockets and delivers `Notification`s; the server only
//! ever calls back into it through the `Transport` trait. Sends go through a
//! `SendQueue` obtained from `Transport::enter`, which is the critical section
//! guarding the transport's internal state for the duration of one write.

#[cfg(test)]
pub mod mock;

use crate::error::TransportError;
use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;

/// Opaque reference to one accepted transport session.
///
/// Carries a generation so a handle kept past its connection's teardown never
/// aliases a later connection that reuses the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnHandle {
    slot: usize,
    generation: u64,
}

impl ConnHandle {
    pub(crate) fn new(slot: usize, generation: u64) -> Self {
        Self { slot, generation }
    }

    /// Slot index inside the transport's connection table.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Display for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.slot, self.generation)
    }
}

/// Asynchronous event delivered by the transport to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A peer opened a connection. `conn` is `None` when the transport could
    /// not produce a usable endpoint.
    Accept {
        conn: Option<ConnHandle>,
        status: Result<(), TransportError>,
    },
    /// Bytes arrived on a connection. An empty span means the peer shut down
    /// its sending side.
    Receive { conn: ConnHandle, span: Bytes },
    /// The connection failed or was closed.
    Error {
        conn: ConnHandle,
        code: TransportError,
    },
}

/// Critical section over the transport's send state.
///
/// Dropping the value leaves the section.
pub trait SendQueue {
    /// Enqueue `bytes` for transmission on `conn`. The transport copies the
    /// bytes; the caller may reuse its buffer as soon as this returns.
    fn write(&mut self, conn: ConnHandle, bytes: &[u8]) -> Result<(), TransportError>;
}

/// Operations the server core may request from the transport.
pub trait Transport {
    type Section<'a>: SendQueue
    where
        Self: 'a;

    /// Bind the listening endpoint to `port`.
    fn bind(&self, port: u16) -> Result<(), TransportError>;

    /// Start listening with at most `backlog` pending peers.
    fn listen(&self, backlog: u32) -> Result<SocketAddr, TransportError>;

    /// Begin delivering receive and error notifications for `conn`.
    fn attach(&self, conn: ConnHandle) -> Result<(), TransportError>;

    /// Close `conn`. Unknown or stale handles are ignored.
    fn close(&self, conn: ConnHandle);

    /// The peer on `conn` has stopped sending. Close it once every byte
    /// already queued is written, then report `Error(Closed)`. Unknown or
    /// stale handles are ignored.
    fn finish(&self, conn: ConnHandle);

    /// Enter the critical section guarding the send queues.
    fn enter(&self) -> Self::Section<'_>;
}
