//! The server's connection record.
//!
//! One instance lives for the whole process. It names the listening
//! endpoint, the single client (if any) and owns both payload buffers.

use super::buffer::FixedBuffer;
use crate::transport::ConnHandle;
use std::net::SocketAddr;

/// Where the server is in its client lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Bring-up has not succeeded (or failed); nothing may be served.
    Inert,
    /// Listening with no client attached.
    Awaiting,
    /// Serving exactly one client.
    Connected(ConnHandle),
}

#[derive(Debug)]
pub struct ServerState<const N: usize> {
    /// Bound, listening endpoint. Set once by bring-up.
    listening: Option<SocketAddr>,
    /// The single accepted client.
    active: Option<ConnHandle>,
    pub(super) outbound: FixedBuffer<N>,
    pub(super) inbound: FixedBuffer<N>,
}

impl<const N: usize> ServerState<N> {
    pub fn new() -> Self {
        Self {
            listening: None,
            active: None,
            outbound: FixedBuffer::new(),
            inbound: FixedBuffer::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        match (self.listening, self.active) {
            (None, _) => Phase::Inert,
            (Some(_), None) => Phase::Awaiting,
            (Some(_), Some(conn)) => Phase::Connected(conn),
        }
    }

    pub fn listening(&self) -> Option<SocketAddr> {
        self.listening
    }

    /// Record the listening endpoint. It is never replaced once set.
    pub fn set_listening(&mut self, addr: SocketAddr) {
        debug_assert!(self.listening.is_none(), "listening endpoint replaced");
        self.listening = Some(addr);
    }

    pub fn active(&self) -> Option<ConnHandle> {
        self.active
    }

    /// True if `conn` is the client currently being served.
    pub fn is_active(&self, conn: ConnHandle) -> bool {
        self.active == Some(conn)
    }

    /// Install `conn` as the client. Returns `false` and leaves the record
    /// untouched if a client is already present.
    pub fn connect(&mut self, conn: ConnHandle) -> bool {
        if self.active.is_some() {
            return false;
        }
        self.active = Some(conn);
        true
    }

    /// Drop the client and all session data, returning to the awaiting state.
    pub fn disconnect(&mut self) -> Option<ConnHandle> {
        self.inbound.clear();
        self.outbound.clear();
        self.active.take()
    }

    #[cfg(test)]
    pub fn inbound(&self) -> &[u8] {
        self.inbound.as_slice()
    }

    #[cfg(test)]
    pub fn outbound(&self) -> &[u8] {
        self.outbound.as_slice()
    }
}

impl<const N: usize> Default for ServerState<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_phase_transitions() {
        let mut state = ServerState::<64>::new();
        assert_eq!(state.phase(), Phase::Inert);

        state.set_listening(SocketAddr::from((Ipv4Addr::LOCALHOST, 4242)));
        assert_eq!(state.phase(), Phase::Awaiting);

        let conn = ConnHandle::new(0, 1);
        assert!(state.connect(conn));
        assert_eq!(state.phase(), Phase::Connected(conn));

        assert_eq!(state.disconnect(), Some(conn));
        assert_eq!(state.phase(), Phase::Awaiting);
    }

    #[test]
    fn test_single_client() {
        let mut state = ServerState::<64>::new();
        let a = ConnHandle::new(0, 1);
        let b = ConnHandle::new(1, 2);

        assert!(state.connect(a));
        assert!(!state.connect(b));
        assert!(state.is_active(a));
        assert!(!state.is_active(b));
    }

    #[test]
    fn test_disconnect_resets_buffers() {
        let mut state = ServerState::<64>::new();
        state.connect(ConnHandle::new(0, 1));
        state.inbound.fill(b"abc");
        state.outbound.fill(b"abc");

        state.disconnect();
        assert!(state.inbound().is_empty());
        assert!(state.outbound().is_empty());
        assert_eq!(state.disconnect(), None);
    }
}
