//! In-memory transport for exercising the server core without sockets.

use super::{ConnHandle, SendQueue, Transport};
use crate::error::TransportError;
use std::cell::{RefCell, RefMut};
use std::net::{Ipv4Addr, SocketAddr};

/// Everything the server asked the transport to do.
#[derive(Debug, Default)]
pub struct MockState {
    pub bound: Option<u16>,
    pub backlog: Option<u32>,
    pub attached: Vec<ConnHandle>,
    pub closed: Vec<ConnHandle>,
    pub finished: Vec<ConnHandle>,
    pub sent: Vec<(ConnHandle, Vec<u8>)>,
    pub fail_bind: Option<TransportError>,
    pub fail_listen: Option<TransportError>,
    pub fail_attach: Option<TransportError>,
    pub fail_send: Option<TransportError>,
    /// Sections currently entered and not yet dropped.
    pub open_sections: usize,
    /// Total sections ever entered.
    pub entered_sections: usize,
}

#[derive(Debug, Default)]
pub struct MockTransport {
    state: RefCell<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RefMut<'_, MockState> {
        self.state.borrow_mut()
    }

    /// Payloads sent so far, in order.
    pub fn sent(&self) -> Vec<(ConnHandle, Vec<u8>)> {
        self.state.borrow().sent.clone()
    }

    pub fn closed(&self) -> Vec<ConnHandle> {
        self.state.borrow().closed.clone()
    }
}

pub struct MockSection<'a> {
    state: RefMut<'a, MockState>,
}

impl SendQueue for MockSection<'_> {
    fn write(&mut self, conn: ConnHandle, bytes: &[u8]) -> Result<(), TransportError> {
        if let Some(err) = self.state.fail_send {
            return Err(err);
        }
        self.state.sent.push((conn, bytes.to_vec()));
        Ok(())
    }
}

impl Drop for MockSection<'_> {
    fn drop(&mut self) {
        self.state.open_sections -= 1;
    }
}

impl Transport for MockTransport {
    type Section<'a> = MockSection<'a>;

    fn bind(&self, port: u16) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        if let Some(err) = state.fail_bind {
            return Err(err);
        }
        state.bound = Some(port);
        Ok(())
    }

    fn listen(&self, backlog: u32) -> Result<SocketAddr, TransportError> {
        let mut state = self.state.borrow_mut();
        if let Some(err) = state.fail_listen {
            return Err(err);
        }
        let port = state.bound.ok_or(TransportError::NotConnected)?;
        state.backlog = Some(backlog);
        Ok(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
    }

    fn attach(&self, conn: ConnHandle) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        if let Some(err) = state.fail_attach {
            return Err(err);
        }
        state.attached.push(conn);
        Ok(())
    }

    fn close(&self, conn: ConnHandle) {
        self.state.borrow_mut().closed.push(conn);
    }

    fn finish(&self, conn: ConnHandle) {
        self.state.borrow_mut().finished.push(conn);
    }

    fn enter(&self) -> MockSection<'_> {
        let mut state = self.state.borrow_mut();
        state.open_sections += 1;
        state.entered_sections += 1;
        MockSection { state }
    }
}
