//! mio-based socket transport.
//!
//! `open` splits the transport in two: the `MioTransport` handle the server
//! task calls into, and the `Driver` that owns the poll instance and runs on
//! its own thread. Notifications flow from the driver to the server over a
//! channel; sends flow back through the shared, mutex-guarded state.

mod event_loop;

pub use event_loop::Driver;

use crate::error::TransportError;
use crate::runtime::connection::ConnectionTable;
use crate::transport::{ConnHandle, Notification, SendQueue, Transport};
use event_loop::{lock, Shared, LISTENER_TOKEN, WAKER_TOKEN};
use mio::net::TcpListener;
use mio::{Interest, Poll, Token, Waker};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Peers that may be accepted but not yet attached or refused.
const MAX_CONNECTIONS: usize = 4;

/// Bytes a connection may have queued before sends are refused.
const MAX_PENDING_SEND: usize = 64 * 1024;

/// Create a transport bound to `host`, its driver, and the notification queue.
pub fn open(host: IpAddr) -> io::Result<(MioTransport, Driver, Receiver<Notification>)> {
    let poll = Poll::new()?;
    let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
    let (tx, rx) = mpsc::channel();

    let shared = Arc::new(Mutex::new(Shared {
        host,
        registry: poll.registry().try_clone()?,
        bound: None,
        listener: None,
        connections: ConnectionTable::new(MAX_CONNECTIONS),
        notify: Some(tx),
        stopping: false,
    }));

    let transport = MioTransport {
        shared: Arc::clone(&shared),
        waker,
    };
    let driver = Driver { poll, shared };

    Ok((transport, driver, rx))
}

/// The server task's side of the socket transport.
pub struct MioTransport {
    shared: Arc<Mutex<Shared>>,
    waker: Arc<Waker>,
}

/// Critical section over the shared transport state. Holds the lock until
/// dropped.
pub struct MioSection<'a> {
    shared: MutexGuard<'a, Shared>,
    waker: &'a Waker,
}

impl SendQueue for MioSection<'_> {
    fn write(&mut self, conn: ConnHandle, bytes: &[u8]) -> Result<(), TransportError> {
        let connection = self
            .shared
            .connections
            .get_mut(conn)
            .ok_or(TransportError::NotConnected)?;

        if connection.outgoing.len() + bytes.len() > MAX_PENDING_SEND {
            return Err(TransportError::QueueFull);
        }

        // The driver cannot flush before the lock is released
        self.waker.wake()?;
        connection.outgoing.extend_from_slice(bytes);
        Ok(())
    }
}

impl Transport for MioTransport {
    type Section<'a> = MioSection<'a>;

    fn bind(&self, port: u16) -> Result<(), TransportError> {
        let mut shared = lock(&self.shared);
        let addr = SocketAddr::new(shared.host, port);

        let socket = socket2::Socket::new(
            match addr {
                SocketAddr::V4(_) => socket2::Domain::IPV4,
                SocketAddr::V6(_) => socket2::Domain::IPV6,
            },
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;

        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;

        shared.bound = Some(socket);
        Ok(())
    }

    fn listen(&self, backlog: u32) -> Result<SocketAddr, TransportError> {
        let mut guard = lock(&self.shared);
        let shared = &mut *guard;

        // A socket that fails to listen is dropped, which closes it
        let socket = shared.bound.take().ok_or(TransportError::NotConnected)?;
        socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;

        let addr = socket
            .local_addr()?
            .as_socket()
            .ok_or(TransportError::Io(io::ErrorKind::AddrNotAvailable))?;

        let mut listener = TcpListener::from_std(socket.into());
        shared
            .registry
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        shared.listener = Some(listener);

        Ok(addr)
    }

    fn attach(&self, conn: ConnHandle) -> Result<(), TransportError> {
        let mut guard = lock(&self.shared);
        let shared = &mut *guard;

        let connection = shared
            .connections
            .get_mut(conn)
            .ok_or(TransportError::NotConnected)?;
        if !connection.attached {
            shared.registry.register(
                &mut connection.stream,
                Token(conn.slot()),
                Interest::READABLE | Interest::WRITABLE,
            )?;
            connection.attached = true;
        }
        Ok(())
    }

    fn close(&self, conn: ConnHandle) {
        debug!(conn = %conn, "Closing connection");
        lock(&self.shared).teardown(conn, TransportError::Aborted);
    }

    fn finish(&self, conn: ConnHandle) {
        debug!(conn = %conn, "Finishing connection");
        if !lock(&self.shared).finish(conn) {
            debug!(conn = %conn, "Server queue closed during finish");
        }
        let _ = self.waker.wake();
    }

    fn enter(&self) -> MioSection<'_> {
        MioSection {
            shared: lock(&self.shared),
            waker: &*self.waker,
        }
    }
}

impl Drop for MioTransport {
    fn drop(&mut self) {
        lock(&self.shared).stopping = true;
        let _ = self.waker.wake();
    }
}
