//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready, then we
//! perform non-blocking read/write syscalls and turn the results into
//! `Notification`s for the server task. Uses epoll on Linux, kqueue on macOS.
//!
//! The loop only holds the shared lock while servicing a batch of events,
//! never while blocked in `poll`.

use crate::error::TransportError;
use crate::runtime::connection::ConnectionTable;
use crate::transport::{ConnHandle, Notification};
use bytes::{Buf, Bytes, BytesMut};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Poll, Registry, Token};
use socket2::Socket;
use std::io::{self, Read, Write};
use std::net::IpAddr;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

pub(super) const LISTENER_TOKEN: Token = Token(usize::MAX);
pub(super) const WAKER_TOKEN: Token = Token(usize::MAX - 1);

/// Largest span delivered per receive notification. Larger than the
/// server's buffers, so an oversize segment arrives whole and is truncated
/// there.
const READ_CHUNK: usize = 64 * 1024;

/// Readiness events handled per poll.
const EVENT_CAPACITY: usize = 64;

/// Transport state shared between the I/O thread and the server task.
pub(super) struct Shared {
    pub(super) host: IpAddr,
    pub(super) registry: Registry,
    /// Bound but not yet listening.
    pub(super) bound: Option<Socket>,
    pub(super) listener: Option<TcpListener>,
    pub(super) connections: ConnectionTable<TcpStream>,
    /// Cleared when the I/O thread exits, which ends the server's queue.
    pub(super) notify: Option<Sender<Notification>>,
    pub(super) stopping: bool,
}

pub(super) fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// Queue a notification. Returns `false` once the server task is gone.
    pub(super) fn emit(&self, notification: Notification) -> bool {
        match &self.notify {
            Some(tx) => tx.send(notification).is_ok(),
            None => false,
        }
    }

    fn accept_pending(&mut self) -> bool {
        let Some(listener) = self.listener.as_ref() else {
            return true;
        };

        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    let Some(conn) = self.connections.insert(stream, peer) else {
                        warn!(peer = %peer, "Connection limit reached");
                        continue;
                    };
                    debug!(conn = %conn, peer = %peer, "Accepted connection");
                    if !self.emit(Notification::Accept {
                        conn: Some(conn),
                        status: Ok(()),
                    }) {
                        return false;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Accept error");
                    return self.emit(Notification::Accept {
                        conn: None,
                        status: Err(TransportError::from_io(&e)),
                    });
                }
            }
        }
    }

    fn service(&mut self, slot: usize, readable: bool, writable: bool) -> bool {
        let Some(conn) = self.connections.handle_at(slot) else {
            return true;
        };

        if writable && !self.progress(conn) {
            return false;
        }

        if readable {
            return self.drain(conn);
        }

        true
    }

    /// Read until the socket would block, one notification per chunk.
    fn drain(&mut self, handle: ConnHandle) -> bool {
        loop {
            let Some(conn) = self.connections.get_mut(handle) else {
                return true;
            };
            if conn.read_closed {
                return true;
            }

            let mut buf = BytesMut::zeroed(READ_CHUNK);
            match conn.stream.read(&mut buf) {
                Ok(0) => {
                    // Kept open until the server finishes it, so replies to
                    // spans still in the queue reach the peer
                    conn.read_closed = true;
                    debug!(conn = %handle, "Peer sent EOF");
                    return self.emit(Notification::Receive {
                        conn: handle,
                        span: Bytes::new(),
                    });
                }
                Ok(n) => {
                    buf.truncate(n);
                    trace!(conn = %handle, len = n, "Received");
                    if !self.emit(Notification::Receive {
                        conn: handle,
                        span: buf.freeze(),
                    }) {
                        return false;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return self.teardown(handle, TransportError::from_io(&e)),
            }
        }
    }

    /// Write queued bytes until the queue is empty or the socket would block.
    fn flush(&mut self, handle: ConnHandle) -> Result<(), TransportError> {
        let Some(conn) = self.connections.get_mut(handle) else {
            return Ok(());
        };

        while !conn.outgoing.is_empty() {
            match conn.stream.write(&conn.outgoing) {
                Ok(0) => return Err(TransportError::Io(io::ErrorKind::WriteZero)),
                Ok(n) => {
                    trace!(conn = %handle, len = n, "Sent");
                    conn.outgoing.advance(n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::from_io(&e)),
            }
        }
        Ok(())
    }

    /// Flush `handle`, then close it if it is finishing and nothing is left.
    fn progress(&mut self, handle: ConnHandle) -> bool {
        if let Err(code) = self.flush(handle) {
            return self.teardown(handle, code);
        }

        let done = self
            .connections
            .get_mut(handle)
            .is_some_and(|conn| conn.closing && conn.outgoing.is_empty());
        if done {
            return self.teardown(handle, TransportError::Closed);
        }
        true
    }

    fn flush_all(&mut self) -> bool {
        for conn in self.connections.pending_writes() {
            if !self.progress(conn) {
                return false;
            }
        }
        true
    }

    /// Close `handle` once its send queue drains.
    pub(super) fn finish(&mut self, handle: ConnHandle) -> bool {
        let Some(conn) = self.connections.get_mut(handle) else {
            return true;
        };
        conn.closing = true;
        if conn.outgoing.is_empty() {
            return self.teardown(handle, TransportError::Closed);
        }
        true
    }

    /// Remove `handle` and report `code` to the server.
    pub(super) fn teardown(&mut self, handle: ConnHandle, code: TransportError) -> bool {
        let Some(mut conn) = self.connections.remove(handle) else {
            return true;
        };
        if conn.attached {
            let _ = self.registry.deregister(&mut conn.stream);
        }
        debug!(conn = %handle, peer = %conn.peer, reason = %code, "Connection closed");
        drop(conn);

        self.emit(Notification::Error { conn: handle, code })
    }
}

/// Owns the poll instance and runs the readiness loop.
pub struct Driver {
    pub(super) poll: Poll,
    pub(super) shared: Arc<Mutex<Shared>>,
}

impl Driver {
    /// Run the loop on a dedicated thread.
    pub fn spawn(self) -> io::Result<JoinHandle<io::Result<()>>> {
        thread::Builder::new()
            .name("io-driver".to_string())
            .spawn(move || self.run())
    }

    /// Run until the server task goes away or polling fails.
    pub fn run(mut self) -> io::Result<()> {
        let result = self.poll_loop();
        if let Err(ref e) = result {
            error!(error = %e, "I/O driver failed");
        }
        // Dropping the sender ends the server's notification queue
        lock(&self.shared).notify = None;
        result
    }

    fn poll_loop(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENT_CAPACITY);

        loop {
            match self.poll.poll(&mut events, None) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            let mut shared = lock(&self.shared);
            for event in events.iter() {
                let open = match event.token() {
                    LISTENER_TOKEN => shared.accept_pending(),
                    WAKER_TOKEN => shared.flush_all(),
                    Token(slot) => shared.service(
                        slot,
                        event.is_readable() || event.is_read_closed() || event.is_error(),
                        event.is_writable(),
                    ),
                };
                if !open {
                    info!("Server task gone, stopping I/O driver");
                    return Ok(());
                }
            }

            if shared.stopping {
                debug!("Transport dropped, stopping I/O driver");
                return Ok(());
            }
        }
    }
}
