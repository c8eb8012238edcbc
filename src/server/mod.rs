//! Single-client echo server core.
//!
//! `EchoServer` owns the connection record and reacts to transport
//! notifications. Every handler runs to completion without blocking:
//!
//! - accept: install the client, or refuse it if one is already served
//! - receive: copy the span in, build a response, hand it to the send path
//! - error: clear the client and go back to awaiting a new one
//!
//! The listening endpoint outlives every client and is never closed by a
//! connection fault.

mod buffer;
mod responder;
mod state;

pub use buffer::{FixedBuffer, BUFFER_CAPACITY};
pub use responder::{Echo, Responder};
pub use state::{Phase, ServerState};

use crate::error::{BringUpError, SendError, TransportError};
use crate::link::{Link, RetryPolicy};
use crate::transport::{ConnHandle, Notification, SendQueue, Transport};
use bytes::Bytes;
use std::net::SocketAddr;
use tracing::{debug, error, info, trace, warn};

/// Well-known port the server listens on.
pub const DEFAULT_PORT: u16 = 4242;

/// Pending peers the listener may hold beyond the active client.
pub const LISTEN_BACKLOG: u32 = 1;

/// Result of an accept notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    /// The peer is now the active client.
    Connected(ConnHandle),
    /// Another client is active; the peer was closed.
    Refused,
    /// The notification carried a failure; nothing changed.
    Dropped,
}

/// Result of a receive notification that did not fail to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// The handle is not the active client.
    Stale,
    /// Empty span: the peer shut down its side.
    PeerShutdown,
    /// A response was handed to the send path.
    Responded(Sent),
}

/// Result of a send request that the transport did not reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sent {
    /// `len` bytes were queued for transmission.
    Queued(usize),
    /// The target is not the active client; nothing was sent.
    Skipped,
}

/// Result of an error notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// The server caused this itself; not reported as a fault.
    Suppressed,
    /// The active client was cleared.
    Cleared,
    /// The handle is not the active client.
    Stale,
}

pub struct EchoServer<T, R = Echo, const N: usize = BUFFER_CAPACITY> {
    state: ServerState<N>,
    transport: T,
    responder: R,
}

impl<T: Transport> EchoServer<T> {
    /// Create an echo server with the default buffer capacity.
    pub fn new(transport: T) -> Self {
        Self::with_responder(transport, Echo)
    }
}

impl<T: Transport, R: Responder, const N: usize> EchoServer<T, R, N> {
    pub fn with_responder(transport: T, responder: R) -> Self {
        Self {
            state: ServerState::new(),
            transport,
            responder,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &ServerState<N> {
        &self.state
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Address of the listening endpoint, once bring-up succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.listening()
    }

    /// Wait (bounded) for the link, then bind `port` and listen.
    ///
    /// On failure the server stays inert and must not be driven.
    pub fn bring_up<L: Link + ?Sized>(
        &mut self,
        link: &L,
        port: u16,
        readiness: &RetryPolicy,
    ) -> Result<SocketAddr, BringUpError> {
        readiness
            .run(|attempt| {
                let up = link.is_up();
                if !up {
                    warn!(attempt, "Network link not ready");
                }
                up
            })
            .map_err(|attempts| {
                error!(attempts, "Network link unavailable");
                BringUpError::LinkUnavailable { attempts }
            })?;

        self.transport.bind(port).map_err(|e| {
            error!(port, error = %e, "Failed to bind to port");
            BringUpError::Bind(e)
        })?;

        let addr = self.transport.listen(LISTEN_BACKLOG).map_err(|e| {
            error!(port, error = %e, "Failed to listen");
            BringUpError::Listen(e)
        })?;

        self.state.set_listening(addr);
        info!(addr = %addr, "Starting server");
        Ok(addr)
    }

    /// Route one notification to its handler.
    pub fn dispatch(&mut self, notification: Notification) {
        match notification {
            Notification::Accept { conn, status } => {
                self.on_accept(conn, status);
            }
            Notification::Receive { conn, span } => {
                // Send failures are already logged and leave the connection open
                let _ = self.on_receive(conn, span);
            }
            Notification::Error { conn, code } => {
                self.on_error(conn, code);
            }
        }
    }

    /// Handle a connection request.
    pub fn on_accept(
        &mut self,
        conn: Option<ConnHandle>,
        status: Result<(), TransportError>,
    ) -> Accepted {
        let conn = match (conn, status) {
            (Some(conn), Ok(())) => conn,
            (conn, status) => {
                let code = status.err();
                warn!(error = ?code, "Failure in accept");
                if let Some(conn) = conn {
                    self.transport.close(conn);
                }
                return Accepted::Dropped;
            }
        };

        if self.state.phase() == Phase::Inert {
            warn!(conn = %conn, "Connection request before bring-up");
            self.transport.close(conn);
            return Accepted::Dropped;
        }

        if let Some(active) = self.state.active() {
            info!(conn = %conn, active = %active, "Refusing second client");
            self.transport.close(conn);
            return Accepted::Refused;
        }

        if let Err(e) = self.transport.attach(conn) {
            warn!(conn = %conn, error = %e, "Failure in accept");
            self.transport.close(conn);
            return Accepted::Dropped;
        }

        self.state.connect(conn);
        info!(conn = %conn, "Client connected");
        Accepted::Connected(conn)
    }

    /// Handle a delivered span. The span is released before returning,
    /// whatever the send outcome.
    pub fn on_receive(&mut self, conn: ConnHandle, span: Bytes) -> Result<Received, SendError> {
        if !self.state.is_active(conn) {
            debug!(conn = %conn, len = span.len(), "Ignoring data for stale connection");
            return Ok(Received::Stale);
        }

        if span.is_empty() {
            // Responses to earlier spans are already queued
            debug!(conn = %conn, "Peer shut down");
            self.transport.finish(conn);
            return Ok(Received::PeerShutdown);
        }

        let state = &mut self.state;
        let active = state.active();
        let copied = state.inbound.fill(&span);
        if copied < span.len() {
            debug!(conn = %conn, len = span.len(), kept = copied, "Truncated inbound payload");
        }
        drop(span);
        trace!(conn = %conn, len = copied, "Buffered payload");

        let response = self.responder.respond(state.inbound.as_slice());
        send_through(&self.transport, &mut state.outbound, active, conn, &response)
            .map(Received::Responded)
    }

    /// Send `payload` to `conn` if it is the active client.
    #[allow(dead_code)] // The receive path sends through `send_through` directly
    pub fn send(&mut self, conn: ConnHandle, payload: &[u8]) -> Result<Sent, SendError> {
        let active = self.state.active();
        send_through(&self.transport, &mut self.state.outbound, active, conn, payload)
    }

    /// Handle a connection fault or closure.
    pub fn on_error(&mut self, conn: ConnHandle, code: TransportError) -> Teardown {
        if code.is_self_inflicted() {
            debug!(conn = %conn, "Connection aborted by server");
            if self.state.is_active(conn) {
                self.state.disconnect();
            }
            return Teardown::Suppressed;
        }

        if !self.state.is_active(conn) {
            debug!(conn = %conn, error = %code, "Error on inactive connection");
            return Teardown::Stale;
        }

        match code {
            TransportError::Closed => info!(conn = %conn, "Client disconnected"),
            _ => warn!(conn = %conn, error = %code, "Error code"),
        }
        self.state.disconnect();
        Teardown::Cleared
    }
}

/// Copy `payload` into `outbound` (truncating at capacity) and queue it on
/// `conn` inside the transport's critical section.
fn send_through<T: Transport, const N: usize>(
    transport: &T,
    outbound: &mut FixedBuffer<N>,
    active: Option<ConnHandle>,
    conn: ConnHandle,
    payload: &[u8],
) -> Result<Sent, SendError> {
    if active != Some(conn) {
        debug!(conn = %conn, "Skipping send on inactive connection");
        return Ok(Sent::Skipped);
    }

    let len = outbound.fill(payload);
    if len < payload.len() {
        debug!(conn = %conn, len = payload.len(), sent = len, "Truncated response");
    }

    let result = {
        let mut section = transport.enter();
        section.write(conn, outbound.as_slice())
    };

    match result {
        Ok(()) => {
            trace!(conn = %conn, len, "Queued response");
            Ok(Sent::Queued(len))
        }
        Err(e) => {
            warn!(conn = %conn, error = %e, "Failed to write data");
            Err(SendError::Failed(e))
        }
    }
}
