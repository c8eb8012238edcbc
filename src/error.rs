//! Error types shared by the server core, the transport and the link.
//!
//! Per-connection and per-send faults are recovered locally by the server;
//! only `BringUpError` is fatal.

use std::io;

/// Status code reported by the transport, either as the result of a send
/// request or as the payload of an error notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The handle does not name an open connection (closed or stale).
    NotConnected,
    /// The connection's send queue cannot take more bytes right now.
    QueueFull,
    /// The peer closed the connection in an orderly way.
    Closed,
    /// The peer reset the connection.
    Reset,
    /// The connection was torn down at the server's own request.
    Aborted,
    /// Any other socket-level failure.
    Io(io::ErrorKind),
}

impl TransportError {
    /// Classify a socket error into a transport status.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => TransportError::Reset,
            io::ErrorKind::NotConnected => TransportError::NotConnected,
            kind => TransportError::Io(kind),
        }
    }

    /// True for the abort the server causes itself by closing a connection.
    pub fn is_self_inflicted(&self) -> bool {
        matches!(self, TransportError::Aborted)
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::NotConnected => write!(f, "connection is not open"),
            TransportError::QueueFull => write!(f, "send queue full"),
            TransportError::Closed => write!(f, "connection closed by peer"),
            TransportError::Reset => write!(f, "connection reset by peer"),
            TransportError::Aborted => write!(f, "connection aborted locally"),
            TransportError::Io(kind) => write!(f, "socket error: {kind}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        TransportError::from_io(&err)
    }
}

/// Fatal failure while bringing the server up. A server that returned one
/// of these is inert and must not be driven.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BringUpError {
    Bind(TransportError),
    Listen(TransportError),
    LinkUnavailable { attempts: u32 },
}

impl std::fmt::Display for BringUpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BringUpError::Bind(e) => write!(f, "Failed to bind listening endpoint: {e}"),
            BringUpError::Listen(e) => write!(f, "Failed to listen: {e}"),
            BringUpError::LinkUnavailable { attempts } => {
                write!(f, "Network link not ready after {attempts} attempts")
            }
        }
    }
}

impl std::error::Error for BringUpError {}

/// A send the transport refused. The connection stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    Failed(TransportError),
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::Failed(e) => write!(f, "Failed to write data: {e}"),
        }
    }
}

impl std::error::Error for SendError {}

/// Network-interface association failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Association never succeeded within the retry budget.
    AssociationFailed { attempts: u32 },
    /// The interface has no usable address.
    AddressUnavailable(String),
}

impl std::fmt::Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkError::AssociationFailed { attempts } => {
                write!(f, "Failed to connect to network after {attempts} attempts")
            }
            LinkError::AddressUnavailable(reason) => {
                write!(f, "Network address unavailable: {reason}")
            }
        }
    }
}

impl std::error::Error for LinkError {}
