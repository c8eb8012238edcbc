//! Socket runtime for the echo server.
//!
//! - `mio`: readiness-based transport (epoll on Linux, kqueue on macOS)
//!   driven from a dedicated I/O thread
//! - `ConnectionTable`: generation-tagged connection registry
//!
//! The server itself runs on the calling thread and consumes the
//! transport's notification queue one event at a time.

mod connection;
pub mod mio;

use crate::config::Config;
use crate::link::Link;
use crate::server::{EchoServer, Responder};
use crate::transport::{Notification, Transport};
use std::sync::mpsc::Receiver;
use tracing::{debug, info, warn};

/// Bring the server up on the configured address and serve until the
/// transport stops.
pub fn run<L: Link + ?Sized>(
    config: &Config,
    link: &L,
) -> Result<(), Box<dyn std::error::Error>> {
    let (transport, driver, notifications) = mio::open(config.host)?;

    let mut server = EchoServer::new(transport);
    server.bring_up(link, config.port, &config.readiness)?;

    let io = driver.spawn()?;
    info!("Server setup complete");

    serve(&mut server, notifications);
    drop(server);

    match io.join() {
        Ok(result) => Ok(result?),
        Err(_) => Err("I/O driver panicked".into()),
    }
}

/// Dispatch notifications in arrival order until the queue closes. A server
/// that was never brought up is not driven.
pub fn serve<T, R, const N: usize>(
    server: &mut EchoServer<T, R, N>,
    notifications: Receiver<Notification>,
) where
    T: Transport,
    R: Responder,
{
    let Some(addr) = server.local_addr() else {
        warn!("Server is not listening, nothing to serve");
        return;
    };
    debug!(addr = %addr, "Serving notifications");

    for notification in notifications {
        server.dispatch(notification);
    }
    debug!("Notification queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{HostLink, RetryPolicy};
    use crate::server::BUFFER_CAPACITY;
    use std::io::{ErrorKind, Read, Write};
    use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpStream};
    use std::thread;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Start a server on an ephemeral loopback port.
    fn start() -> SocketAddr {
        let host = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let (transport, driver, notifications) = super::mio::open(host).unwrap();
        let mut server = EchoServer::new(transport);
        let addr = server
            .bring_up(&HostLink::new(host), 0, &RetryPolicy::default())
            .unwrap();
        driver.spawn().unwrap();
        thread::spawn(move || serve(&mut server, notifications));
        addr
    }

    fn client(addr: SocketAddr) -> TcpStream {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(TIMEOUT)).unwrap();
        stream
    }

    /// Send `payload` and read exactly `expect` bytes back.
    fn round_trip(
        stream: &mut TcpStream,
        payload: &[u8],
        expect: usize,
    ) -> std::io::Result<Vec<u8>> {
        stream.write_all(payload)?;
        let mut buf = vec![0u8; expect];
        stream.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Connect and ping until served; the previous client's teardown may
    /// still be in flight.
    fn served_client(addr: SocketAddr) -> TcpStream {
        for _ in 0..50 {
            let mut stream = client(addr);
            if let Ok(reply) = round_trip(&mut stream, b"ping", 4) {
                assert_eq!(reply, b"ping");
                return stream;
            }
            thread::sleep(Duration::from_millis(20));
        }
        panic!("server never accepted a client");
    }

    fn assert_refused(stream: &mut TcpStream) {
        let mut buf = [0u8; 1];
        match stream.read(&mut buf) {
            Ok(0) => {}
            Err(e) if e.kind() == ErrorKind::ConnectionReset => {}
            other => panic!("expected refused connection, got {other:?}"),
        }
    }

    #[test]
    fn test_ping_over_loopback() {
        let addr = start();
        let mut stream = served_client(addr);

        let reply = round_trip(&mut stream, b"hello world", 11).unwrap();
        assert_eq!(reply, b"hello world");
    }

    #[test]
    fn test_second_client_refused_over_loopback() {
        let addr = start();
        let mut a = served_client(addr);

        let mut b = client(addr);
        b.write_all(b"ping").unwrap();
        assert_refused(&mut b);

        // A keeps its session
        let reply = round_trip(&mut a, b"still here", 10).unwrap();
        assert_eq!(reply, b"still here");
    }

    #[test]
    fn test_reconnect_after_peer_close() {
        let addr = start();
        let a = served_client(addr);
        drop(a);

        let mut b = served_client(addr);
        let reply = round_trip(&mut b, b"again", 5).unwrap();
        assert_eq!(reply, b"again");
    }

    #[test]
    fn test_oversize_payload_is_truncated_on_the_wire() {
        let addr = start();
        let mut stream = served_client(addr);

        let payload: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let reply = round_trip(&mut stream, &payload, BUFFER_CAPACITY).unwrap();
        assert_eq!(reply, &payload[..BUFFER_CAPACITY]);

        // Nothing past the first BUFFER_CAPACITY bytes comes back
        stream
            .set_read_timeout(Some(Duration::from_millis(300)))
            .unwrap();
        let mut rest = [0u8; 1];
        match stream.read(&mut rest) {
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            other => panic!("expected no further bytes, got {other:?}"),
        }
    }

    #[test]
    fn test_half_close_still_receives_echo() {
        let addr = start();
        let mut stream = served_client(addr);

        stream.write_all(b"last words").unwrap();
        stream.shutdown(Shutdown::Write).unwrap();

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).unwrap();
        assert_eq!(reply, b"last words");
    }

    #[test]
    fn test_reconnect_after_half_close() {
        let addr = start();
        let mut a = served_client(addr);
        a.shutdown(Shutdown::Write).unwrap();
        let mut rest = Vec::new();
        a.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());

        let mut b = served_client(addr);
        let reply = round_trip(&mut b, b"next", 4).unwrap();
        assert_eq!(reply, b"next");
    }
}
