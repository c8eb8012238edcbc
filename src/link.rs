//! Network-interface collaborator.
//!
//! The server never drives the radio itself. It needs the link associated
//! and addressable before bring-up, and it asks `is_up` a bounded number of
//! times in case the link is still settling.

use crate::error::LinkError;
use std::net::{IpAddr, UdpSocket};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Credentials handed to the link layer during association.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub ssid: Option<String>,
    pub passphrase: Option<String>,
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Per-attempt association timeout.
    pub timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay to wait after the failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds or the attempts run out. Returns the number
    /// of attempts made on failure.
    pub fn run<F>(&self, mut op: F) -> Result<u32, u32>
    where
        F: FnMut(u32) -> bool,
    {
        let attempts = self.attempts.max(1);
        for attempt in 1..=attempts {
            if op(attempt) {
                return Ok(attempt);
            }
            if attempt < attempts {
                thread::sleep(self.backoff(attempt));
            }
        }
        Err(attempts)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            timeout: Duration::from_millis(30_000),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(8_000),
        }
    }
}

/// A network interface that can be associated and queried.
pub trait Link {
    /// Try once to associate, waiting at most `timeout`.
    fn connect(&mut self, credentials: &Credentials, timeout: Duration) -> Result<(), LinkError>;

    /// True while the interface is associated and addressable.
    fn is_up(&self) -> bool;
}

/// Associate `link`, retrying per `policy`.
pub fn associate<L: Link + ?Sized>(
    link: &mut L,
    credentials: &Credentials,
    policy: &RetryPolicy,
) -> Result<(), LinkError> {
    info!(ssid = ?credentials.ssid, "Connecting to network");
    let result = policy.run(|attempt| match link.connect(credentials, policy.timeout) {
        Ok(()) => true,
        Err(e) => {
            warn!(attempt, error = %e, "Failed to connect");
            false
        }
    });

    match result {
        Ok(attempts) => {
            info!(attempts, "Network connected");
            Ok(())
        }
        Err(attempts) => Err(LinkError::AssociationFailed { attempts }),
    }
}

/// Link on a general-purpose host: association is already handled by the
/// operating system, so the link counts as up when the bind address can be
/// assigned on this machine.
#[derive(Debug, Clone)]
pub struct HostLink {
    addr: IpAddr,
}

impl HostLink {
    pub fn new(addr: IpAddr) -> Self {
        Self { addr }
    }

    fn probe(&self) -> Result<(), LinkError> {
        UdpSocket::bind((self.addr, 0))
            .map(|_| ())
            .map_err(|e| LinkError::AddressUnavailable(format!("{}: {e}", self.addr)))
    }
}

impl Link for HostLink {
    fn connect(&mut self, credentials: &Credentials, _timeout: Duration) -> Result<(), LinkError> {
        if credentials.ssid.is_some() {
            let secured = credentials.passphrase.is_some();
            debug!(secured, "Host link ignores association credentials");
        }
        self.probe()
    }

    fn is_up(&self) -> bool {
        self.probe().is_ok()
    }
}
