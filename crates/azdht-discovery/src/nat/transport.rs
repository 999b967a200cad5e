//! STUN Transport
//!
//! Runs a single STUN request/response exchange over UDP. The request is
//! retransmitted on an exponential schedule (`t = 2t + initial`) until a
//! valid answer arrives or the schedule passes its ceiling. Only one request
//! is ever in flight.
//!
//! Datagrams from unexpected sources are dropped without ending the current
//! wait. A datagram from the server carrying a different transaction ID ends
//! the exchange with [`StunError::TransactionMismatch`]: it is either stale
//! or spoofed, and retrying would not make it less so. When any sender is
//! accepted, foreign IDs from hosts other than the server are dropped like
//! any other stray datagram.

use super::stun::{HEADER_SIZE, StunError};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Receive buffer size
const MAX_RESPONSE_SIZE: usize = 512;

/// Default first retransmission interval
pub const DEFAULT_INITIAL_RTO: Duration = Duration::from_millis(100);

/// Default retransmission ceiling
pub const DEFAULT_MAX_RTO: Duration = Duration::from_millis(7900);

/// Retransmission policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitPolicy {
    /// First wait, also the additive term of each step
    pub initial: Duration,
    /// Largest wait allowed; the schedule ends once the next wait exceeds it
    pub ceiling: Duration,
}

impl RetransmitPolicy {
    /// Create a policy
    #[must_use]
    pub const fn new(initial: Duration, ceiling: Duration) -> Self {
        Self { initial, ceiling }
    }

    /// Iterate over the per-round waits
    #[must_use]
    pub fn schedule(&self) -> RetransmitSchedule {
        RetransmitSchedule {
            current: Duration::ZERO,
            initial: self.initial,
            ceiling: self.ceiling,
            done: self.initial.is_zero(),
        }
    }

    /// Upper bound on the time one exchange can block
    #[must_use]
    pub fn total(&self) -> Duration {
        self.schedule().sum()
    }
}

impl Default for RetransmitPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_RTO, DEFAULT_MAX_RTO)
    }
}

/// Per-round waits of a [`RetransmitPolicy`]: 100, 300, 700, ... ms by default
#[derive(Debug, Clone)]
pub struct RetransmitSchedule {
    current: Duration,
    initial: Duration,
    ceiling: Duration,
    done: bool,
}

impl Iterator for RetransmitSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.done {
            return None;
        }

        let next = self
            .current
            .checked_mul(2)
            .and_then(|doubled| doubled.checked_add(self.initial));

        match next {
            Some(next) if next <= self.ceiling => {
                self.current = next;
                Some(next)
            }
            _ => {
                self.done = true;
                None
            }
        }
    }
}

/// Which senders may answer a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFilter {
    /// Only this exact address and port
    Exact(SocketAddr),
    /// Any port on this host
    Host(IpAddr),
    /// Anyone (answers to CHANGE-REQUEST come from the alternate address)
    Any,
    /// Anyone, with this alternate host treated as part of the server
    AnyWithAlternate(IpAddr),
}

impl SourceFilter {
    /// Whether a datagram from `from` is acceptable
    #[must_use]
    pub fn accepts(&self, from: &SocketAddr) -> bool {
        match self {
            Self::Exact(addr) => addr == from,
            Self::Host(ip) => *ip == from.ip(),
            Self::Any | Self::AnyWithAlternate(_) => true,
        }
    }

    /// Whether a foreign transaction ID from `from` ends an exchange with
    /// `dest`
    ///
    /// Under the restrictive filters every accepted sender is the server.
    /// Otherwise only the server host and the named alternate count.
    #[must_use]
    pub fn binds_transaction(&self, from: &SocketAddr, dest: &SocketAddr) -> bool {
        match self {
            Self::Exact(_) | Self::Host(_) => true,
            Self::Any => from.ip() == dest.ip(),
            Self::AnyWithAlternate(alternate) => from.ip() == dest.ip() || from.ip() == *alternate,
        }
    }
}

/// Raw result of a successful exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunExchange {
    /// Response datagram
    pub response: Vec<u8>,
    /// Address the response came from
    pub from: SocketAddr,
}

/// STUN request/response driver over a borrowed socket
#[derive(Debug)]
pub struct StunTransport<'a> {
    socket: &'a UdpSocket,
    policy: RetransmitPolicy,
    cancel: CancellationToken,
}

impl<'a> StunTransport<'a> {
    /// Create a transport with the default policy
    #[must_use]
    pub fn new(socket: &'a UdpSocket) -> Self {
        Self {
            socket,
            policy: RetransmitPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Use a custom retransmission policy
    #[must_use]
    pub fn with_policy(mut self, policy: RetransmitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Abort waits when `token` is cancelled
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Retransmission policy in use
    #[must_use]
    pub fn policy(&self) -> RetransmitPolicy {
        self.policy
    }

    /// Discard datagrams already queued on the socket, returning how many
    /// were dropped
    ///
    /// Late answers to an earlier, retransmitted request would otherwise be
    /// read as a transaction mismatch by the next exchange.
    pub fn drain(&self) -> usize {
        let mut buf = [0u8; MAX_RESPONSE_SIZE];
        let mut dropped = 0;
        while self.socket.try_recv_from(&mut buf).is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// Send `request` to `dest` and wait for the matching response
    ///
    /// The transaction ID is taken from bytes 4..20 of `request`.
    ///
    /// # Errors
    ///
    /// - [`StunError::Io`] if sending or receiving fails
    /// - [`StunError::TransactionMismatch`] if the server answers with a
    ///   foreign transaction ID
    /// - [`StunError::EmptyResponse`] on a zero-length datagram
    /// - [`StunError::Timeout`] once the schedule is exhausted
    /// - [`StunError::Cancelled`] if the token fires
    pub async fn exchange(
        &self,
        dest: SocketAddr,
        request: &[u8],
        filter: SourceFilter,
    ) -> Result<StunExchange, StunError> {
        if request.len() < HEADER_SIZE {
            return Err(StunError::MessageTooShort(request.len()));
        }
        let transaction_id = &request[4..HEADER_SIZE];

        let mut buf = [0u8; MAX_RESPONSE_SIZE];

        for (round, wait) in self.policy.schedule().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(StunError::Cancelled);
            }

            if round > 0 {
                tracing::debug!("retransmitting STUN request to {dest} (wait {wait:?})");
            }
            self.socket.send_to(request, dest).await?;

            let deadline = Instant::now() + wait;
            loop {
                let received = tokio::select! {
                    () = self.cancel.cancelled() => return Err(StunError::Cancelled),
                    received = tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buf)) => received,
                };

                let Ok(received) = received else {
                    // Round expired
                    break;
                };
                let (len, from) = received?;

                if !filter.accepts(&from) {
                    tracing::debug!("discarding STUN reply from unexpected source {from}");
                    continue;
                }

                if len == 0 {
                    tracing::warn!("empty STUN response from {from}");
                    return Err(StunError::EmptyResponse);
                }

                if len < HEADER_SIZE {
                    return Err(StunError::MessageTooShort(len));
                }

                if &buf[4..HEADER_SIZE] != transaction_id {
                    if !filter.binds_transaction(&from, &dest) {
                        tracing::debug!("discarding stray STUN datagram from {from}");
                        continue;
                    }
                    tracing::warn!("STUN reply from {from} carries a foreign transaction ID");
                    return Err(StunError::TransactionMismatch);
                }

                return Ok(StunExchange {
                    response: buf[..len].to_vec(),
                    from,
                });
            }
        }

        Err(StunError::Timeout)
    }
}
