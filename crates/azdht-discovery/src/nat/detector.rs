//! NAT type detection
//!
//! Drives the STUN transport against a randomly chosen public server and
//! classifies the result. Basic mode runs Test I only; full mode follows
//! the RFC 3489 decision tree with CHANGE-REQUEST tests.

use super::servers::{Resolver, ServerDirectory, SystemResolver};
use super::stun::{StunError, StunMessage, StunMessageType};
use super::transport::{RetransmitPolicy, SourceFilter, StunTransport};
use super::types::{DetectionMode, NatError, NatInfo, NatType};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

/// Default number of servers tried before giving up
pub const DEFAULT_MAX_ATTEMPTS: usize = 8;

/// NAT detector configuration
#[derive(Debug, Clone)]
pub struct NatDetectorConfig {
    /// Candidate servers
    pub servers: ServerDirectory,
    /// Classification depth
    pub mode: DetectionMode,
    /// Servers tried before [`NatError::ServersExhausted`]
    pub max_attempts: usize,
    /// Retransmission schedule for every request
    pub retransmit: RetransmitPolicy,
}

impl Default for NatDetectorConfig {
    fn default() -> Self {
        Self {
            servers: ServerDirectory::public(),
            mode: DetectionMode::Basic,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retransmit: RetransmitPolicy::default(),
        }
    }
}

/// Parsed answer to a binding request
#[derive(Debug, Clone, Copy)]
struct Binding {
    mapped: SocketAddrV4,
    changed: Option<SocketAddrV4>,
    from: SocketAddr,
}

/// Why a binding query produced no [`Binding`]
#[derive(Debug)]
enum QueryError {
    /// No answer made it through the transport
    Exchange(StunError),
    /// The server answered with something unusable
    Answer(StunError),
}

/// NAT type detector
pub struct NatDetector<R = SystemResolver> {
    config: NatDetectorConfig,
    resolver: R,
    cancel: CancellationToken,
}

impl NatDetector<SystemResolver> {
    /// Create a detector over the public server list
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(NatDetectorConfig::default())
    }

    /// Create a detector with a custom configuration
    #[must_use]
    pub fn with_config(config: NatDetectorConfig) -> Self {
        Self {
            config,
            resolver: SystemResolver,
            cancel: CancellationToken::new(),
        }
    }
}

impl Default for NatDetector<SystemResolver> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resolver> NatDetector<R> {
    /// Replace the hostname resolver
    #[must_use]
    pub fn with_resolver<R2: Resolver>(self, resolver: R2) -> NatDetector<R2> {
        NatDetector {
            config: self.config,
            resolver,
            cancel: self.cancel,
        }
    }

    /// Abort discovery when `token` is cancelled
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels a running discovery
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &NatDetectorConfig {
        &self.config
    }

    /// Bind a UDP socket on `local` and run discovery from it
    ///
    /// Port 0 selects a random port.
    ///
    /// # Errors
    ///
    /// [`NatError::UnsupportedFamily`] for a non-IPv4 address,
    /// [`NatError::Io`] if the bind fails, otherwise as [`Self::discover`].
    pub async fn discover_nat(&self, local: SocketAddr) -> Result<NatInfo, NatError> {
        if !local.is_ipv4() {
            return Err(NatError::UnsupportedFamily(local));
        }

        let socket = UdpSocket::bind(local).await?;
        self.discover(&socket).await
    }

    /// Run discovery from an already bound socket
    ///
    /// A server that cannot be resolved or answers with garbage is replaced
    /// by another random pick. Any transport failure (silence, a socket
    /// error or a datagram that is not an answer to the request) means UDP
    /// does not get through and yields [`NatType::Firewalled`].
    ///
    /// A socket bound to the wildcard address is compared against the
    /// interface address the OS routes each server through.
    ///
    /// # Errors
    ///
    /// - [`NatError::UnsupportedFamily`] if the socket is not IPv4
    /// - [`NatError::NoServers`] if the directory is empty
    /// - [`NatError::ServersExhausted`] after `max_attempts` unusable servers
    /// - [`NatError::Cancelled`] if the token fires
    pub async fn discover(&self, socket: &UdpSocket) -> Result<NatInfo, NatError> {
        let local = match socket.local_addr()? {
            SocketAddr::V4(v4) => v4,
            other => return Err(NatError::UnsupportedFamily(other)),
        };

        if self.config.servers.is_empty() {
            return Err(NatError::NoServers);
        }

        let transport = StunTransport::new(socket)
            .with_policy(self.config.retransmit)
            .with_cancellation(self.cancel.clone());

        for attempt in 1..=self.config.max_attempts {
            if self.cancel.is_cancelled() {
                return Err(NatError::Cancelled);
            }

            let Some(server) = self.config.servers.pick() else {
                return Err(NatError::NoServers);
            };

            let dest = match self.resolver.resolve(server).await {
                Ok(dest) => dest,
                Err(source) => {
                    let err = NatError::Resolution {
                        host: server.host.clone(),
                        source,
                    };
                    tracing::warn!("attempt {attempt}: {err}");
                    continue;
                }
            };

            let local = if local.ip().is_unspecified() {
                match outbound_address(local, dest).await {
                    Ok(addr) => addr,
                    Err(err) => {
                        tracing::warn!("no route to {dest} for the wildcard bind: {err}");
                        local
                    }
                }
            } else {
                local
            };

            tracing::debug!("attempt {attempt}: Test I against {server} ({dest}) from {local}");

            let test1 = query(
                &transport,
                dest,
                &StunMessage::binding_request(),
                SourceFilter::Host(IpAddr::V4(*dest.ip())),
            )
            .await;

            let binding = match test1 {
                Ok(binding) => binding,
                Err(QueryError::Exchange(StunError::Cancelled)) => return Err(NatError::Cancelled),
                Err(QueryError::Exchange(err)) => {
                    tracing::info!("no STUN answer from {server} ({err}): UDP appears blocked");
                    return Ok(NatInfo {
                        nat_type: NatType::Firewalled,
                        external: None,
                        local,
                        server: Some(server.clone()),
                    });
                }
                Err(QueryError::Answer(err)) => {
                    tracing::warn!("attempt {attempt}: unusable answer from {server}: {err}");
                    continue;
                }
            };

            tracing::debug!(
                "Test I: mapped {} (changed {:?}) via {}",
                binding.mapped,
                binding.changed,
                binding.from
            );

            let nat_type = match self.config.mode {
                DetectionMode::Basic => NatType::from_mapping(binding.mapped, local),
                DetectionMode::Full => self.classify_full(&transport, dest, local, &binding).await?,
            };

            tracing::info!("NAT type: {nat_type}, external address {}", binding.mapped);

            return Ok(NatInfo {
                nat_type,
                external: Some(binding.mapped),
                local,
                server: Some(server.clone()),
            });
        }

        Err(NatError::ServersExhausted {
            attempts: self.config.max_attempts,
        })
    }

    /// RFC 3489 Tests II and III after a successful Test I
    ///
    /// Failures other than silence leave the type undetermined.
    async fn classify_full(
        &self,
        transport: &StunTransport<'_>,
        server: SocketAddrV4,
        local: SocketAddrV4,
        test1: &Binding,
    ) -> Result<NatType, NatError> {
        let natted = test1.mapped != local;
        let answers = match test1.changed {
            Some(changed) => SourceFilter::AnyWithAlternate(IpAddr::V4(*changed.ip())),
            None => SourceFilter::Any,
        };

        let test2 = change_test(transport, server, answers, true, true).await;
        let full_cone = match test2 {
            Ok(answered) => answered,
            Err(StunError::Cancelled) => return Err(NatError::Cancelled),
            Err(err) => {
                tracing::warn!("Test II failed: {err}");
                return Ok(NatType::Unknown);
            }
        };

        if !natted {
            return Ok(if full_cone {
                NatType::NoNat
            } else {
                NatType::SymmetricFirewall
            });
        }

        if full_cone {
            return Ok(NatType::FullCone);
        }

        let Some(changed) = test1.changed else {
            tracing::warn!("server did not report CHANGED-ADDRESS, cannot continue");
            return Ok(NatType::Unknown);
        };

        transport.drain();
        let retest = query(
            transport,
            changed,
            &StunMessage::binding_request(),
            SourceFilter::Host(IpAddr::V4(*changed.ip())),
        )
        .await;

        let mapped = match retest {
            Ok(binding) => binding.mapped,
            Err(QueryError::Exchange(StunError::Cancelled)) => return Err(NatError::Cancelled),
            Err(QueryError::Exchange(err) | QueryError::Answer(err)) => {
                tracing::warn!("Test I against changed address {changed} failed: {err}");
                return Ok(NatType::Unknown);
            }
        };

        if mapped != test1.mapped {
            tracing::debug!("mapping changed to {mapped} for a new destination");
            return Ok(NatType::Symmetric);
        }

        match change_test(transport, server, answers, false, true).await {
            Ok(true) => Ok(NatType::RestrictedCone),
            Ok(false) => Ok(NatType::PortRestrictedCone),
            Err(StunError::Cancelled) => Err(NatError::Cancelled),
            Err(err) => {
                tracing::warn!("Test III failed: {err}");
                Ok(NatType::Unknown)
            }
        }
    }
}

/// Interface address the OS uses to reach `dest`, with the port of `local`
///
/// Connecting a UDP socket selects a route without sending anything.
async fn outbound_address(local: SocketAddrV4, dest: SocketAddrV4) -> io::Result<SocketAddrV4> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.connect(dest).await?;

    match socket.local_addr()? {
        SocketAddr::V4(addr) => Ok(SocketAddrV4::new(*addr.ip(), local.port())),
        other => Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("route to {dest} leaves from {other}"),
        )),
    }
}

/// Send `request` and parse the binding response
async fn query(
    transport: &StunTransport<'_>,
    dest: SocketAddrV4,
    request: &StunMessage,
    filter: SourceFilter,
) -> Result<Binding, QueryError> {
    let exchange = transport
        .exchange(SocketAddr::V4(dest), &request.encode(), filter)
        .await
        .map_err(QueryError::Exchange)?;
    let response = StunMessage::decode(&exchange.response).map_err(QueryError::Answer)?;

    match response.message_type {
        StunMessageType::BindingResponse => {}
        StunMessageType::BindingErrorResponse => {
            return Err(QueryError::Answer(StunError::ErrorResponse(
                response.error_code().map(|(code, _)| code),
            )));
        }
        other => {
            return Err(QueryError::Answer(StunError::UnexpectedMessageType(
                other.as_u16(),
            )))
        }
    }

    let mapped = response
        .reflexive_address()
        .ok_or(QueryError::Answer(StunError::MissingAttribute))?;

    Ok(Binding {
        mapped,
        changed: response.changed_address(),
        from: exchange.from,
    })
}

/// CHANGE-REQUEST test; `Ok(false)` means no answer arrived
async fn change_test(
    transport: &StunTransport<'_>,
    dest: SocketAddrV4,
    filter: SourceFilter,
    change_ip: bool,
    change_port: bool,
) -> Result<bool, StunError> {
    transport.drain();
    let request = StunMessage::change_request(change_ip, change_port);

    match query(transport, dest, &request, filter).await {
        Ok(binding) => {
            tracing::debug!("CHANGE-REQUEST answered from {}", binding.from);
            Ok(true)
        }
        Err(QueryError::Exchange(StunError::Timeout)) => Ok(false),
        Err(QueryError::Exchange(err) | QueryError::Answer(err)) => Err(err),
    }
}
