//! STUN server directory and hostname resolution
//!
//! Discovery picks its server uniformly at random from the directory using
//! the OS random source, so a remote party cannot steer a node towards a
//! particular server.

use super::stun::DEFAULT_STUN_PORT;
use rand::Rng;
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;
use thiserror::Error;

/// Public servers that answer classic (RFC 3489) binding requests
pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun.l.google.com:19302",
    "stun1.l.google.com:19302",
    "stun2.l.google.com:19302",
    "stun.ekiga.net",
    "stun.sipgate.net",
    "stun.voipbuster.com",
    "stun.voxgratia.org",
    "stun.xten.com",
    "stun.stunprotocol.org",
    "stun.nextcloud.com:443",
];

/// A STUN server hostname and port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StunServer {
    /// Hostname or literal IPv4 address
    pub host: String,
    /// UDP port
    pub port: u16,
}

impl StunServer {
    /// Create a server entry
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for StunServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Error parsing a `host[:port]` server string
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServerParseError {
    /// Hostname part is empty
    #[error("STUN server '{0}' has an empty hostname")]
    EmptyHost(String),
    /// Port is not a non-zero u16
    #[error("STUN server '{0}' has an invalid port")]
    InvalidPort(String),
}

impl FromStr for StunServer {
    type Err = ServerParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| ServerParseError::InvalidPort(s.to_string()))?;
                (host, port)
            }
            None => (s, DEFAULT_STUN_PORT),
        };

        let host = host.trim();
        if host.is_empty() {
            return Err(ServerParseError::EmptyHost(s.to_string()));
        }

        Ok(Self::new(host, port))
    }
}

/// Set of candidate STUN servers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDirectory {
    servers: Vec<StunServer>,
}

impl ServerDirectory {
    /// Create a directory from explicit entries
    #[must_use]
    pub fn new(servers: Vec<StunServer>) -> Self {
        Self { servers }
    }

    /// The built-in public server list
    #[must_use]
    pub fn public() -> Self {
        let servers = DEFAULT_STUN_SERVERS
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
        Self { servers }
    }

    /// Parse a list of `host[:port]` strings
    ///
    /// # Errors
    ///
    /// Returns the first entry that fails to parse.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, ServerParseError> {
        let servers = entries
            .iter()
            .map(|s| s.as_ref().parse())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { servers })
    }

    /// Number of servers
    #[must_use]
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Whether the directory is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Iterate over the servers
    pub fn iter(&self) -> impl Iterator<Item = &StunServer> {
        self.servers.iter()
    }

    /// Pick a server uniformly at random using the OS random source
    #[must_use]
    pub fn pick(&self) -> Option<&StunServer> {
        self.pick_with(&mut OsRng)
    }

    /// Pick a server uniformly at random using `rng`
    pub fn pick_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&StunServer> {
        self.servers.choose(rng)
    }
}

impl Default for ServerDirectory {
    fn default() -> Self {
        Self::public()
    }
}

/// Hostname resolution for STUN servers (IPv4 only)
pub trait Resolver: Send + Sync {
    /// Resolve `server` to an IPv4 socket address
    fn resolve(&self, server: &StunServer) -> impl Future<Output = io::Result<SocketAddrV4>> + Send;
}

/// Resolver backed by the system resolver via tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    async fn resolve(&self, server: &StunServer) -> io::Result<SocketAddrV4> {
        let addrs = tokio::net::lookup_host((server.host.as_str(), server.port)).await?;

        addrs
            .into_iter()
            .find_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(v4),
                SocketAddr::V6(_) => None,
            })
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no IPv4 address for {server}"),
                )
            })
    }
}

/// Resolver answering from a fixed host table
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Ipv4Addr>,
}

impl StaticResolver {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `host` to `ip`
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>, ip: Ipv4Addr) -> Self {
        self.hosts.insert(host.into(), ip);
        self
    }
}

impl Resolver for StaticResolver {
    async fn resolve(&self, server: &StunServer) -> io::Result<SocketAddrV4> {
        if let Ok(ip) = server.host.parse::<Ipv4Addr>() {
            return Ok(SocketAddrV4::new(ip, server.port));
        }

        self.hosts
            .get(&server.host)
            .map(|ip| SocketAddrV4::new(*ip, server.port))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("unknown host {}", server.host),
                )
            })
    }
}
