//! NAT classification results and errors

use super::servers::StunServer;
use super::stun::StunError;
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, SocketAddrV4};
use std::str::FromStr;
use thiserror::Error;

/// NAT type classification
///
/// Ordered from most to least permissive for inbound traffic:
/// - NoNat: public address, anyone can reach the node
/// - FullCone: any external host can send to the mapped port
/// - RestrictedCone: only hosts the node has contacted can send back
/// - PortRestrictedCone: only contacted IP:port pairs can send back
/// - Symmetric: a different mapping per destination
/// - SymmetricFirewall: public address, but unsolicited inbound is dropped
/// - Firewalled: UDP does not get through at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NatType {
    /// No NAT detected, the mapped address is the local address
    NoNat,
    /// Full Cone NAT
    FullCone,
    /// Restricted Cone NAT
    RestrictedCone,
    /// Port Restricted Cone NAT
    PortRestrictedCone,
    /// Symmetric NAT
    Symmetric,
    /// Public address behind a symmetric UDP firewall
    SymmetricFirewall,
    /// UDP blocked
    Firewalled,
    /// NAT present (or result inconclusive) but subtype not determined
    Unknown,
}

impl NatType {
    /// Test I verdict: open if the server saw the local address unchanged,
    /// otherwise a NAT of undetermined kind
    #[must_use]
    pub fn from_mapping(mapped: SocketAddrV4, local: SocketAddrV4) -> Self {
        if mapped == local {
            Self::NoNat
        } else {
            Self::Unknown
        }
    }

    /// Whether the node can be reached by unsolicited UDP from any host
    #[must_use]
    pub fn is_publicly_reachable(&self) -> bool {
        matches!(self, Self::NoNat | Self::FullCone)
    }
}

impl std::fmt::Display for NatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoNat => write!(f, "Open (No NAT)"),
            Self::FullCone => write!(f, "Full Cone NAT"),
            Self::RestrictedCone => write!(f, "Restricted Cone NAT"),
            Self::PortRestrictedCone => write!(f, "Port Restricted Cone NAT"),
            Self::Symmetric => write!(f, "Symmetric NAT"),
            Self::SymmetricFirewall => write!(f, "Symmetric UDP Firewall"),
            Self::Firewalled => write!(f, "Firewalled (UDP blocked)"),
            Self::Unknown => write!(f, "Unknown NAT Type"),
        }
    }
}

/// How far classification goes after the first binding test
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    /// Test I only: open or NAT present
    #[default]
    Basic,
    /// Full RFC 3489 flow with CHANGE-REQUEST probes (Tests II and III)
    Full,
}

impl std::fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic => write!(f, "basic"),
            Self::Full => write!(f, "full"),
        }
    }
}

impl FromStr for DetectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown detection mode '{other}' (expected basic or full)")),
        }
    }
}

/// Outcome of one discovery run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatInfo {
    /// Classification
    pub nat_type: NatType,
    /// Externally visible address, when a server reported one
    pub external: Option<SocketAddrV4>,
    /// Local address the requests left from (the routed interface address
    /// for a wildcard bind)
    pub local: SocketAddrV4,
    /// Server that produced the result
    pub server: Option<StunServer>,
}

impl NatInfo {
    /// Whether a NAT sits between the node and the server
    #[must_use]
    pub fn is_natted(&self) -> bool {
        self.external.is_some_and(|external| external != self.local)
    }
}

/// NAT detection error
#[derive(Debug, Error)]
pub enum NatError {
    /// STUN exchange failed in a way that ends discovery
    #[error("STUN error: {0}")]
    Stun(#[from] StunError),

    /// Server hostname could not be resolved
    #[error("failed to resolve STUN server {host}: {source}")]
    Resolution {
        /// Server that failed
        host: String,
        /// Underlying resolver error
        #[source]
        source: std::io::Error,
    },

    /// Socket setup failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No STUN servers configured
    #[error("No STUN servers available")]
    NoServers,

    /// Every attempt picked a server that could not be used
    #[error("no usable STUN server after {attempts} attempts")]
    ServersExhausted {
        /// Attempts made
        attempts: usize,
    },

    /// Local address is not IPv4
    #[error("unsupported local address {0}: only IPv4 is supported")]
    UnsupportedFamily(SocketAddr),

    /// Discovery aborted by the cancellation token
    #[error("NAT discovery cancelled")]
    Cancelled,
}
