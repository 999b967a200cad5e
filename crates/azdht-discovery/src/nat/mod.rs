//! NAT Topology Discovery
//!
//! A classic STUN (RFC 3489) client that learns the externally visible
//! address of a node and classifies the NAT or firewall in front of it.
//!
//! # Components
//!
//! - **Wire codec** ([`stun`]): binding requests and responses
//! - **Transport** ([`transport`]): one timed exchange with exponential backoff
//! - **Server directory** ([`servers`]): public servers and hostname resolution
//! - **Detector** ([`detector`]): server selection and classification
//!
//! # Example
//!
//! ```rust,no_run
//! use azdht_discovery::nat::NatDetector;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let detector = NatDetector::new();
//! let info = detector.discover_nat("0.0.0.0:0".parse()?).await?;
//! println!("NAT type: {}", info.nat_type);
//! if let Some(external) = info.external {
//!     println!("external address: {external}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod detector;
pub mod servers;
pub mod stun;
pub mod transport;
pub mod types;

// Re-exports
pub use detector::{DEFAULT_MAX_ATTEMPTS, NatDetector, NatDetectorConfig};
pub use servers::{
    DEFAULT_STUN_SERVERS, Resolver, ServerDirectory, ServerParseError, StaticResolver,
    StunServer, SystemResolver,
};
pub use stun::{
    StunAttribute, StunError, StunMessage, StunMessageType, TransactionId, encode_stun_header,
};
pub use transport::{RetransmitPolicy, SourceFilter, StunExchange, StunTransport};
pub use types::{DetectionMode, NatError, NatInfo, NatType};
