//! # azdht Discovery
//!
//! Network self-discovery for an Azureus-compatible DHT node.
//!
//! This crate provides:
//! - STUN (RFC 3489) NAT type detection and external address discovery
//! - Vivaldi network coordinates for RTT estimation
//!
//! ## NAT Discovery
//!
//! [`NatDetector`] picks a random public STUN server, sends a binding
//! request from the node's socket and compares the reported mapped address
//! with the local one. [`DetectionMode::Full`] continues with the
//! CHANGE-REQUEST probes that tell the cone NAT variants apart.
//!
//! ## Vivaldi
//!
//! [`VivaldiEngine`] owns a node's coordinate and refines it from measured
//! RTTs and the coordinates peers report in their RPC replies.
//!
//! ## Example
//!
//! ```rust,no_run
//! use azdht_discovery::{NatDetector, VivaldiEngine, VivaldiV1};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let info = NatDetector::new().discover_nat("0.0.0.0:0".parse()?).await?;
//! println!("{} via {:?}", info.nat_type, info.external);
//!
//! let mut engine = VivaldiEngine::new();
//! engine.update(42.0, &VivaldiV1::new(30.0, 10.0, 1.0), 2.0)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod nat;
pub mod vivaldi;

// Re-export commonly used types
pub use nat::{
    DetectionMode, NatDetector, NatDetectorConfig, NatError, NatInfo, NatType, RetransmitPolicy,
    ServerDirectory, StunError, StunMessage, StunServer,
};
pub use vivaldi::{UpdateReport, VivaldiEngine, VivaldiError, VivaldiPosition, VivaldiV1};
