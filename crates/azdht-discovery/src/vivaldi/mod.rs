//! Vivaldi network coordinates
//!
//! Each node keeps a synthetic position in a 2D plane plus a height. The
//! distance between two positions estimates their round-trip time, so a
//! node can rank peers it has never measured.
//!
//! After every RPC round trip the caller feeds the measured RTT together
//! with the peer's reported position and error into the node's
//! [`VivaldiEngine`], which nudges the local position like a damped spring.
//!
//! # Example
//!
//! ```rust
//! use azdht_discovery::vivaldi::{VivaldiEngine, VivaldiV1};
//!
//! let mut engine = VivaldiEngine::new();
//! let peer = VivaldiV1::new(40.0, 10.0, 2.0).with_error(0.5);
//!
//! let report = engine.update(55.0, &peer, peer.error).unwrap();
//! assert!(report.position.is_valid());
//! assert!(engine.estimate_rtt(&peer).is_finite());
//! ```

pub mod codec;
pub mod engine;
pub mod position;

use thiserror::Error;

pub use codec::{
    V1_ENCODED_LEN, V2_ENCODED_LEN, advertised_positions, decode_position, decode_position_list,
    encode_position, encode_position_list,
};
pub use engine::{UpdateReport, VivaldiEngine};
pub use position::{PositionType, VivaldiPosition, VivaldiV1, VivaldiV2, distance, estimate_rtt};

/// Error of a fresh position
pub const INITIAL_ERROR: f32 = 10.0;
/// Position step damping
pub const CC: f32 = 0.25;
/// Error moving-average damping
pub const CE: f32 = 0.5;
/// Samples from measured peers between forced convergence steps
pub const CONVERGE_EVERY: u32 = 5;
/// Peer error used for the forced convergence step
pub const CONVERGE_FACTOR: f32 = 50.0;
/// Floor of the local error estimate
pub const ERROR_MIN: f32 = 0.1;
/// Bound on |x|
pub const MAX_X: f32 = 30000.0;
/// Bound on |y|
pub const MAX_Y: f32 = 30000.0;
/// Bound on |h|
pub const MAX_H: f32 = 30000.0;
/// Largest accepted RTT sample (ms)
pub const MAX_RTT: f32 = 300_000.0;

/// Vivaldi errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VivaldiError {
    /// RTT sample not finite or outside `(0, MAX_RTT]`
    #[error("invalid RTT sample: {0}")]
    InvalidRtt(f32),

    /// Peer error not finite
    #[error("invalid peer error: {0}")]
    InvalidPeerError(f32),

    /// Local or peer position not finite or out of bounds
    #[error("invalid Vivaldi position")]
    InvalidPosition,

    /// Local and peer errors sum to zero
    #[error("local and peer error sum to zero")]
    ZeroError,

    /// Position kind without a decoder
    #[error("unsupported position type {0}")]
    UnsupportedPositionType(u8),

    /// Buffer shorter than the encoded position
    #[error("position truncated: need {expected} bytes, {available} present")]
    Truncated {
        /// Bytes required
        expected: usize,
        /// Bytes present
        available: usize,
    },

    /// List too long for the count byte
    #[error("{0} positions do not fit in one list")]
    TooManyPositions(usize),
}
