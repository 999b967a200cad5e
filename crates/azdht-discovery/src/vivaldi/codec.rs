//! Coordinate wire format
//!
//! V1: x, y, h, error as big-endian `f32`, 16 bytes.
//! V2: a coordinate count byte then x, y, h, error as big-endian `f64`.
//!
//! Position lists (as carried in DHT RPC payloads) are a count byte followed
//! by `type (1) | length (1) | payload` records.

use super::VivaldiError;
use super::position::{PositionType, VivaldiPosition, VivaldiV1, VivaldiV2};

/// Encoded size of a V1 position
pub const V1_ENCODED_LEN: usize = 16;

/// Encoded size of a V2 position
pub const V2_ENCODED_LEN: usize = 1 + 4 * 8;

/// Encode a position in its wire form
#[must_use]
pub fn encode_position(position: &VivaldiPosition) -> Vec<u8> {
    match position {
        VivaldiPosition::V1(v1) => {
            let mut buf = Vec::with_capacity(V1_ENCODED_LEN);
            for value in [v1.x, v1.y, v1.h, v1.error] {
                buf.extend_from_slice(&value.to_be_bytes());
            }
            buf
        }
        VivaldiPosition::V2(v2) => {
            let mut buf = Vec::with_capacity(V2_ENCODED_LEN);
            buf.push(v2.n_coords);
            for value in [v2.x, v2.y, v2.h, v2.error] {
                buf.extend_from_slice(&value.to_be_bytes());
            }
            buf
        }
    }
}

/// Decode a position of kind `kind` from the start of `bytes`
///
/// Bytes past the encoded position are ignored.
///
/// # Errors
///
/// - [`VivaldiError::UnsupportedPositionType`] for V2, which has no decoder
/// - [`VivaldiError::Truncated`] if fewer than 16 bytes are present
pub fn decode_position(kind: PositionType, bytes: &[u8]) -> Result<VivaldiPosition, VivaldiError> {
    match kind {
        PositionType::V1 => decode_v1(bytes).map(VivaldiPosition::V1),
        PositionType::V2 => Err(VivaldiError::UnsupportedPositionType(kind.as_u8())),
    }
}

fn decode_v1(bytes: &[u8]) -> Result<VivaldiV1, VivaldiError> {
    if bytes.len() < V1_ENCODED_LEN {
        return Err(VivaldiError::Truncated {
            expected: V1_ENCODED_LEN,
            available: bytes.len(),
        });
    }

    let read = |i: usize| {
        let offset = i * 4;
        f32::from_be_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ])
    };

    Ok(VivaldiV1 {
        x: read(0),
        y: read(1),
        h: read(2),
        error: read(3),
    })
}

/// Encode several positions with type and length framing
///
/// # Errors
///
/// Returns [`VivaldiError::TooManyPositions`] for more than 255 entries.
pub fn encode_position_list(positions: &[VivaldiPosition]) -> Result<Vec<u8>, VivaldiError> {
    let count =
        u8::try_from(positions.len()).map_err(|_| VivaldiError::TooManyPositions(positions.len()))?;

    let mut buf = vec![count];
    for position in positions {
        let payload = encode_position(position);
        buf.push(position.position_type().as_u8());
        // Both payload sizes fit in a byte
        buf.push(payload.len() as u8);
        buf.extend_from_slice(&payload);
    }
    Ok(buf)
}

/// Decode a framed position list
///
/// Entries of unknown kind and V2 entries are skipped using their length
/// byte, so the result may be shorter than the declared count.
///
/// # Errors
///
/// Returns [`VivaldiError::Truncated`] if a record runs past the buffer,
/// or the V1 decode error of a malformed entry.
pub fn decode_position_list(bytes: &[u8]) -> Result<Vec<VivaldiPosition>, VivaldiError> {
    let Some((&count, mut rest)) = bytes.split_first() else {
        return Err(VivaldiError::Truncated {
            expected: 1,
            available: 0,
        });
    };

    let mut positions = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let [kind, len, tail @ ..] = rest else {
            return Err(VivaldiError::Truncated {
                expected: 2,
                available: rest.len(),
            });
        };
        let len = usize::from(*len);
        if tail.len() < len {
            return Err(VivaldiError::Truncated {
                expected: len,
                available: tail.len(),
            });
        }
        let (payload, next) = tail.split_at(len);
        rest = next;

        match PositionType::try_from(*kind) {
            Ok(PositionType::V1) => positions.push(VivaldiPosition::V1(decode_v1(payload)?)),
            Ok(PositionType::V2) | Err(_) => {
                tracing::debug!("skipping position of type {kind} ({len} bytes)");
            }
        }
    }

    Ok(positions)
}

/// Placeholder V2 position a node advertises alongside its V1 coordinate
#[must_use]
pub fn advertised_positions(v1: VivaldiV1) -> [VivaldiPosition; 2] {
    [VivaldiPosition::V1(v1), VivaldiPosition::V2(VivaldiV2::placeholder())]
}
