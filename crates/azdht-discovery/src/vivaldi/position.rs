//! Vivaldi coordinate types and geometry

use super::{INITIAL_ERROR, MAX_H, MAX_X, MAX_Y, VivaldiError};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Wire discriminator of a coordinate kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PositionType {
    /// Three-dimensional position with height, `f32` components
    V1 = 1,
    /// n-dimensional position, `f64` components (encode only)
    V2 = 5,
}

impl PositionType {
    /// Wire value
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PositionType {
    type Error = VivaldiError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::V1),
            5 => Ok(Self::V2),
            other => Err(VivaldiError::UnsupportedPositionType(other)),
        }
    }
}

/// Version 1 coordinate: a point in (x, y) plus a non-negative height and
/// the node's local error estimate
///
/// Equality compares x, y and height exactly and ignores the error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VivaldiV1 {
    /// Euclidean x component (ms)
    pub x: f32,
    /// Euclidean y component (ms)
    pub y: f32,
    /// Height modelling access-link latency (ms)
    pub h: f32,
    /// Local error estimate
    pub error: f32,
}

impl VivaldiV1 {
    /// Create a position carrying the initial error
    #[must_use]
    pub const fn new(x: f32, y: f32, h: f32) -> Self {
        Self {
            x,
            y,
            h,
            error: INITIAL_ERROR,
        }
    }

    /// The unmeasured position
    #[must_use]
    pub const fn origin() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Replace the error estimate
    #[must_use]
    pub const fn with_error(mut self, error: f32) -> Self {
        self.error = error;
        self
    }

    /// Whether the position is still unmeasured (height is ignored)
    #[must_use]
    pub fn at_origin(&self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }

    /// Finite components within the coordinate bounds
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.h.is_finite()
            && self.x.abs() <= MAX_X
            && self.y.abs() <= MAX_Y
            && self.h.abs() <= MAX_H
    }

    /// Component sum; heights combine as a magnitude
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y, (self.h + other.h).abs())
    }

    /// Component difference; heights still add, as both ends pay their
    /// access-link latency
    #[must_use]
    pub fn sub(&self, other: &Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y, (self.h + other.h).abs())
    }

    /// Multiply x, y and h by `factor`
    #[must_use]
    pub fn scale(&self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            h: self.h * factor,
            error: self.error,
        }
    }

    /// Planar length plus height
    #[must_use]
    pub fn measure(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt() + self.h
    }

    /// Unit-measure vector pointing the same way
    ///
    /// A zero vector has no direction, so a random one is drawn from `rng`.
    #[must_use]
    pub fn unity<R: Rng + ?Sized>(&self, rng: &mut R) -> Self {
        let measure = self.measure();
        if measure != 0.0 {
            return self.scale(1.0 / measure);
        }

        loop {
            let random = Self {
                x: rng.r#gen::<f32>(),
                y: rng.r#gen::<f32>(),
                h: rng.r#gen::<f32>(),
                error: self.error,
            };
            let measure = random.measure();
            if measure > 0.0 {
                return random.scale(1.0 / measure);
            }
        }
    }

    /// Estimated latency between two positions
    #[must_use]
    pub fn distance(&self, other: &Self) -> f32 {
        self.sub(other).measure()
    }

    /// RTT estimate, NaN while either position is unmeasured
    #[must_use]
    pub fn estimate_rtt(&self, other: &Self) -> f32 {
        if self.at_origin() || other.at_origin() {
            return f32::NAN;
        }
        self.distance(other)
    }
}

impl Default for VivaldiV1 {
    fn default() -> Self {
        Self::origin()
    }
}

impl PartialEq for VivaldiV1 {
    fn eq(&self, other: &Self) -> bool {
        self.x == other.x && self.y == other.y && self.h == other.h
    }
}

impl std::fmt::Display for VivaldiV1 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({:.3}, {:.3}, h={:.3}) err={:.3}",
            self.x, self.y, self.h, self.error
        )
    }
}

/// Version 2 coordinate
///
/// Only the placeholder a fresh node advertises is ever produced here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VivaldiV2 {
    /// Number of coordinates carried
    pub n_coords: u8,
    /// x component
    pub x: f64,
    /// y component
    pub y: f64,
    /// Height
    pub h: f64,
    /// Error estimate
    pub error: f64,
}

impl VivaldiV2 {
    /// Placeholder values a new node advertises
    #[must_use]
    pub const fn placeholder() -> Self {
        Self {
            n_coords: 4,
            x: 100.0,
            y: 100.0,
            h: 0.0,
            error: 1.0,
        }
    }
}

impl Default for VivaldiV2 {
    fn default() -> Self {
        Self::placeholder()
    }
}

impl PartialEq for VivaldiV2 {
    fn eq(&self, other: &Self) -> bool {
        self.x == other.x && self.y == other.y && self.h == other.h
    }
}

/// A coordinate of any supported kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum VivaldiPosition {
    /// Version 1
    V1(VivaldiV1),
    /// Version 2
    V2(VivaldiV2),
}

impl VivaldiPosition {
    /// Fresh position of the given kind
    #[must_use]
    pub const fn new(kind: PositionType) -> Self {
        match kind {
            PositionType::V1 => Self::V1(VivaldiV1::origin()),
            PositionType::V2 => Self::V2(VivaldiV2::placeholder()),
        }
    }

    /// Kind of this position
    #[must_use]
    pub const fn position_type(&self) -> PositionType {
        match self {
            Self::V1(_) => PositionType::V1,
            Self::V2(_) => PositionType::V2,
        }
    }

    /// The V1 coordinate, if this is one
    #[must_use]
    pub const fn as_v1(&self) -> Option<&VivaldiV1> {
        match self {
            Self::V1(v1) => Some(v1),
            Self::V2(_) => None,
        }
    }
}

impl From<VivaldiV1> for VivaldiPosition {
    fn from(v1: VivaldiV1) -> Self {
        Self::V1(v1)
    }
}

impl From<VivaldiV2> for VivaldiPosition {
    fn from(v2: VivaldiV2) -> Self {
        Self::V2(v2)
    }
}

/// Estimated latency between `a` and `b`
#[must_use]
pub fn distance(a: &VivaldiV1, b: &VivaldiV1) -> f32 {
    a.distance(b)
}

/// RTT estimate between `a` and `b`, NaN if either is unmeasured
#[must_use]
pub fn estimate_rtt(a: &VivaldiV1, b: &VivaldiV1) -> f32 {
    a.estimate_rtt(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_position_type_codes() {
        assert_eq!(PositionType::V1.as_u8(), 1);
        assert_eq!(PositionType::V2.as_u8(), 5);
        assert_eq!(PositionType::try_from(5), Ok(PositionType::V2));
        assert_eq!(
            PositionType::try_from(2),
            Err(VivaldiError::UnsupportedPositionType(2))
        );
    }

    #[test]
    fn test_new_positions() {
        let v1 = VivaldiPosition::new(PositionType::V1);
        assert_eq!(v1, VivaldiPosition::V1(VivaldiV1::origin()));
        assert_eq!(v1.as_v1().unwrap().error, INITIAL_ERROR);

        let VivaldiPosition::V2(v2) = VivaldiPosition::new(PositionType::V2) else {
            panic!("expected V2");
        };
        assert_eq!(v2.n_coords, 4);
        assert_eq!((v2.x, v2.y, v2.h, v2.error), (100.0, 100.0, 0.0, 1.0));
    }

    #[test]
    fn test_at_origin_ignores_height() {
        assert!(VivaldiV1::origin().at_origin());
        assert!(VivaldiV1::new(0.0, 0.0, 12.0).at_origin());
        assert!(!VivaldiV1::new(0.0, 1.0, 0.0).at_origin());
    }

    #[test]
    fn test_validity_bounds() {
        assert!(VivaldiV1::new(30000.0, -30000.0, 30000.0).is_valid());
        assert!(!VivaldiV1::new(30000.5, 0.0, 0.0).is_valid());
        assert!(!VivaldiV1::new(0.0, 0.0, -30001.0).is_valid());
        assert!(!VivaldiV1::new(f32::NAN, 0.0, 0.0).is_valid());
        assert!(!VivaldiV1::new(0.0, f32::INFINITY, 0.0).is_valid());
    }

    #[test]
    fn test_add_and_sub_combine_heights() {
        let a = VivaldiV1::new(3.0, 4.0, 2.0);
        let b = VivaldiV1::new(1.0, 1.0, -5.0);

        assert_eq!(a.add(&b), VivaldiV1::new(4.0, 5.0, 3.0));
        assert_eq!(a.sub(&b), VivaldiV1::new(2.0, 3.0, 3.0));
    }

    #[test]
    fn test_distance() {
        let a = VivaldiV1::new(3.0, 4.0, 1.0);
        let b = VivaldiV1::new(0.0, 0.0, 2.0);

        assert_eq!(distance(&a, &b), 8.0);
        assert_eq!(distance(&b, &a), 8.0);
        assert_eq!(distance(&a, &a), 2.0);
    }

    #[test]
    fn test_estimate_rtt_at_origin_is_nan() {
        let a = VivaldiV1::new(3.0, 4.0, 1.0);
        assert!(estimate_rtt(&a, &VivaldiV1::origin()).is_nan());
        assert!(estimate_rtt(&VivaldiV1::origin(), &a).is_nan());

        let b = VivaldiV1::new(-3.0, 4.0, 1.0);
        assert_eq!(estimate_rtt(&a, &b), 8.0);
    }

    #[test]
    fn test_unity() {
        let mut rng = StdRng::seed_from_u64(7);

        let v = VivaldiV1::new(3.0, 4.0, 5.0).unity(&mut rng);
        assert!((v.measure() - 1.0).abs() < 1e-6);

        let random = VivaldiV1::origin().unity(&mut rng);
        assert!((random.measure() - 1.0).abs() < 1e-5);
        assert!(random.x >= 0.0 && random.y >= 0.0 && random.h >= 0.0);
    }

    #[test]
    fn test_equality_ignores_error() {
        let a = VivaldiV1::new(1.0, 2.0, 3.0).with_error(0.5);
        let b = VivaldiV1::new(1.0, 2.0, 3.0).with_error(7.0);
        assert_eq!(a, b);
        assert_ne!(
            VivaldiPosition::V1(VivaldiV1::new(100.0, 100.0, 0.0)),
            VivaldiPosition::V2(VivaldiV2::placeholder())
        );
    }
}
