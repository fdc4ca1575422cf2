//! Geometry primitives and node identifiers.

use num_bigint::BigUint;
use num_traits::{CheckedSub, ToPrimitive, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

/// Flat, depth-aware address of a tree node.
///
/// Nodes are numbered breadth first: the root is 0, and the children of
/// node `i` are `i * factor + 1 + direction`. Deep trees quickly outgrow 64
/// bits, so the address is an arbitrary-precision unsigned integer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Id(BigUint);

impl Id {
    /// The root address.
    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    /// Returns true for the root address.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns `base^exp`.
    pub fn pow(base: u64, exp: usize) -> Self {
        Self(BigUint::from(base).pow(exp as u32))
    }

    /// Address of the child of this node in the given direction.
    #[inline]
    pub fn child(&self, factor: u64, direction: u64) -> Self {
        Self(&self.0 * factor + 1u64 + direction)
    }

    /// Narrows to u64 if the value fits.
    pub fn to_u64(&self) -> Option<u64> {
        self.0.to_u64()
    }

    /// Narrows to usize if the value fits.
    pub fn to_usize(&self) -> Option<usize> {
        self.0.to_usize()
    }

    /// Subtraction that returns None instead of underflowing.
    pub fn checked_sub(&self, other: &Id) -> Option<Id> {
        self.0.checked_sub(&other.0).map(Self)
    }

    /// Number of bits needed to represent this value.
    pub fn bits(&self) -> u64 {
        self.0.bits()
    }
}

impl From<u64> for Id {
    fn from(value: u64) -> Self {
        Self(BigUint::from(value))
    }
}

impl From<usize> for Id {
    fn from(value: usize) -> Self {
        Self(BigUint::from(value))
    }
}

impl Add<&Id> for &Id {
    type Output = Id;

    fn add(self, rhs: &Id) -> Id {
        Id(&self.0 + &rhs.0)
    }
}

impl Add<u64> for &Id {
    type Output = Id;

    fn add(self, rhs: u64) -> Id {
        Id(&self.0 + rhs)
    }
}

impl Sub<&Id> for &Id {
    type Output = Id;

    /// Panics on underflow, like unsigned integer subtraction.
    fn sub(self, rhs: &Id) -> Id {
        Id(&self.0 - &rhs.0)
    }
}

impl Mul<u64> for &Id {
    type Output = Id;

    fn mul(self, rhs: u64) -> Id {
        Id(&self.0 * rhs)
    }
}

impl Mul<&Id> for &Id {
    type Output = Id;

    fn mul(self, rhs: &Id) -> Id {
        Id(&self.0 * &rhs.0)
    }
}

impl Div<&Id> for &Id {
    type Output = Id;

    fn div(self, rhs: &Id) -> Id {
        Id(&self.0 / &rhs.0)
    }
}

impl Div<u64> for &Id {
    type Output = Id;

    fn div(self, rhs: u64) -> Id {
        Id(&self.0 / rhs)
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Id {
    type Err = num_bigint::ParseBigIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        BigUint::from_str(s).map(Self)
    }
}

// Ids are stored as decimal strings so JSON consumers never lose precision.
impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Id::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// A point in 3D space. 2D data leaves `z` at zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Squared distance in the XY plane.
    #[inline]
    pub fn sq_dist_2d(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Squared distance in XYZ.
    #[inline]
    pub fn sq_dist_3d(&self, other: &Point) -> f64 {
        let dz = self.z - other.z;
        self.sq_dist_2d(other) + dz * dz
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min: Point,
    pub max: Point,
}

impl BBox {
    pub fn new(min: Point, max: Point) -> Self {
        Self { min, max }
    }

    /// Midpoint of the box, the reference for priority comparison.
    #[inline]
    pub fn mid(&self) -> Point {
        Point::new(
            self.min.x + (self.max.x - self.min.x) / 2.0,
            self.min.y + (self.max.y - self.min.y) / 2.0,
            self.min.z + (self.max.z - self.min.z) / 2.0,
        )
    }

    /// Returns true if the point lies within the box, bounds inclusive.
    /// 2D boxes ignore z.
    pub fn contains(&self, p: &Point, is_3d: bool) -> bool {
        let xy = p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y;
        if is_3d {
            xy && p.z >= self.min.z && p.z <= self.max.z
        } else {
            xy
        }
    }

    /// Height of the box along z.
    pub fn height(&self) -> f64 {
        self.max.z - self.min.z
    }

    /// Child direction containing `p`.
    ///
    /// Bit 0 selects the upper x half, bit 1 the upper y half, and bit 2 the
    /// upper z half when splitting in 3D.
    #[inline]
    pub fn direction(&self, p: &Point, is_3d: bool) -> u64 {
        let mid = self.mid();
        let mut dir = 0u64;
        if p.x >= mid.x {
            dir |= 1;
        }
        if p.y >= mid.y {
            dir |= 2;
        }
        if is_3d && p.z >= mid.z {
            dir |= 4;
        }
        dir
    }

    /// Returns the child box in the given direction. 2D splits keep the full
    /// z extent.
    pub fn go(&self, direction: u64, is_3d: bool) -> BBox {
        let mid = self.mid();
        let mut min = self.min;
        let mut max = self.max;

        if direction & 1 != 0 {
            min.x = mid.x;
        } else {
            max.x = mid.x;
        }
        if direction & 2 != 0 {
            min.y = mid.y;
        } else {
            max.y = mid.y;
        }
        if is_3d {
            if direction & 4 != 0 {
                min.z = mid.z;
            } else {
                max.z = mid.z;
            }
        }

        BBox { min, max }
    }
}
