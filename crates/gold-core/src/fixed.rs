// SPDX-License-Identifier: Apache-2.0
//! Deterministic fixed-point scalar (Q16.16) and the integer/fixed vector pair.
//!
//! Every distance, velocity, and interpolation value that peers compare lives
//! in these types. There is no floating point anywhere in the simulation and
//! no tolerance epsilon: equality is equality of raw bits.

use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

/// Number of fractional bits in a [`Fixed`].
pub const FIXED_FRACTION_BITS: u32 = 16;

/// Q16.16 fixed-point scalar backed by a signed 32-bit raw value.
///
/// Division truncates toward zero. Conversions to and from integer cell
/// coordinates are explicit ([`Fixed::from_int`], [`Fixed::to_int`]).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fixed(i32);

impl Fixed {
    /// Zero.
    pub const ZERO: Self = Self(0);
    /// One (raw `1 << 16`).
    pub const ONE: Self = Self(1 << FIXED_FRACTION_BITS);

    /// Construct from an integer, saturating at the representable range.
    #[must_use]
    pub fn from_int(n: i32) -> Self {
        Self(i32::try_from(i64::from(n) << FIXED_FRACTION_BITS).unwrap_or(if n < 0 {
            i32::MIN
        } else {
            i32::MAX
        }))
    }

    /// Construct directly from raw Q16.16 bits.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Return the raw Q16.16 representation.
    #[must_use]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Integer part, truncated toward zero.
    #[must_use]
    pub fn to_int(self) -> i32 {
        self.0 / (1 << FIXED_FRACTION_BITS)
    }

    /// Absolute value (saturating at `i32::MAX` for `i32::MIN`).
    #[must_use]
    pub fn abs(self) -> Self {
        Self(self.0.saturating_abs())
    }

    /// Integer square root of a non-negative value.
    #[must_use]
    pub fn sqrt(self) -> Self {
        debug_assert!(self.0 >= 0, "sqrt of negative fixed");
        // sqrt over raw<<16 keeps the result in Q16.16.
        Self(isqrt_i64(i64::from(self.0) << FIXED_FRACTION_BITS) as i32)
    }
}

/// Integer square root (floor) over a non-negative i64.
pub(crate) fn isqrt_i64(n: i64) -> i64 {
    if n <= 0 {
        return 0;
    }
    let mut x = n;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}

impl Add for Fixed {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0.wrapping_add(rhs.0))
    }
}

impl AddAssign for Fixed {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Fixed {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0.wrapping_sub(rhs.0))
    }
}

impl SubAssign for Fixed {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Neg for Fixed {
    type Output = Self;
    fn neg(self) -> Self {
        Self(self.0.wrapping_neg())
    }
}

impl Mul for Fixed {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self(((i64::from(self.0) * i64::from(rhs.0)) >> FIXED_FRACTION_BITS) as i32)
    }
}

impl Div for Fixed {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        debug_assert!(rhs.0 != 0, "fixed division by zero");
        // i64 division truncates toward zero, which is the contract here.
        Self(((i64::from(self.0) << FIXED_FRACTION_BITS) / i64::from(rhs.0)) as i32)
    }
}

/// Two 32-bit signed integers; tile and pixel space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IVec2 {
    /// Horizontal component.
    pub x: i32,
    /// Vertical component.
    pub y: i32,
}

impl IVec2 {
    /// Construct from components.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Sentinel used for "no cell" (rally points, ignore cells).
    pub const NONE: Self = Self::new(-1, -1);

    /// Manhattan distance between two points.
    #[must_use]
    pub fn manhattan_distance(a: Self, b: Self) -> i32 {
        (a.x - b.x).abs() + (a.y - b.y).abs()
    }

    /// Chebyshev distance between two points.
    #[must_use]
    pub fn chebyshev_distance(a: Self, b: Self) -> i32 {
        (a.x - b.x).abs().max((a.y - b.y).abs())
    }

    /// Squared Euclidean distance between two points.
    #[must_use]
    pub fn euclidean_distance_squared(a: Self, b: Self) -> i64 {
        let dx = i64::from(a.x - b.x);
        let dy = i64::from(a.y - b.y);
        dx * dx + dy * dy
    }
}

impl Add for IVec2 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for IVec2 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<i32> for IVec2 {
    type Output = Self;
    fn mul(self, rhs: i32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

/// Two fixed-point scalars; sub-tile position space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FVec2 {
    /// Horizontal component.
    pub x: Fixed,
    /// Vertical component.
    pub y: Fixed,
}

impl FVec2 {
    /// Construct from components.
    #[must_use]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Convert a pixel-space integer vector, saturating per component.
    #[must_use]
    pub fn from_ivec2(v: IVec2) -> Self {
        Self::new(Fixed::from_int(v.x), Fixed::from_int(v.y))
    }

    /// Truncate both components toward zero into pixel space.
    #[must_use]
    pub fn to_ivec2(self) -> IVec2 {
        IVec2::new(self.x.to_int(), self.y.to_int())
    }

    /// Euclidean distance to another position.
    #[must_use]
    pub fn distance_to(self, other: Self) -> Fixed {
        let dx = i64::from(other.x.raw() - self.x.raw());
        let dy = i64::from(other.y.raw() - self.y.raw());
        // raw deltas carry 16 fraction bits, so the squared sum carries 32 and
        // its integer square root lands back on 16.
        Fixed::from_raw(isqrt_i64(dx * dx + dy * dy) as i32)
    }
}

impl Add for FVec2 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for FVec2 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for FVec2 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<Fixed> for FVec2 {
    type Output = Self;
    fn mul(self, rhs: Fixed) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

/// Eight-way facing, clockwise from north.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    /// Up.
    North = 0,
    /// Up-right.
    NorthEast = 1,
    /// Right.
    East = 2,
    /// Down-right.
    SouthEast = 3,
    /// Down.
    #[default]
    South = 4,
    /// Down-left.
    SouthWest = 5,
    /// Left.
    West = 6,
    /// Up-left.
    NorthWest = 7,
}

/// Number of [`Direction`] variants.
pub const DIRECTION_COUNT: u8 = 8;

/// Raw Q16.16 value of `1/sqrt(2)`, the diagonal step component.
const DIAGONAL_RAW: i32 = 46341;

/// Cell-space step for each direction, clockwise from north.
pub const DIRECTION_IVEC2: [IVec2; 8] = [
    IVec2::new(0, -1),
    IVec2::new(1, -1),
    IVec2::new(1, 0),
    IVec2::new(1, 1),
    IVec2::new(0, 1),
    IVec2::new(-1, 1),
    IVec2::new(-1, 0),
    IVec2::new(-1, -1),
];

/// Unit-length position-space step for each direction.
pub const DIRECTION_FVEC2: [FVec2; 8] = [
    FVec2::new(Fixed::ZERO, Fixed::from_raw(-(1 << 16))),
    FVec2::new(Fixed::from_raw(DIAGONAL_RAW), Fixed::from_raw(-DIAGONAL_RAW)),
    FVec2::new(Fixed::ONE, Fixed::ZERO),
    FVec2::new(Fixed::from_raw(DIAGONAL_RAW), Fixed::from_raw(DIAGONAL_RAW)),
    FVec2::new(Fixed::ZERO, Fixed::ONE),
    FVec2::new(Fixed::from_raw(-DIAGONAL_RAW), Fixed::from_raw(DIAGONAL_RAW)),
    FVec2::new(Fixed::from_raw(-(1 << 16)), Fixed::ZERO),
    FVec2::new(Fixed::from_raw(-DIAGONAL_RAW), Fixed::from_raw(-DIAGONAL_RAW)),
];

impl Direction {
    /// Direction of a single-cell step. The step must be one of the eight
    /// neighbors; anything else returns [`Direction::South`].
    #[must_use]
    pub fn from_step(step: IVec2) -> Self {
        match (step.x.signum(), step.y.signum()) {
            (0, -1) => Self::North,
            (1, -1) => Self::NorthEast,
            (1, 0) => Self::East,
            (1, 1) => Self::SouthEast,
            (-1, 1) => Self::SouthWest,
            (-1, 0) => Self::West,
            (-1, -1) => Self::NorthWest,
            _ => Self::South,
        }
    }

    /// The opposite facing.
    #[must_use]
    pub fn opposite(self) -> Self {
        Self::from_index((self as u8 + 4) % DIRECTION_COUNT)
    }

    /// Facing for a wrapped index.
    #[must_use]
    pub fn from_index(index: u8) -> Self {
        match index % DIRECTION_COUNT {
            0 => Self::North,
            1 => Self::NorthEast,
            2 => Self::East,
            3 => Self::SouthEast,
            5 => Self::SouthWest,
            6 => Self::West,
            7 => Self::NorthWest,
            _ => Self::South,
        }
    }
}

/// Axis-aligned cell rectangle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width in cells.
    pub w: i32,
    /// Height in cells.
    pub h: i32,
}

impl Rect {
    /// Construct from origin and size.
    #[must_use]
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    /// A square rect rooted at `origin`.
    #[must_use]
    pub const fn square(origin: IVec2, size: i32) -> Self {
        Self::new(origin.x, origin.y, size, size)
    }

    /// Whether the point lies inside the rect.
    #[must_use]
    pub fn has_point(&self, p: IVec2) -> bool {
        p.x >= self.x && p.x < self.x + self.w && p.y >= self.y && p.y < self.y + self.h
    }

    /// Whether two rects overlap.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.x < other.x + other.w
            && other.x < self.x + self.w
            && self.y < other.y + other.h
            && other.y < self.y + self.h
    }

    /// Whether two rects touch without overlapping (8-adjacency).
    #[must_use]
    pub fn is_adjacent_to(&self, other: &Self) -> bool {
        let grown = Self::new(self.x - 1, self.y - 1, self.w + 2, self.h + 2);
        grown.intersects(other) && !self.intersects(other)
    }

    /// Squared Euclidean gap between two rects (zero when touching or
    /// overlapping).
    #[must_use]
    pub fn euclidean_distance_squared_between(a: &Self, b: &Self) -> i64 {
        let dx = i64::from((a.x - (b.x + b.w - 1)).max(b.x - (a.x + a.w - 1)).max(0));
        let dy = i64::from((a.y - (b.y + b.h - 1)).max(b.y - (a.y + a.h - 1)).max(0));
        dx * dx + dy * dy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_division_truncates_toward_zero() {
        let seven = Fixed::from_int(7);
        let two = Fixed::from_int(2);
        assert_eq!((seven / two).raw(), (7 << 16) / 2);
        assert_eq!(((-seven) / two).to_int(), -3);
        assert_eq!((seven / two).to_int(), 3);
    }

    #[test]
    fn fixed_sqrt_matches_integers() {
        assert_eq!(Fixed::from_int(144).sqrt(), Fixed::from_int(12));
        assert_eq!(Fixed::from_int(0).sqrt(), Fixed::ZERO);
        assert_eq!(Fixed::from_int(1).sqrt(), Fixed::ONE);
    }

    #[test]
    fn diagonal_steps_have_unit_length() {
        for step in DIRECTION_FVEC2 {
            let len = FVec2::default().distance_to(step);
            // Within one raw bit of 1.0.
            assert!((len.raw() - Fixed::ONE.raw()).abs() <= 1, "len {len:?}");
        }
    }

    #[test]
    fn direction_round_trips_steps() {
        for (i, step) in DIRECTION_IVEC2.iter().enumerate() {
            assert_eq!(Direction::from_step(*step) as usize, i);
        }
        assert_eq!(Direction::North.opposite(), Direction::South);
        assert_eq!(Direction::NorthEast.opposite(), Direction::SouthWest);
    }

    #[test]
    fn rect_adjacency_excludes_overlap() {
        let a = Rect::new(0, 0, 2, 2);
        assert!(a.is_adjacent_to(&Rect::new(2, 2, 1, 1)));
        assert!(a.is_adjacent_to(&Rect::new(0, 2, 3, 1)));
        assert!(!a.is_adjacent_to(&Rect::new(1, 1, 2, 2)));
        assert!(!a.is_adjacent_to(&Rect::new(3, 0, 1, 1)));
    }

    #[test]
    fn rect_gap_distance() {
        let a = Rect::new(0, 0, 1, 1);
        let b = Rect::new(3, 4, 1, 1);
        assert_eq!(Rect::euclidean_distance_squared_between(&a, &b), 4 + 9);
        let touching = Rect::new(1, 1, 1, 1);
        assert_eq!(Rect::euclidean_distance_squared_between(&a, &touching), 0);
    }
}
