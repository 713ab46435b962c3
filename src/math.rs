//! Simple math utilities and the `Vec2` type used throughout the crate.

use crate::error::{Error, Result, usize_to_i32, i32_to_usize};
use std::ops::{Add, Sub, Mul, Div, Neg};
use std::fmt::{Debug, Formatter};

/// Computes `floor(log(x)/log(2))`.
pub fn floor_log_2(mut number: usize) -> usize {
    debug_assert_ne!(number, 0);

    let mut log = 0;
    while number > 1 {
        log += 1;
        number >>= 1;
    }

    log
}

/// Computes `ceil(log(x)/log(2))`.
pub fn ceil_log_2(mut number: usize) -> usize {
    debug_assert_ne!(number, 0);

    let mut log = 0;
    let mut round_up = 0;

    while number > 1 {
        if number & 1 != 0 {
            round_up = 1;
        }

        log += 1;
        number >>= 1;
    }

    log + round_up
}

/// Whether to round up or down when calculating Mip/Rip levels and tile counts.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum RoundingMode {
    /// Round down, clamped to a minimum of one.
    Down,

    /// Round up.
    Up,
}

impl RoundingMode {
    /// Compute `log2` of a number, rounded as specified.
    pub fn log2(self, number: usize) -> usize {
        match self {
            RoundingMode::Down => floor_log_2(number),
            RoundingMode::Up => ceil_log_2(number),
        }
    }

    /// Divide `dividend` by `divisor`, rounding as specified. Only valid for positive numbers.
    pub fn divide(self, dividend: usize, divisor: usize) -> usize {
        match self {
            RoundingMode::Up => (dividend + divisor - 1) / divisor,
            RoundingMode::Down => dividend / divisor,
        }
    }
}

/// A 2D vector of any numeric type, used for sizes, positions, and sampling rates.
#[derive(Copy, Clone, PartialEq, Eq, Default, Hash)]
pub struct Vec2<T>(pub T, pub T);

impl<T: Copy> Vec2<T> {
    /// The first component, typically the horizontal position or width.
    pub fn x(self) -> T { self.0 }

    /// The second component, typically the vertical position or height.
    pub fn y(self) -> T { self.1 }

    /// Alias for `x`, used when this vector represents a size.
    pub fn width(self) -> T { self.0 }

    /// Alias for `y`, used when this vector represents a size.
    pub fn height(self) -> T { self.1 }
}

impl Vec2<usize> {
    /// Number of pixels contained in a rectangle of this size: `width * height`.
    pub fn area(self) -> usize { self.0 * self.1 }

    /// Losslessly converts this vector to a signed 32-bit vector, panicking on overflow.
    pub fn to_i32(self) -> Vec2<i32> {
        Vec2(usize_to_i32(self.0), usize_to_i32(self.1))
    }

    /// Converts this vector to an `f32` vector. May lose precision for very large values.
    pub fn to_f32(self) -> Vec2<f32> {
        Vec2(self.0 as f32, self.1 as f32)
    }
}

impl Vec2<i32> {
    /// Converts this vector to a `usize` vector, failing if any component is negative.
    pub fn to_usize(self, error_message: &'static str) -> Result<Vec2<usize>> {
        Ok(Vec2(
            i32_to_usize(self.0, error_message)?,
            i32_to_usize(self.1, error_message)?,
        ))
    }

    /// Converts this vector to an `f32` vector.
    pub fn to_f32(self) -> Vec2<f32> {
        Vec2(self.0 as f32, self.1 as f32)
    }
}

impl Vec2<f32> {
    /// Converts this vector to a `usize` vector, failing if any component is negative or not finite.
    pub fn to_usize(self, error_message: &'static str) -> Result<Vec2<usize>> {
        if !self.0.is_finite() || !self.1.is_finite() || self.0 < 0.0 || self.1 < 0.0 {
            return Err(Error::invalid(error_message));
        }

        Ok(Vec2(self.0 as usize, self.1 as usize))
    }
}

impl<T: Add<Output = T>> Add for Vec2<T> {
    type Output = Self;
    fn add(self, other: Self) -> Self { Vec2(self.0 + other.0, self.1 + other.1) }
}

impl<T: Sub<Output = T>> Sub for Vec2<T> {
    type Output = Self;
    fn sub(self, other: Self) -> Self { Vec2(self.0 - other.0, self.1 - other.1) }
}

impl<T: Mul<Output = T> + Copy> Mul<T> for Vec2<T> {
    type Output = Self;
    fn mul(self, scalar: T) -> Self { Vec2(self.0 * scalar, self.1 * scalar) }
}

impl<T: Div<Output = T> + Copy> Div<T> for Vec2<T> {
    type Output = Self;
    fn div(self, scalar: T) -> Self { Vec2(self.0 / scalar, self.1 / scalar) }
}

impl<T: Neg<Output = T>> Neg for Vec2<T> {
    type Output = Self;
    fn neg(self) -> Self { Vec2(-self.0, -self.1) }
}

impl<T> From<(T, T)> for Vec2<T> {
    fn from((x, y): (T, T)) -> Self { Vec2(x, y) }
}

impl<T> From<Vec2<T>> for (T, T) {
    fn from(vec: Vec2<T>) -> Self { (vec.0, vec.1) }
}

impl<T: Debug> Debug for Vec2<T> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "({:?}, {:?})", self.0, self.1)
    }
}

/// The number of tiles needed to cover `full_res` pixels with tiles of `tile_size`, rounding up.
pub fn compute_tile_count(full_res: usize, tile_size: usize) -> usize {
    RoundingMode::Up.divide(full_res, tile_size)
}

/// The number of mip map levels needed to go from `full_res` down to a single pixel.
pub fn compute_level_count(round: RoundingMode, full_res: usize) -> usize {
    round.log2(full_res) + 1
}

/// The resolution of the mip map level at `level_index`, clamped to a minimum of one pixel.
pub fn compute_level_size(round: RoundingMode, full_res: usize, level_index: usize) -> usize {
    round.divide(full_res, 1 << level_index).max(1)
}

/// Euclidean-style division that rounds towards negative infinity, needed because sample
/// positions may be negative (the data window is not anchored at the origin) while sampling
/// rates are always positive.
fn div_p(x: i32, y: i32) -> i32 {
    if x >= 0 {
        if y >= 0 { x / y }
        else { -(x / -y) }
    }
    else {
        if y >= 0 { -((y - 1 - x) / y) }
        else { (-y - 1 - x) / -y }
    }
}

/// The remainder of [`div_p`]. Used to test whether a possibly-negative row or column
/// coordinate falls on a sampled line for a given (always positive) subsampling rate.
pub fn mod_p(x: i32, y: usize) -> i32 {
    let y = usize_to_i32(y);
    x - y * div_p(x, y)
}

/// The number of sampled positions in the inclusive range `[range_min, range_max]` for a
/// channel with the given subsampling rate, following the same rounding `div_p` uses.
pub fn num_samples(sampling: usize, range_min: i32, range_max: i32) -> usize {
    let sampling = usize_to_i32(sampling);
    let min_index = div_p(range_min, sampling);
    let max_index = div_p(range_max, sampling);
    (max_index - min_index + 1) as usize
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn vec2_arithmetic() {
        assert_eq!(Vec2(1, 2) + Vec2(3, 4), Vec2(4, 6));
        assert_eq!(Vec2(5, 7) - Vec2(2, 3), Vec2(3, 4));
        assert_eq!(Vec2(2_usize, 3_usize).area(), 6);
    }

    #[test]
    fn level_sizes() {
        assert_eq!(compute_level_size(RoundingMode::Down, 7, 1), 3);
        assert_eq!(compute_level_size(RoundingMode::Up, 7, 1), 4);
        assert_eq!(compute_level_count(RoundingMode::Down, 8), 4);
    }

    #[test]
    fn mod_p_wraps_negative_coordinates() {
        assert_eq!(mod_p(0, 2), 0);
        assert_eq!(mod_p(1, 2), 1);
        assert_eq!(mod_p(-1, 2), 1);
        assert_eq!(mod_p(-2, 2), 0);
    }

    #[test]
    fn num_samples_counts_subsampled_positions() {
        assert_eq!(num_samples(1, 0, 9), 10);
        assert_eq!(num_samples(2, 0, 9), 5);
        assert_eq!(num_samples(2, -4, 5), 5);
    }
}
