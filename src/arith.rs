//! Integer arithmetic with well defined rounding
//!
//! Rust's `/` and `%` truncate toward zero. Block and chunk coordinates need
//! the quotient to round toward negative infinity instead, so that `-1 / 16`
//! lands in chunk `-1` rather than chunk `0`.

/// Return the greater of two values
#[inline]
pub fn max(x: i32, y: i32) -> i32 {
    if x > y { x } else { y }
}

/// Return the smaller of two values
#[inline]
pub fn min(x: i32, y: i32) -> i32 {
    if x > y { y } else { x }
}

/// Integer division rounding toward negative infinity
///
/// Panics if `y` is zero, like the `/` operator.
#[inline]
pub fn div(x: i32, y: i32) -> i32 {
    let q = x / y;
    if (x % y != 0) && ((x < 0) != (y < 0)) {
        q - 1
    } else {
        q
    }
}

/// Modulo whose result takes the sign of the divisor
///
/// Always satisfies `div(x, y) * y + modulo(x, y) == x`.
#[inline]
pub fn modulo(x: i32, y: i32) -> i32 {
    let r = x % y;
    if r != 0 && ((x < 0) != (y < 0)) {
        r + y
    } else {
        r
    }
}

/// Floor of `x / y`
#[inline]
pub fn floor_div(x: i32, y: i32) -> i32 {
    div(x, y)
}

/// Ceiling of `x / y`
#[inline]
pub fn ceil_div(x: i32, y: i32) -> i32 {
    div(x, y) + i32::from(x % y != 0)
}
