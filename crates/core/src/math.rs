//! Fixed-point arithmetic on 256-bit integers.
//!
//! Every quantity in the engine is an unsigned integer scaled by one of the
//! pool's [`MasterConstants`](crate::config::MasterConstants). Operations
//! multiply first and divide last, and division truncates, so results match
//! the on-chain contract bit for bit.

use alloy::primitives::U256;

/// 2^64 as f64, for limb-wise conversion.
const LIMB_BASE: f64 = 18_446_744_073_709_551_616.0;

/// `a * b / scale`.
#[inline(always)]
pub fn scaled_mul(a: U256, b: U256, scale: U256) -> U256 {
    (a * b) / scale
}

/// `x * y / z`.
#[inline(always)]
pub fn mul_div(x: U256, y: U256, z: U256) -> U256 {
    (x * y) / z
}

/// Power of 10 as U256.
#[inline]
pub fn pow10(exp: u8) -> U256 {
    U256::from(10u64).pow(U256::from(exp))
}

/// Safe minimum of two U256 values
#[inline(always)]
pub fn min(a: U256, b: U256) -> U256 {
    if a < b {
        a
    } else {
        b
    }
}

/// Safe maximum of two U256 values
#[inline(always)]
pub fn max(a: U256, b: U256) -> U256 {
    if a > b {
        a
    } else {
        b
    }
}

/// Convert a raw U256 to f64.
/// Use only for display/logging and ratio outputs, not for computation.
pub fn raw_to_f64(value: U256) -> f64 {
    value
        .as_limbs()
        .iter()
        .rev()
        .fold(0.0, |acc, limb| acc * LIMB_BASE + *limb as f64)
}

/// Convert a scaled value to f64 (e.g. a 1e12-scaled rate to a fraction).
pub fn to_f64(value: U256, scale: U256) -> f64 {
    if scale.is_zero() {
        return 0.0;
    }
    raw_to_f64(value) / raw_to_f64(scale)
}

/// `num / den` as f64. Returns 0.0 when `den` is zero.
pub fn ratio_f64(num: U256, den: U256) -> f64 {
    to_f64(num, den)
}
