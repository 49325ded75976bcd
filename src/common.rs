use divrem::DivCeil;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Number of elements along an axis.
pub type Extent = u64;
/// Element (not byte) distance between consecutive indices of an axis.
pub type Stride = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum Dtype {
    Uint8,
    Sint8,
    Uint16,
    Sint16,
    Float16,
    Bfloat16,
    Uint32,
    Sint32,
    Float32,
    Uint64,
    Sint64,
    Complex64,
}

impl Dtype {
    /// The bytes required to represent a value of this Dtype.
    pub fn size(&self) -> u8 {
        match self {
            Dtype::Uint8 | Dtype::Sint8 => 1,
            Dtype::Uint16 | Dtype::Sint16 | Dtype::Float16 | Dtype::Bfloat16 => 2,
            Dtype::Uint32 | Dtype::Sint32 | Dtype::Float32 => 4,
            Dtype::Uint64 | Dtype::Sint64 | Dtype::Complex64 => 8,
        }
    }
}

impl Display for Dtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dtype::Uint8 => write!(f, "u8"),
            Dtype::Sint8 => write!(f, "i8"),
            Dtype::Uint16 => write!(f, "u16"),
            Dtype::Sint16 => write!(f, "i16"),
            Dtype::Float16 => write!(f, "f16"),
            Dtype::Bfloat16 => write!(f, "bf16"),
            Dtype::Uint32 => write!(f, "u32"),
            Dtype::Sint32 => write!(f, "i32"),
            Dtype::Float32 => write!(f, "f32"),
            Dtype::Uint64 => write!(f, "u64"),
            Dtype::Sint64 => write!(f, "i64"),
            Dtype::Complex64 => write!(f, "c64"),
        }
    }
}

/// Returns `ceil(n / d)`.
///
/// `d` must be non-zero.
pub fn ceil_div(n: u64, d: u64) -> u64 {
    debug_assert_ne!(d, 0);
    DivCeil::div_ceil(n, d)
}

/// Rounds `n` up to the next multiple of `quantum`.
pub fn align_up(n: u64, quantum: u64) -> u64 {
    ceil_div(n, quantum) * quantum
}

/// Rounds `n` down to a multiple of `quantum`. May return zero.
pub fn align_down(n: u64, quantum: u64) -> u64 {
    n / quantum * quantum
}

/// Rounds a tile factor to the alignment quantum: up when it is smaller than one quantum,
/// down otherwise.
///
/// # Examples
/// ```
/// # use stridetile::common::align_tile_factor;
/// assert_eq!(align_tile_factor(3, 8), 8);
/// assert_eq!(align_tile_factor(8, 8), 8);
/// assert_eq!(align_tile_factor(21, 8), 16);
/// assert_eq!(align_tile_factor(0, 8), 0);
/// ```
pub fn align_tile_factor(n: u64, quantum: u64) -> u64 {
    if n < quantum {
        align_up(n, quantum)
    } else {
        align_down(n, quantum)
    }
}

/// Returns `floor(sqrt(n))`.
///
/// # Examples
/// ```
/// # use stridetile::common::isqrt;
/// assert_eq!(isqrt(0), 0);
/// assert_eq!(isqrt(15), 3);
/// assert_eq!(isqrt(16), 4);
/// assert_eq!(isqrt(u64::MAX), 4_294_967_295);
/// ```
pub fn isqrt(n: u64) -> u64 {
    if n < 2 {
        return n;
    }
    // Newton's iteration from an over-estimate converges from above.
    let mut x = 1u64 << (64 - n.leading_zeros()).div_ceil(2);
    loop {
        let y = (x + n / x) / 2;
        if y >= x {
            return x;
        }
        x = y;
    }
}

/// Multiplies extents, returning `None` on overflow.
pub fn checked_product<I: IntoIterator<Item = u64>>(extents: I) -> Option<u64> {
    extents
        .into_iter()
        .try_fold(1u64, |acc, e| acc.checked_mul(e))
}
