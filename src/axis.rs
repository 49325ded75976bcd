use crate::common::{ceil_div, Extent, Stride};

use serde::{Deserialize, Serialize};
use std::fmt;

/// The largest number of logical axes an [AxisSet] can hold.
pub const MAX_SET_AXES: u32 = u64::BITS;

/// A set of logical axes, keyed by [AxisDescriptor::logical_index].
///
/// Set algebra over axis identities is how the two orderings of a copy are compared. The
/// 64-axis ceiling is checked at insertion.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct AxisSet(u64);

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("logical index {0} does not fit in an AxisSet")]
pub struct AxisIndexOutOfRange(pub u32);

/// One logical dimension of a copy, as seen from one side (source or destination).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct AxisDescriptor {
    pub extent: Extent,
    pub stride: Stride,
    pub logical_index: u32,
}

/// An axis cut into an inner (tile) half and an outer (loop) half.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct SplitAxisPair {
    pub inner: AxisDescriptor,
    pub outer: AxisDescriptor,
    pub original_extent: Extent,
}

impl AxisSet {
    pub const fn empty() -> Self {
        AxisSet(0)
    }

    /// Returns the set containing `0..count`.
    pub fn first_n(count: u32) -> Result<Self, AxisIndexOutOfRange> {
        if count > MAX_SET_AXES {
            return Err(AxisIndexOutOfRange(count - 1));
        }
        Ok(AxisSet(1u64.checked_shl(count).map_or(u64::MAX, |b| b - 1)))
    }

    pub fn single(logical_index: u32) -> Result<Self, AxisIndexOutOfRange> {
        1u64.checked_shl(logical_index)
            .map(AxisSet)
            .ok_or(AxisIndexOutOfRange(logical_index))
    }

    pub fn from_bits(bits: u64) -> Self {
        AxisSet(bits)
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    pub fn union(self, other: AxisSet) -> AxisSet {
        AxisSet(self.0 | other.0)
    }

    pub fn intersection(self, other: AxisSet) -> AxisSet {
        AxisSet(self.0 & other.0)
    }

    pub fn difference(self, other: AxisSet) -> AxisSet {
        AxisSet(self.0 & !other.0)
    }

    pub fn contains(&self, logical_index: u32) -> bool {
        logical_index < MAX_SET_AXES && self.0 & (1 << logical_index) != 0
    }

    pub fn insert(&mut self, logical_index: u32) -> Result<(), AxisIndexOutOfRange> {
        *self = self.union(AxisSet::single(logical_index)?);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_subset(&self, other: &AxisSet) -> bool {
        self.difference(*other).is_empty()
    }

    /// Iterates the logical indices in the set, ascending.
    pub fn iter(&self) -> impl Iterator<Item = u32> {
        let bits = self.0;
        (0..MAX_SET_AXES).filter(move |i| bits & (1 << i) != 0)
    }
}

impl FromIterator<u32> for AxisSet {
    /// Collects logical indices. Panics on indices of 64 or more.
    fn from_iter<T: IntoIterator<Item = u32>>(iter: T) -> Self {
        let mut set = AxisSet::empty();
        for idx in iter {
            set.insert(idx).unwrap();
        }
        set
    }
}

impl fmt::Debug for AxisSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for AxisSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, idx) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{idx}")?;
        }
        write!(f, "}}")
    }
}

impl AxisDescriptor {
    pub fn new(extent: Extent, stride: Stride, logical_index: u32) -> Self {
        debug_assert!(logical_index < MAX_SET_AXES);
        AxisDescriptor {
            extent,
            stride,
            logical_index,
        }
    }

    /// The singleton [AxisSet] identifying this axis.
    pub fn membership_mask(&self) -> AxisSet {
        AxisSet(1 << self.logical_index)
    }

    /// Splits this axis so that its inner half has `inner_extent` elements.
    ///
    /// Returns `None` if `inner_extent` is zero. An `inner_extent` larger than the axis is clamped
    /// to the axis's extent.
    pub fn split(&self, inner_extent: Extent) -> Option<SplitAxisPair> {
        if inner_extent == 0 {
            return None;
        }
        let inner_extent = inner_extent.min(self.extent);
        let inner_extent_i64 = Stride::try_from(inner_extent).ok()?;
        Some(SplitAxisPair {
            inner: AxisDescriptor::new(inner_extent, self.stride, self.logical_index),
            outer: AxisDescriptor::new(
                ceil_div(self.extent, inner_extent),
                self.stride.checked_mul(inner_extent_i64)?,
                self.logical_index,
            ),
            original_extent: self.extent,
        })
    }
}

impl fmt::Display for AxisDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}({}, {})", self.logical_index, self.extent, self.stride)
    }
}

impl SplitAxisPair {
    pub fn logical_index(&self) -> u32 {
        self.inner.logical_index
    }

    /// The inner extent of the last outer step.
    pub fn tail_extent(&self) -> Extent {
        self.original_extent - self.inner.extent * (self.outer.extent - 1)
    }

    /// Checks `inner * (outer - 1) < original <= inner * outer`.
    pub fn reconstructs(&self) -> bool {
        let (i, o) = (
            u128::from(self.inner.extent),
            u128::from(self.outer.extent),
        );
        let original = u128::from(self.original_extent);
        o >= 1 && i * (o - 1) < original && original <= i * o
    }
}
