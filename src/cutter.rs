use crate::axis::{AxisDescriptor, AxisSet, SplitAxisPair};
use crate::common::{align_up, ceil_div, Extent};

use serde::{Deserialize, Serialize};

/// The outcome of searching one axis ordering for the axis to split.
///
/// `tile_mask` holds the axes which fit in the tile whole. When some axis does not fit,
/// `cut_axis_index` is its position in the searched ordering, `cut_mask` is its singleton set,
/// and `inner`/`outer` are its halves. When every axis fits there is no cut: `cut_axis_index` is
/// `None`, `cut_mask` is empty, and `inner`/`outer` describe the first axis of the ordering left
/// whole (outer extent 1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct CutResult {
    pub tile_mask: AxisSet,
    pub cut_mask: AxisSet,
    pub cut_axis_index: Option<usize>,
    pub inner: AxisDescriptor,
    pub outer: AxisDescriptor,
    /// Extent of the cut axis before splitting.
    pub cut_extent: Extent,
}

/// A stateful cutter over one ordering of a copy's axes.
///
/// The final logical axis (the contiguous, alignment-bearing one) is accounted at its extent
/// rounded up to the alignment quantum, since a tile always holds whole aligned rows of it.
#[derive(Clone, Debug)]
pub struct AxisCutter {
    axes: Vec<AxisDescriptor>,
    final_axis: u32,
    quantum: Extent,
}

impl CutResult {
    pub fn has_cut(&self) -> bool {
        self.cut_axis_index.is_some()
    }

    /// `false` when the budget could not hold a single element of the cut axis.
    ///
    /// This is a signal for the caller to fall back to a simpler plan.
    pub fn is_viable(&self) -> bool {
        !self.has_cut() || self.inner.extent > 0
    }

    pub fn cut_logical_index(&self) -> Option<u32> {
        self.cut_axis_index.map(|_| self.inner.logical_index)
    }

    /// The cut axis's halves, if there is a viable cut.
    pub fn split(&self) -> Option<SplitAxisPair> {
        if !self.has_cut() || self.inner.extent == 0 {
            return None;
        }
        Some(SplitAxisPair {
            inner: self.inner,
            outer: self.outer,
            original_extent: self.cut_extent,
        })
    }
}

/// Finds the axis of `axes` to split so that the tile fits `budget` elements.
///
/// Axes are scanned from the last (innermost) outward. Every axis whose inclusion keeps the
/// running product of extents within `budget` is placed in the tile; the first axis which would
/// exceed it is cut with an inner extent of `budget / running_product`.
///
/// Panics if `axes` is empty.
pub fn find_cut(axes: &[AxisDescriptor], budget: u64) -> CutResult {
    find_cut_accounted(axes, budget, |a| a.extent)
}

fn find_cut_accounted<F>(axes: &[AxisDescriptor], budget: u64, accounted: F) -> CutResult
where
    F: Fn(&AxisDescriptor) -> Extent,
{
    assert!(!axes.is_empty(), "cannot cut an empty axis list");
    let mut product: u64 = 1;
    let mut tile_mask = AxisSet::empty();
    for (idx, axis) in axes.iter().enumerate().rev() {
        match product.checked_mul(accounted(axis)) {
            Some(p) if p <= budget => {
                product = p;
                tile_mask = tile_mask.union(axis.membership_mask());
            }
            _ => {
                let inner_extent = (budget / product).min(axis.extent);
                let (inner, outer) = match axis.split(inner_extent) {
                    Some(pair) => (pair.inner, pair.outer),
                    None => (
                        AxisDescriptor::new(0, axis.stride, axis.logical_index),
                        AxisDescriptor::new(0, 0, axis.logical_index),
                    ),
                };
                return CutResult {
                    tile_mask,
                    cut_mask: axis.membership_mask(),
                    cut_axis_index: Some(idx),
                    inner,
                    outer,
                    cut_extent: axis.extent,
                };
            }
        }
    }

    let first = axes[0];
    CutResult {
        tile_mask,
        cut_mask: AxisSet::empty(),
        cut_axis_index: None,
        inner: first,
        outer: AxisDescriptor::new(
            1,
            first.stride.saturating_mul(first.extent as i64),
            first.logical_index,
        ),
        cut_extent: first.extent,
    }
}

/// Finds an inner extent that splits `extent` into equal parts while keeping the tile between
/// 90% and 100% of `budget`, where `tile_product` is the accounted size of the axes already in
/// the tile.
///
/// Tile sizes are tried from `budget` downward; the first one which divides both the whole
/// `extent * tile_product` and, in outer steps, `extent` itself wins. Returns `None` when no
/// such tile exists in the window.
pub fn even_inner_extent(extent: Extent, tile_product: u64, budget: u64) -> Option<Extent> {
    if extent == 0 || tile_product == 0 {
        return None;
    }
    let whole = extent.checked_mul(tile_product)?;
    let lowest = ceil_div(budget.saturating_mul(9), 10).max(1);
    (lowest..=budget.min(whole)).rev().find_map(|tile| {
        if whole % tile != 0 {
            return None;
        }
        let outer = whole / tile;
        (extent % outer == 0).then(|| extent / outer)
    })
}

impl AxisCutter {
    pub fn new(axes: Vec<AxisDescriptor>, final_axis: u32, quantum: Extent) -> Self {
        debug_assert!(quantum > 0);
        AxisCutter {
            axes,
            final_axis,
            quantum,
        }
    }

    pub fn axes(&self) -> &[AxisDescriptor] {
        &self.axes
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    pub fn accounted_extent(&self, axis: &AxisDescriptor) -> Extent {
        if axis.logical_index == self.final_axis {
            align_up(axis.extent, self.quantum)
        } else {
            axis.extent
        }
    }

    /// Runs [find_cut] over the remaining axes with aligned accounting of the final axis.
    ///
    /// Returns `None` once every axis has been removed.
    pub fn find_cut(&self, budget: u64) -> Option<CutResult> {
        if self.axes.is_empty() {
            return None;
        }
        Some(find_cut_accounted(&self.axes, budget, |a| {
            self.accounted_extent(a)
        }))
    }

    /// Removes the axes in `set` from further consideration.
    pub fn remove(&mut self, set: AxisSet) {
        self.axes.retain(|a| !set.contains(a.logical_index));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn axes(shape: &[(u64, i64)]) -> Vec<AxisDescriptor> {
        shape
            .iter()
            .enumerate()
            .map(|(i, &(e, s))| AxisDescriptor::new(e, s, i as u32))
            .collect()
    }

    #[test]
    fn test_everything_fits() {
        let result = find_cut(&axes(&[(4, 100), (8, 1)]), 64);
        assert!(!result.has_cut());
        assert!(result.is_viable());
        assert_eq!(result.tile_mask, [0, 1].into_iter().collect());
        assert!(result.cut_mask.is_empty());
        assert_eq!(result.inner, AxisDescriptor::new(4, 100, 0));
        assert_eq!(result.outer.extent, 1);
    }

    #[test]
    fn test_even_inner_extent_avoids_tail() {
        assert_eq!(even_inner_extent(1200, 8, 2480), Some(300));
        assert_eq!(even_inner_extent(100, 8, 32), Some(4));
        assert_eq!(even_inner_extent(1000, 1000, 4096), Some(4));
        // No divisor of 800 within 90% of 64.
        assert_eq!(even_inner_extent(100, 8, 64), None);
    }

    #[test]
    fn test_cuts_outer_axis() {
        let result = find_cut(&axes(&[(100, 8), (8, 1)]), 32);
        assert_eq!(result.cut_axis_index, Some(0));
        assert_eq!(result.tile_mask, AxisSet::single(1).unwrap());
        assert_eq!(result.cut_mask, AxisSet::single(0).unwrap());
        assert_eq!(result.inner, AxisDescriptor::new(4, 8, 0));
        assert_eq!(result.outer, AxisDescriptor::new(25, 32, 0));
    }

    #[test]
    fn test_nothing_fits_cuts_innermost() {
        let result = find_cut(&axes(&[(4, 64), (64, 1)]), 16);
        assert_eq!(result.cut_axis_index, Some(1));
        assert!(result.tile_mask.is_empty());
        assert_eq!(result.inner.extent, 16);
        assert_eq!(result.outer.extent, 4);
    }

    #[test]
    fn test_zero_budget_is_not_viable() {
        let result = find_cut(&axes(&[(4, 64), (64, 1)]), 0);
        assert!(!result.is_viable());
        assert_eq!(result.inner.extent, 0);
        assert!(result.split().is_none());
    }

    #[test]
    fn test_cutter_accounts_final_axis_aligned() {
        // The final axis (extent 10) is accounted as 16 with an 8-element quantum.
        let cutter = AxisCutter::new(axes(&[(6, 10), (10, 1)]), 1, 8);
        let result = cutter.find_cut(32).unwrap();
        assert_eq!(result.tile_mask, AxisSet::single(1).unwrap());
        assert_eq!(result.inner.extent, 2);
        assert_eq!(result.outer.extent, 3);
    }

    #[test]
    fn test_cutter_remove() {
        let mut cutter = AxisCutter::new(axes(&[(6, 10), (10, 1), (3, 100)]), 2, 8);
        cutter.remove([0, 2].into_iter().collect());
        assert_eq!(cutter.axes(), &[AxisDescriptor::new(10, 1, 1)]);
        cutter.remove(AxisSet::single(1).unwrap());
        assert!(cutter.is_empty());
        assert!(cutter.find_cut(100).is_none());
    }

    proptest! {
        #[test]
        fn test_cut_fits_budget(
            shape in prop::collection::vec((1u64..=40, 0i64..=500), 1..=6),
            budget in 1u64..=4096
        ) {
            let axes = axes(&shape);
            let result = find_cut(&axes, budget);
            let tile: u64 = axes
                .iter()
                .filter(|a| result.tile_mask.contains(a.logical_index))
                .map(|a| a.extent)
                .product();
            prop_assert!(tile <= budget);
            if let Some(split) = result.split() {
                prop_assert!(tile * split.inner.extent <= budget);
                prop_assert!(split.reconstructs());
                prop_assert!(result.tile_mask.intersection(result.cut_mask).is_empty());
            } else {
                prop_assert_eq!(result.tile_mask.len(), axes.len());
            }
        }
    }
}
