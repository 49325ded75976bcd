use crate::axis::{AxisSet, SplitAxisPair};
use crate::common::{align_up, ceil_div, checked_product, Extent, Stride};
use crate::plan::{PlanAxis, SplitRecord, Strategy, TilingPlan};
use crate::planner::PlanError;
use crate::workers::partition;

use log::debug;
use smallvec::SmallVec;
use std::cmp::Reverse;
use std::num::NonZeroU32;

/// Assembles a [TilingPlan] from a tile decision over canonical axes.
#[derive(Debug, Clone)]
pub struct TilingPlanBuilder {
    /// Canonical axes, indexed by logical index.
    axes: Vec<PlanAxis>,
    capacity: u64,
    quantum: Extent,
    max_inner_axes: usize,
    workers: NonZeroU32,
}

impl TilingPlanBuilder {
    pub fn new(
        axes: Vec<PlanAxis>,
        capacity: u64,
        quantum: Extent,
        max_inner_axes: usize,
        workers: NonZeroU32,
    ) -> Self {
        debug_assert!(axes
            .iter()
            .enumerate()
            .all(|(i, a)| a.logical_index as usize == i));
        TilingPlanBuilder {
            axes,
            capacity,
            quantum,
            max_inner_axes,
            workers,
        }
    }

    fn final_axis(&self) -> u32 {
        self.axes.len().saturating_sub(1) as u32
    }

    /// Builds the plan placing `tile` whole and `splits` halved.
    ///
    /// `splits` may only carry the logical index and inner extent of their axes; strides are
    /// re-derived from the canonical axes.
    pub fn build(
        &self,
        strategy: Strategy,
        tile: AxisSet,
        splits: &[SplitAxisPair],
    ) -> Result<TilingPlan, PlanError> {
        let split_set = splits
            .iter()
            .map(|s| s.logical_index())
            .collect::<AxisSet>();
        debug_assert!(tile.intersection(split_set).is_empty());

        let mut whole_inner = self
            .axes
            .iter()
            .filter(|a| tile.contains(a.logical_index) && !split_set.contains(a.logical_index))
            .copied()
            .collect::<Vec<_>>();
        let mut outer_axes = self
            .axes
            .iter()
            .filter(|a| !tile.contains(a.logical_index) && !split_set.contains(a.logical_index))
            .copied()
            .collect::<Vec<_>>();
        outer_axes.extend(self.evict(&mut whole_inner, splits.len())?);

        let mut inner_axes = whole_inner;
        let mut records = SmallVec::<[SplitRecord; 2]>::new();
        for split in splits {
            let axis = self.axes[split.logical_index() as usize];
            let inner = split.inner.extent.min(axis.extent);
            if inner == 0 {
                return Err(PlanError::BudgetTooSmall {
                    capacity: self.capacity,
                    required: self.quantum,
                });
            }
            let scale = Stride::try_from(inner).map_err(|_| PlanError::ExtentOverflow)?;
            let outer = ceil_div(axis.extent, inner);
            inner_axes.push(PlanAxis { extent: inner, ..axis });
            outer_axes.push(PlanAxis {
                extent: outer,
                source_stride: axis
                    .source_stride
                    .checked_mul(scale)
                    .ok_or(PlanError::ExtentOverflow)?,
                destination_stride: axis
                    .destination_stride
                    .checked_mul(scale)
                    .ok_or(PlanError::ExtentOverflow)?,
                ..axis
            });
            records.push(SplitRecord {
                logical_index: axis.logical_index,
                inner_extent: inner,
                outer_extent: outer,
                tail_extent: axis.extent - inner * (outer - 1),
            });
        }
        inner_axes.sort_by_key(|a| a.logical_index);
        outer_axes.sort_by_key(|a| a.logical_index);

        let scratch_strides = self.scratch_strides(&inner_axes)?;
        let total = checked_product(outer_axes.iter().map(|a| a.extent))
            .ok_or(PlanError::ExtentOverflow)?;
        let plan = TilingPlan {
            strategy,
            axes: self.axes.clone(),
            outer_axes,
            inner_axes,
            scratch_strides,
            splits: records,
            workers: partition(total, self.workers),
            capacity: self.capacity,
            quantum: self.quantum,
        };
        debug_assert!(plan.fits_capacity(), "plan overflows scratch: {plan:?}");
        Ok(plan)
    }

    /// Removes whole tile axes until at most `max_inner_axes` remain alongside `split_count`
    /// split halves, returning the evicted axes.
    ///
    /// Axes with the largest source stride go first (ties: smaller extent first). The final
    /// logical axis is never evicted.
    fn evict(
        &self,
        whole_inner: &mut Vec<PlanAxis>,
        split_count: usize,
    ) -> Result<Vec<PlanAxis>, PlanError> {
        let inner_len = whole_inner.len() + split_count;
        if inner_len <= self.max_inner_axes {
            return Ok(vec![]);
        }
        let excess = inner_len - self.max_inner_axes;
        whole_inner.sort_by_key(|a| (a.source_stride, Reverse(a.extent)));

        let final_axis = self.final_axis();
        let mut evicted = Vec::with_capacity(excess);
        let mut idx = whole_inner.len();
        while evicted.len() < excess {
            if idx == 0 {
                return Err(PlanError::InvalidConfig(
                    "max_inner_axes cannot hold the final axis and the split axes",
                ));
            }
            idx -= 1;
            if whole_inner[idx].logical_index != final_axis {
                evicted.push(whole_inner.remove(idx));
            }
        }
        debug!(
            "Evicted {} tile axes to keep {} inner axes",
            evicted.len(),
            self.max_inner_axes
        );
        Ok(evicted)
    }

    /// Row-major scratch strides over `inner_axes`, padding the innermost row to the alignment
    /// quantum when it holds the final logical axis.
    fn scratch_strides(&self, inner_axes: &[PlanAxis]) -> Result<Vec<Stride>, PlanError> {
        let mut strides = vec![0; inner_axes.len()];
        let mut running: u64 = 1;
        for (i, axis) in inner_axes.iter().enumerate().rev() {
            strides[i] = Stride::try_from(running).map_err(|_| PlanError::ExtentOverflow)?;
            let extent = if i + 1 == inner_axes.len() && axis.logical_index == self.final_axis() {
                align_up(axis.extent, self.quantum)
            } else {
                axis.extent
            };
            running = running
                .checked_mul(extent)
                .ok_or(PlanError::ExtentOverflow)?;
        }
        Ok(strides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::AxisDescriptor;

    fn plan_axes(shape: &[(u64, i64)]) -> Vec<PlanAxis> {
        let mut dst_stride = 1i64;
        let mut axes = shape
            .iter()
            .enumerate()
            .rev()
            .map(|(i, &(extent, source_stride))| {
                let axis = PlanAxis {
                    logical_index: i as u32,
                    extent,
                    source_stride,
                    destination_stride: dst_stride,
                };
                dst_stride *= extent as i64;
                axis
            })
            .collect::<Vec<_>>();
        axes.reverse();
        axes
    }

    fn builder(shape: &[(u64, i64)], capacity: u64, max_inner_axes: usize) -> TilingPlanBuilder {
        TilingPlanBuilder::new(
            plan_axes(shape),
            capacity,
            8,
            max_inner_axes,
            NonZeroU32::new(48).unwrap(),
        )
    }

    #[test]
    fn test_single_split() {
        let b = builder(&[(100, 8), (8, 1)], 32, 5);
        let split = AxisDescriptor::new(100, 8, 0).split(4).unwrap();
        let plan = b
            .build(Strategy::SingleCut, AxisSet::single(1).unwrap(), &[split])
            .unwrap();
        assert_eq!(plan.outer_axes.len(), 1);
        assert_eq!(
            (plan.outer_axes[0].extent, plan.outer_axes[0].source_stride),
            (25, 32)
        );
        assert_eq!(plan.outer_axes[0].destination_stride, 32);
        assert_eq!(
            plan.inner_axes
                .iter()
                .map(|a| (a.extent, a.source_stride))
                .collect::<Vec<_>>(),
            vec![(4, 8), (8, 1)]
        );
        assert_eq!(plan.scratch_strides, vec![8, 1]);
        assert_eq!(plan.total_iterations(), 25);
        assert_eq!(plan.workers.active_workers, 25);
        assert_eq!(plan.splits[0].tail_extent, 4);
    }

    #[test]
    fn test_eviction_keeps_final_axis_and_splits() {
        // Seven axes; the tile holds all but axis 0, which is split.
        let shape = [
            (3, 1000),
            (2, 900),
            (2, 2),
            (2, 4000),
            (2, 7),
            (2, 3000),
            (16, 5000),
        ];
        let b = builder(&shape, 1 << 20, 5);
        let split = AxisDescriptor::new(3, 1000, 0).split(2).unwrap();
        let tile = [1, 2, 3, 4, 5, 6].into_iter().collect();
        let plan = b.build(Strategy::SingleCut, tile, &[split]).unwrap();
        assert_eq!(plan.inner_axes.len(), 5);
        let inner = plan
            .inner_axes
            .iter()
            .map(|a| a.logical_index)
            .collect::<Vec<_>>();
        // Axis 6 has the largest stride but is final; axes 3 and 5 go instead.
        assert_eq!(inner, vec![0, 1, 2, 4, 6]);
        let outer = plan
            .outer_axes
            .iter()
            .map(|a| a.logical_index)
            .collect::<Vec<_>>();
        assert_eq!(outer, vec![0, 3, 5]);
        assert_eq!(plan.total_iterations(), 2 * 2 * 2);
    }

    #[test]
    fn test_eviction_tie_prefers_smaller_extent() {
        let shape = [(2, 64), (3, 64), (2, 1), (2, 8), (2, 16), (16, 32)];
        let b = builder(&shape, 1 << 20, 5);
        let tile = AxisSet::first_n(6).unwrap();
        let plan = b.build(Strategy::Whole, tile, &[]).unwrap();
        assert_eq!(
            plan.outer_axes
                .iter()
                .map(|a| a.logical_index)
                .collect::<Vec<_>>(),
            vec![0]
        );
    }

    #[test]
    fn test_scratch_pads_final_row() {
        let b = builder(&[(4, 100), (10, 1)], 64, 5);
        let plan = b
            .build(Strategy::Whole, AxisSet::first_n(2).unwrap(), &[])
            .unwrap();
        assert_eq!(plan.scratch_strides, vec![16, 1]);
        assert_eq!(plan.scratch_elements(), 64);
        assert_eq!(plan.total_iterations(), 1);
        assert!(plan.outer_axes.is_empty());
    }
}
