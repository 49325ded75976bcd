use crate::common::{align_up, ceil_div, checked_product, Extent, Stride};
use crate::planner::PlanError;
use crate::workers::WorkerPartition;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Strategy {
    /// The whole copy fits in scratch; there is one outer iteration.
    Whole,
    /// One axis of the destination order is split.
    SingleCut,
    /// The destination and source-stride orders were reconciled, splitting one or two axes.
    DualCut,
}

/// A logical axis with both of its strides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct PlanAxis {
    pub logical_index: u32,
    pub extent: Extent,
    pub source_stride: Stride,
    pub destination_stride: Stride,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct SplitRecord {
    pub logical_index: u32,
    pub inner_extent: Extent,
    pub outer_extent: Extent,
    /// The inner extent on the last outer step.
    pub tail_extent: Extent,
}

/// A two-level execution plan for one strided copy.
///
/// `outer_axes` are iterated row-major, one tile per iteration, and divided across workers by
/// `workers`. Each tile moves the `inner_axes` through scratch, laid out by `scratch_strides`.
/// Both axis lists are ordered by logical index.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TilingPlan {
    pub strategy: Strategy,
    /// The canonical axes the plan was computed over.
    pub axes: Vec<PlanAxis>,
    pub outer_axes: Vec<PlanAxis>,
    pub inner_axes: Vec<PlanAxis>,
    pub scratch_strides: Vec<Stride>,
    pub splits: SmallVec<[SplitRecord; 2]>,
    pub workers: WorkerPartition,
    /// Scratch capacity, in elements.
    pub capacity: u64,
    pub quantum: Extent,
}

/// One outer iteration's transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub outer_iteration: u64,
    pub source_offset: i64,
    pub destination_offset: i64,
    /// Extents of the plan's `inner_axes` for this tile, with tails applied.
    pub extents: SmallVec<[Extent; 5]>,
}

impl TilingPlan {
    pub fn total_iterations(&self) -> u64 {
        self.workers.total_iterations
    }

    /// Elements moved by a full (non-tail) tile.
    pub fn tile_elements(&self) -> u64 {
        self.inner_axes.iter().map(|a| a.extent).product()
    }

    /// Elements of scratch a tile occupies, including row padding.
    pub fn scratch_elements(&self) -> u64 {
        match (self.inner_axes.first(), self.scratch_strides.first()) {
            (Some(axis), Some(&stride)) => {
                let extent = if self.inner_axes.len() == 1 && self.pads_last_row() {
                    align_up(axis.extent, self.quantum)
                } else {
                    axis.extent
                };
                extent * stride.unsigned_abs()
            }
            _ => 1,
        }
    }

    fn pads_last_row(&self) -> bool {
        let final_axis = self.axes.len().saturating_sub(1);
        self.inner_axes
            .last()
            .is_some_and(|a| a.logical_index as usize == final_axis)
    }

    pub fn split(&self, logical_index: u32) -> Option<&SplitRecord> {
        self.splits.iter().find(|s| s.logical_index == logical_index)
    }

    /// Returns the tile run at `outer_iteration`, or `None` past the last iteration.
    pub fn tile(&self, outer_iteration: u64) -> Option<Tile> {
        if outer_iteration >= self.total_iterations() {
            return None;
        }
        let mut remainder = outer_iteration;
        let mut source_offset = 0i64;
        let mut destination_offset = 0i64;
        let mut last_step: SmallVec<[u32; 2]> = SmallVec::new();
        for axis in self.outer_axes.iter().rev() {
            let coord = remainder % axis.extent;
            remainder /= axis.extent;
            source_offset += coord as i64 * axis.source_stride;
            destination_offset += coord as i64 * axis.destination_stride;
            if coord + 1 == axis.extent && self.split(axis.logical_index).is_some() {
                last_step.push(axis.logical_index);
            }
        }

        let extents = self
            .inner_axes
            .iter()
            .map(|axis| match self.split(axis.logical_index) {
                Some(split) if last_step.contains(&axis.logical_index) => split.tail_extent,
                _ => axis.extent,
            })
            .collect();
        Some(Tile {
            outer_iteration,
            source_offset,
            destination_offset,
            extents,
        })
    }

    /// Iterates the tiles assigned to `worker`. Idle workers get no tiles.
    pub fn worker_tiles(&self, worker: u32) -> impl Iterator<Item = Tile> + '_ {
        self.workers
            .worker_range(worker)
            .into_iter()
            .flatten()
            .filter_map(move |i| self.tile(i))
    }

    /// Length of the longest contiguous source run within a tile.
    pub fn source_run(&self) -> u64 {
        let mut axes = self
            .inner_axes
            .iter()
            .filter(|a| a.extent > 1)
            .collect::<SmallVec<[_; 5]>>();
        axes.sort_by_key(|a| a.source_stride);
        let mut run = 1u64;
        for axis in axes {
            if axis.source_stride != run as i64 {
                break;
            }
            run *= axis.extent;
        }
        run
    }

    /// Estimates the number of contiguous source transfers the whole plan issues.
    pub fn source_bursts(&self) -> u64 {
        self.total_iterations()
            .saturating_mul(ceil_div(self.tile_elements(), self.source_run()))
    }

    /// Serializes the plan into at most `capacity` bytes.
    pub fn encode(&self, capacity: usize) -> Result<Vec<u8>, PlanError> {
        let bytes = bincode::serialize(self).map_err(|e| PlanError::Encoding(e.to_string()))?;
        if bytes.len() > capacity {
            return Err(PlanError::TilingDataTooLarge {
                size: bytes.len(),
                capacity,
            });
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PlanError> {
        bincode::deserialize(bytes).map_err(|e| PlanError::Encoding(e.to_string()))
    }

    /// Checks that the plan's tile respects its own scratch capacity.
    pub fn fits_capacity(&self) -> bool {
        checked_product(self.inner_axes.iter().map(|a| a.extent))
            .is_some_and(|p| p <= self.capacity)
            && self.scratch_elements() <= self.capacity
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Whole => write!(f, "whole"),
            Strategy::SingleCut => write!(f, "single cut"),
            Strategy::DualCut => write!(f, "dual cut"),
        }
    }
}

impl fmt::Display for PlanAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{}({}, src {}, dst {})",
            self.logical_index, self.extent, self.source_stride, self.destination_stride
        )
    }
}
