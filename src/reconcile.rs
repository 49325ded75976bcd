//! Reconciliation of a copy's two axis orderings into one tile.
//!
//! The destination is cheapest to write in its natural (logical) order while the source is
//! cheapest to read in descending-stride order. Each round offers both orderings the square root
//! of the remaining budget, commits axes both orderings agree belong in the tile, and stops once
//! the orderings disagree. The stopping round decides whether one shared axis or two distinct
//! axes are split.

use crate::axis::{AxisDescriptor, AxisSet, SplitAxisPair};
use crate::common::{align_down, align_tile_factor, align_up, isqrt, Extent};
use crate::cutter::{AxisCutter, CutResult};
use crate::observer::{PlanObserver, RoundSnapshot};

use log::debug;
use smallvec::{smallvec, SmallVec};

/// The decision taken at the end of one search round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move these axes into the tile and search again.
    Commit(AxisSet),
    CutOneAxis,
    CutTwoAxes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileState {
    Searching {
        committed: AxisSet,
        round: usize,
    },
    CutOneAxis {
        committed: AxisSet,
        cut: CutResult,
    },
    CutTwoAxes {
        committed: AxisSet,
        natural: CutResult,
        by_source_stride: CutResult,
    },
    Whole {
        committed: AxisSet,
    },
    Infeasible(InfeasibleReason),
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DualCutError {
    #[error("Scratch capacity of {capacity} elements is below the alignment quantum {quantum}")]
    BudgetTooSmall { capacity: u64, quantum: u64 },
    #[error("Dual cut is infeasible: {0}")]
    Infeasible(InfeasibleReason),
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfeasibleReason {
    #[error("the final axis is no wider than one alignment quantum")]
    FinalAxisTooNarrow,
    #[error("committed axes exhausted the budget")]
    BudgetExhausted,
    #[error("a cut axis got a zero inner extent")]
    ZeroInnerExtent,
    #[error("the search did not settle within the round limit")]
    RoundsExhausted,
}

/// Axes to place in the tile: `committed` whole, plus the inner halves of `splits`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DualCutOutcome {
    pub committed: AxisSet,
    pub splits: SmallVec<[SplitAxisPair; 2]>,
    pub rounds: usize,
}

pub struct DualOrderingReconciler {
    /// Source-side axes, indexed by logical index.
    source: Vec<AxisDescriptor>,
    natural: AxisCutter,
    by_source_stride: AxisCutter,
    final_axis: u32,
    quantum: Extent,
    budget: u64,
}

/// Decides the next step of a search round from the two orderings' cuts.
///
/// `accounted_product` must return the accounted element count of a set of axes.
pub fn transition<F>(
    natural: &CutResult,
    by_source_stride: &CutResult,
    committed: AxisSet,
    budget: u64,
    accounted_product: F,
) -> Transition
where
    F: Fn(AxisSet) -> u64,
{
    let (a, b) = (natural, by_source_stride);
    let common_tile = a
        .tile_mask
        .intersection(b.tile_mask)
        .union(a.cut_mask.intersection(b.tile_mask))
        .union(b.cut_mask.intersection(a.tile_mask));
    if !common_tile.is_empty() {
        return Transition::Commit(common_tile);
    }

    let common_cut = a.cut_mask.intersection(b.cut_mask);
    if common_cut.is_empty() {
        return Transition::CutTwoAxes;
    }
    let joined = committed
        .union(a.tile_mask)
        .union(b.tile_mask)
        .union(common_cut);
    if accounted_product(joined) < budget {
        Transition::Commit(common_cut)
    } else {
        Transition::CutOneAxis
    }
}

impl DualOrderingReconciler {
    /// Prepares both orderings of a canonical copy.
    ///
    /// `destination` and `source` must describe the same logical axes in logical order. The last
    /// logical axis is the final (alignment-bearing) axis.
    pub fn new(
        destination: &[AxisDescriptor],
        source: &[AxisDescriptor],
        budget: u64,
        quantum: Extent,
    ) -> Self {
        debug_assert_eq!(destination.len(), source.len());
        let final_axis = u32::try_from(source.len().saturating_sub(1)).unwrap_or(0);
        let mut by_stride = source.to_vec();
        by_stride.sort_by(|a, b| b.stride.cmp(&a.stride).then(b.extent.cmp(&a.extent)));
        DualOrderingReconciler {
            source: source.to_vec(),
            natural: AxisCutter::new(destination.to_vec(), final_axis, quantum),
            by_source_stride: AxisCutter::new(by_stride, final_axis, quantum),
            final_axis,
            quantum,
            budget,
        }
    }

    /// The product of the accounted extents of `set`, saturating at `u64::MAX`.
    pub fn accounted_product(&self, set: AxisSet) -> u64 {
        self.source
            .iter()
            .filter(|a| set.contains(a.logical_index))
            .map(|a| self.accounted_extent(a))
            .try_fold(1u64, |acc, e| acc.checked_mul(e))
            .unwrap_or(u64::MAX)
    }

    fn accounted_extent(&self, axis: &AxisDescriptor) -> Extent {
        if axis.logical_index == self.final_axis {
            align_up(axis.extent, self.quantum)
        } else {
            axis.extent
        }
    }

    fn remaining(&self, committed: AxisSet) -> u64 {
        self.budget / self.accounted_product(committed)
    }

    pub fn reconcile<O: PlanObserver>(
        mut self,
        observer: &O,
    ) -> Result<DualCutOutcome, DualCutError> {
        if self.budget == 0 || self.budget < self.quantum {
            return Err(DualCutError::BudgetTooSmall {
                capacity: self.budget,
                quantum: self.quantum,
            });
        }
        let Some(final_extent) = self.source.last().map(|a| a.extent) else {
            return Err(DualCutError::Infeasible(InfeasibleReason::BudgetExhausted));
        };
        if final_extent <= self.quantum {
            return Err(DualCutError::Infeasible(
                InfeasibleReason::FinalAxisTooNarrow,
            ));
        }

        let max_rounds = self.source.len() + 1;
        let mut rounds = 0;
        let mut state = ReconcileState::Searching {
            committed: AxisSet::empty(),
            round: 0,
        };
        loop {
            state = match state {
                ReconcileState::Searching { committed, round } => {
                    if round >= max_rounds {
                        ReconcileState::Infeasible(InfeasibleReason::RoundsExhausted)
                    } else {
                        rounds = round + 1;
                        self.search_round(committed, round, observer)
                    }
                }
                ReconcileState::CutOneAxis { committed, cut } => {
                    let split = self.cut_one(committed, &cut)?;
                    return Ok(DualCutOutcome {
                        committed,
                        splits: smallvec![split],
                        rounds,
                    });
                }
                ReconcileState::CutTwoAxes {
                    committed,
                    natural,
                    by_source_stride,
                } => {
                    let splits = self.cut_two(committed, &natural, &by_source_stride)?;
                    return Ok(DualCutOutcome {
                        committed,
                        splits,
                        rounds,
                    });
                }
                ReconcileState::Whole { committed } => {
                    return Ok(DualCutOutcome {
                        committed,
                        splits: smallvec![],
                        rounds,
                    });
                }
                ReconcileState::Infeasible(reason) => {
                    return Err(DualCutError::Infeasible(reason));
                }
            };
        }
    }

    fn search_round<O: PlanObserver>(
        &mut self,
        committed: AxisSet,
        round: usize,
        observer: &O,
    ) -> ReconcileState {
        let bound = isqrt(self.remaining(committed));
        if bound == 0 {
            return ReconcileState::Infeasible(InfeasibleReason::BudgetExhausted);
        }
        let (Some(natural), Some(by_source_stride)) = (
            self.natural.find_cut(bound),
            self.by_source_stride.find_cut(bound),
        ) else {
            return ReconcileState::Whole { committed };
        };

        let step = transition(
            &natural,
            &by_source_stride,
            committed,
            self.budget,
            |s| self.accounted_product(s),
        );
        observer.reconcile_round(&RoundSnapshot {
            round,
            bound,
            committed,
            natural: &natural,
            by_source_stride: &by_source_stride,
            transition: step,
        });

        let joined = committed
            .union(natural.tile_mask)
            .union(by_source_stride.tile_mask);
        match step {
            Transition::Commit(set) => {
                self.natural.remove(set);
                self.by_source_stride.remove(set);
                ReconcileState::Searching {
                    committed: committed.union(set),
                    round: round + 1,
                }
            }
            Transition::CutOneAxis => ReconcileState::CutOneAxis {
                committed: joined,
                cut: natural,
            },
            Transition::CutTwoAxes => ReconcileState::CutTwoAxes {
                committed: joined,
                natural,
                by_source_stride,
            },
        }
    }

    fn cut_one(&self, committed: AxisSet, cut: &CutResult) -> Result<SplitAxisPair, DualCutError> {
        let zero = DualCutError::Infeasible(InfeasibleReason::ZeroInnerExtent);
        let axis = self.source[cut.inner.logical_index as usize];
        let mut inner = self.remaining(committed);
        if axis.logical_index == self.final_axis {
            inner = align_down(inner, self.quantum);
        }
        debug!("Cutting one axis {axis} to {inner} with {committed} in the tile");
        axis.split(inner.min(axis.extent)).ok_or(zero)
    }

    fn cut_two(
        &self,
        committed: AxisSet,
        natural: &CutResult,
        by_source_stride: &CutResult,
    ) -> Result<SmallVec<[SplitAxisPair; 2]>, DualCutError> {
        let zero = DualCutError::Infeasible(InfeasibleReason::ZeroInnerExtent);
        let a = self.source[natural.inner.logical_index as usize];
        let b = self.source[by_source_stride.inner.logical_index as usize];
        let mut inner_a = natural.inner.extent;
        let mut inner_b = by_source_stride.inner.extent;

        let remaining = self.remaining(committed);
        if a.logical_index == self.final_axis {
            inner_a = align_tile_factor(inner_a, self.quantum);
            if inner_a == 0 {
                return Err(zero);
            }
            inner_b = (remaining / inner_a).min(b.extent);
        } else if b.logical_index == self.final_axis {
            inner_b = align_tile_factor(inner_b, self.quantum);
            if inner_b == 0 {
                return Err(zero);
            }
            inner_a = (remaining / inner_b).min(a.extent);
        }
        debug!("Cutting two axes {a} to {inner_a} and {b} to {inner_b} with {committed} in the tile");
        Ok(smallvec![
            a.split(inner_a).ok_or(zero)?,
            b.split(inner_b).ok_or(zero)?
        ])
    }
}
