use crate::axis::{AxisDescriptor, AxisSet};
use crate::cutter::CutResult;
use crate::plan::{Strategy, TilingPlan};
use crate::reconcile::Transition;

use auto_impl::auto_impl;
use itertools::Itertools;
use log::debug;

/// An immutable view of one round of dual-ordering reconciliation.
#[derive(Debug, Clone, Copy)]
pub struct RoundSnapshot<'a> {
    pub round: usize,
    /// Elements offered to each ordering this round.
    pub bound: u64,
    pub committed: AxisSet,
    pub natural: &'a CutResult,
    pub by_source_stride: &'a CutResult,
    pub transition: Transition,
}

/// Receives snapshots of planning as it happens.
///
/// Observers never influence planning; every method has a no-op default.
#[auto_impl(&, Box, Arc)]
pub trait PlanObserver {
    fn canonicalized(&self, _destination: &[AxisDescriptor], _source: &[AxisDescriptor]) {}

    fn reconcile_round(&self, _snapshot: &RoundSnapshot<'_>) {}

    fn fallback(&self, _attempted: Strategy, _used: Strategy, _reason: &str) {}

    fn planned(&self, _plan: &TilingPlan) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

/// Forwards every snapshot to the `log` facade at `debug` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl PlanObserver for NullObserver {}

impl PlanObserver for LogObserver {
    fn canonicalized(&self, destination: &[AxisDescriptor], source: &[AxisDescriptor]) {
        debug!(
            "Canonical axes: destination [{}], source [{}]",
            destination.iter().join(", "),
            source.iter().join(", ")
        );
    }

    fn reconcile_round(&self, snapshot: &RoundSnapshot<'_>) {
        debug!(
            "Round {}: bound={} committed={} natural(tile={}, cut={}) by-stride(tile={}, cut={}) -> {:?}",
            snapshot.round,
            snapshot.bound,
            snapshot.committed,
            snapshot.natural.tile_mask,
            snapshot.natural.cut_mask,
            snapshot.by_source_stride.tile_mask,
            snapshot.by_source_stride.cut_mask,
            snapshot.transition
        );
    }

    fn fallback(&self, attempted: Strategy, used: Strategy, reason: &str) {
        debug!("Fell back from {attempted} to {used}: {reason}");
    }

    fn planned(&self, plan: &TilingPlan) {
        debug!(
            "Planned {} with {} inner and {} outer axes over {} workers",
            plan.strategy,
            plan.inner_axes.len(),
            plan.outer_axes.len(),
            plan.workers.active_workers
        );
    }
}
