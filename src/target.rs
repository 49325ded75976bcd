use crate::common::{Dtype, Extent};
use crate::planner::PlanError;
use crate::policy::{DualCutPolicy, StrategyPreference};

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::num::NonZeroU32;

/// The largest number of logical axes any configuration may allow.
pub const MAX_SUPPORTED_AXES: usize = 64;

/// A description of the machine a copy plan runs on.
pub trait Target: Clone + Copy + std::hash::Hash + Eq + Default + Debug + 'static {
    /// Scratch bytes available to one worker, before multi-buffering.
    fn scratch_bytes() -> u64;
    /// Number of buffers the scratch is divided into for overlapping transfers.
    fn buffer_count() -> u32;
    /// Minimum transfer granularity in bytes.
    fn alignment_bytes() -> u32;
    fn workers() -> NonZeroU32;
    /// Most axes a single bulk transfer can describe.
    fn max_inner_axes() -> usize;
    fn max_axes() -> usize;
    /// Bytes reserved for a serialized plan.
    fn tiling_data_capacity() -> usize;
}

#[derive(Clone, Copy, Hash, Eq, PartialEq, Default, Debug)]
pub struct DefaultTarget;

impl Target for DefaultTarget {
    fn scratch_bytes() -> u64 {
        253_952
    }

    fn buffer_count() -> u32 {
        2
    }

    fn alignment_bytes() -> u32 {
        32
    }

    fn workers() -> NonZeroU32 {
        nonzero::nonzero!(48u32)
    }

    fn max_inner_axes() -> usize {
        5
    }

    fn max_axes() -> usize {
        8
    }

    fn tiling_data_capacity() -> usize {
        1024
    }
}

/// Element-level planning parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct PlannerConfig {
    pub dtype: Dtype,
    /// Scratch capacity per buffer, in elements.
    pub scratch_elements: u64,
    /// Alignment quantum, in elements.
    pub quantum: Extent,
    pub workers: NonZeroU32,
    pub max_inner_axes: usize,
    pub max_axes: usize,
    pub tiling_data_capacity: usize,
    pub strategy: StrategyPreference,
    pub policy: DualCutPolicy,
    /// Whether views are canonicalized before planning.
    pub canonicalize: bool,
}

impl PlannerConfig {
    /// Builds a configuration with [DefaultTarget]'s axis limits.
    pub fn new(dtype: Dtype, scratch_elements: u64, quantum: Extent, workers: NonZeroU32) -> Self {
        PlannerConfig {
            dtype,
            scratch_elements,
            quantum,
            workers,
            max_inner_axes: DefaultTarget::max_inner_axes(),
            max_axes: DefaultTarget::max_axes(),
            tiling_data_capacity: DefaultTarget::tiling_data_capacity(),
            strategy: StrategyPreference::default(),
            policy: DualCutPolicy::default(),
            canonicalize: true,
        }
    }

    /// Derives element-level capacities for `dtype` on `Tgt`.
    pub fn for_target<Tgt: Target>(dtype: Dtype) -> Self {
        let size = u64::from(dtype.size());
        let scratch_elements = Tgt::scratch_bytes() / u64::from(Tgt::buffer_count().max(1)) / size;
        let quantum = (u64::from(Tgt::alignment_bytes()) / size).max(1);
        PlannerConfig::new(dtype, scratch_elements, quantum, Tgt::workers())
            .with_max_inner_axes(Tgt::max_inner_axes())
            .with_max_axes(Tgt::max_axes())
            .with_tiling_data_capacity(Tgt::tiling_data_capacity())
    }

    pub fn with_scratch_elements(mut self, scratch_elements: u64) -> Self {
        self.scratch_elements = scratch_elements;
        self
    }

    pub fn with_quantum(mut self, quantum: Extent) -> Self {
        self.quantum = quantum;
        self
    }

    pub fn with_workers(mut self, workers: NonZeroU32) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_max_inner_axes(mut self, max_inner_axes: usize) -> Self {
        self.max_inner_axes = max_inner_axes;
        self
    }

    pub fn with_max_axes(mut self, max_axes: usize) -> Self {
        self.max_axes = max_axes;
        self
    }

    pub fn with_tiling_data_capacity(mut self, capacity: usize) -> Self {
        self.tiling_data_capacity = capacity;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyPreference) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_policy(mut self, policy: DualCutPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_canonicalize(mut self, canonicalize: bool) -> Self {
        self.canonicalize = canonicalize;
        self
    }

    pub fn validate(&self) -> Result<(), PlanError> {
        if self.quantum == 0 {
            return Err(PlanError::InvalidConfig("alignment quantum must be non-zero"));
        }
        // The final axis and two split halves must always fit.
        if self.max_inner_axes < 3 {
            return Err(PlanError::InvalidConfig("max_inner_axes must be at least 3"));
        }
        if self.max_axes > MAX_SUPPORTED_AXES {
            return Err(PlanError::InvalidConfig("max_axes must be at most 64"));
        }
        Ok(())
    }
}
