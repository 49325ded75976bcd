use crate::plan::TilingPlan;

use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum StrategyPreference {
    /// Let [DualCutPolicy] decide.
    #[default]
    Auto,
    #[cfg_attr(feature = "clap", value(name = "single"))]
    SingleCut,
    /// Attempt a dual cut, falling back to a single cut if it fails.
    #[cfg_attr(feature = "clap", value(name = "dual"))]
    DualCut,
}

/// Byte thresholds deciding when a single-cut plan serves the source poorly enough to try a
/// dual cut.
///
/// These tune performance only; any plan the planner returns is correct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct DualCutPolicy {
    /// At or above this smallest source stride, reads are already coarse.
    pub min_stride_bytes: u64,
    /// A whole outer axis at or below this source stride is iterated one small read at a time.
    pub outer_stride_bytes: u64,
    /// Cutting the smallest-stride axis hurts when that stride is at or below this.
    pub cut_axis_stride_bytes: u64,
}

impl Default for DualCutPolicy {
    fn default() -> Self {
        DualCutPolicy {
            min_stride_bytes: 64,
            outer_stride_bytes: 64,
            cut_axis_stride_bytes: 128,
        }
    }
}

impl DualCutPolicy {
    /// Returns `true` if `single_cut` leaves small-stride source axes outside the tile.
    pub fn prefers_dual_cut(&self, single_cut: &TilingPlan, element_bytes: u64) -> bool {
        let bytes = |stride: i64| stride.unsigned_abs().saturating_mul(element_bytes);
        let Some(smallest) = single_cut
            .axes
            .iter()
            .min_by_key(|a| a.source_stride.unsigned_abs())
        else {
            return false;
        };
        let smallest_bytes = bytes(smallest.source_stride);
        if smallest_bytes >= self.min_stride_bytes {
            debug!("Smallest source stride is {smallest_bytes} bytes; keeping single cut");
            return false;
        }

        if let Some(outer) = single_cut.outer_axes.iter().find(|a| {
            single_cut.split(a.logical_index).is_none()
                && bytes(a.source_stride) <= self.outer_stride_bytes
        }) {
            debug!("Whole outer axis {outer} has a small source stride; trying dual cut");
            return true;
        }

        if single_cut.split(smallest.logical_index).is_some()
            && smallest_bytes <= self.cut_axis_stride_bytes
        {
            debug!("Smallest-stride axis {smallest} is cut; trying dual cut");
            return true;
        }
        false
    }
}
