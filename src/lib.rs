//! Tiling plans for strided copies.
//!
//! Given a source and a destination view over the same logical axes, [planner::Planner]
//! computes a [plan::TilingPlan]: outer axes divided statically across parallel workers, and
//! inner axes whose tile fits a fixed scratch capacity at the target's transfer alignment.

pub mod axis;
pub mod builder;
pub mod canon;
pub mod common;
pub mod cutter;
pub mod observer;
pub mod plan;
pub mod planner;
pub mod policy;
pub mod pprint;
pub mod reconcile;
pub mod target;
pub mod workers;

#[cfg(feature = "verification")]
pub mod verification;

pub use plan::{Strategy, TilingPlan};
pub use planner::{PlanError, Planner};
pub use target::{DefaultTarget, PlannerConfig, Target};

/// Plans a copy from `source` into `destination` with a one-off [Planner].
///
/// # Examples
/// ```
/// # use stridetile::common::Dtype;
/// # use stridetile::{plan_copy, DefaultTarget, PlannerConfig, Strategy};
/// let config = PlannerConfig::for_target::<DefaultTarget>(Dtype::Float32);
/// let plan = plan_copy(&[(4, 8), (8, 1)], &[(4, 1), (8, 4)], config).unwrap();
/// assert_eq!(plan.strategy, Strategy::Whole);
/// ```
pub fn plan_copy(
    destination: &[(i64, i64)],
    source: &[(i64, i64)],
    config: PlannerConfig,
) -> Result<TilingPlan, PlanError> {
    Planner::new(config)?.plan(destination, source)
}
