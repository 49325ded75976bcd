//! Reference simulation of a plan's transfers.
//!
//! A plan is correct when the (destination offset, source offset) pairs its tiles move are
//! exactly the pairs an element-by-element copy of the raw views would move.

use crate::plan::TilingPlan;

use itertools::Itertools;

/// Element offsets moved by one copy step: `(destination, source)`.
pub type OffsetPair = (i64, i64);

/// Walks every worker's tiles and returns the pairs the plan transfers.
pub fn simulate_copy(plan: &TilingPlan) -> Vec<OffsetPair> {
    let mut pairs = Vec::new();
    for worker in 0..plan.workers.active_workers {
        for tile in plan.worker_tiles(worker) {
            let extents = tile.extents.iter().copied();
            for index in indices(extents) {
                let (dst, src) = index.iter().zip(&plan.inner_axes).fold(
                    (tile.destination_offset, tile.source_offset),
                    |(dst, src), (&i, axis)| {
                        (
                            dst + i as i64 * axis.destination_stride,
                            src + i as i64 * axis.source_stride,
                        )
                    },
                );
                pairs.push((dst, src));
            }
        }
    }
    pairs
}

/// Enumerates the pairs an element-by-element copy of the raw views moves.
pub fn naive_copy(destination: &[(i64, i64)], source: &[(i64, i64)]) -> Vec<OffsetPair> {
    let extents = destination.iter().map(|&(e, _)| e.max(0) as u64);
    indices(extents)
        .map(|index| {
            index
                .iter()
                .zip(destination.iter().zip(source))
                .fold((0, 0), |(dst, src), (&i, (&(_, ds), &(_, ss)))| {
                    (dst + i as i64 * ds, src + i as i64 * ss)
                })
        })
        .collect()
}

/// Checks that `plan` moves exactly the elements of a copy from `source` into `destination`.
pub fn check_plan(plan: &TilingPlan, destination: &[(i64, i64)], source: &[(i64, i64)]) -> bool {
    let mut planned = simulate_copy(plan);
    let mut expected = naive_copy(destination, source);
    planned.sort_unstable();
    expected.sort_unstable();
    planned == expected
}

/// Row-major index tuples over `extents`. An empty extent list has the single empty index.
fn indices<I>(extents: I) -> Box<dyn Iterator<Item = Vec<u64>>>
where
    I: IntoIterator<Item = u64>,
{
    let ranges = extents.into_iter().map(|e| 0..e).collect::<Vec<_>>();
    if ranges.is_empty() {
        Box::new(std::iter::once(vec![]))
    } else {
        Box::new(ranges.into_iter().multi_cartesian_product())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Dtype;
    use crate::planner::Planner;
    use crate::policy::StrategyPreference;
    use crate::target::PlannerConfig;
    use proptest::prelude::*;
    use std::num::NonZeroU32;

    fn planner(scratch_elements: u64, workers: u32, preference: StrategyPreference) -> Planner {
        let config = PlannerConfig::new(
            Dtype::Float32,
            scratch_elements,
            8,
            NonZeroU32::new(workers).unwrap(),
        )
        .with_strategy(preference);
        Planner::new(config).unwrap()
    }

    #[test]
    fn test_transpose_plan_moves_every_element() {
        let dst = [(40, 30), (30, 1)];
        let src = [(40, 1), (30, 40)];
        let plan = planner(256, 7, StrategyPreference::DualCut)
            .plan(&dst, &src)
            .unwrap();
        assert!(check_plan(&plan, &dst, &src));
    }

    #[test]
    fn test_check_plan_rejects_wrong_views() {
        let dst = [(4, 8), (8, 1)];
        let plan = planner(16, 2, StrategyPreference::Auto)
            .plan(&dst, &dst)
            .unwrap();
        assert!(!check_plan(&plan, &dst, &[(4, 1), (8, 4)]));
    }

    proptest! {
        #[test]
        fn test_simulated_copy_matches_naive_copy(
            shape in prop::collection::vec((1i64..=9, 0i64..=50), 1..=4),
            scratch in 8u64..=512,
            workers in 1u32..=8,
            preference in any::<StrategyPreference>(),
        ) {
            let mut stride = 1;
            let mut dst = shape
                .iter()
                .rev()
                .map(|&(e, _)| {
                    let axis = (e, stride);
                    stride *= e;
                    axis
                })
                .collect::<Vec<_>>();
            dst.reverse();
            let plan = planner(scratch, workers, preference).plan(&dst, &shape).unwrap();
            prop_assert!(check_plan(&plan, &dst, &shape));
        }
    }
}
