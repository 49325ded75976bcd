use crate::axis::AxisDescriptor;
use crate::builder::TilingPlanBuilder;
use crate::canon::{canonicalize_views, CanonicalizeError};
use crate::common::{align_down, align_up, checked_product, Extent, Stride};
use crate::cutter::{even_inner_extent, AxisCutter};
use crate::observer::{NullObserver, PlanObserver};
use crate::plan::{PlanAxis, Strategy, TilingPlan};
use crate::policy::StrategyPreference;
use crate::reconcile::DualOrderingReconciler;
use crate::target::PlannerConfig;

use log::{debug, info, warn};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("Got {axes} axes but at most {max} are supported")]
    AxisCountExceeded { axes: usize, max: usize },
    #[error("Scratch capacity of {capacity} elements cannot hold {required} elements")]
    BudgetTooSmall { capacity: u64, required: u64 },
    #[error("Axis {index} has extent {extent} and stride {stride}")]
    InvalidAxis {
        index: usize,
        extent: i64,
        stride: i64,
    },
    #[error("Extent or stride overflows")]
    ExtentOverflow,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("Tiling data is {size} bytes but only {capacity} are available")]
    TilingDataTooLarge { size: usize, capacity: usize },
    #[error("Could not encode tiling data: {0}")]
    Encoding(String),
}

/// Plans strided copies under one [PlannerConfig].
///
/// Planning is pure: a [Planner] can be shared and called concurrently.
#[derive(Debug, Clone)]
pub struct Planner<O: PlanObserver = NullObserver> {
    config: PlannerConfig,
    observer: O,
}

impl Planner<NullObserver> {
    pub fn new(config: PlannerConfig) -> Result<Self, PlanError> {
        Planner::with_observer(config, NullObserver)
    }
}

impl<O: PlanObserver> Planner<O> {
    pub fn with_observer(config: PlannerConfig, observer: O) -> Result<Self, PlanError> {
        config.validate()?;
        Ok(Planner { config, observer })
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plans a copy from `source` into `destination`, each given as `(extent, stride)` pairs over
    /// the same logical axes.
    pub fn plan(
        &self,
        destination: &[(i64, i64)],
        source: &[(i64, i64)],
    ) -> Result<TilingPlan, PlanError> {
        self.validate_views(destination, source)?;
        let axes = self.canonical_axes(destination, source)?;
        self.plan_canonical(axes)
    }

    fn validate_views(
        &self,
        destination: &[(i64, i64)],
        source: &[(i64, i64)],
    ) -> Result<(), PlanError> {
        if destination.is_empty() || source.is_empty() {
            return Err(PlanError::ShapeMismatch("views must have at least one axis".into()));
        }
        if destination.len() != source.len() {
            return Err(PlanError::ShapeMismatch(format!(
                "destination has {} axes but source has {}",
                destination.len(),
                source.len()
            )));
        }
        if destination.len() > self.config.max_axes {
            return Err(PlanError::AxisCountExceeded {
                axes: destination.len(),
                max: self.config.max_axes,
            });
        }
        for (index, (&(dst_extent, dst_stride), &(src_extent, src_stride))) in
            destination.iter().zip(source).enumerate()
        {
            for (extent, stride) in [(dst_extent, dst_stride), (src_extent, src_stride)] {
                if extent < 1 || stride < 0 {
                    return Err(PlanError::InvalidAxis {
                        index,
                        extent,
                        stride,
                    });
                }
            }
            if dst_extent != src_extent {
                return Err(PlanError::ShapeMismatch(format!(
                    "axis {index} has extent {dst_extent} in the destination but {src_extent} \
                     in the source"
                )));
            }
        }
        Ok(())
    }

    fn canonical_axes(
        &self,
        destination: &[(i64, i64)],
        source: &[(i64, i64)],
    ) -> Result<Vec<PlanAxis>, PlanError> {
        let sizes = destination.iter().map(|&(e, _)| e).collect::<Vec<_>>();
        let dst_strides = destination.iter().map(|&(_, s)| s).collect::<Vec<_>>();
        let src_strides = source.iter().map(|&(_, s)| s).collect::<Vec<_>>();
        let (sizes, strides) = if self.config.canonicalize {
            let views = [dst_strides.as_slice(), src_strides.as_slice()];
            canonicalize_views(&sizes, &views).map_err(|e| match e {
                CanonicalizeError::Overflow => PlanError::ExtentOverflow,
                e => PlanError::ShapeMismatch(e.to_string()),
            })?
        } else {
            (sizes, vec![dst_strides, src_strides])
        };

        let axes = sizes
            .iter()
            .enumerate()
            .map(|(i, &extent)| PlanAxis {
                logical_index: i as u32,
                extent: extent as Extent,
                destination_stride: strides[0][i],
                source_stride: strides[1][i],
            })
            .collect::<Vec<_>>();
        self.observer.canonicalized(
            &descriptors(&axes, |a| a.destination_stride),
            &descriptors(&axes, |a| a.source_stride),
        );
        Ok(axes)
    }

    /// Plans over axes which are already canonical. Each axis's `logical_index` must equal its
    /// position.
    pub fn plan_canonical(&self, axes: Vec<PlanAxis>) -> Result<TilingPlan, PlanError> {
        let config = &self.config;
        if axes.is_empty() {
            return Err(PlanError::ShapeMismatch("views must have at least one axis".into()));
        }
        if let Some((position, axis)) = axes
            .iter()
            .enumerate()
            .find(|(i, a)| a.logical_index as usize != *i)
        {
            return Err(PlanError::ShapeMismatch(format!(
                "axis at position {position} has logical index {}",
                axis.logical_index
            )));
        }
        if axes.len() > config.max_axes {
            return Err(PlanError::AxisCountExceeded {
                axes: axes.len(),
                max: config.max_axes,
            });
        }
        let capacity = config.scratch_elements;
        if capacity == 0 || capacity < config.quantum {
            return Err(PlanError::BudgetTooSmall {
                capacity,
                required: config.quantum,
            });
        }

        let builder = TilingPlanBuilder::new(
            axes.clone(),
            capacity,
            config.quantum,
            config.max_inner_axes,
            config.workers,
        );
        let final_index = axes.len() - 1;
        let accounted_total = checked_product(axes.iter().enumerate().map(|(i, a)| {
            if i == final_index {
                align_up(a.extent, config.quantum)
            } else {
                a.extent
            }
        }));
        if accounted_total.is_some_and(|t| t <= capacity) {
            let tile = axes.iter().map(|a| a.logical_index).collect();
            let plan = builder.build(Strategy::Whole, tile, &[])?;
            return self.finish(plan);
        }

        let single = self.single_cut(&axes, &builder)?;
        let plan = match config.strategy {
            StrategyPreference::SingleCut => single,
            StrategyPreference::DualCut => self.dual_cut_or(single, &axes, &builder, false)?,
            StrategyPreference::Auto => {
                if config
                    .policy
                    .prefers_dual_cut(&single, u64::from(config.dtype.size()))
                {
                    self.dual_cut_or(single, &axes, &builder, true)?
                } else {
                    single
                }
            }
        };
        self.finish(plan)
    }

    /// Checks the plan's tiling data fits the configured capacity, then reports it.
    fn finish(&self, plan: TilingPlan) -> Result<TilingPlan, PlanError> {
        let tiling_data = plan.encode(self.config.tiling_data_capacity)?;
        debug!(
            "Tiling data is {} of {} bytes",
            tiling_data.len(),
            self.config.tiling_data_capacity
        );
        info!(
            "Chose {} plan: {} outer iterations over {} workers, {} tile elements",
            plan.strategy,
            plan.total_iterations(),
            plan.workers.active_workers,
            plan.tile_elements()
        );
        self.observer.planned(&plan);
        Ok(plan)
    }

    /// Cuts the destination order with the full budget.
    fn single_cut(
        &self,
        axes: &[PlanAxis],
        builder: &TilingPlanBuilder,
    ) -> Result<TilingPlan, PlanError> {
        let quantum = self.config.quantum;
        let capacity = self.config.scratch_elements;
        let final_axis = (axes.len() - 1) as u32;
        let cutter = AxisCutter::new(
            descriptors(axes, |a| a.destination_stride),
            final_axis,
            quantum,
        );
        let Some(cut) = cutter.find_cut(capacity) else {
            return Err(PlanError::ShapeMismatch("no axes to plan".into()));
        };
        let Some(cut_index) = cut.cut_logical_index() else {
            return builder.build(Strategy::Whole, cut.tile_mask, &[]);
        };

        let axis = descriptors(axes, |a| a.source_stride)[cut_index as usize];
        let inner = if cut_index == final_axis {
            align_down(cut.inner.extent, quantum)
        } else {
            let tile_product = cutter
                .axes()
                .iter()
                .filter(|a| cut.tile_mask.contains(a.logical_index))
                .map(|a| cutter.accounted_extent(a))
                .product::<u64>();
            even_inner_extent(axis.extent, tile_product, capacity).unwrap_or(cut.inner.extent)
        };
        let Some(split) = axis.split(inner) else {
            return Err(PlanError::BudgetTooSmall {
                capacity,
                required: quantum,
            });
        };
        builder.build(Strategy::SingleCut, cut.tile_mask, &[split])
    }

    /// Attempts a dual cut, returning `single` if it fails or, when `compare` is set, if it
    /// issues more source bursts.
    fn dual_cut_or(
        &self,
        single: TilingPlan,
        axes: &[PlanAxis],
        builder: &TilingPlanBuilder,
        compare: bool,
    ) -> Result<TilingPlan, PlanError> {
        let reconciler = DualOrderingReconciler::new(
            &descriptors(axes, |a| a.destination_stride),
            &descriptors(axes, |a| a.source_stride),
            self.config.scratch_elements,
            self.config.quantum,
        );
        let outcome = match reconciler.reconcile(&self.observer) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Falling back to single cut: {e}");
                self.observer
                    .fallback(Strategy::DualCut, Strategy::SingleCut, &e.to_string());
                return Ok(single);
            }
        };
        let strategy = if outcome.splits.is_empty() {
            Strategy::Whole
        } else {
            Strategy::DualCut
        };
        let dual = builder.build(strategy, outcome.committed, &outcome.splits)?;

        if compare && dual.source_bursts() > single.source_bursts() {
            let reason = format!(
                "dual cut issues {} source bursts against {}",
                dual.source_bursts(),
                single.source_bursts()
            );
            warn!("Falling back to single cut: {reason}");
            self.observer
                .fallback(Strategy::DualCut, Strategy::SingleCut, &reason);
            return Ok(single);
        }
        Ok(dual)
    }
}

fn descriptors<F>(axes: &[PlanAxis], stride: F) -> Vec<AxisDescriptor>
where
    F: Fn(&PlanAxis) -> Stride,
{
    axes.iter()
        .map(|a| AxisDescriptor::new(a.extent, stride(a), a.logical_index))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Dtype;
    use crate::plan::{PlanAxis, Strategy};
    use crate::policy::DualCutPolicy;
    use proptest::prelude::*;
    use proptest::strategy::Strategy as _;
    use std::cell::RefCell;
    use std::num::NonZeroU32;

    fn config(scratch_elements: u64) -> PlannerConfig {
        PlannerConfig::new(
            Dtype::Float32,
            scratch_elements,
            8,
            NonZeroU32::new(48).unwrap(),
        )
    }

    fn row_major(extents: &[i64]) -> Vec<(i64, i64)> {
        let mut stride = 1;
        let mut out = extents
            .iter()
            .rev()
            .map(|&e| {
                let axis = (e, stride);
                stride *= e;
                axis
            })
            .collect::<Vec<_>>();
        out.reverse();
        out
    }

    fn extents(axes: &[PlanAxis]) -> Vec<(u64, i64)> {
        axes.iter().map(|a| (a.extent, a.source_stride)).collect()
    }

    /// Checks every logical axis is placed exactly once, or split into one half per list.
    fn assert_coverage(plan: &TilingPlan) {
        for axis in &plan.axes {
            let idx = axis.logical_index;
            let outer = plan.outer_axes.iter().filter(|a| a.logical_index == idx).count();
            let inner = plan.inner_axes.iter().filter(|a| a.logical_index == idx).count();
            match plan.split(idx) {
                Some(split) => {
                    assert_eq!((outer, inner), (1, 1), "axis {idx} in {plan:?}");
                    assert!(split.inner_extent * (split.outer_extent - 1) < axis.extent);
                    assert!(axis.extent <= split.inner_extent * split.outer_extent);
                }
                None => assert_eq!(outer + inner, 1, "axis {idx} in {plan:?}"),
            }
        }
    }

    #[test]
    fn test_scenario_a_whole() {
        let view = [(4, 100), (8, 1)];
        let plan = Planner::new(config(64)).unwrap().plan(&view, &view).unwrap();
        assert_eq!(plan.strategy, Strategy::Whole);
        assert!(plan.outer_axes.is_empty());
        assert_eq!(extents(&plan.inner_axes), vec![(4, 100), (8, 1)]);
        assert_eq!(plan.total_iterations(), 1);
        assert_eq!(plan.workers.active_workers, 1);
    }

    #[test]
    fn test_scenario_b_single_cut() {
        let view = [(100, 8), (8, 1)];
        let planner = Planner::new(config(32).with_canonicalize(false)).unwrap();
        let plan = planner.plan(&view, &view).unwrap();
        assert_eq!(plan.strategy, Strategy::SingleCut);
        assert_eq!(extents(&plan.outer_axes), vec![(25, 32)]);
        assert_eq!(extents(&plan.inner_axes), vec![(4, 8), (8, 1)]);
        assert_coverage(&plan);
    }

    #[test]
    fn test_scenario_b_canonicalized_merges_first() {
        let view = [(100, 8), (8, 1)];
        let plan = Planner::new(config(32)).unwrap().plan(&view, &view).unwrap();
        assert_eq!(plan.axes.len(), 1);
        assert_eq!(extents(&plan.inner_axes), vec![(32, 1)]);
        assert_eq!(extents(&plan.outer_axes), vec![(25, 32)]);
    }

    #[test]
    fn test_scenario_c_transpose_dual_cut() {
        let dst = row_major(&[1000, 1000]);
        let src = [(1000, 1), (1000, 1000)];
        let plan = Planner::new(config(4096)).unwrap().plan(&dst, &src).unwrap();
        assert_eq!(plan.strategy, Strategy::DualCut);
        assert_eq!(plan.splits.len(), 2);
        assert_eq!(plan.outer_axes.len(), 2);
        assert_eq!(plan.inner_axes.len(), 2);
        assert!(plan.split(0).is_some() && plan.split(1).is_some());
        assert_eq!(plan.tile_elements(), 64 * 64);
        assert_eq!(plan.total_iterations(), 16 * 16);
        assert_coverage(&plan);
    }

    #[test]
    fn test_single_cut_preference_skips_dual() {
        let dst = row_major(&[1000, 1000]);
        let src = [(1000, 1), (1000, 1000)];
        let config = config(4096).with_strategy(StrategyPreference::SingleCut);
        let plan = Planner::new(config).unwrap().plan(&dst, &src).unwrap();
        assert_eq!(plan.strategy, Strategy::SingleCut);
        assert_eq!(extents(&plan.inner_axes), vec![(4, 1), (1000, 1000)]);
    }

    #[test]
    fn test_scenario_d_budget_too_small() {
        let view = [(16, 64), (64, 1)];
        let planner = Planner::new(config(4).with_canonicalize(false)).unwrap();
        assert_eq!(
            planner.plan(&view, &view),
            Err(PlanError::BudgetTooSmall {
                capacity: 4,
                required: 8
            })
        );
    }

    #[derive(Default)]
    struct FallbackRecorder(RefCell<Vec<String>>);

    impl PlanObserver for FallbackRecorder {
        fn fallback(&self, _attempted: Strategy, _used: Strategy, reason: &str) {
            self.0.borrow_mut().push(reason.to_owned());
        }
    }

    #[test]
    fn test_forced_dual_cut_falls_back_on_narrow_final_axis() {
        let dst = row_major(&[100, 6]);
        let src = [(100, 1), (6, 100)];
        let recorder = FallbackRecorder::default();
        let config = config(64).with_strategy(StrategyPreference::DualCut);
        let plan = Planner::with_observer(config, &recorder)
            .unwrap()
            .plan(&dst, &src)
            .unwrap();
        assert_eq!(plan.strategy, Strategy::SingleCut);
        assert_eq!(recorder.0.borrow().len(), 1);
    }

    #[test]
    fn test_forced_dual_cut_falls_back_on_zero_inner_extent() {
        let dst = [(3, 200), (10, 20), (20, 1)];
        let src = [(3, 1), (10, 3), (20, 30)];
        let recorder = FallbackRecorder::default();
        let config = config(16).with_strategy(StrategyPreference::DualCut);
        let plan = Planner::with_observer(config, &recorder)
            .unwrap()
            .plan(&dst, &src)
            .unwrap();
        assert_eq!(plan.strategy, Strategy::SingleCut);
        assert_eq!(extents(&plan.inner_axes), vec![(16, 30)]);
        assert_eq!(plan.split(2).map(|s| s.tail_extent), Some(4));
        assert_eq!(recorder.0.borrow().len(), 1);
        assert_coverage(&plan);
    }

    #[test]
    fn test_single_cut_prefers_evenly_dividing_tile() {
        let view = [(1200, 8), (8, 1)];
        let config = config(2480)
            .with_canonicalize(false)
            .with_strategy(StrategyPreference::SingleCut);
        let plan = Planner::new(config).unwrap().plan(&view, &view).unwrap();
        assert_eq!(plan.strategy, Strategy::SingleCut);
        let split = plan.split(0).unwrap();
        assert_eq!(
            (split.inner_extent, split.outer_extent, split.tail_extent),
            (300, 4, 300)
        );
        assert_eq!(plan.tile_elements(), 2400);
    }

    #[test]
    fn test_single_cut_without_even_tile_uses_full_budget() {
        let view = [(100, 8), (8, 1)];
        let config = config(64)
            .with_canonicalize(false)
            .with_strategy(StrategyPreference::SingleCut);
        let plan = Planner::new(config).unwrap().plan(&view, &view).unwrap();
        let split = plan.split(0).unwrap();
        assert_eq!(
            (split.inner_extent, split.outer_extent, split.tail_extent),
            (8, 13, 4)
        );
    }

    #[test]
    fn test_tiling_data_must_fit_capacity() {
        let view = [(4, 100), (8, 1)];
        let planner = Planner::new(config(64).with_tiling_data_capacity(8)).unwrap();
        assert!(matches!(
            planner.plan(&view, &view),
            Err(PlanError::TilingDataTooLarge { capacity: 8, .. })
        ));
    }

    #[test]
    fn test_plan_canonical_rejects_non_positional_indices() {
        let axes = vec![
            PlanAxis {
                logical_index: 1,
                extent: 100,
                source_stride: 8,
                destination_stride: 8,
            },
            PlanAxis {
                logical_index: 0,
                extent: 8,
                source_stride: 1,
                destination_stride: 1,
            },
        ];
        let planner = Planner::new(config(32)).unwrap();
        assert!(matches!(
            planner.plan_canonical(axes),
            Err(PlanError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_policy_thresholds_can_disable_dual_cut() {
        let dst = row_major(&[1000, 1000]);
        let src = [(1000, 1), (1000, 1000)];
        let policy = DualCutPolicy {
            min_stride_bytes: 0,
            ..DualCutPolicy::default()
        };
        let plan = Planner::new(config(4096).with_policy(policy))
            .unwrap()
            .plan(&dst, &src)
            .unwrap();
        assert_eq!(plan.strategy, Strategy::SingleCut);
    }

    #[test]
    fn test_validation_errors() {
        let planner = Planner::new(config(1024)).unwrap();
        assert!(matches!(
            planner.plan(&[], &[]),
            Err(PlanError::ShapeMismatch(_))
        ));
        assert!(matches!(
            planner.plan(&[(2, 1)], &[(2, 1), (3, 2)]),
            Err(PlanError::ShapeMismatch(_))
        ));
        assert!(matches!(
            planner.plan(&[(2, 1)], &[(3, 1)]),
            Err(PlanError::ShapeMismatch(_))
        ));
        assert_eq!(
            planner.plan(&[(2, 1), (0, 1)], &[(2, 1), (0, 1)]),
            Err(PlanError::InvalidAxis {
                index: 1,
                extent: 0,
                stride: 1
            })
        );
        assert_eq!(
            planner.plan(&[(2, 1)], &[(2, -1)]),
            Err(PlanError::InvalidAxis {
                index: 0,
                extent: 2,
                stride: -1
            })
        );
        let nine = row_major(&[2; 9]);
        assert_eq!(
            planner.plan(&nine, &nine),
            Err(PlanError::AxisCountExceeded { axes: 9, max: 8 })
        );
        assert!(Planner::new(config(1024).with_quantum(0)).is_err());
    }

    fn view_strategy() -> impl proptest::strategy::Strategy<Value = (Vec<(i64, i64)>, Vec<(i64, i64)>)> {
        prop::collection::vec((1i64..=24, 0i64..=600), 1..=6).prop_map(|src| {
            let dst = row_major(&src.iter().map(|&(e, _)| e).collect::<Vec<_>>());
            (dst, src)
        })
    }

    proptest! {
        #[test]
        fn test_plans_cover_and_fit(
            (dst, src) in view_strategy(),
            scratch in 8u64..=2048,
            workers in 1u32..=64,
            preference in any::<StrategyPreference>(),
        ) {
            let config = config(scratch)
                .with_workers(NonZeroU32::new(workers).unwrap())
                .with_strategy(preference);
            let plan = Planner::new(config).unwrap().plan(&dst, &src).unwrap();
            assert_coverage(&plan);
            prop_assert!(plan.fits_capacity());
            prop_assert!(plan.inner_axes.len() <= 5);
            prop_assert!(plan.workers.active_workers <= workers);
            let w = plan.workers;
            prop_assert_eq!(
                w.iterations_per_worker * u64::from(w.active_workers - 1) + w.tail_iterations,
                plan.total_iterations()
            );
            for pair in plan.inner_axes.windows(2) {
                prop_assert!(pair[0].logical_index < pair[1].logical_index);
            }
            for pair in plan.outer_axes.windows(2) {
                prop_assert!(pair[0].logical_index < pair[1].logical_index);
            }
        }
    }
}
