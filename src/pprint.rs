use crate::plan::{PlanAxis, TilingPlan};

use prettytable::{self, format, row};
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Default)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum PlanPrintStyle {
    #[default]
    Table,
    Debug,
}

/// Pretty-print a [TilingPlan] to stdout.
pub fn pprint(plan: &TilingPlan, style: PlanPrintStyle) {
    match style {
        PlanPrintStyle::Table => {
            pprint_table(plan).printstd();
        }
        PlanPrintStyle::Debug => println!("{plan:#?}"),
    }
}

/// Pretty-print a [TilingPlan] to a given [fmt::Write].
pub fn pprint_write<W>(out: &mut W, plan: &TilingPlan, style: PlanPrintStyle) -> fmt::Result
where
    W: fmt::Write,
{
    match style {
        PlanPrintStyle::Table => write!(out, "{}", pprint_table(plan)),
        PlanPrintStyle::Debug => writeln!(out, "{plan:#?}"),
    }
}

pub fn pprint_string(plan: &TilingPlan, style: PlanPrintStyle) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = pprint_write(&mut out, plan, style);
    out
}

fn pprint_table(plan: &TilingPlan) -> prettytable::Table {
    let mut table = prettytable::Table::new();
    table.set_titles(row![
        "Level",
        "Axis",
        "Extent",
        "Src stride",
        "Dst stride",
        "Scratch stride"
    ]);

    for axis in &plan.outer_axes {
        table.add_row(row![
            "outer",
            axis_label(plan, axis),
            axis.extent,
            axis.source_stride,
            axis.destination_stride,
            ""
        ]);
    }
    for (axis, scratch_stride) in plan.inner_axes.iter().zip(&plan.scratch_strides) {
        let extent = match plan.split(axis.logical_index) {
            Some(split) if split.tail_extent != split.inner_extent => {
                format!("{} (tail {})", axis.extent, split.tail_extent)
            }
            _ => axis.extent.to_string(),
        };
        table.add_row(row![
            "inner",
            axis_label(plan, axis),
            extent,
            axis.source_stride,
            axis.destination_stride,
            scratch_stride
        ]);
    }

    let w = &plan.workers;
    table.add_row(row![
        plan.strategy,
        format!("{} iters", plan.total_iterations()),
        format!("{} workers x {}", w.active_workers, w.iterations_per_worker),
        format!("tail {}", w.tail_iterations),
        format!("{} bursts", plan.source_bursts()),
        format!("{} / {} elems", plan.scratch_elements(), plan.capacity)
    ]);

    let format = format::FormatBuilder::new()
        .separator(
            format::LinePosition::Title,
            format::LineSeparator::new('-', ' ', ' ', ' '),
        )
        .column_separator(' ')
        .build();
    table.set_format(format);
    table
}

fn axis_label(plan: &TilingPlan, axis: &PlanAxis) -> String {
    if plan.split(axis.logical_index).is_some() {
        format!("#{}*", axis.logical_index)
    } else {
        format!("#{}", axis.logical_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Dtype;
    use crate::planner::Planner;
    use crate::target::PlannerConfig;
    use proptest::prelude::*;
    use std::num::NonZeroU32;

    fn example_plan() -> TilingPlan {
        let config = PlannerConfig::new(Dtype::Float32, 32, 8, NonZeroU32::new(4).unwrap())
            .with_canonicalize(false);
        let view = [(100, 8), (8, 1)];
        Planner::new(config).unwrap().plan(&view, &view).unwrap()
    }

    #[test]
    fn test_table_lists_every_axis() {
        let out = pprint_string(&example_plan(), PlanPrintStyle::Table);
        let lines = out.lines().collect::<Vec<_>>();
        assert!(lines[0].contains("Scratch stride"));
        assert_eq!(lines.iter().filter(|l| l.trim_start().starts_with("outer")).count(), 1);
        assert_eq!(lines.iter().filter(|l| l.trim_start().starts_with("inner")).count(), 2);
        assert!(out.contains("#0*"));
        assert!(out.contains("single cut"));
    }

    proptest! {
        #[test]
        fn test_pprint_write_never_fails(style in any::<PlanPrintStyle>()) {
            let mut out = String::new();
            prop_assert!(pprint_write(&mut out, &example_plan(), style).is_ok());
            prop_assert!(!out.is_empty());
        }
    }
}
