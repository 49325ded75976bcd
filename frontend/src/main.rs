use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use rayon::prelude::*;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Instant;

use stridetile::common::Dtype;
use stridetile::observer::LogObserver;
use stridetile::policy::StrategyPreference;
use stridetile::pprint::{pprint, PlanPrintStyle};
use stridetile::{DefaultTarget, PlanError, Planner, PlannerConfig, TilingPlan};

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, global = true, value_enum, default_value_t = Dtype::Float32)]
    dtype: Dtype,

    /// Workers to divide outer iterations across. Defaults to the target's.
    #[arg(long, global = true)]
    workers: Option<NonZeroU32>,

    #[arg(long, global = true, value_enum, default_value_t = StrategyPreference::Auto)]
    strategy: StrategyPreference,

    /// Plan the views exactly as given, without merging axes.
    #[arg(long, global = true)]
    no_canonicalize: bool,

    /// Check every plan against an element-by-element copy.
    #[cfg(feature = "verification")]
    #[arg(long, global = true)]
    verify: bool,

    #[command(subcommand)]
    subcmd: Subcommand,
}

#[derive(clap::Subcommand)]
enum Subcommand {
    /// Plan a single copy and print it.
    Plan(PlanCmd),
    /// Plan the same copy at every power-of-two scratch size in a range.
    Sweep(SweepCmd),
}

#[derive(clap::Args)]
struct ViewArgs {
    /// Source view as comma-separated `extent x stride` axes, e.g. `100x8,8x1`.
    #[arg(long)]
    src: ViewArg,

    /// Destination view. Defaults to a contiguous row-major view of the source's extents.
    #[arg(long)]
    dst: Option<ViewArg>,
}

#[derive(clap::Args)]
struct PlanCmd {
    #[command(flatten)]
    views: ViewArgs,

    /// Scratch bytes per buffer. Defaults to the target's.
    #[arg(long)]
    scratch_bytes: Option<u64>,

    #[arg(long, value_enum, default_value_t = PlanPrintStyle::Table)]
    format: PlanPrintStyle,
}

#[derive(clap::Args)]
struct SweepCmd {
    #[command(flatten)]
    views: ViewArgs,

    #[arg(long, default_value_t = 256)]
    min_scratch_bytes: u64,

    #[arg(long, default_value_t = 262_144)]
    max_scratch_bytes: u64,
}

/// A strided view: `(extent, stride)` per logical axis, outermost first.
#[derive(Debug, Clone)]
struct ViewArg(Vec<(i64, i64)>);

impl FromStr for ViewArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(|axis| {
                let (extent, stride) = axis
                    .trim()
                    .split_once('x')
                    .ok_or_else(|| format!("expected `extent x stride`, got `{axis}`"))?;
                let extent = extent.trim().parse::<i64>().map_err(|e| e.to_string())?;
                let stride = stride.trim().parse::<i64>().map_err(|e| e.to_string())?;
                Ok((extent, stride))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(ViewArg)
    }
}

impl ViewArgs {
    fn resolve(&self) -> (Vec<(i64, i64)>, Vec<(i64, i64)>) {
        let source = self.src.0.clone();
        let destination = match &self.dst {
            Some(dst) => dst.0.clone(),
            None => {
                let mut stride = 1;
                let mut dst = source
                    .iter()
                    .rev()
                    .map(|&(extent, _)| {
                        let axis = (extent, stride);
                        stride *= extent.max(1);
                        axis
                    })
                    .collect::<Vec<_>>();
                dst.reverse();
                dst
            }
        };
        (destination, source)
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = PlannerConfig::for_target::<DefaultTarget>(args.dtype)
        .with_strategy(args.strategy)
        .with_canonicalize(!args.no_canonicalize);
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }

    match &args.subcmd {
        Subcommand::Plan(cmd) => {
            if let Some(bytes) = cmd.scratch_bytes {
                config = config.with_scratch_elements(bytes / u64::from(args.dtype.size()));
            }
            let (destination, source) = cmd.views.resolve();
            let planner = Planner::with_observer(config, LogObserver)?;

            let start_time = Instant::now();
            let plan = planner
                .plan(&destination, &source)
                .context("planning failed")?;
            info!("Planning took {:?}", start_time.elapsed());

            pprint(&plan, cmd.format);
            verify(&args, &plan, &destination, &source)?;
        }
        Subcommand::Sweep(cmd) => {
            if cmd.min_scratch_bytes > cmd.max_scratch_bytes {
                bail!("--min-scratch-bytes exceeds --max-scratch-bytes");
            }
            let (destination, source) = cmd.views.resolve();
            let sizes = std::iter::successors(Some(cmd.min_scratch_bytes.next_power_of_two()), |b| {
                b.checked_mul(2)
            })
            .take_while(|&b| b <= cmd.max_scratch_bytes)
            .collect::<Vec<_>>();

            let start_time = Instant::now();
            let results = sizes
                .par_iter()
                .map(|&bytes| {
                    let scratch = config.with_scratch_elements(bytes / u64::from(args.dtype.size()));
                    let plan = Planner::new(scratch).and_then(|p| p.plan(&destination, &source));
                    (bytes, plan)
                })
                .collect::<Vec<(u64, Result<TilingPlan, PlanError>)>>();
            info!("Planned {} sizes in {:?}", results.len(), start_time.elapsed());

            println!(
                "{:>12}  {:<10}  {:>10}  {:>12}  {:>12}",
                "Scratch", "Strategy", "Tile", "Iterations", "Bursts"
            );
            for (bytes, plan) in &results {
                match plan {
                    Ok(plan) => {
                        println!(
                            "{:>12}  {:<10}  {:>10}  {:>12}  {:>12}",
                            bytes,
                            plan.strategy.to_string(),
                            plan.tile_elements(),
                            plan.total_iterations(),
                            plan.source_bursts()
                        );
                        verify(&args, plan, &destination, &source)?;
                    }
                    Err(e) => println!("{bytes:>12}  {e}"),
                }
            }
        }
    }

    Ok(())
}

#[cfg(feature = "verification")]
fn verify(
    args: &Args,
    plan: &TilingPlan,
    destination: &[(i64, i64)],
    source: &[(i64, i64)],
) -> Result<()> {
    if args.verify {
        if !stridetile::verification::check_plan(plan, destination, source) {
            bail!("plan does not move exactly the elements of the copy");
        }
        info!("Verified {} plan", plan.strategy);
    }
    Ok(())
}

#[cfg(not(feature = "verification"))]
fn verify(
    _args: &Args,
    _plan: &TilingPlan,
    _destination: &[(i64, i64)],
    _source: &[(i64, i64)],
) -> Result<()> {
    Ok(())
}
