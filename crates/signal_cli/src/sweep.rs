use anyhow::{bail, ensure, Context, Result};
use rayon::prelude::*;
use signal_control::PolicyKind;
use signal_world::World;

use crate::runner::{self, JunctionSummary};
use crate::trace::TraceStep;

/// Parses `"1..=8"`, `"1..8"` or a comma-separated list of seeds.
pub fn parse_seeds(list: &str) -> Result<Vec<u64>> {
    let list = list.trim();
    let seeds: Vec<u64> = if let Some((lo, hi)) = list.split_once("..=") {
        let (lo, hi) = (parse_seed(lo)?, parse_seed(hi)?);
        (lo..=hi).collect()
    } else if let Some((lo, hi)) = list.split_once("..") {
        let (lo, hi) = (parse_seed(lo)?, parse_seed(hi)?);
        (lo..hi).collect()
    } else {
        list.split(',').map(parse_seed).collect::<Result<_>>()?
    };
    ensure!(!seeds.is_empty(), "seed list '{list}' is empty");
    Ok(seeds)
}

fn parse_seed(text: &str) -> Result<u64> {
    text.trim()
        .parse()
        .with_context(|| format!("invalid seed '{}'", text.trim()))
}

/// Parses a comma-separated list of packet error rates in [0, 1].
pub fn parse_pers(list: &str) -> Result<Vec<f64>> {
    let mut pers = Vec::new();
    for part in list.split(',') {
        let per: f64 = part
            .trim()
            .parse()
            .with_context(|| format!("invalid packet error rate '{}'", part.trim()))?;
        if !(0.0..=1.0).contains(&per) {
            bail!("packet error rate {per} is outside [0, 1]");
        }
        pers.push(per);
    }
    Ok(pers)
}

/// Replays `trace` once per (seed, PER) pair in parallel. Failed runs are
/// reported and skipped; the sweep fails only if every run failed.
pub fn run_sweep(
    world: &World,
    trace: &[TraceStep],
    policy: PolicyKind,
    seeds: &[u64],
    pers: &[f64],
) -> Result<Vec<JunctionSummary>> {
    let grid: Vec<(u64, f64)> = seeds
        .iter()
        .flat_map(|&seed| pers.iter().map(move |&per| (seed, per)))
        .collect();

    let results: Vec<Result<Vec<JunctionSummary>>> = grid
        .par_iter()
        .map(|&(seed, per)| {
            let mut options = world.options.clone();
            options.packet_error_rate = per;
            runner::run_trace(world, &options, policy, seed, trace, false)
                .map(|outcome| outcome.summaries)
                .with_context(|| format!("seed {seed}, packet error rate {per}"))
        })
        .collect();

    let mut rows = Vec::new();
    let mut failed = 0usize;
    for result in results {
        match result {
            Ok(summaries) => rows.extend(summaries),
            Err(err) => {
                failed += 1;
                eprintln!("Run failed: {err:#}");
            }
        }
    }
    if failed == grid.len() {
        bail!("all {failed} runs failed");
    }
    Ok(rows)
}

/// Per-PER means across seeds and junctions.
pub fn print_summary(rows: &[JunctionSummary], pers: &[f64]) {
    println!(
        "{:>6} {:>6} {:>10} {:>10} {:>10} {:>12} {:>8}",
        "PER", "rows", "switches", "gps_ext", "gps_rej", "mean_tracked", "lost"
    );
    for &per in pers {
        let group: Vec<&JunctionSummary> = rows
            .iter()
            .filter(|r| (r.packet_error_rate - per).abs() < 1e-12)
            .collect();
        if group.is_empty() {
            continue;
        }
        let n = group.len() as f64;
        let mean = |f: fn(&JunctionSummary) -> f64| group.iter().map(|r| f(r)).sum::<f64>() / n;
        println!(
            "{:>6.2} {:>6} {:>10.1} {:>10.1} {:>10.1} {:>12.2} {:>8.1}",
            per,
            group.len(),
            mean(|r| r.stage_switches as f64),
            mean(|r| r.gps_extensions as f64),
            mean(|r| r.gps_rejections as f64),
            mean(|r| r.mean_tracked),
            mean(|r| r.reports_lost as f64),
        );
    }
}
