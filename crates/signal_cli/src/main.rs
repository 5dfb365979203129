use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use signal_control::PolicyKind;
use signal_world::load_world;
use tracing_subscriber::EnvFilter;

mod runner;
mod sweep;
mod trace;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "signal_cli", about = "Adaptive traffic signal controller replay")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded observation trace through every junction controller.
    Run {
        #[arg(long, default_value = "./world")]
        world_dir: String,
        #[arg(long, default_value = "./world/trace.jsonl")]
        trace: PathBuf,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value_t = PolicyKind::RoundRobin)]
        policy: PolicyKind,
        /// Overrides the packet error rate from options.json.
        #[arg(long)]
        per: Option<f64>,
        #[arg(long, default_value = "runs")]
        output_dir: String,
        /// Skip writing the run directory.
        #[arg(long)]
        no_metrics: bool,
    },
    /// Replay the same trace across seeds × packet error rates in parallel.
    Sweep {
        #[arg(long, default_value = "./world")]
        world_dir: String,
        #[arg(long, default_value = "./world/trace.jsonl")]
        trace: PathBuf,
        /// Seed range (`1..=8`) or list (`1,2,5`).
        #[arg(long, default_value = "1..=8")]
        seeds: String,
        /// Comma-separated packet error rates.
        #[arg(long, default_value = "0,0.1,0.3,0.5")]
        pers: String,
        #[arg(long, default_value_t = PolicyKind::RoundRobin)]
        policy: PolicyKind,
        #[arg(long, default_value = "runs")]
        output_dir: String,
    },
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn create_run_dir(output_dir: &str, label: &str) -> Result<PathBuf> {
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let dir = PathBuf::from(output_dir).join(format!("{timestamp}_{label}"));
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating run directory: {}", dir.display()))?;
    Ok(dir)
}

fn run(
    world_dir: &str,
    trace_path: &Path,
    seed: u64,
    policy: PolicyKind,
    per: Option<f64>,
    output_dir: &str,
    no_metrics: bool,
) -> Result<()> {
    let world = load_world(world_dir)?;
    let trace = trace::load_trace(trace_path)?;

    let mut options = world.options.clone();
    if let Some(per) = per {
        options.packet_error_rate = per;
    }
    signal_core::validate_options(&options).context("applying --per")?;

    println!(
        "Replaying {} steps through {} junctions (policy {policy}, seed {seed}, PER {})",
        trace.len(),
        world.layout.signalised_junctions().count(),
        options.packet_error_rate
    );
    let outcome = runner::run_trace(&world, &options, policy, seed, &trace, !no_metrics)?;

    for row in &outcome.summaries {
        println!(
            "{:>8}  switches {:>4}  ped {:>3}  commands {:>4}  gps ext/rej {:>4}/{:<4}  stalls {:>3}  tracked {:>6.2}",
            row.junction.0,
            row.stage_switches,
            row.pedestrian_stages,
            row.light_commands,
            row.gps_extensions,
            row.gps_rejections,
            row.stall_truncations,
            row.mean_tracked,
        );
    }
    println!("Done in {} ms", outcome.wall_time_ms);

    if !no_metrics {
        let dir = create_run_dir(output_dir, &format!("seed{seed}"))?;
        signal_world::write_run_info(
            &dir,
            &outcome.run_id,
            seed,
            world_dir,
            serde_json::json!({
                "runner": "signal_cli run",
                "trace": trace_path.display().to_string(),
                "policy": policy,
                "packet_error_rate": options.packet_error_rate,
                "steps": trace.len(),
            }),
        )?;
        runner::write_outcome(&dir, &outcome)?;
        println!("Run written to {}", dir.display());
    }
    Ok(())
}

fn sweep(
    world_dir: &str,
    trace_path: &Path,
    seeds: &str,
    pers: &str,
    policy: PolicyKind,
    output_dir: &str,
) -> Result<()> {
    let seeds = sweep::parse_seeds(seeds)?;
    let pers = sweep::parse_pers(pers)?;
    let world = load_world(world_dir)?;
    let trace = trace::load_trace(trace_path)?;

    let dir = create_run_dir(output_dir, "sweep")?;
    println!("Output: {}", dir.display());
    println!(
        "Running {} seeds × {} packet error rates in parallel...",
        seeds.len(),
        pers.len()
    );

    let rows = sweep::run_sweep(&world, &trace, policy, &seeds, &pers)?;
    sweep::print_summary(&rows, &pers);

    signal_world::write_run_info(
        &dir,
        &uuid::Uuid::new_v4().to_string(),
        seeds[0],
        world_dir,
        serde_json::json!({
            "runner": "signal_cli sweep",
            "trace": trace_path.display().to_string(),
            "policy": policy,
            "seeds": seeds,
            "packet_error_rates": pers,
        }),
    )?;
    let summary_path = dir.join("summary.csv");
    runner::write_csv(&summary_path, &rows)?;
    println!("Summary written to {}", summary_path.display());
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            world_dir,
            trace,
            seed,
            policy,
            per,
            output_dir,
            no_metrics,
        } => run(
            &world_dir,
            &trace,
            seed,
            policy,
            per,
            &output_dir,
            no_metrics,
        )?,
        Commands::Sweep {
            world_dir,
            trace,
            seeds,
            pers,
            policy,
            output_dir,
        } => sweep(&world_dir, &trace, &seeds, &pers, policy, &output_dir)?,
    }
    Ok(())
}
