//! splitcache-sim: a demo CLI that drives a [`SplitController`] and the
//! MFCWT read engine over a synthetic RDMA throughput trace and prints
//! the resulting mode/split-ratio log, plus a small read workload
//! fanned out through the dispatcher and mocked collaborators.
//!
//! Grounded on the teacher's `main.rs`: a single binary, plain
//! `println!`/`eprintln!` reporting, no logging framework, CLI args via
//! `clap::Parser`.

use anyhow::{Context, Result};
use clap::Parser;
use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::Serialize;
use splitcache::bandwidth::BandwidthTable;
use splitcache::collab::mock::mock_collaborators;
use splitcache::config::Tunables;
use splitcache::controller::SplitController;
use splitcache::dispatcher::Dispatcher;
use splitcache::engine_mfcwt::{read, EngineContext};
use splitcache::request::{LineState, Mapping, Operation, Request, RequestOutcome};
use splitcache::util::time::format_throughput;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// splitcache-sim - drive the split-ratio controller over a synthetic
/// RDMA throughput trace and report the resulting mode/ratio log.
#[derive(Parser, Debug)]
#[command(name = "splitcache-sim")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Optional TOML file of tunables; unspecified fields fall back to
    /// the spec's defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of controller ticks to simulate.
    #[arg(short = 'n', long, default_value = "40")]
    ticks: usize,

    /// Throughput (arbitrary units, same scale as `rdma_threshold`) held
    /// steady once the trace ramps up, before the congestion dip.
    #[arg(long, default_value = "1000")]
    steady_throughput: u64,

    /// Number of leading ticks reporting zero throughput (keeps the
    /// controller in Idle before the trace ramps up).
    #[arg(long, default_value = "5")]
    idle_ticks: usize,

    /// Number of ticks near the end of the trace that dip to simulate
    /// congestion.
    #[arg(long, default_value = "5")]
    congestion_ticks: usize,

    /// Number of synthetic reads to fan through the dispatcher and read
    /// engine after the trace finishes, to show the split ratio the
    /// controller settled on driving real cache/backend decisions.
    #[arg(long, default_value = "20")]
    sample_reads: usize,

    /// Seed for the trace's throughput jitter; fixed by default so runs
    /// are reproducible, same as the teacher's `--seed`-style knobs on
    /// its distribution generators.
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Emit a machine-readable JSON summary (final mode/ratio and the
    /// sample-read tallies) after the human-readable trace, instead of
    /// only the `println!` report.
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct JsonSummary {
    final_mode: String,
    final_split_ratio: u8,
    final_data_admit: bool,
    max_avg_throughput: u64,
    cache_submits: u64,
    backend_submits: u64,
    promotions: u64,
    successes: usize,
    errors: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    println!("splitcache-sim v{}", env!("CARGO_PKG_VERSION"));
    println!("hybrid block-cache split-ratio controller demo");
    println!();

    let tunables = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading tunables from {}", path.display()))?;
            Tunables::from_toml_str(&text).context("parsing tunables")?
        }
        None => Tunables::default(),
    };
    tunables.validate().context("validating tunables")?;

    print_tunables(&tunables);
    println!();

    let controller = Arc::new(SplitController::new(tunables.clone(), BandwidthTable::default_table()));
    let trace = build_trace(&cli);

    println!("Trace ({} ticks):", trace.len());
    println!("{:>5} {:>12} {:>10} {:>12} {:>12}", "tick", "throughput", "mode", "split_ratio", "data_admit");
    for (i, t_now) in trace.iter().enumerate() {
        controller.tick(*t_now);
        println!(
            "{:>5} {:>12} {:>10?} {:>12} {:>12}",
            i,
            format_throughput(*t_now as f64),
            controller.mode(),
            controller.query_optimal_split_ratio(),
            controller.query_data_admit(),
        );
    }
    println!();
    println!("max_avg_throughput observed: {}", controller.max_avg());

    let final_mode = format!("{:?}", controller.mode());
    let final_split_ratio = controller.query_optimal_split_ratio();
    let final_data_admit = controller.query_data_admit();
    let max_avg_throughput = controller.max_avg();

    let tally = run_sample_reads(&cli, controller, &tunables);

    if cli.json {
        let summary = JsonSummary {
            final_mode,
            final_split_ratio,
            final_data_admit,
            max_avg_throughput,
            cache_submits: tally.cache_submits,
            backend_submits: tally.backend_submits,
            promotions: tally.promotions,
            successes: tally.successes,
            errors: tally.errors,
        };
        println!();
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(())
}

fn print_tunables(t: &Tunables) {
    println!("Tunables:");
    println!("  window (W):                 {}", t.window);
    println!("  monitor_interval_ms:        {}", t.monitor_interval_ms);
    println!("  warmup_period:              {:?}", t.warmup_period);
    println!("  rdma_threshold:             {}", t.rdma_threshold);
    println!("  congestion_threshold_permil:{}", t.congestion_threshold_permil);
    println!("  dispatcher_window_size:     {}", t.dispatcher_window_size);
    println!("  max_pattern_size:           {}", t.max_pattern_size);
    println!("  io_depth / num_jobs:        {} / {}", t.io_depth, t.num_jobs);
}

/// Build a throughput trace: a zero prefix (Idle), a ramp to
/// `steady_throughput` held for the rest of the run (Warmup -> Stable),
/// and a dip near the end to demonstrate Congestion. The steady and
/// congestion segments carry a small amount of seeded jitter so the
/// trace isn't perfectly flat, same "seed for reproducible runs"
/// convention as the teacher's distribution generators.
fn build_trace(cli: &Cli) -> Vec<u64> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(cli.seed);
    let jitter = |rng: &mut Xoshiro256PlusPlus, base: u64| -> u64 {
        if base == 0 {
            return 0;
        }
        let spread = (base / 20).max(1); // +/-5%
        base.saturating_sub(spread) + rng.gen_range(0..=2 * spread)
    };

    let mut trace = vec![0u64; cli.idle_ticks];
    let steady_len = cli.ticks.saturating_sub(cli.idle_ticks + cli.congestion_ticks);
    trace.extend((0..steady_len).map(|_| jitter(&mut rng, cli.steady_throughput)));
    let dip = cli.steady_throughput / 20; // ~95% drop, well past the congestion threshold
    trace.extend((0..cli.congestion_ticks).map(|_| jitter(&mut rng, dip)));
    trace
}

/// Tally of one `run_sample_reads` pass, handed back to `main` for the
/// optional `--json` summary.
struct SampleTally {
    cache_submits: u64,
    backend_submits: u64,
    promotions: u64,
    successes: usize,
    errors: usize,
}

/// Fan a handful of synthetic reads through the dispatcher and read
/// engine (against in-memory mock collaborators), reporting how many
/// landed on cache vs. backend at the split ratio the trace settled on.
fn run_sample_reads(cli: &Cli, controller: Arc<SplitController>, tunables: &Tunables) -> SampleTally {
    println!();
    println!("Sampling {} reads at split_ratio={}...", cli.sample_reads, controller.query_optimal_split_ratio());

    let (collab, handles) = mock_collaborators();
    let dispatcher = Dispatcher::new(tunables);
    let ctx = Arc::new(EngineContext::new(collab, controller, dispatcher));

    let successes = Arc::new(AtomicUsize::new(0));
    let errors = Arc::new(AtomicUsize::new(0));

    for i in 0..cli.sample_reads {
        // Alternate hit/miss mappings to exercise both dispatch branches.
        let mapping = if i % 3 == 0 {
            Mapping::new(vec![LineState { present: false, ..Default::default() }])
        } else {
            Mapping::new(vec![LineState { present: true, ..Default::default() }])
        };

        let successes = successes.clone();
        let errors = errors.clone();
        let req = Request::new(Operation::Read, (i as u64) * 4096, 4096, mapping, move |outcome| {
            match outcome {
                RequestOutcome::Success => successes.fetch_add(1, Ordering::SeqCst),
                RequestOutcome::Error(_) => errors.fetch_add(1, Ordering::SeqCst),
            };
        });
        read(req, ctx.clone());
    }

    let tally = SampleTally {
        cache_submits: handles.io.cache_submits(),
        backend_submits: handles.io.backend_submits(),
        promotions: handles.stats.promotions.get(),
        successes: successes.load(Ordering::SeqCst),
        errors: errors.load(Ordering::SeqCst),
    };

    println!("  cache submits:   {}", tally.cache_submits);
    println!("  backend submits: {}", tally.backend_submits);
    println!("  promotions:      {}", tally.promotions);
    println!("  successes:       {}", tally.successes);
    println!("  errors:          {}", tally.errors);

    tally
}
