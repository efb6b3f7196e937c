//! WorldSync simulator CLI
//!
//! Runs the reference workers against the in-memory coordinator.

use clap::Parser;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use worldsync_core::WorkerConfig;
use worldsync_env::ConnectionParams;
use worldsync_sim::{ScenarioId, ScenarioResult, ScenarioRunner};

const ERROR_EXIT_STATUS: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "worldsync-sim")]
#[command(about = "Deterministic WorldSync worker simulation")]
struct Args {
    /// Connection arguments of the managed worker: <mode> <host> <port> [<worker-id>]
    connection: Vec<String>,

    /// Scenario to run (reference, authority_rejection, command_timeout,
    /// creation_failure, handover, fatal_log, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Managed-worker ticks per scenario
    #[arg(short, long, default_value = "6")]
    ticks: u32,

    /// Deer spawned by the managed worker
    #[arg(short, long, default_value = "1000")]
    deer: u32,

    /// Managed worker config (JSON); replaces the reference deployment
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn exit_with(message: &str) -> ! {
    eprintln!("{}", message);
    std::process::exit(ERROR_EXIT_STATUS);
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        exit_with(&format!("Failed to set tracing subscriber: {}", e));
    }

    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    } else {
        args.seed
    };

    let mut rng = ChaCha8Rng::seed_from_u64(base_seed);
    let params = match ConnectionParams::from_args(&args.connection, "Managed", &mut rng) {
        Ok(params) => params,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_with(&ConnectionParams::usage("worldsync-sim"));
        }
    };

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(scenario) => vec![scenario],
            Err(e) => exit_with(&format!(
                "Error: {}\nAvailable scenarios: reference, authority_rejection, command_timeout, \
                 creation_failure, handover, fatal_log, all",
                e
            )),
        }
    };

    let mut runner = ScenarioRunner::new(base_seed)
        .with_deer(args.deer)
        .with_ticks(args.ticks)
        .with_managed_params(params.clone());
    if let Some(path) = &args.config {
        match WorkerConfig::from_file(path) {
            Ok(config) => runner = runner.with_managed_config(config),
            Err(e) => exit_with(&format!("Error: {}", e)),
        }
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => exit_with(&format!("Failed to start runtime: {}", e)),
    };

    if !args.json {
        info!("WorldSync simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("Managed worker {} ({} {}:{})", params.worker_id, params.mode, params.host, params.port);
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let mut results: Vec<ScenarioResult> = Vec::new();
    for scenario in &scenarios {
        let result = runtime.block_on(runner.run(*scenario));

        if !args.json {
            if result.passed {
                info!(
                    "✓ {} (seed={}) PASSED in {} ticks, {:.1}s virtual",
                    scenario.name(),
                    base_seed,
                    result.total_ticks,
                    result.final_time_secs
                );
            } else {
                error!(
                    "✗ {} (seed={}) FAILED: {}",
                    scenario.name(),
                    base_seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
        results.push(result);
    }

    let total = results.len();
    let failed = results.iter().filter(|r| !r.passed).count();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed,
            "failed": failed,
            "results": results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "ticks": r.total_ticks,
                    "time_secs": r.final_time_secs,
                    "entities": r.final_entity_count,
                    "failure_reason": r.failure_reason,
                    "metrics": r.metrics,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => exit_with(&format!("Failed to encode results: {}", e)),
        }
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed, total);
        }
    }

    // Exit with proper code for CI
    if failed > 0 {
        std::process::exit(ERROR_EXIT_STATUS);
    }
}
