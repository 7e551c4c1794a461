use std::path::Path;
use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the emergency dispatch workspace",
    long_about = "A unified CLI for running the dispatch simulation, benchmarks,\n\
                  load tests and CI checks in the emergency dispatch workspace."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dispatch simulation (30 units, 20 incidents, 60 s)
    Run {
        /// Wall-clock run time in seconds
        #[arg(long, default_value_t = 60)]
        duration_secs: u64,
        /// Seed for scenario generation
        #[arg(long, env = "DISPATCH_SEED")]
        seed: Option<u64>,
        /// Route through an OSRM server
        #[arg(long)]
        osrm_endpoint: Option<String>,
    },
    /// Run a large city (1 000 units, 500 incidents)
    RunLarge,
    /// Run Criterion benchmarks
    Bench,
    /// Compare benchmarks: stash changes, create baseline, restore, compare
    BenchCompare,
    /// Run CI checks (fmt, clippy, tests, benchmarks)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
    /// Run load tests (ignored tests in dispatch_core)
    LoadTest,
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Short simulation smoke run
    Smoke,
    /// Run benchmarks
    Bench,
    /// Run check + smoke + bench
    All,
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn spawn(program: &str, args: &[&str]) -> ExitStatus {
    eprintln!("+ {program} {}", args.join(" "));
    match Command::new(program).args(args).status() {
        Ok(status) => status,
        Err(err) => {
            eprintln!("failed to execute {program}: {err}");
            exit(1);
        }
    }
}

fn run_cargo(args: &[&str]) {
    let status = spawn("cargo", args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn run_git(args: &[&str]) {
    let status = spawn("git", args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn run_sim(sim_args: &[&str], features: Option<&str>) {
    let mut args = vec!["run", "-p", "dispatch_sim", "--release"];
    if let Some(features) = features {
        args.extend(["--features", features]);
    }
    args.push("--");
    args.extend_from_slice(sim_args);
    run_cargo(&args);
}

fn bench(extra: &[&str]) {
    let mut args = vec!["bench", "--package", "dispatch_core", "--bench", "performance"];
    if !extra.is_empty() {
        args.push("--");
        args.extend_from_slice(extra);
    }
    run_cargo(&args);
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    step("Test dispatch_core");
    run_cargo(&["test", "-p", "dispatch_core"]);

    step("Test dispatch_core (osrm feature)");
    run_cargo(&["test", "-p", "dispatch_core", "--features", "osrm"]);
}

fn ci_smoke() {
    step("Run dispatch_sim smoke (10 s)");
    run_sim(&["--duration-secs", "10", "--seed", "42", "--speed-factor", "20"], None);
}

fn ci_bench() {
    step("Run benchmarks");
    bench(&[]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            duration_secs,
            seed,
            osrm_endpoint,
        } => {
            let duration = duration_secs.to_string();
            let seed = seed.map(|s| s.to_string());
            let mut args = vec!["--duration-secs", duration.as_str()];
            if let Some(seed) = &seed {
                args.extend(["--seed", seed.as_str()]);
            }
            let features = match &osrm_endpoint {
                Some(endpoint) => {
                    args.extend(["--osrm-endpoint", endpoint.as_str()]);
                    Some("osrm")
                }
                None => None,
            };
            run_sim(&args, features);
        }
        Commands::RunLarge => {
            run_sim(
                &[
                    "--units",
                    "1000",
                    "--incidents",
                    "500",
                    "--inject-batch",
                    "50",
                    "--duration-secs",
                    "120",
                ],
                None,
            );
        }
        Commands::Bench => bench(&[]),
        Commands::BenchCompare => {
            let baseline_dir = Path::new("target/criterion");
            if baseline_dir.exists() {
                step("Removing existing benchmark data");
                if let Err(err) = std::fs::remove_dir_all(baseline_dir) {
                    eprintln!("failed to remove target/criterion: {err}");
                    exit(1);
                }
            }

            step("Stashing current changes");
            run_git(&[
                "stash",
                "push",
                "-m",
                "Temporary stash for benchmark comparison",
            ]);

            step("Running benchmark to create baseline");
            bench(&["--save-baseline", "main"]);

            step("Reapplying changes");
            run_git(&["stash", "pop"]);

            step("Running benchmark comparing against baseline");
            bench(&["--baseline", "main"]);

            eprintln!("\nDone! Check the output above to see performance comparison.");
        }
        Commands::Ci { job } => {
            match job {
                CiJob::Check => ci_check(),
                CiJob::Smoke => ci_smoke(),
                CiJob::Bench => ci_bench(),
                CiJob::All => {
                    ci_check();
                    ci_smoke();
                    ci_bench();
                }
            }
            eprintln!("\nCI job passed.");
        }
        Commands::LoadTest => {
            run_cargo(&[
                "test",
                "-p",
                "dispatch_core",
                "--test",
                "load_tests",
                "--",
                "--ignored",
            ]);
        }
    }
}
