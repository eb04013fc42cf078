#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]

//! CLI for profiling a single command

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use toolchain_profiler::{CommandProfile, CommandProfiler, ProfilerConfig};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Measure wall-clock time and peak memory of a shell command
#[derive(Parser, Debug)]
#[command(name = "toolchain-profile")]
#[command(version)]
struct Cli {
    /// Shell command to profile, e.g. "mago lint src/"
    command: String,

    /// Total runs: N-1 timed runs plus 1 memory run
    #[arg(short = 'n', long)]
    runs: Option<u32>,

    /// Per-run timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Best-effort command run before every run (e.g. clearing a cache)
    #[arg(short, long)]
    prepare: Option<String>,

    /// Exit code that aborts profiling; repeat to give several (replaces defaults)
    #[arg(long = "fatal-code")]
    fatal_codes: Vec<i32>,

    /// Directory the command runs in
    #[arg(short = 'C', long)]
    working_dir: Option<PathBuf>,

    /// TOML configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the profile as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn main() {
    init_tracing();

    match run(Cli::parse()) {
        Ok(true) => process::exit(0),
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Returns whether profiling succeeded
fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = build_config(&cli)?;
    let profiler = CommandProfiler::new(config)?;

    match profiler.profile(&cli.command) {
        Ok(profile) if cli.json => {
            println!("{}", serde_json::to_string_pretty(&profile)?);
            Ok(true)
        }
        Ok(profile) => {
            print_profile(&profile);
            Ok(true)
        }
        Err(failure) if cli.json => {
            println!("{}", serde_json::to_string_pretty(&failure)?);
            Ok(false)
        }
        Err(failure) => {
            eprintln!(
                "Profiling failed [{}]: {} (exit code {})",
                failure.kind(),
                failure.reason(),
                failure.exit_code()
            );
            Ok(false)
        }
    }
}

fn build_config(cli: &Cli) -> anyhow::Result<ProfilerConfig> {
    let mut config = match &cli.config {
        Some(path) => ProfilerConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ProfilerConfig::default(),
    };

    if let Some(runs) = cli.runs {
        config = config.with_runs(runs)?;
    }
    if let Some(secs) = cli.timeout {
        config = config.with_timeout(Duration::from_secs(secs))?;
    }
    if let Some(prepare) = &cli.prepare {
        config = config.with_prepare_command(prepare.clone())?;
    }
    if !cli.fatal_codes.is_empty() {
        config = config.with_fatal_exit_codes(cli.fatal_codes.clone())?;
    }
    if let Some(dir) = &cli.working_dir {
        config = config.with_working_dir(dir.clone());
    }

    Ok(config)
}

fn print_profile(profile: &CommandProfile) {
    let perf = profile.performance();

    println!("Command: {}", profile.command());
    println!();
    println!("Performance ({} runs):", perf.len());
    println!("  Mean:   {:.3}s", perf.mean().as_secs_f64());
    println!("  StdDev: {:.3}s", perf.stddev().as_secs_f64());
    println!("  Min:    {:.3}s", perf.min().as_secs_f64());
    println!("  Max:    {:.3}s", perf.max().as_secs_f64());
    println!();
    println!("Memory:");
    println!("  Peak:   {}", profile.memory());
}
