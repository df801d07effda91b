#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]

//! Binary entry point for the all-pairs latency benchmark.
//!
//! This module is excluded from mutation testing because testing process entry/exit behavior
//! is impractical - it requires spawning subprocesses and checking exit codes.

use std::io;
use std::num::NonZero;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use all_pairs::{
    LocalGroupOptions, OutputFormat, RunInput, Statistic, SweepConfig, default_group_size, run,
};
use argh::FromArgs;
use tracing_subscriber::EnvFilter;

/// Measures point-to-point latency between every pair of group members, once per kernel.
#[derive(FromArgs)]
struct Args {
    /// how many full passes over the pair schedule each kernel makes (default 10)
    #[argh(option, default = "10")]
    repeats: i64,

    /// how many timed trials are averaged into one sample (default 100)
    #[argh(option, default = "100")]
    ireps: i64,

    /// how many group members are under test, 0 or less for all of them (default 0)
    #[argh(option, default = "0")]
    ptests: i64,

    /// measure each pair in one direction only
    #[argh(switch)]
    make_symmetric: bool,

    /// kernels to run, repeatable and comma-separated (default def)
    #[argh(option)]
    kernels: Vec<String>,

    /// how many group members to launch (default: one per available processor)
    #[argh(option)]
    group_size: Option<usize>,

    /// output format: table or csv (default table)
    #[argh(option, default = "OutputFormat::Table")]
    format: OutputFormat,

    /// statistic shown in table output: mean, median, min or max (default mean)
    #[argh(option, default = "Statistic::Mean")]
    statistic: Statistic,

    /// file to write reports to (default standard output)
    #[argh(option)]
    output: Option<PathBuf>,

    /// do not pin group members to processors
    #[argh(switch)]
    no_pin: bool,

    /// seconds to wait at a barrier before giving up on the group (default 60)
    #[argh(option, default = "60")]
    barrier_timeout_secs: u64,
}

// Binary entry point - mutations would require subprocess testing which is impractical.
#[cfg_attr(test, mutants::skip)]
fn main() -> ExitCode {
    let args: Args = argh::from_env();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::with_default(subscriber, || execute(args))
}

#[cfg_attr(test, mutants::skip)]
fn execute(args: Args) -> ExitCode {
    let config = match SweepConfig::builder()
        .outer_repeats(args.repeats)
        .inner_repeats(args.ireps)
        .participants(args.ptests)
        .symmetric(args.make_symmetric)
        .build()
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let group_size = match args.group_size {
        None => default_group_size(),
        Some(size) => {
            let Some(size) = NonZero::new(size) else {
                eprintln!("Error: --group-size must be at least 1");
                return ExitCode::FAILURE;
            };
            size
        }
    };

    let kernels = if args.kernels.is_empty() {
        vec!["def".to_owned()]
    } else {
        args.kernels
    };

    let input = RunInput {
        config,
        kernels,
        group_size,
        group_options: LocalGroupOptions::new()
            .barrier_timeout(Duration::from_secs(args.barrier_timeout_secs))
            .pin_processors(!args.no_pin),
        format: args.format,
        statistic: args.statistic,
        output: args.output,
    };

    match run(&input) {
        Ok(summary) => {
            eprint!("{summary}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
