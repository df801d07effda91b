#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Measures point-to-point communication latency between every pair of members of a process
//! group, using interchangeable communication primitives.
//!
//! The result characterizes the latency topology of the hardware and runtime: which pairs are
//! fast, which are slow and how the latency differs between primitives.
//!
//! # Moving parts
//!
//! * [`PairSchedule`] decides who talks to whom in each round. Every participant computes it
//!   independently and all of them arrive at the same matching.
//! * [`AllPairs`] drives a [`MeasurementKernel`] through every round of the schedule, repeated
//!   [`SweepConfig::outer_repeats()`] times, keeping the group in lockstep with barriers. The
//!   samples are gathered at the root participant and delivered to a [`ReportSink`].
//! * [`LocalGroup`] runs the group as pinned threads of the current process, each with an
//!   [`Endpoint`] that provides messaging, one-sided memory access and a PGAS global array.
//! * The [`kernels`] module holds the built-in kernels, which [`KernelRegistry`] looks up by
//!   name.
//!
//! # Example
//!
//! ```
//! use all_pairs::{
//!     CollectedReports, KernelRegistry, LocalGroupOptions, OutputFormat, RunInput, Statistic,
//!     SweepConfig, run_with,
//! };
//! use new_zealand::nz;
//!
//! let input = RunInput {
//!     config: SweepConfig::builder()
//!         .outer_repeats(2)
//!         .inner_repeats(10)
//!         .symmetric(true)
//!         .build()
//!         .unwrap(),
//!     kernels: vec!["mpi_sync".to_owned()],
//!     group_size: nz!(4),
//!     group_options: LocalGroupOptions::new().pin_processors(false),
//!     format: OutputFormat::Table,
//!     statistic: Statistic::Median,
//!     output: None,
//! };
//!
//! let mut reports = CollectedReports::new();
//! let summary = run_with(&input, &KernelRegistry::builtin(), &mut reports).unwrap();
//! assert_eq!(summary.completed(), ["mpi_sync"]);
//!
//! let matrix = reports.reports()[0].matrix(Statistic::Median).mirrored();
//! println!("{matrix}");
//! ```

mod config;
mod error;
mod group;
mod kernel;
pub mod kernels;
mod matrix;
mod orchestrator;
mod participant;
mod registry;
mod report;
mod run;
mod samples;
mod schedule;

pub use config::*;
pub use error::*;
pub use group::*;
pub use kernel::*;
pub use matrix::*;
pub use orchestrator::*;
pub use participant::*;
pub use registry::*;
pub use report::*;
pub use run::*;
pub use samples::*;
pub use schedule::*;
