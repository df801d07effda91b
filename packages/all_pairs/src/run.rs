use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::num::NonZero;
use std::path::PathBuf;
use std::str::FromStr;

use many_cpus::ProcessorSet;
use new_zealand::nz;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::{
    AllPairs, CsvReport, Error, KernelRegistry, LocalGroup, LocalGroupOptions, ReportSink, Result,
    Statistic, SweepConfig, SweepReport, TableReport,
};

/// How the reports of a run are written.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum OutputFormat {
    /// A latency matrix per kernel.
    #[default]
    Table,

    /// One CSV line per raw sample.
    Csv,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "csv" => Ok(Self::Csv),
            _ => Err(format!(
                "Invalid output format: '{s}'. Valid options are: table, csv"
            )),
        }
    }
}

/// Input parameters for the [`run()`] function.
///
/// This is the parsed and validated input that the core logic operates on.
#[doc(hidden)]
#[derive(Debug)]
#[allow(
    clippy::exhaustive_structs,
    reason = "This is a hidden struct for internal/test use only"
)]
pub struct RunInput {
    /// The sweep configuration shared by every kernel.
    pub config: SweepConfig,

    /// Names of the kernels to run, in order. Each entry may be a comma-separated list.
    pub kernels: Vec<String>,

    /// The number of group members to launch.
    pub group_size: NonZero<usize>,

    /// Runtime settings of the group.
    pub group_options: LocalGroupOptions,

    /// How reports are written.
    pub format: OutputFormat,

    /// How samples are reduced in table output.
    pub statistic: Statistic,

    /// Where reports are written. Standard output if `None`.
    pub output: Option<PathBuf>,
}

/// What happened to each requested kernel in a run that did not abort.
#[derive(Debug, Default)]
pub struct RunSummary {
    completed: Vec<String>,
    failed: Vec<(String, Error)>,
    skipped: Vec<Error>,
}

impl RunSummary {
    /// Kernels whose sweep was delivered to the report sink, in run order.
    #[must_use]
    pub fn completed(&self) -> &[String] {
        &self.completed
    }

    /// Kernels whose sweep was abandoned, with the reason.
    #[must_use]
    pub fn failed(&self) -> &[(String, Error)] {
        &self.failed
    }

    /// Requested kernels that were not run because they are not registered.
    #[must_use]
    pub fn skipped(&self) -> &[Error] {
        &self.skipped
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "completed kernels: {}", self.completed.join(", "))?;

        for (kernel, error) in &self.failed {
            writeln!(f, "failed kernel {kernel}: {error}")?;
        }

        for error in &self.skipped {
            writeln!(f, "skipped: {error}")?;
        }

        Ok(())
    }
}

/// The number of group members to launch when the caller does not say: one per processor
/// available to the current process.
#[must_use]
pub fn default_group_size() -> NonZero<usize> {
    ProcessorSet::builder()
        .take_all()
        .and_then(|processors| NonZero::new(processors.len()))
        .unwrap_or(nz!(1))
}

/// Core logic of the tool, extracted for testability.
///
/// Runs every requested built-in kernel and writes the reports to the configured output.
///
/// # Errors
///
/// Returns an error if the output cannot be created or written, or if the group fell apart.
/// Failures of individual kernels are reported in the [`RunSummary`] instead.
#[doc(hidden)]
pub fn run(input: &RunInput) -> Result<RunSummary> {
    let registry = KernelRegistry::builtin();

    match &input.output {
        Some(path) => run_to(input, &registry, BufWriter::new(File::create(path)?)),
        None => run_to(input, &registry, io::stdout()),
    }
}

fn run_to<W: Write + Send>(
    input: &RunInput,
    registry: &KernelRegistry,
    writer: W,
) -> Result<RunSummary> {
    match input.format {
        OutputFormat::Table => run_with(
            input,
            registry,
            &mut TableReport::new(writer, input.statistic),
        ),
        OutputFormat::Csv => run_with(input, registry, &mut CsvReport::new(writer)),
    }
}

/// Runs the requested kernels from `registry` one after another on a new [`LocalGroup`],
/// delivering the reports to `sink`.
///
/// The output settings of `input` are ignored, the sink decides where reports go.
///
/// # Errors
///
/// Returns an error if the group fell apart or the sink failed. Failures of individual
/// kernels are reported in the [`RunSummary`] instead.
#[doc(hidden)]
pub fn run_with(
    input: &RunInput,
    registry: &KernelRegistry,
    sink: &mut (dyn ReportSink + Send),
) -> Result<RunSummary> {
    let (kernels, skipped) = registry.resolve(&input.kernels);

    for error in &skipped {
        warn!(%error, "skipping kernel");
    }

    let sink = Mutex::new(sink);

    let results = LocalGroup::new(input.group_size, input.group_options).run(|endpoint| {
        let sweep = AllPairs::new(&input.config, &endpoint);
        let mut sink = SharedSink(&sink);
        let mut outcomes = Vec::with_capacity(kernels.len());

        for kernel in &kernels {
            let mut instance = kernel.instantiate(&endpoint, input.config.inner_repeats());

            match sweep.run_kernel(instance.as_mut(), &mut sink) {
                Ok(()) => outcomes.push((kernel.name().to_owned(), Ok(()))),
                Err(e) if e.is_sweep_local() => outcomes.push((kernel.name().to_owned(), Err(e))),
                Err(e) => return Err(e),
            }
        }

        Ok(outcomes)
    });

    let mut summary = RunSummary {
        skipped,
        ..RunSummary::default()
    };

    // Results are in rank order, so a fatal error of the root takes precedence.
    for (rank, result) in results.into_iter().enumerate() {
        let outcomes = result?;

        if rank != 0 {
            continue;
        }

        for (kernel, outcome) in outcomes {
            match outcome {
                Ok(()) => summary.completed.push(kernel),
                Err(e) => summary.failed.push((kernel, e)),
            }
        }
    }

    info!(
        completed = summary.completed.len(),
        failed = summary.failed.len(),
        skipped = summary.skipped.len(),
        "run finished"
    );

    Ok(summary)
}

// Lets every member hold a sink while only the root ever delivers to it.
struct SharedSink<'m, 's>(&'m Mutex<&'s mut (dyn ReportSink + Send + 's)>);

impl ReportSink for SharedSink<'_, '_> {
    fn deliver(&mut self, report: &SweepReport) -> Result<()> {
        self.0.lock().deliver(report)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{CollectedReports, Endpoint, MeasurementKernel, ParticipantId};

    #[derive(Debug)]
    struct Unreachable;

    impl MeasurementKernel for Unreachable {
        fn name(&self) -> &str {
            "unreachable"
        }

        fn measure(&mut self, partner: ParticipantId) -> Result<Duration> {
            Err(Error::PartnerUnreachable {
                partner,
                reason: "simulated failure",
            })
        }

        fn serve(&mut self, _partner: ParticipantId) -> Result<()> {
            Ok(())
        }
    }

    fn unreachable(
        _endpoint: &Endpoint,
        _inner_repeats: NonZero<u32>,
    ) -> Box<dyn MeasurementKernel + '_> {
        Box::new(Unreachable)
    }

    fn input(kernels: &[&str], group_size: NonZero<usize>) -> RunInput {
        RunInput {
            config: SweepConfig::builder()
                .outer_repeats(2)
                .inner_repeats(5)
                .build()
                .unwrap(),
            kernels: kernels.iter().map(|name| (*name).to_owned()).collect(),
            group_size,
            group_options: LocalGroupOptions::new().pin_processors(false),
            format: OutputFormat::Table,
            statistic: Statistic::Mean,
            output: None,
        }
    }

    #[test]
    fn output_format_parsing() {
        assert_eq!(
            "table".parse::<OutputFormat>().unwrap(),
            OutputFormat::Table
        );
        assert_eq!("CSV".parse::<OutputFormat>().unwrap(), OutputFormat::Csv);
        "xml".parse::<OutputFormat>().unwrap_err();
    }

    #[test]
    fn default_group_size_is_positive() {
        assert!(default_group_size().get() >= 1);
    }

    #[test]
    fn every_builtin_kernel_completes() {
        let registry = KernelRegistry::builtin();
        let mut sink = CollectedReports::new();

        let kernels = [
            "def,mpi_rma_get,mpi_rma_put",
            "mpi_sync",
            "mpi_async",
            "dash_get",
        ];
        let summary = run_with(&input(&kernels, nz!(3)), &registry, &mut sink).unwrap();

        assert_eq!(
            summary.completed(),
            [
                "def",
                "mpi_rma_get",
                "mpi_rma_put",
                "mpi_sync",
                "mpi_async",
                "dash_get",
            ]
        );
        assert!(summary.failed().is_empty());
        assert!(summary.skipped().is_empty());

        for report in sink.reports() {
            // 3 participants, both directions, 2 repeats.
            assert_eq!(report.samples().len(), 12, "kernel {}", report.kernel());
            assert_eq!(report.matrix(Statistic::Min).populated(), 6);
        }
    }

    #[test]
    fn failed_kernel_does_not_stop_the_run() {
        let mut registry = KernelRegistry::builtin();
        registry.register("unreachable", unreachable);

        let mut sink = CollectedReports::new();

        let summary = run_with(
            &input(&["unreachable", "mpi_async"], nz!(2)),
            &registry,
            &mut sink,
        )
        .unwrap();

        assert_eq!(summary.completed(), ["mpi_async"]);
        assert_eq!(summary.failed().len(), 1);
        assert_eq!(summary.failed()[0].0, "unreachable");
        assert!(matches!(
            summary.failed()[0].1,
            Error::PartnerUnreachable { .. }
        ));

        assert_eq!(sink.reports().len(), 1);
        assert_eq!(sink.reports()[0].kernel(), "mpi_async");

        let rendered = summary.to_string();
        assert!(rendered.contains("completed kernels: mpi_async"));
        assert!(rendered.contains("failed kernel unreachable"));
    }

    #[test]
    fn csv_output_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latency.csv");

        let input = RunInput {
            format: OutputFormat::Csv,
            output: Some(path.clone()),
            ..input(&["mpi_sync"], nz!(2))
        };

        let summary = run(&input).unwrap();
        assert_eq!(summary.completed(), ["mpi_sync"]);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines = contents.lines().collect::<Vec<_>>();

        assert_eq!(lines[0], "kernel,repeat,round,initiator,partner,latency_ns");
        // 2 participants, both directions, 2 repeats.
        assert_eq!(lines.len(), 1 + 4);
        assert!(lines[1..].iter().all(|line| line.starts_with("mpi_sync,")));
    }

    #[test]
    fn unwritable_output_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();

        let input = RunInput {
            output: Some(dir.path().join("missing").join("latency.txt")),
            ..input(&["def"], nz!(2))
        };

        assert!(matches!(run(&input), Err(Error::Report(_))));
    }
}
