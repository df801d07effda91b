use std::io::{self, Write};
use std::num::NonZero;

use crate::{Error, LatencyMatrix, Result, SampleSet, Statistic, SweepConfig};

/// The result of one complete all-pairs sweep of one kernel.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SweepReport {
    kernel: String,
    config: SweepConfig,
    participants: NonZero<usize>,
    samples: SampleSet,
}

impl SweepReport {
    /// Creates a report from the samples gathered from every participant.
    #[must_use]
    pub fn new(
        kernel: impl Into<String>,
        config: SweepConfig,
        participants: NonZero<usize>,
        samples: SampleSet,
    ) -> Self {
        Self {
            kernel: kernel.into(),
            config,
            participants,
            samples,
        }
    }

    /// The name of the measured kernel.
    #[must_use]
    pub fn kernel(&self) -> &str {
        &self.kernel
    }

    /// The configuration the sweep ran with.
    #[must_use]
    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// The number of participants under test.
    #[must_use]
    pub fn participants(&self) -> NonZero<usize> {
        self.participants
    }

    /// Every raw sample of the sweep.
    #[must_use]
    pub fn samples(&self) -> &SampleSet {
        &self.samples
    }

    /// Reduces the samples into a latency matrix.
    #[must_use]
    pub fn matrix(&self, statistic: Statistic) -> LatencyMatrix {
        LatencyMatrix::from_samples(self.participants, &self.samples, statistic)
    }
}

/// Receives finished sweeps. Formatting and persistence are up to the sink.
pub trait ReportSink {
    /// Accepts the report of one sweep.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Report`][crate::Error::Report] if the report cannot be persisted.
    fn deliver(&mut self, report: &SweepReport) -> Result<()>;
}

/// Writes a human-readable latency matrix per sweep.
///
/// Matrices of symmetric sweeps are mirrored so that every off-diagonal entry is filled.
#[derive(Debug)]
pub struct TableReport<W> {
    writer: W,
    statistic: Statistic,
}

impl<W: Write> TableReport<W> {
    /// Creates a sink that reduces samples with `statistic` and writes to `writer`.
    #[must_use]
    pub fn new(writer: W, statistic: Statistic) -> Self {
        Self { writer, statistic }
    }

    /// Returns the underlying writer.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ReportSink for TableReport<W> {
    fn deliver(&mut self, report: &SweepReport) -> Result<()> {
        let config = report.config();

        let mut matrix = report.matrix(self.statistic);
        if config.symmetric() {
            matrix = matrix.mirrored();
        }

        writeln!(
            self.writer,
            "kernel {}: {} participants, {} repeats x {} inner repeats, {} {}",
            report.kernel(),
            report.participants(),
            config.outer_repeats(),
            config.inner_repeats(),
            if config.symmetric() {
                "symmetric"
            } else {
                "both directions"
            },
            self.statistic
        )?;
        writeln!(self.writer, "{matrix}")?;
        self.writer.flush()?;

        Ok(())
    }
}

/// Writes every raw sample as one CSV record.
///
/// The header is written before the first sample of the first report. Fields are quoted where
/// needed, so kernel names may contain separators and quotes.
#[derive(Debug)]
pub struct CsvReport<W: Write> {
    writer: csv::Writer<W>,
    header_written: bool,
}

const CSV_HEADER: [&str; 6] = [
    "kernel",
    "repeat",
    "round",
    "initiator",
    "partner",
    "latency_ns",
];

impl<W: Write> CsvReport<W> {
    /// Creates a sink that writes to `writer`.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
            header_written: false,
        }
    }

    /// Flushes any buffered records and returns the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Report`] if the buffered records cannot be written.
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| Error::Report(e.into_error()))
    }
}

impl<W: Write> ReportSink for CsvReport<W> {
    fn deliver(&mut self, report: &SweepReport) -> Result<()> {
        if !self.header_written {
            self.writer
                .write_record(CSV_HEADER)
                .map_err(io::Error::from)?;
            self.header_written = true;
        }

        for sample in report.samples().iter() {
            self.writer
                .write_record([
                    report.kernel().to_owned(),
                    sample.repeat.to_string(),
                    sample.round.to_string(),
                    sample.initiator.to_string(),
                    sample.partner.to_string(),
                    sample.latency.as_nanos().to_string(),
                ])
                .map_err(io::Error::from)?;
        }

        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps every delivered report in memory.
#[derive(Debug, Default)]
pub struct CollectedReports {
    reports: Vec<SweepReport>,
}

impl CollectedReports {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The reports delivered so far, in delivery order.
    #[must_use]
    pub fn reports(&self) -> &[SweepReport] {
        &self.reports
    }

    /// Returns the delivered reports.
    #[must_use]
    pub fn into_reports(self) -> Vec<SweepReport> {
        self.reports
    }
}

impl ReportSink for CollectedReports {
    fn deliver(&mut self, report: &SweepReport) -> Result<()> {
        self.reports.push(report.clone());
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::io;
    use std::time::Duration;

    use new_zealand::nz;

    use super::*;
    use crate::{Error, ParticipantId, Sample};

    fn report(symmetric: bool) -> SweepReport {
        let config = SweepConfig::builder()
            .outer_repeats(1)
            .inner_repeats(5)
            .symmetric(symmetric)
            .build()
            .unwrap();

        let samples = SampleSet::new(vec![Sample {
            initiator: ParticipantId::new(0),
            partner: ParticipantId::new(1),
            repeat: 0,
            round: 0,
            latency: Duration::from_nanos(1_500),
        }]);

        SweepReport::new("def", config, nz!(2), samples)
    }

    #[test]
    fn table_mirrors_symmetric_sweeps() {
        let mut sink = TableReport::new(Vec::new(), Statistic::Mean);
        sink.deliver(&report(true)).unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines = output.lines().collect::<Vec<_>>();

        assert!(lines[0].starts_with("kernel def: 2 participants, 1 repeats x 5 inner repeats"));
        assert!(lines[0].ends_with("symmetric mean"));
        assert!(lines[2].contains("1.500"));
        assert!(lines[3].contains("1.500"));
    }

    #[test]
    fn table_leaves_unmeasured_direction_empty() {
        let mut sink = TableReport::new(Vec::new(), Statistic::Max);
        sink.deliver(&report(false)).unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines = output.lines().collect::<Vec<_>>();

        assert!(lines[0].ends_with("both directions max"));
        assert!(!lines[3].contains("1.500"));
    }

    #[test]
    fn csv_writes_header_once() {
        let mut sink = CsvReport::new(Vec::new());
        sink.deliver(&report(false)).unwrap();
        sink.deliver(&report(false)).unwrap();

        let output = String::from_utf8(sink.into_inner().unwrap()).unwrap();

        assert_eq!(
            output,
            "kernel,repeat,round,initiator,partner,latency_ns\n\
             def,0,0,0,1,1500\n\
             def,0,0,0,1,1500\n"
        );
    }

    #[test]
    fn csv_quotes_awkward_kernel_names() {
        let report = report(false);
        let report = SweepReport::new(
            r#"rma,get "v2""#,
            *report.config(),
            report.participants(),
            report.samples().clone(),
        );

        let mut sink = CsvReport::new(Vec::new());
        sink.deliver(&report).unwrap();

        let output = sink.into_inner().unwrap();
        let text = String::from_utf8(output.clone()).unwrap();
        assert!(text.ends_with("\"rma,get \"\"v2\"\"\",0,0,0,1,1500\n"));

        let mut reader = csv::Reader::from_reader(output.as_slice());
        assert_eq!(reader.headers().unwrap().len(), 6);

        let records = reader.records().collect::<Vec<_>>();
        assert_eq!(records.len(), 1);

        let record = records[0].as_ref().unwrap();
        assert_eq!(record.len(), 6);
        assert_eq!(&record[0], r#"rma,get "v2""#);
        assert_eq!(&record[5], "1500");
    }

    #[test]
    fn collected_reports_keep_order() {
        let mut sink = CollectedReports::new();
        sink.deliver(&report(false)).unwrap();
        sink.deliver(&report(true)).unwrap();

        let reports = sink.into_reports();
        assert_eq!(reports.len(), 2);
        assert!(!reports[0].config().symmetric());
        assert!(reports[1].config().symmetric());
    }

    #[derive(Debug)]
    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failure_is_report_error() {
        let mut sink = CsvReport::new(BrokenWriter);

        let result = sink.deliver(&report(false));
        assert!(matches!(result, Err(Error::Report(_))));
    }
}
