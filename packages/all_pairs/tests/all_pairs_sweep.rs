//! Integration tests that run complete sweeps through the public API, the way the binary does.

#![cfg(not(miri))]

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use all_pairs::{
    CollectedReports, Error, KernelRegistry, LocalGroupOptions, OutputFormat, ParticipantId,
    RunInput, Statistic, SweepConfig, default_group_size, run_with,
};
use new_zealand::nz;

const EVERY_BUILTIN: &str = "def,mpi_sync,mpi_async,mpi_rma_get,mpi_rma_put,dash_get";

#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl CapturedLog {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn input(kernels: &[&str], symmetric: bool) -> RunInput {
    RunInput {
        config: SweepConfig::builder()
            .outer_repeats(3)
            .inner_repeats(10)
            .symmetric(symmetric)
            .build()
            .unwrap(),
        kernels: kernels.iter().map(|name| (*name).to_owned()).collect(),
        group_size: nz!(4),
        group_options: LocalGroupOptions::new().pin_processors(false),
        format: OutputFormat::Table,
        statistic: Statistic::Mean,
        output: None,
    }
}

#[test]
fn unknown_kernel_is_reported_and_others_still_run() {
    let log = CapturedLog::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer({
            let log = log.clone();
            move || log.clone()
        })
        .finish();

    let mut reports = CollectedReports::new();

    let summary = tracing::subscriber::with_default(subscriber, || {
        run_with(
            &input(&["bogus", "mpi_sync"], false),
            &KernelRegistry::builtin(),
            &mut reports,
        )
    })
    .unwrap();

    assert_eq!(summary.skipped().len(), 1);
    assert!(matches!(
        &summary.skipped()[0],
        Error::UnknownKernel { name } if name == "bogus"
    ));
    assert_eq!(summary.completed(), ["mpi_sync"]);

    let report = &reports.reports()[0];
    assert_eq!(report.kernel(), "mpi_sync");

    // 3 repeats x 3 rounds x 2 pairs x 2 directions.
    assert_eq!(report.samples().len(), 36);

    let matrix = report.matrix(Statistic::Mean);
    assert_eq!(matrix.populated(), 12);

    for from in 0..4 {
        for to in 0..4 {
            let entry = matrix.get(ParticipantId::new(from), ParticipantId::new(to));
            assert_eq!(entry.is_some(), from != to, "entry ({from}, {to})");
        }
    }

    // Events from the member threads reach the caller's subscriber.
    let log = log.contents();
    assert!(log.contains("bogus"), "{log}");
    assert!(log.contains("sweep started"), "{log}");
    assert!(log.contains("participant"), "{log}");
}

#[test]
fn every_builtin_kernel_measures_both_directions_on_an_oversubscribed_group() {
    // More members than processors, so partners are regularly descheduled mid-exchange.
    let group_size = default_group_size().checked_add(1).unwrap();
    let n = group_size.get();

    let input = RunInput {
        config: SweepConfig::builder()
            .outer_repeats(1)
            .inner_repeats(5)
            .build()
            .unwrap(),
        group_size,
        ..input(&[EVERY_BUILTIN], false)
    };

    let mut reports = CollectedReports::new();
    let summary = run_with(&input, &KernelRegistry::builtin(), &mut reports).unwrap();

    assert!(summary.failed().is_empty(), "{summary}");
    assert_eq!(
        summary.completed(),
        [
            "def",
            "mpi_sync",
            "mpi_async",
            "mpi_rma_get",
            "mpi_rma_put",
            "dash_get",
        ]
    );

    for report in reports.reports() {
        assert_eq!(
            report.samples().len(),
            n * (n - 1),
            "kernel {}",
            report.kernel()
        );
        assert_eq!(report.matrix(Statistic::Mean).populated(), n * (n - 1));
    }
}

#[test]
fn symmetric_run_fills_upper_triangle_only() {
    let mut reports = CollectedReports::new();

    let summary = run_with(
        &input(&["def", "dash_get"], true),
        &KernelRegistry::builtin(),
        &mut reports,
    )
    .unwrap();

    assert_eq!(summary.completed(), ["def", "dash_get"]);

    for report in reports.reports() {
        // 3 repeats x 3 rounds x 2 pairs.
        assert_eq!(report.samples().len(), 18);

        let matrix = report.matrix(Statistic::Median);
        assert_eq!(matrix.populated(), 6);
        assert!(
            matrix
                .get(ParticipantId::new(0), ParticipantId::new(3))
                .is_some()
        );
        assert!(
            matrix
                .get(ParticipantId::new(3), ParticipantId::new(0))
                .is_none()
        );

        assert_eq!(matrix.mirrored().populated(), 12);
    }
}

#[test]
fn subset_of_members_under_test() {
    let mut input = input(&["mpi_rma_get"], false);
    input.config = SweepConfig::builder()
        .outer_repeats(1)
        .inner_repeats(5)
        .participants(3)
        .build()
        .unwrap();

    let mut reports = CollectedReports::new();
    run_with(&input, &KernelRegistry::builtin(), &mut reports).unwrap();

    let report = &reports.reports()[0];
    assert_eq!(report.participants().get(), 3);
    assert!(
        report
            .samples()
            .iter()
            .all(|sample| sample.initiator.get() < 3 && sample.partner.get() < 3)
    );
    assert_eq!(report.samples().directed_pairs().count(), 6);
}
