use std::num::NonZero;

use tracing::{debug, error, info, trace};

use crate::{
    Error, MeasurementKernel, PairSchedule, ProcessGroup, ReportSink, Result, Sample, SampleSet,
    Step, SweepConfig, SweepReport, Vote,
};

/// Runs all-pairs latency sweeps of measurement kernels across a process group.
///
/// Every member of the group creates its own `AllPairs` with the same configuration and runs
/// the same kernels in the same order. The members advance through the rounds of a
/// [`PairSchedule`] in lockstep, separated by barriers. At the end of a sweep the samples of all
/// participants are gathered at the root member, which delivers the report to its sink.
///
/// # Example
///
/// ```
/// use all_pairs::{
///     AllPairs, CollectedReports, KernelRegistry, LocalGroup, LocalGroupOptions, SweepConfig,
/// };
/// use new_zealand::nz;
///
/// let config = SweepConfig::builder()
///     .outer_repeats(2)
///     .inner_repeats(10)
///     .build()
///     .unwrap();
/// let (kernels, _) = KernelRegistry::builtin().resolve(["mpi_sync"]);
///
/// let reports = LocalGroup::new(nz!(3), LocalGroupOptions::new().pin_processors(false)).run(
///     |endpoint| {
///         let sweep = AllPairs::new(&config, &endpoint);
///         let mut kernel = kernels[0].instantiate(&endpoint, config.inner_repeats());
///         let mut sink = CollectedReports::new();
///
///         sweep.run_kernel(kernel.as_mut(), &mut sink).unwrap();
///         sink.into_reports()
///     },
/// );
///
/// // Only the root member receives the report.
/// assert_eq!(reports[0].len(), 1);
/// assert!(reports[1].is_empty());
/// assert_eq!(reports[0][0].samples().len(), 2 * 6);
/// ```
#[derive(Debug)]
pub struct AllPairs<'g, G: ?Sized> {
    config: SweepConfig,
    group: &'g G,
    schedule: PairSchedule,
}

impl<'g, G> AllPairs<'g, G>
where
    G: ProcessGroup + ?Sized,
{
    /// Prepares sweeps over the participants of `group` that `config` selects.
    ///
    /// The requested participant count is clamped to the group size.
    #[must_use]
    pub fn new(config: &SweepConfig, group: &'g G) -> Self {
        let participants = config.participant_count(group.size());

        Self {
            config: *config,
            group,
            schedule: PairSchedule::new(participants),
        }
    }

    /// The number of participants under test.
    #[must_use]
    pub fn participant_count(&self) -> NonZero<usize> {
        self.schedule.participant_count()
    }

    /// The pairing schedule of every sweep.
    #[must_use]
    pub fn schedule(&self) -> &PairSchedule {
        &self.schedule
    }

    /// The configuration of every sweep.
    #[must_use]
    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Runs one complete sweep of `kernel`. On the root member the report is delivered to
    /// `sink`, other members never touch their sink.
    ///
    /// # Errors
    ///
    /// * [`Error::PartnerUnreachable`] on the member whose exchange failed and
    ///   [`Error::SweepAborted`] on every other member. The group stays in lockstep and can run
    ///   the next kernel.
    /// * [`Error::IncompleteSweep`] on the root if samples of a directed pair are missing.
    /// * [`Error::SynchronizationTimeout`] or [`Error::ParticipantDeparted`] if the group fell
    ///   apart, after which no further sweeps are possible.
    /// * [`Error::Report`] if the sink fails.
    pub fn run_kernel(
        &self,
        kernel: &mut dyn MeasurementKernel,
        sink: &mut dyn ReportSink,
    ) -> Result<()> {
        let rank = self.group.rank();
        let participants = self.participant_count();
        let rounds = self.schedule.round_count();
        let kernel_name = kernel.name().to_owned();

        if rank.is_root() {
            info!(
                kernel = %kernel_name,
                participants = participants.get(),
                rounds,
                repeats = self.config.outer_repeats().get(),
                symmetric = self.config.symmetric(),
                "sweep started"
            );
        }

        let mut samples = Vec::new();

        for repeat in 0..self.config.outer_repeats().get() {
            for round in 0..rounds {
                debug!(kernel = %kernel_name, repeat, round, "round started");

                let outcome = self.run_round(kernel, repeat, round, &mut samples);

                let vote = match &outcome {
                    Ok(()) => Vote::Continue,
                    Err(e) => {
                        error!(
                            kernel = %kernel_name,
                            repeat,
                            round,
                            error = %e,
                            "exchange failed"
                        );
                        Vote::Abort { participant: rank }
                    }
                };

                // Everyone reaches the barrier, including idle members and members that failed.
                if let Vote::Abort { participant } = self.group.barrier(vote)? {
                    outcome?;

                    error!(
                        kernel = %kernel_name,
                        failed_participant = %participant,
                        "sweep aborted"
                    );
                    return Err(Error::SweepAborted { participant });
                }
            }
        }

        let Some(gathered) = self.group.gather(samples)? else {
            return Ok(());
        };

        let samples = SampleSet::new(gathered);

        let missing = samples.missing_pairs(participants, self.config.symmetric());
        if missing > 0 {
            error!(kernel = %kernel_name, missing, "sweep is incomplete");
            return Err(Error::IncompleteSweep {
                kernel: kernel_name,
                missing,
            });
        }

        info!(
            kernel = %kernel_name,
            samples = samples.len(),
            "sweep completed"
        );

        sink.deliver(&SweepReport::new(
            kernel_name,
            self.config,
            participants,
            samples,
        ))
    }

    fn run_round(
        &self,
        kernel: &mut dyn MeasurementKernel,
        repeat: u32,
        round: usize,
        samples: &mut Vec<Sample>,
    ) -> Result<()> {
        let rank = self.group.rank();

        for step in self
            .schedule
            .steps(rank, round, self.config.symmetric())
            .iter()
        {
            match step {
                Step::Initiate(partner) => {
                    let latency = kernel.measure(partner)?;
                    trace!(%partner, ?latency, "measured");

                    samples.push(Sample {
                        initiator: rank,
                        partner,
                        repeat,
                        round,
                        latency,
                    });
                }
                Step::Respond(partner) => {
                    kernel.serve(partner)?;
                    trace!(%partner, "served");
                }
            }
        }

        Ok(())
    }
}
