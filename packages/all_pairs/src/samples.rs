use std::num::NonZero;
use std::time::Duration;

use itertools::Itertools;

use crate::ParticipantId;

/// One latency measurement of a directed pair, taken by the initiating participant.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Sample {
    /// The participant that ran the timed side of the exchange and owns the sample.
    pub initiator: ParticipantId,

    /// The participant on the other side of the exchange.
    pub partner: ParticipantId,

    /// Index of the outer repeat the sample was taken in.
    pub repeat: u32,

    /// Index of the schedule round the sample was taken in.
    pub round: usize,

    /// The mean latency over the kernel's inner repeats.
    pub latency: Duration,
}

/// All raw samples of one sweep, ordered by initiator, partner and repeat.
///
/// Raw samples are retained so that reporting can choose its own aggregation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SampleSet {
    samples: Vec<Sample>,
}

impl SampleSet {
    /// Creates a sample set, sorting the samples into canonical order.
    #[must_use]
    pub fn new(mut samples: Vec<Sample>) -> Self {
        samples.sort_by_key(|sample| (sample.initiator, sample.partner, sample.repeat));

        Self { samples }
    }

    /// The number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether there are no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Iterates over all samples in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// The latencies measured for one directed pair, in repeat order.
    pub fn latencies(
        &self,
        initiator: ParticipantId,
        partner: ParticipantId,
    ) -> impl Iterator<Item = Duration> {
        let start = self
            .samples
            .partition_point(|sample| (sample.initiator, sample.partner) < (initiator, partner));

        self.samples
            .iter()
            .skip(start)
            .take_while(move |sample| sample.initiator == initiator && sample.partner == partner)
            .map(|sample| sample.latency)
    }

    /// The distinct directed pairs that have at least one sample.
    pub fn directed_pairs(&self) -> impl Iterator<Item = (ParticipantId, ParticipantId)> {
        self.samples
            .iter()
            .map(|sample| (sample.initiator, sample.partner))
            .dedup()
    }

    /// Counts the directed pairs that a sweep over `participants` must have measured but that
    /// have no samples here.
    ///
    /// In symmetric mode only pairs whose initiator has the lower id are expected.
    #[must_use]
    pub fn missing_pairs(&self, participants: NonZero<usize>, symmetric: bool) -> usize {
        let n = participants.get();

        (0..n)
            .cartesian_product(0..n)
            .filter(|(from, to)| from != to && (!symmetric || from < to))
            .filter(|(from, to)| {
                self.latencies(ParticipantId::new(*from), ParticipantId::new(*to))
                    .next()
                    .is_none()
            })
            .count()
    }
}

impl FromIterator<Sample> for SampleSet {
    fn from_iter<T: IntoIterator<Item = Sample>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;

    use super::*;

    fn sample(initiator: usize, partner: usize, repeat: u32, micros: u64) -> Sample {
        Sample {
            initiator: ParticipantId::new(initiator),
            partner: ParticipantId::new(partner),
            repeat,
            round: 0,
            latency: Duration::from_micros(micros),
        }
    }

    #[test]
    fn sorted_into_canonical_order() {
        let set = SampleSet::new(vec![
            sample(1, 0, 1, 4),
            sample(0, 1, 1, 2),
            sample(1, 0, 0, 3),
            sample(0, 1, 0, 1),
        ]);

        let order = set
            .iter()
            .map(|s| s.latency.as_micros())
            .collect::<Vec<_>>();
        assert_eq!(order, vec![1, 2, 3, 4]);
    }

    #[test]
    fn latencies_for_one_pair() {
        let set: SampleSet = [
            sample(0, 1, 0, 10),
            sample(0, 2, 0, 20),
            sample(0, 1, 1, 11),
            sample(2, 1, 0, 30),
        ]
        .into_iter()
        .collect();

        let latencies = set
            .latencies(ParticipantId::new(0), ParticipantId::new(1))
            .collect::<Vec<_>>();

        assert_eq!(
            latencies,
            vec![Duration::from_micros(10), Duration::from_micros(11)]
        );
        assert_eq!(
            set.latencies(ParticipantId::new(1), ParticipantId::new(2))
                .count(),
            0
        );
    }

    #[test]
    fn directed_pairs_are_distinct() {
        let set = SampleSet::new(vec![
            sample(0, 1, 0, 1),
            sample(0, 1, 1, 1),
            sample(1, 0, 0, 1),
        ]);

        assert_eq!(set.directed_pairs().count(), 2);
        assert_eq!(set.len(), 3);
        assert!(!set.is_empty());
    }

    #[test]
    fn missing_pairs_respects_symmetric_mode() {
        let set = SampleSet::new(vec![
            sample(0, 1, 0, 1),
            sample(0, 2, 0, 1),
            sample(1, 2, 0, 1),
        ]);

        assert_eq!(set.missing_pairs(nz!(3), true), 0);
        assert_eq!(set.missing_pairs(nz!(3), false), 3);
    }

    #[test]
    fn empty_set_for_single_participant_is_complete() {
        let set = SampleSet::default();

        assert!(set.is_empty());
        assert_eq!(set.missing_pairs(nz!(1), false), 0);
    }
}
