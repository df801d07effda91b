use std::fmt::{self, Display};
use std::num::NonZero;
use std::str::FromStr;
use std::time::Duration;

use derive_more::Display as DeriveDisplay;

use crate::{ParticipantId, SampleSet};

/// How the samples of one directed pair are reduced into a single matrix entry.
#[derive(Clone, Copy, Debug, DeriveDisplay, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum Statistic {
    /// Arithmetic mean of all samples.
    #[default]
    #[display("mean")]
    Mean,

    /// Middle sample (mean of the two middle samples for an even count).
    #[display("median")]
    Median,

    /// Fastest sample.
    #[display("min")]
    Min,

    /// Slowest sample.
    #[display("max")]
    Max,
}

impl Statistic {
    /// Reduces a set of latencies, or returns `None` if there are none.
    #[must_use]
    pub fn reduce(self, latencies: impl IntoIterator<Item = Duration>) -> Option<Duration> {
        let mut latencies = latencies.into_iter().collect::<Vec<_>>();

        if latencies.is_empty() {
            return None;
        }

        match self {
            Self::Mean => {
                let total_nanos = latencies.iter().map(Duration::as_nanos).sum::<u128>();
                let count = u128::try_from(latencies.len()).expect("usize always fits in u128");

                let mean_nanos = total_nanos
                    .checked_div(count)
                    .expect("guarded by the emptiness check above");

                Some(duration_from_nanos(mean_nanos))
            }
            Self::Median => {
                latencies.sort_unstable();

                #[expect(
                    clippy::integer_division,
                    reason = "we want the lower middle index for even counts"
                )]
                let upper = latencies.len() / 2;

                if latencies.len() % 2 == 1 {
                    latencies.get(upper).copied()
                } else {
                    let lower = latencies.get(upper.checked_sub(1)?)?;
                    let upper = latencies.get(upper)?;

                    let sum = lower.as_nanos().checked_add(upper.as_nanos())?;
                    Some(duration_from_nanos(sum.checked_div(2)?))
                }
            }
            Self::Min => latencies.into_iter().min(),
            Self::Max => latencies.into_iter().max(),
        }
    }
}

fn duration_from_nanos(nanos: u128) -> Duration {
    Duration::from_nanos(
        nanos
            .try_into()
            .expect("latency overflow is unfathomable within our spacetime boundaries"),
    )
}

impl FromStr for Statistic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mean" => Ok(Self::Mean),
            "median" => Ok(Self::Median),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            _ => Err(format!(
                "Invalid statistic: '{s}'. Valid options are: mean, median, min, max"
            )),
        }
    }
}

/// Latency between every pair of participants, one aggregated entry per directed pair.
///
/// Entry `(from, to)` is the latency measured by `from` against `to`. The diagonal is always
/// absent. A matrix from a symmetric sweep only has entries where `from < to`; use
/// [`mirrored()`][Self::mirrored] to fill in the other triangle.
///
/// The `Display` implementation renders a table in microseconds with `-` for absent entries.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LatencyMatrix {
    participants: NonZero<usize>,

    // Row-major, `participants * participants` entries.
    entries: Box<[Option<Duration>]>,
}

impl LatencyMatrix {
    /// Reduces the samples of every directed pair using `statistic`.
    #[must_use]
    pub fn from_samples(
        participants: NonZero<usize>,
        samples: &SampleSet,
        statistic: Statistic,
    ) -> Self {
        let n = participants.get();

        let entries = (0..n)
            .flat_map(|from| (0..n).map(move |to| (from, to)))
            .map(|(from, to)| (ParticipantId::new(from), ParticipantId::new(to)))
            .map(|(from, to)| {
                if from == to {
                    None
                } else {
                    statistic.reduce(samples.latencies(from, to))
                }
            })
            .collect();

        Self {
            participants,
            entries,
        }
    }

    /// The number of participants (rows and columns).
    #[must_use]
    pub fn participant_count(&self) -> NonZero<usize> {
        self.participants
    }

    /// The latency measured by `from` against `to`, if any.
    #[must_use]
    pub fn get(&self, from: ParticipantId, to: ParticipantId) -> Option<Duration> {
        self.index(from, to)
            .and_then(|index| self.entries.get(index).copied().flatten())
    }

    /// Returns a copy where every absent off-diagonal entry is taken from the transposed entry.
    #[must_use]
    pub fn mirrored(&self) -> Self {
        let n = self.participants.get();

        let entries = (0..n)
            .flat_map(|from| (0..n).map(move |to| (from, to)))
            .map(|(from, to)| {
                let (from, to) = (ParticipantId::new(from), ParticipantId::new(to));
                self.get(from, to).or_else(|| self.get(to, from))
            })
            .collect();

        Self {
            participants: self.participants,
            entries,
        }
    }

    /// The number of entries that have a value.
    #[must_use]
    pub fn populated(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    fn index(&self, from: ParticipantId, to: ParticipantId) -> Option<usize> {
        let n = self.participants.get();

        if from.get() >= n || to.get() >= n {
            return None;
        }

        from.get().checked_mul(n)?.checked_add(to.get())
    }
}

impl Display for LatencyMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.participants.get();

        write!(f, "{:>6}", "us")?;
        for to in 0..n {
            write!(f, " {to:>10}")?;
        }
        writeln!(f)?;

        for from in 0..n {
            write!(f, "{from:>6}")?;

            for to in 0..n {
                match self.get(ParticipantId::new(from), ParticipantId::new(to)) {
                    Some(latency) => write!(f, " {:>10.3}", latency.as_secs_f64() * 1_000_000.0)?,
                    None => write!(f, " {:>10}", "-")?,
                }
            }

            writeln!(f)?;
        }

        Ok(())
    }
}
