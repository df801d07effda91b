use std::num::NonZero;

use new_zealand::nz;

use crate::{Error, Result};

const DEFAULT_OUTER_REPEATS: NonZero<u32> = nz!(10);
const DEFAULT_INNER_REPEATS: NonZero<u32> = nz!(100);

/// Immutable configuration of an all-pairs sweep, shared by every kernel that is run with it so
/// that the resulting latency matrices are directly comparable.
///
/// Use [`SweepConfig::builder()`] to create an instance.
///
/// # Example
///
/// ```
/// use all_pairs::SweepConfig;
///
/// let config = SweepConfig::builder()
///     .outer_repeats(3)
///     .inner_repeats(50)
///     .symmetric(true)
///     .build()
///     .unwrap();
///
/// assert_eq!(config.outer_repeats().get(), 3);
/// assert!(config.symmetric());
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SweepConfig {
    outer_repeats: NonZero<u32>,
    inner_repeats: NonZero<u32>,
    requested_participants: i64,
    symmetric: bool,
}

impl SweepConfig {
    /// Returns a builder with the default settings: 10 outer repeats, 100 inner repeats,
    /// every group member under test and both directions of each pair measured.
    #[must_use]
    pub fn builder() -> SweepConfigBuilder {
        SweepConfigBuilder::new()
    }

    /// How many full passes over the pair schedule each sweep makes.
    #[must_use]
    pub fn outer_repeats(&self) -> NonZero<u32> {
        self.outer_repeats
    }

    /// How many timed trials each kernel invocation averages into one sample.
    #[must_use]
    pub fn inner_repeats(&self) -> NonZero<u32> {
        self.inner_repeats
    }

    /// The participant count as requested, before clamping against the group size.
    #[must_use]
    pub fn requested_participants(&self) -> i64 {
        self.requested_participants
    }

    /// Whether latency is assumed direction-independent, measuring each pair once.
    #[must_use]
    pub fn symmetric(&self) -> bool {
        self.symmetric
    }

    /// The number of participants under test in a group of `group_size` members.
    #[must_use]
    pub fn participant_count(&self, group_size: NonZero<usize>) -> NonZero<usize> {
        clamp_participant_count(self.requested_participants, group_size)
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            outer_repeats: DEFAULT_OUTER_REPEATS,
            inner_repeats: DEFAULT_INNER_REPEATS,
            requested_participants: 0,
            symmetric: false,
        }
    }
}

/// Creates instances of [`SweepConfig`], validating the repeat counts.
///
/// Repeat counts are accepted as signed integers because they typically arrive straight from
/// user input; zero and negative values are rejected by [`build()`][Self::build].
#[derive(Debug)]
pub struct SweepConfigBuilder {
    outer_repeats: i64,
    inner_repeats: i64,
    requested_participants: i64,
    symmetric: bool,
}

impl SweepConfigBuilder {
    fn new() -> Self {
        Self {
            outer_repeats: i64::from(DEFAULT_OUTER_REPEATS.get()),
            inner_repeats: i64::from(DEFAULT_INNER_REPEATS.get()),
            requested_participants: 0,
            symmetric: false,
        }
    }

    /// Sets how many full passes over the pair schedule each sweep makes.
    #[must_use]
    pub fn outer_repeats(self, outer_repeats: i64) -> Self {
        Self {
            outer_repeats,
            ..self
        }
    }

    /// Sets how many timed trials each kernel invocation averages into one sample.
    #[must_use]
    pub fn inner_repeats(self, inner_repeats: i64) -> Self {
        Self {
            inner_repeats,
            ..self
        }
    }

    /// Sets how many group members are under test, starting from participant 0.
    ///
    /// Values that are zero, negative or larger than the group size select the whole group.
    #[must_use]
    pub fn participants(self, requested_participants: i64) -> Self {
        Self {
            requested_participants,
            ..self
        }
    }

    /// Sets whether each pair is measured in one direction only.
    #[must_use]
    pub fn symmetric(self, symmetric: bool) -> Self {
        Self { symmetric, ..self }
    }

    /// Validates the settings and creates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a repeat count is not a positive 32-bit integer.
    pub fn build(self) -> Result<SweepConfig> {
        Ok(SweepConfig {
            outer_repeats: positive_count("repeats", self.outer_repeats)?,
            inner_repeats: positive_count("ireps", self.inner_repeats)?,
            requested_participants: self.requested_participants,
            symmetric: self.symmetric,
        })
    }
}

fn positive_count(name: &'static str, value: i64) -> Result<NonZero<u32>> {
    u32::try_from(value)
        .ok()
        .and_then(NonZero::new)
        .ok_or_else(|| Error::Configuration {
            name,
            value: value.to_string(),
            problem: "must be a positive 32-bit integer",
        })
}

/// Clamps a requested participant count into `1..=group_size`.
///
/// Requests that are zero, negative or exceed the group size select the whole group.
///
/// # Example
///
/// ```
/// use all_pairs::clamp_participant_count;
/// use new_zealand::nz;
///
/// assert_eq!(clamp_participant_count(3, nz!(8)).get(), 3);
/// assert_eq!(clamp_participant_count(0, nz!(8)).get(), 8);
/// assert_eq!(clamp_participant_count(-1, nz!(8)).get(), 8);
/// assert_eq!(clamp_participant_count(99, nz!(8)).get(), 8);
/// ```
#[must_use]
pub fn clamp_participant_count(requested: i64, group_size: NonZero<usize>) -> NonZero<usize> {
    usize::try_from(requested)
        .ok()
        .and_then(NonZero::new)
        .filter(|requested| *requested <= group_size)
        .unwrap_or(group_size)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SweepConfig::builder().build().unwrap();

        assert_eq!(config, SweepConfig::default());
        assert_eq!(config.outer_repeats().get(), 10);
        assert_eq!(config.inner_repeats().get(), 100);
        assert_eq!(config.requested_participants(), 0);
        assert!(!config.symmetric());
    }

    #[test]
    fn zero_outer_repeats_rejected() {
        let result = SweepConfig::builder().outer_repeats(0).build();

        assert!(matches!(
            result,
            Err(Error::Configuration {
                name: "repeats",
                ..
            })
        ));
    }

    #[test]
    fn negative_repeats_rejected() {
        let outer = SweepConfig::builder().outer_repeats(-3).build();
        let inner = SweepConfig::builder().inner_repeats(-1).build();

        assert!(matches!(outer, Err(Error::Configuration { .. })));
        assert!(matches!(
            inner,
            Err(Error::Configuration { name: "ireps", .. })
        ));
    }

    #[test]
    fn oversized_repeats_rejected() {
        let result = SweepConfig::builder()
            .inner_repeats(i64::from(u32::MAX) + 1)
            .build();

        result.unwrap_err();
    }

    #[test]
    fn clamp_keeps_valid_requests() {
        for requested in 1..=8 {
            assert_eq!(
                clamp_participant_count(requested, nz!(8)).get(),
                usize::try_from(requested).unwrap()
            );
        }
    }

    #[test]
    fn clamp_selects_whole_group_for_invalid_requests() {
        for requested in [0, -1, i64::MIN, 9, 1000, i64::MAX] {
            assert_eq!(clamp_participant_count(requested, nz!(8)).get(), 8);
        }
    }

    #[test]
    fn participant_count_uses_group_size() {
        let config = SweepConfig::builder().participants(2).build().unwrap();

        assert_eq!(config.participant_count(nz!(4)).get(), 2);
        assert_eq!(config.participant_count(nz!(1)).get(), 1);
    }
}
