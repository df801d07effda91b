use std::num::NonZero;
use std::time::Duration;

use crate::{ParticipantId, Result};

/// One way of exchanging data with a partner, timed from the initiating side.
///
/// The two members of a measured pair call complementary methods at the same time: the
/// initiator calls [`measure()`][Self::measure] and its partner calls [`serve()`][Self::serve].
/// Each call performs the kernel's configured number of inner repeats.
///
/// Two-sided kernels report half of the measured round trip, i.e. the one-way latency.
/// One-sided kernels report the duration of one complete access epoch.
pub trait MeasurementKernel {
    /// The name the kernel is registered under.
    fn name(&self) -> &str;

    /// Runs the timed side of the exchange against `partner` and returns the mean latency of
    /// the inner repeats.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PartnerUnreachable`][crate::Error::PartnerUnreachable] if the exchange
    /// cannot be completed.
    fn measure(&mut self, partner: ParticipantId) -> Result<Duration>;

    /// Runs the passive side of the exchange that `partner` is measuring.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PartnerUnreachable`][crate::Error::PartnerUnreachable] if the exchange
    /// cannot be completed.
    fn serve(&mut self, partner: ParticipantId) -> Result<()>;
}

/// The mean duration of one trial, given the total duration of `trials` trials.
pub(crate) fn mean_per_trial(total: Duration, trials: NonZero<u32>) -> Duration {
    total
        .checked_div(trials.get())
        .expect("guarded by NonZero trial count")
}

/// The one-way latency of a round trip that took `round_trip`.
pub(crate) fn one_way(round_trip: Duration) -> Duration {
    round_trip
        .checked_div(2)
        .expect("dividing by a non-zero constant")
}
