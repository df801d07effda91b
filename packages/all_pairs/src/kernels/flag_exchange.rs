use std::num::NonZero;
use std::time::{Duration, Instant};

use crate::kernel::{mean_per_trial, one_way};
use crate::{Endpoint, MeasurementKernel, ParticipantId, Result};

/// The baseline kernel: a ping-pong of flags raised directly in the partner's memory window,
/// without any messaging layer in between.
///
/// Registered as `def`.
#[derive(Debug)]
pub struct FlagExchange<'e> {
    endpoint: &'e Endpoint,
    inner_repeats: NonZero<u32>,
}

impl<'e> FlagExchange<'e> {
    /// Creates the kernel, running `inner_repeats` round trips per call.
    #[must_use]
    pub fn new(endpoint: &'e Endpoint, inner_repeats: NonZero<u32>) -> Self {
        Self {
            endpoint,
            inner_repeats,
        }
    }
}

impl MeasurementKernel for FlagExchange<'_> {
    fn name(&self) -> &str {
        "def"
    }

    fn measure(&mut self, partner: ParticipantId) -> Result<Duration> {
        let start = Instant::now();

        for trial in 1..=self.inner_repeats.get() {
            let token = NonZero::new(u64::from(trial)).expect("trials are counted from 1");

            self.endpoint.notify(partner, token)?;
            self.endpoint.await_notification(partner)?;
        }

        Ok(one_way(mean_per_trial(start.elapsed(), self.inner_repeats)))
    }

    fn serve(&mut self, partner: ParticipantId) -> Result<()> {
        for _ in 0..self.inner_repeats.get() {
            let token = self.endpoint.await_notification(partner)?;
            self.endpoint.notify(partner, token)?;
        }

        Ok(())
    }
}
