use std::hint::black_box;
use std::num::NonZero;
use std::time::{Duration, Instant};

use crate::kernel::mean_per_trial;
use crate::{Endpoint, MeasurementKernel, ParticipantId, Result};

/// PGAS-style read of the first element of the global array that the partner owns.
///
/// Registered as `dash_get`. The partner takes no part.
#[derive(Debug)]
pub struct GlobalGet<'e> {
    endpoint: &'e Endpoint,
    inner_repeats: NonZero<u32>,
}

impl<'e> GlobalGet<'e> {
    /// Creates the kernel, running `inner_repeats` reads per call.
    #[must_use]
    pub fn new(endpoint: &'e Endpoint, inner_repeats: NonZero<u32>) -> Self {
        Self {
            endpoint,
            inner_repeats,
        }
    }
}

impl MeasurementKernel for GlobalGet<'_> {
    fn name(&self) -> &str {
        "dash_get"
    }

    fn measure(&mut self, partner: ParticipantId) -> Result<Duration> {
        let index = self.endpoint.global_offset(partner);

        let start = Instant::now();

        for _ in 0..self.inner_repeats.get() {
            black_box(self.endpoint.global_get(black_box(index))?);
        }

        Ok(mean_per_trial(start.elapsed(), self.inner_repeats))
    }

    fn serve(&mut self, _partner: ParticipantId) -> Result<()> {
        Ok(())
    }
}
