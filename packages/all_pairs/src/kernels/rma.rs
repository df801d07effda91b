use std::hint::black_box;
use std::num::NonZero;
use std::time::{Duration, Instant};

use crate::kernel::mean_per_trial;
use crate::{Endpoint, MeasurementKernel, ParticipantId, ProcessGroup, Result, WINDOW_LEN};

/// The direction of a one-sided [`RemoteAccess`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Access {
    /// Read a cell of the partner's window.
    Get,

    /// Write a cell of the partner's window.
    Put,
}

/// One-sided access to the partner's memory window in passive-target epochs.
///
/// Each trial is one complete lock, access, unlock epoch. The partner takes no part.
///
/// Registered as `mpi_rma_get` with [`Access::Get`] and as `mpi_rma_put` with [`Access::Put`].
#[derive(Debug)]
pub struct RemoteAccess<'e> {
    endpoint: &'e Endpoint,
    inner_repeats: NonZero<u32>,
    access: Access,
}

impl<'e> RemoteAccess<'e> {
    /// Creates the kernel, running `inner_repeats` access epochs per call.
    #[must_use]
    pub fn new(endpoint: &'e Endpoint, inner_repeats: NonZero<u32>, access: Access) -> Self {
        Self {
            endpoint,
            inner_repeats,
            access,
        }
    }
}

impl MeasurementKernel for RemoteAccess<'_> {
    fn name(&self) -> &str {
        match self.access {
            Access::Get => "mpi_rma_get",
            Access::Put => "mpi_rma_put",
        }
    }

    fn measure(&mut self, partner: ParticipantId) -> Result<Duration> {
        // Every initiator uses its own cell so concurrent writers do not share one.
        let cell = self.endpoint.rank().get() % WINDOW_LEN;

        let start = Instant::now();

        for trial in 0..self.inner_repeats.get() {
            match self.access {
                Access::Get => {
                    black_box(self.endpoint.get(partner, cell)?);
                }
                Access::Put => {
                    self.endpoint.put(partner, cell, u64::from(trial))?;
                }
            }
        }

        Ok(mean_per_trial(start.elapsed(), self.inner_repeats))
    }

    fn serve(&mut self, _partner: ParticipantId) -> Result<()> {
        Ok(())
    }
}
