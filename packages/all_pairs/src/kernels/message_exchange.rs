use std::num::NonZero;
use std::time::{Duration, Instant};

use crate::kernel::{mean_per_trial, one_way};
use crate::{Endpoint, MeasurementKernel, ParticipantId, Result};

/// How a [`MessageExchange`] hands its messages to the runtime.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Delivery {
    /// Sends complete only when the receiver has taken the message.
    Synchronous,

    /// Sends return as soon as the message is queued.
    Buffered,
}

/// A two-sided ping-pong: the initiator sends a message and waits for the partner to echo it.
///
/// Registered as `mpi_sync` with [`Delivery::Synchronous`] and as `mpi_async` with
/// [`Delivery::Buffered`].
#[derive(Debug)]
pub struct MessageExchange<'e> {
    endpoint: &'e Endpoint,
    inner_repeats: NonZero<u32>,
    delivery: Delivery,
}

impl<'e> MessageExchange<'e> {
    /// Creates the kernel, running `inner_repeats` round trips per call.
    #[must_use]
    pub fn new(endpoint: &'e Endpoint, inner_repeats: NonZero<u32>, delivery: Delivery) -> Self {
        Self {
            endpoint,
            inner_repeats,
            delivery,
        }
    }

    fn send(&self, to: ParticipantId, payload: u64) -> Result<()> {
        match self.delivery {
            Delivery::Synchronous => self.endpoint.send_sync(to, payload),
            Delivery::Buffered => self.endpoint.post_send(to, payload),
        }
    }
}

impl MeasurementKernel for MessageExchange<'_> {
    fn name(&self) -> &str {
        match self.delivery {
            Delivery::Synchronous => "mpi_sync",
            Delivery::Buffered => "mpi_async",
        }
    }

    fn measure(&mut self, partner: ParticipantId) -> Result<Duration> {
        let start = Instant::now();

        for trial in 0..self.inner_repeats.get() {
            self.send(partner, u64::from(trial))?;
            self.endpoint.receive(partner)?;
        }

        Ok(one_way(mean_per_trial(start.elapsed(), self.inner_repeats)))
    }

    fn serve(&mut self, partner: ParticipantId) -> Result<()> {
        for _ in 0..self.inner_repeats.get() {
            let payload = self.endpoint.receive(partner)?;
            self.send(partner, payload)?;
        }

        Ok(())
    }
}
