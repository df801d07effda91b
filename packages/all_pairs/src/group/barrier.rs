use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::{Error, ParticipantId, Result, Vote};

/// A reusable barrier that combines the votes of all arrivals and gives up after a deadline.
///
/// Failures are sticky: once the barrier has timed out or a member has departed, every
/// subsequent wait fails with the same error.
#[derive(Debug)]
pub(crate) struct VotingBarrier {
    members: usize,
    timeout: Duration,

    state: Mutex<BarrierState>,
    released: Condvar,
}

#[derive(Debug)]
struct BarrierState {
    // Incremented every time all members have arrived.
    generation: u64,
    arrived: usize,

    // The combined vote of the members that have arrived in the current generation.
    pending: Vote,

    // The outcome of the most recently completed generation.
    last_outcome: Vote,

    failure: Option<Failure>,
}

#[derive(Clone, Copy, Debug)]
enum Failure {
    TimedOut(Duration),
    Departed(ParticipantId),
}

impl Failure {
    fn to_error(self) -> Error {
        match self {
            Self::TimedOut(waited) => Error::SynchronizationTimeout { waited },
            Self::Departed(participant) => Error::ParticipantDeparted { participant },
        }
    }
}

impl VotingBarrier {
    pub(crate) fn new(members: usize, timeout: Duration) -> Self {
        Self {
            members,
            timeout,
            state: Mutex::new(BarrierState {
                generation: 0,
                arrived: 0,
                pending: Vote::Continue,
                last_outcome: Vote::Continue,
                failure: None,
            }),
            released: Condvar::new(),
        }
    }

    /// Casts a vote and waits for the other members, returning the combined vote.
    pub(crate) fn wait(&self, vote: Vote) -> Result<Vote> {
        let mut state = self.state.lock();

        if let Some(failure) = state.failure {
            return Err(failure.to_error());
        }

        state.pending = state.pending.combine(vote);
        state.arrived = state
            .arrived
            .checked_add(1)
            .expect("arrivals are bounded by the member count");

        if state.arrived == self.members {
            state.last_outcome = state.pending;
            state.pending = Vote::Continue;
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);

            self.released.notify_all();
            return Ok(state.last_outcome);
        }

        let generation = state.generation;
        let deadline = Instant::now()
            .checked_add(self.timeout)
            .expect("barrier timeout is far below the end of time");

        while state.generation == generation {
            if let Some(failure) = state.failure {
                return Err(failure.to_error());
            }

            if self.released.wait_until(&mut state, deadline).timed_out()
                && state.generation == generation
            {
                let failure = state.failure.get_or_insert(Failure::TimedOut(self.timeout));
                let error = failure.to_error();

                self.released.notify_all();
                return Err(error);
            }
        }

        // Nobody can start the next generation before we arrive again, so this is ours.
        Ok(state.last_outcome)
    }

    /// Records that a member has left the group, failing every current and future wait.
    pub(crate) fn depart(&self, participant: ParticipantId) {
        let mut state = self.state.lock();

        if state.failure.is_none() {
            state.failure = Some(Failure::Departed(participant));
        }

        self.released.notify_all();
    }
}
