use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::ParticipantId;

/// Errors that can occur when configuring or executing an all-pairs latency sweep.
///
/// Configuration and unknown-kernel errors are local to one request and a run can continue
/// past them. Partner and sweep errors abandon the current kernel's sweep. Synchronization
/// errors abandon the whole run because the group can no longer be trusted to be in lockstep.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A configuration value is outside its valid range.
    #[error("invalid configuration: '{name}' = {value} is invalid: {problem}")]
    Configuration {
        /// The name of the offending setting.
        name: &'static str,

        /// The value that was provided.
        value: String,

        /// A human-readable description of the problem.
        problem: &'static str,
    },

    /// A kernel name was requested that has no registered implementation.
    #[error("unknown kernel '{name}'")]
    UnknownKernel {
        /// The requested name.
        name: String,
    },

    /// The communication runtime could not complete an exchange with a partner.
    #[error("partner {partner} is unreachable: {reason}")]
    PartnerUnreachable {
        /// The partner the exchange was addressed to.
        partner: ParticipantId,

        /// What went wrong.
        reason: &'static str,
    },

    /// Another participant voted to abandon the current sweep.
    #[error("sweep aborted because participant {participant} failed")]
    SweepAborted {
        /// The lowest participant that voted to abort.
        participant: ParticipantId,
    },

    /// Not every group member reached a barrier before the deadline.
    #[error("group members did not synchronize within {waited:?}")]
    SynchronizationTimeout {
        /// How long the barrier was waited on.
        waited: Duration,
    },

    /// A group member left the group while others were still waiting for it.
    #[error("participant {participant} departed from the group")]
    ParticipantDeparted {
        /// The participant that left.
        participant: ParticipantId,
    },

    /// The gathered samples do not cover every directed pair the schedule requires.
    #[error("sweep of kernel '{kernel}' is missing samples for {missing} directed pairs")]
    IncompleteSweep {
        /// The kernel whose sweep was incomplete.
        kernel: String,

        /// How many directed pairs have no samples.
        missing: usize,
    },

    /// The report sink failed to persist a report.
    #[error("failed to write report: {0}")]
    Report(#[from] io::Error),
}

impl Error {
    /// Whether the error only abandons the current kernel's sweep, leaving the group in
    /// lockstep and able to continue with the next kernel.
    #[must_use]
    pub fn is_sweep_local(&self) -> bool {
        matches!(
            self,
            Self::PartnerUnreachable { .. }
                | Self::SweepAborted { .. }
                | Self::IncompleteSweep { .. }
                | Self::UnknownKernel { .. }
        )
    }
}

/// A specialized `Result` type for all-pairs operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;
