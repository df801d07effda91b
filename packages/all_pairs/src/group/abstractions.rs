use std::num::NonZero;

use crate::{ParticipantId, Result, Sample};

/// What a group member wants to happen after a barrier.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum Vote {
    /// Everything went fine on this member, carry on.
    #[default]
    Continue,

    /// The member failed and the current sweep must be abandoned by everyone.
    Abort {
        /// The member that voted to abort.
        participant: ParticipantId,
    },
}

impl Vote {
    /// Combines two votes. Any abort wins over continuing and the lowest aborting member wins
    /// over higher ones, so every member arrives at the same outcome regardless of arrival order.
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (Self::Continue, other) => other,
            (this, Self::Continue) => this,
            (Self::Abort { participant: a }, Self::Abort { participant: b }) => Self::Abort {
                participant: a.min(b),
            },
        }
    }

    /// Whether this vote abandons the current sweep.
    #[must_use]
    pub fn is_abort(self) -> bool {
        matches!(self, Self::Abort { .. })
    }
}

/// The view of a process group that one member has.
///
/// Every member of the group runs the same logic and makes the same sequence of collective
/// calls ([`barrier()`][Self::barrier] and [`gather()`][Self::gather]). A member that skips a
/// collective call stalls the others until their deadline expires.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessGroup {
    /// The identity of this member within the group.
    fn rank(&self) -> ParticipantId;

    /// The number of members in the group.
    fn size(&self) -> NonZero<usize>;

    /// Waits until every member has reached the barrier and returns the combined vote of all
    /// members.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SynchronizationTimeout`][crate::Error::SynchronizationTimeout] if not
    /// every member arrives in time and
    /// [`Error::ParticipantDeparted`][crate::Error::ParticipantDeparted] if a member left the
    /// group. Both leave the group unusable.
    fn barrier(&self, vote: Vote) -> Result<Vote>;

    /// Collects the samples of every member at the root member.
    ///
    /// The root receives the samples of all members in rank order, every other member receives
    /// `None`.
    ///
    /// # Errors
    ///
    /// Fails for the same reasons as [`barrier()`][Self::barrier].
    fn gather(&self, samples: Vec<Sample>) -> Result<Option<Vec<Sample>>>;
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn abort(participant: usize) -> Vote {
        Vote::Abort {
            participant: ParticipantId::new(participant),
        }
    }

    #[test]
    fn continue_is_neutral() {
        assert_eq!(Vote::Continue.combine(Vote::Continue), Vote::Continue);
        assert_eq!(Vote::Continue.combine(abort(2)), abort(2));
        assert_eq!(abort(2).combine(Vote::Continue), abort(2));
    }

    #[test]
    fn lowest_abort_wins() {
        assert_eq!(abort(3).combine(abort(1)), abort(1));
        assert_eq!(abort(1).combine(abort(3)), abort(1));

        assert!(abort(0).is_abort());
        assert!(!Vote::default().is_abort());
    }
}
