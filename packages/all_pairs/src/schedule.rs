use std::num::NonZero;

use crate::ParticipantId;

/// Round-robin pairing schedule that matches every participant with every other participant
/// exactly once, one matching per round.
///
/// The schedule is a pure function of the participant count: every participant computes its
/// own partner for a round independently, without talking to anyone, and all participants
/// arrive at the same matching.
///
/// # Construction
///
/// This is the "circle" tournament method. Participants sit on a circle of `M` positions, where
/// `M` is the participant count rounded up to the next even number (an odd count gets one
/// virtual slot whose partner sits out the round). Position `M - 1` stays fixed while the other
/// `m = M - 1` positions rotate by one step per round. In round `r`, two rotating participants
/// `i` and `j` face each other when `i + j = r + 1 (mod m)`, and the single rotating participant
/// with `2i = r + 1 (mod m)` faces the fixed position. Because `m` is odd, every unordered pair
/// meets in exactly one round.
///
/// # Example
///
/// ```
/// use all_pairs::{PairSchedule, ParticipantId};
/// use new_zealand::nz;
///
/// let schedule = PairSchedule::new(nz!(4));
/// assert_eq!(schedule.round_count(), 3);
///
/// let p = ParticipantId::new;
/// assert_eq!(schedule.pairs(0).collect::<Vec<_>>(), vec![(p(0), p(1)), (p(2), p(3))]);
/// assert_eq!(schedule.partner(p(1), 2), Some(p(2)));
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PairSchedule {
    participants: NonZero<usize>,

    // The number of rotating positions on the circle. Always odd, or 0 for a single participant.
    rotating: usize,
}

impl PairSchedule {
    /// Creates the schedule for participants `0..participants`.
    #[must_use]
    pub fn new(participants: NonZero<usize>) -> Self {
        let count = participants.get();

        // Pad an odd count with a virtual slot, then one position is fixed.
        let circle = count
            .checked_add(count % 2)
            .expect("participant counts are far below usize::MAX");
        let rotating = circle
            .checked_sub(1)
            .expect("the circle has at least one position");

        Self {
            participants,
            rotating,
        }
    }

    /// The number of participants under test.
    #[must_use]
    pub fn participant_count(&self) -> NonZero<usize> {
        self.participants
    }

    /// The number of rounds needed to pair everyone with everyone.
    ///
    /// This is 0 for a single participant, `N - 1` for an even count and `N` for an odd count.
    #[must_use]
    pub fn round_count(&self) -> usize {
        self.rotating
    }

    /// The partner of `participant` in `round`, or `None` if the participant sits out the round.
    ///
    /// Participants outside the schedule (ids at or above the participant count) sit out every
    /// round.
    ///
    /// # Panics
    ///
    /// Panics if `round` is not less than [`round_count()`][Self::round_count].
    #[must_use]
    pub fn partner(&self, participant: ParticipantId, round: usize) -> Option<ParticipantId> {
        assert!(
            round < self.rotating,
            "round {round} is outside the schedule of {} rounds",
            self.rotating
        );

        let m = self.rotating;
        let i = participant.get();

        if i >= self.participants.get() {
            return None;
        }

        // The target sum of a facing pair, modulo m.
        let target = round.checked_add(1).expect("round < m") % m;

        let partner = if i == m {
            // The fixed position faces the rotating participant with 2i = target (mod m).
            // (m + 1) / 2 is the inverse of 2 modulo the odd number m.
            #[expect(
                clippy::integer_division,
                reason = "m is odd so m + 1 is even and the division is exact"
            )]
            let half = m.checked_add(1).expect("m is far below usize::MAX") / 2;

            target
                .checked_mul(half)
                .expect("participant counts are far below the square root of usize::MAX")
                % m
        } else {
            // i < m here, so the subtraction cannot underflow.
            let j = target
                .checked_add(m)
                .and_then(|sum| sum.checked_sub(i))
                .expect("i is a rotating position, so i < m")
                % m;

            if j == i { m } else { j }
        };

        // Only odd counts have a virtual slot at index m, and its partner sits out.
        (partner < self.participants.get()).then(|| ParticipantId::new(partner))
    }

    /// The participant that sits out `round`, if the participant count is odd.
    ///
    /// # Panics
    ///
    /// Panics if `round` is not less than [`round_count()`][Self::round_count].
    #[must_use]
    pub fn idle(&self, round: usize) -> Option<ParticipantId> {
        (0..self.participants.get())
            .map(ParticipantId::new)
            .find(|participant| self.partner(*participant, round).is_none())
    }

    /// The matched pairs of `round`, each as `(lower, higher)`, ordered by the lower id.
    ///
    /// # Panics
    ///
    /// Panics if `round` is not less than [`round_count()`][Self::round_count].
    pub fn pairs(&self, round: usize) -> impl Iterator<Item = (ParticipantId, ParticipantId)> {
        let schedule = *self;

        (0..self.participants.get())
            .map(ParticipantId::new)
            .filter_map(move |participant| {
                schedule
                    .partner(participant, round)
                    .filter(|partner| participant < *partner)
                    .map(|partner| (participant, partner))
            })
    }

    /// The exchange steps `participant` performs in `round`, in execution order.
    ///
    /// Within a matched pair the lower id initiates first. Unless `symmetric` is set, the pair
    /// then swaps roles so that both directions get measured in the same round. Both members of
    /// a pair derive the same steps, mirrored, so no negotiation is needed.
    ///
    /// # Panics
    ///
    /// Panics if `round` is not less than [`round_count()`][Self::round_count].
    #[must_use]
    pub fn steps(&self, participant: ParticipantId, round: usize, symmetric: bool) -> Steps {
        let Some(partner) = self.partner(participant, round) else {
            return Steps::Idle;
        };

        let first = if participant < partner {
            Step::Initiate(partner)
        } else {
            Step::Respond(partner)
        };

        if symmetric {
            Steps::One(first)
        } else {
            Steps::Two(first, first.reversed())
        }
    }

    /// The number of directed measurements one full pass over the schedule produces.
    #[must_use]
    pub fn directed_measurements(&self, symmetric: bool) -> usize {
        let n = self.participants.get();
        let ordered = n
            .checked_mul(n.saturating_sub(1))
            .expect("participant counts are far below the square root of usize::MAX");

        #[expect(clippy::integer_division, reason = "n * (n - 1) is always even")]
        let unordered = ordered / 2;

        if symmetric { unordered } else { ordered }
    }
}

/// One half of a directed exchange between two matched participants.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Step {
    /// Run the timed side of the exchange against the partner.
    Initiate(ParticipantId),

    /// Serve the partner's timed exchange.
    Respond(ParticipantId),
}

impl Step {
    /// The partner involved in this step.
    #[must_use]
    pub fn partner(self) -> ParticipantId {
        match self {
            Self::Initiate(partner) | Self::Respond(partner) => partner,
        }
    }

    #[must_use]
    fn reversed(self) -> Self {
        match self {
            Self::Initiate(partner) => Self::Respond(partner),
            Self::Respond(partner) => Self::Initiate(partner),
        }
    }
}

/// The exchange steps of one participant in one round.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Steps {
    /// The participant sits out the round.
    Idle,

    /// One directed exchange (symmetric mode).
    One(Step),

    /// Both directed exchanges, in order.
    Two(Step, Step),
}

impl Steps {
    /// Iterates over the steps in execution order.
    pub fn iter(self) -> impl Iterator<Item = Step> {
        let (first, second) = match self {
            Self::Idle => (None, None),
            Self::One(first) => (Some(first), None),
            Self::Two(first, second) => (Some(first), Some(second)),
        };

        first.into_iter().chain(second)
    }
}
