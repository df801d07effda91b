use derive_more::{Display, From};

/// Identifies one member of the process group under test.
///
/// Identifiers are 0-based, dense and stable for the lifetime of the group member.
#[derive(Clone, Copy, Debug, Display, Eq, From, Hash, Ord, PartialEq, PartialOrd)]
#[display("{_0}")]
pub struct ParticipantId(usize);

impl ParticipantId {
    /// The participant that gathers the samples of every sweep and delivers the report.
    pub const ROOT: Self = Self(0);

    /// Creates an identifier from its index in the group.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// The index of the participant in the group.
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }

    /// Whether this is the root participant.
    #[must_use]
    pub const fn is_root(self) -> bool {
        self.0 == Self::ROOT.0
    }
}
