//! Module to order checkpoints and the log positions they name.

#[cfg(feature = "serialize_serde")]
use serde::{Deserialize, Serialize};

/// Represents the sequence number of a log position (an "op number"
/// in Viewstamped Replication terms) at which a checkpoint was taken.
///
/// Unlike the consensus-instance sequence numbers of the protocol this
/// crate's lineage descends from, checkpoint op numbers are not subject
/// to a too-big-or-too-old window: a replica only ever compares the op
/// number of a candidate against the op number of whatever it currently
/// has on file, so plain total ordering over `u64` is all that's needed
/// here.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct SeqNo(u64);

impl From<u64> for SeqNo {
    #[inline]
    fn from(sequence_number: u64) -> SeqNo {
        SeqNo(sequence_number)
    }
}

impl From<SeqNo> for u64 {
    #[inline]
    fn from(sequence_number: SeqNo) -> u64 {
        sequence_number.0
    }
}

impl SeqNo {
    /// The sequence number of a replica that has taken no checkpoint yet.
    pub const ZERO: SeqNo = SeqNo(0);

    /// Returns the following sequence number.
    #[inline]
    pub fn next(self) -> SeqNo {
        SeqNo(self.0 + 1)
    }
}

/// Implemented by any type that can report the sequence number it was
/// decided, or taken, at.
pub trait Orderable {
    /// Returns the sequence number associated with this value.
    fn sequence_number(&self) -> SeqNo;
}
