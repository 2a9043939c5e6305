//! Checkpoint targets: the things a replica decides to install.

#[cfg(feature = "serialize_serde")]
use serde::{Deserialize, Serialize};

use crate::vr::crypto::hash::Digest;
use crate::vr::ordering::{Orderable, SeqNo};

/// A canonical checkpoint a replica intends to install.
///
/// Immutable once constructed. The only way to obtain one is to
/// [`TargetCandidate::promote`] a candidate that a [`super::quorum::TargetQuorum`]
/// has shown a quorum of peers agree on — there is no public constructor
/// that builds a `Target` directly from a `(Digest, SeqNo)` pair, so code
/// that only has a `Target` in hand is, by construction, code that has
/// already been through quorum verification.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Target {
    checkpoint_id: Digest,
    checkpoint_op: SeqNo,
}

impl Target {
    /// Returns the digest identifying the checkpointed state.
    pub fn checkpoint_id(&self) -> Digest {
        self.checkpoint_id
    }

    /// Returns the log position the checkpoint was taken at.
    pub fn checkpoint_op(&self) -> SeqNo {
        self.checkpoint_op
    }
}

impl Orderable for Target {
    fn sequence_number(&self) -> SeqNo {
        self.checkpoint_op
    }
}

/// A checkpoint advertised by some peer, not yet shown canonical.
///
/// Structurally identical to [`Target`], but nominally distinct: the only
/// bridge between the two is [`TargetCandidate::promote`], which a caller
/// should only invoke once [`super::quorum::TargetQuorum::count`] has
/// crossed the cluster's quorum threshold for this exact candidate. Code
/// that merely holds a `TargetCandidate` must never treat it as
/// canonical — the type system, not a runtime check, is what prevents
/// that mistake from compiling.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TargetCandidate {
    checkpoint_id: Digest,
    checkpoint_op: SeqNo,
}

impl TargetCandidate {
    /// Constructs a new candidate from an advertisement received over
    /// the wire.
    pub fn new(checkpoint_id: Digest, checkpoint_op: SeqNo) -> Self {
        Self {
            checkpoint_id,
            checkpoint_op,
        }
    }

    /// Returns the digest identifying the checkpointed state.
    pub fn checkpoint_id(&self) -> Digest {
        self.checkpoint_id
    }

    /// Returns the log position the checkpoint was taken at.
    pub fn checkpoint_op(&self) -> SeqNo {
        self.checkpoint_op
    }

    /// Promotes this candidate to a canonical `Target`.
    ///
    /// This is a correctness-sensitive call: it must only be made once
    /// the caller has verified, via `TargetQuorum::count`, that a quorum
    /// of peers agree on this exact candidate.
    pub fn promote(self) -> Target {
        Target {
            checkpoint_id: self.checkpoint_id,
            checkpoint_op: self.checkpoint_op,
        }
    }
}

impl Orderable for TargetCandidate {
    fn sequence_number(&self) -> SeqNo {
        self.checkpoint_op
    }
}
