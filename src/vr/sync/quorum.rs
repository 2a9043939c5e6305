//! Canonical-checkpoint discovery.
//!
//! Tracks each peer's most recently advertised checkpoint, and answers
//! the one question the sync stage machine needs answered: "how many
//! peers currently advertise exactly this candidate?".

use std::cmp::Ordering;

use tracing::{debug, trace};

use super::target::TargetCandidate;

/// Identifies one other replica in the cluster, for the purposes of
/// indexing into a [`TargetQuorum`]'s candidate table.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct ReplicaIndex(usize);

impl From<usize> for ReplicaIndex {
    #[inline]
    fn from(index: usize) -> Self {
        ReplicaIndex(index)
    }
}

impl From<ReplicaIndex> for usize {
    #[inline]
    fn from(index: ReplicaIndex) -> usize {
        index.0
    }
}

/// A fixed-size table, one optional candidate slot per other replica in
/// the cluster.
///
/// Per-replica slotting ensures each peer contributes at most one vote
/// to [`TargetQuorum::count`], so a single chatty peer can't inflate the
/// count on its own. `TargetCandidate` is kept nominally distinct from
/// `Target` precisely so this table can't be mistaken for, or silently
/// used as, a store of canonical targets.
pub struct TargetQuorum {
    slots: Vec<Option<TargetCandidate>>,
}

impl TargetQuorum {
    /// Creates a new, empty quorum table sized for `replica_count` other
    /// replicas.
    pub fn new(replica_count: usize) -> Self {
        Self {
            slots: vec![None; replica_count],
        }
    }

    /// Records `candidate` as the latest checkpoint advertised by the
    /// replica at `replica_index`.
    ///
    /// Returns `true` if the slot was empty or was overwritten, `false`
    /// if the advertisement was rejected as stale or a duplicate.
    pub fn replace(&mut self, replica_index: ReplicaIndex, candidate: TargetCandidate) -> bool {
        let slot = &mut self.slots[usize::from(replica_index)];
        match slot {
            None => {
                debug!(replica = usize::from(replica_index), op = ?candidate.checkpoint_op(), "recorded first target advertisement");
                *slot = Some(candidate);
                true
            }
            Some(existing) => {
                if candidate.checkpoint_op() < existing.checkpoint_op() {
                    trace!(replica = usize::from(replica_index), "rejected stale target advertisement");
                    return false;
                }
                if candidate.checkpoint_op() == existing.checkpoint_op()
                    && candidate.checkpoint_id() == existing.checkpoint_id()
                {
                    trace!(replica = usize::from(replica_index), "rejected duplicate target advertisement");
                    return false;
                }
                // Same op, different id, or a strictly newer op: either
                // way the newest claim wins. Safety does not come from
                // this ordering alone, but from requiring a quorum of
                // matching (op, id) pairs before promotion.
                debug!(replica = usize::from(replica_index), op = ?candidate.checkpoint_op(), "overwrote target advertisement");
                *slot = Some(candidate);
                true
            }
        }
    }

    /// Counts how many slots currently hold a candidate equal to
    /// `candidate` by `(checkpoint_op, checkpoint_id)`.
    pub fn count(&self, candidate: &TargetCandidate) -> usize {
        self.slots
            .iter()
            .filter(|slot| match slot {
                Some(stored) => {
                    let matches = stored.checkpoint_op() == candidate.checkpoint_op()
                        && stored.checkpoint_id() == candidate.checkpoint_id();
                    debug_assert!(!matches || stored == candidate);
                    matches
                }
                None => false,
            })
            .count()
    }
}

impl PartialOrd for ReplicaIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.0.partial_cmp(&other.0)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::vr::crypto::hash::Digest;
    use crate::vr::ordering::SeqNo;
    use proptest::prelude::*;

    fn candidate(op: u64, byte: u8) -> TargetCandidate {
        TargetCandidate::new(Digest::sum(&[byte]), SeqNo::from(op))
    }

    proptest! {
        #[test]
        fn monotone_in_op(op1 in 0u64..1000, op2 in 0u64..1000, byte1 in any::<u8>(), byte2 in any::<u8>()) {
            let mut quorum = TargetQuorum::new(1);
            let c1 = candidate(op1, byte1);
            let c2 = candidate(op2, byte2);

            prop_assert!(quorum.replace(ReplicaIndex::from(0), c1));
            let accepted = quorum.replace(ReplicaIndex::from(0), c2);

            if op2 < op1 {
                prop_assert!(!accepted);
                prop_assert_eq!(quorum.count(&c1), 1);
            } else if op2 == op1 && c2 == c1 {
                prop_assert!(!accepted);
            }
        }

        #[test]
        fn count_is_at_least_one_after_a_successful_replace(
            op in 0u64..1000, byte in any::<u8>(), slots in 1usize..16,
        ) {
            let mut quorum = TargetQuorum::new(slots);
            let c = candidate(op, byte);
            prop_assert!(quorum.replace(ReplicaIndex::from(0), c));
            prop_assert!(quorum.count(&c) >= 1);
        }

        #[test]
        fn count_equals_slot_count_when_uniform(slots in 1usize..16, op in 0u64..1000, byte in any::<u8>()) {
            let mut quorum = TargetQuorum::new(slots);
            let c = candidate(op, byte);
            for replica in 0..slots {
                quorum.replace(ReplicaIndex::from(replica), c);
            }
            prop_assert_eq!(quorum.count(&c), slots);
        }
    }
}
