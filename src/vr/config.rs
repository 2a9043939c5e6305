//! Cluster-wide parameters a replica's state-sync core is bootstrapped
//! with.

use crate::vr::error::*;

/// Represents the configuration a [`crate::vr::sync::StateSync`] core is
/// bootstrapped with.
///
/// Mirrors the validate-at-construction style of the upstream
/// communication layer's `NodeConfig` (which rejects a cluster too small
/// to tolerate `f` faults before a single socket is opened): a
/// `SyncConfig` rejects nonsensical cluster parameters before a single
/// candidate is recorded.
#[derive(Debug, Copy, Clone)]
pub struct SyncConfig {
    /// The number of other replicas in the cluster. Sizes the
    /// `TargetQuorum` table: one optional candidate slot per peer.
    replica_count: usize,
    /// The number of matching peer advertisements required before a
    /// candidate is promoted to a canonical target. Cluster-defined;
    /// typically `floor(replica_count / 2) + 1`.
    quorum_threshold: usize,
    /// The maximum payload a single trailer chunk message may carry.
    chunk_size_max: usize,
}

impl SyncConfig {
    /// Builds a new `SyncConfig`, rejecting parameters that could never
    /// describe a working cluster.
    pub fn new(replica_count: usize, quorum_threshold: usize, chunk_size_max: usize) -> Result<Self> {
        if replica_count == 0 {
            return Err("A cluster needs at least one other replica").simple(ErrorKind::Config);
        }
        if quorum_threshold == 0 || quorum_threshold > replica_count {
            return Err("Quorum threshold must be in 1..=replica_count").simple(ErrorKind::Config);
        }
        if chunk_size_max == 0 {
            return Err("Chunk size maximum must be non-zero").simple(ErrorKind::Config);
        }
        Ok(Self {
            replica_count,
            quorum_threshold,
            chunk_size_max,
        })
    }

    /// Returns the number of other replicas in the cluster.
    pub fn replica_count(&self) -> usize {
        self.replica_count
    }

    /// Returns the quorum threshold candidates must reach before
    /// promotion to a canonical target.
    pub fn quorum_threshold(&self) -> usize {
        self.quorum_threshold
    }

    /// Returns the maximum payload size of a single trailer chunk.
    pub fn chunk_size_max(&self) -> usize {
        self.chunk_size_max
    }
}
