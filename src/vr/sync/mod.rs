//! State-sync coordination core.
//!
//! This module answers three questions for a replica that has fallen too
//! far behind the cluster to catch up by replaying its log: *when* may it
//! initiate a sync, *which* remote checkpoint is the correct target, and
//! *how* are the oversized checkpoint trailers fetched piece-wise,
//! verified, and committed.
//!
//! [`quorum`] and [`target`] answer the second question; [`trailer`]
//! answers the third; the [`Stage`] machine in this module ties them
//! together and answers the first. [`StateSync`] is the single entry
//! point external code drives — in the manner the teacher's
//! `CollabStateTransfer` is the single entry point for its own,
//! structurally similar, state-transfer protocol.

pub mod quorum;
pub mod target;
pub mod trailer;

use tracing::{debug, info, instrument, warn};

#[cfg(feature = "serialize_serde")]
use serde::{Deserialize, Serialize};

use crate::vr::config::SyncConfig;
use crate::vr::crypto::hash::Digest;
use crate::vr::error::*;

pub use quorum::{ReplicaIndex, TargetQuorum};
pub use target::{Target, TargetCandidate};
pub use trailer::TrailerSlot;

/// Identifies which of the three checkpoint trailers a chunk or request
/// pertains to.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TrailerId {
    /// The checkpoint's block manifest.
    Manifest,
    /// The checkpoint's free-set (terminating chunk carries
    /// `previous_checkpoint_id`).
    FreeSet,
    /// The checkpoint's client-session map (terminating chunk carries
    /// `checkpoint_op_checksum`).
    ClientSessions,
}

/// The tag of a [`Stage`], ignoring payload. Used to check transitions
/// against the graph in [`valid_transition`] without requiring a whole
/// (possibly large) `Stage` value on hand.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum StageTag {
    NotSyncing,
    CancellingCommit,
    CancellingGrid,
    RequestingTarget,
    RequestTrailers,
    UpdatingSuperblock,
}

/// Returns whether a transition from `from` to `to` is permitted by the
/// sync lifecycle's transition graph.
///
/// This is the only place the graph is encoded; [`Stage::transition`]
/// consults it before ever overwriting a `Stage` value, so it is
/// impossible for a caller to drive the machine along an edge this
/// function rejects.
pub fn valid_transition(from: StageTag, to: StageTag) -> bool {
    use StageTag::*;
    matches!(
        (from, to),
        (NotSyncing, CancellingCommit)
            | (NotSyncing, CancellingGrid)
            | (NotSyncing, RequestingTarget)
            | (CancellingCommit, CancellingGrid)
            | (CancellingGrid, RequestingTarget)
            | (RequestingTarget, RequestingTarget)
            | (RequestingTarget, RequestTrailers)
            | (RequestTrailers, RequestTrailers)
            | (RequestTrailers, UpdatingSuperblock)
            | (UpdatingSuperblock, RequestTrailers)
            | (UpdatingSuperblock, NotSyncing)
    )
}

/// A tagged lifecycle governing a replica's sync activity.
///
/// Fields unique to a later stage are unreachable in an earlier one —
/// there is no shared struct to null-pun into. The only way to move
/// between stages is [`Stage::transition`], which consults
/// [`valid_transition`] and fails stop on an illegal edge.
pub enum Stage {
    /// Steady state.
    NotSyncing,
    /// Commit pipeline in an uninterruptible phase; waiting to abort it.
    CancellingCommit,
    /// Commit aborted; waiting for grid I/O to quiesce.
    CancellingGrid,
    /// Quiesced; polling peers for a canonical target.
    RequestingTarget,
    /// Fetching the three trailers and the two identity fields.
    RequestTrailers {
        target: Target,
        manifest: TrailerSlot,
        free_set: TrailerSlot,
        client_sessions: TrailerSlot,
        previous_checkpoint_id: Option<Digest>,
        checkpoint_op_checksum: Option<Digest>,
    },
    /// Trailers complete; superblock write in flight.
    UpdatingSuperblock {
        target: Target,
        previous_checkpoint_id: Digest,
        checkpoint_op_checksum: Digest,
    },
}

impl Stage {
    /// Returns this stage's tag, discarding payload.
    pub fn tag(&self) -> StageTag {
        match self {
            Stage::NotSyncing => StageTag::NotSyncing,
            Stage::CancellingCommit => StageTag::CancellingCommit,
            Stage::CancellingGrid => StageTag::CancellingGrid,
            Stage::RequestingTarget => StageTag::RequestingTarget,
            Stage::RequestTrailers { .. } => StageTag::RequestTrailers,
            Stage::UpdatingSuperblock { .. } => StageTag::UpdatingSuperblock,
        }
    }

    /// Yields the `Target` this stage is pursuing, if any.
    ///
    /// Non-empty iff `self` is `request_trailers` or `updating_superblock`
    /// — the only read path external components use to learn which
    /// checkpoint is being installed.
    pub fn target(&self) -> Option<Target> {
        match self {
            Stage::RequestTrailers { target, .. } => Some(*target),
            Stage::UpdatingSuperblock { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// Overwrites `self` with `to`, provided the edge `self.tag() -> to.tag()`
    /// is in the transition graph.
    ///
    /// # Panics
    ///
    /// Panics if the edge is not permitted. An illegal transition is a
    /// programming error in the caller driving this stage, not a
    /// recoverable protocol condition.
    fn transition(&mut self, to: Stage) -> Result<()> {
        let (from_tag, to_tag) = (self.tag(), to.tag());
        if !valid_transition(from_tag, to_tag) {
            return Err(format!("illegal stage transition {:?} -> {:?}", from_tag, to_tag))
                .simple(ErrorKind::InvalidTransition);
        }
        info!(from = ?from_tag, to = ?to_tag, "stage transition");
        *self = to;
        Ok(())
    }

    fn fresh_request_trailers(target: Target) -> Stage {
        Stage::RequestTrailers {
            target,
            manifest: TrailerSlot::new(),
            free_set: TrailerSlot::new(),
            client_sessions: TrailerSlot::new(),
            previous_checkpoint_id: None,
            checkpoint_op_checksum: None,
        }
    }
}

/// One externally-observed occurrence the sync core must react to.
///
/// Mirrors §6's External Interfaces one-to-one; [`StateSync::process`] is
/// the single dispatch point, in the style of the teacher's
/// `CollabStateTransfer::process_message`.
pub enum SyncEvent {
    /// The replica has decided it must (re-)attempt a sync, carrying
    /// whatever it currently knows about the interruptibility of the
    /// commit pipeline and the quiescence of the grid.
    Begin {
        commit_interruptible: bool,
        grid_quiesced: bool,
    },
    /// A peer advertised a checkpoint it believes canonical.
    TargetAdvertisement {
        replica_index: ReplicaIndex,
        candidate: TargetCandidate,
    },
    /// A chunk of one of the three trailers arrived from the chosen
    /// source.
    TrailerChunk {
        trailer_id: TrailerId,
        target: Target,
        size: usize,
        checksum: Digest,
        chunk_offset: usize,
        bytes: Vec<u8>,
        /// The checkpoint that preceded this one. Carried by the wire
        /// protocol on the free-set trailer's terminating chunk; `None`
        /// on every other chunk. Not derivable from `bytes` — it names a
        /// different checkpoint entirely.
        previous_checkpoint_id: Option<Digest>,
        /// The log-prepare checksum at the checkpoint's op. Carried by
        /// the wire protocol on the client-sessions trailer's
        /// terminating chunk; `None` on every other chunk. Not derivable
        /// from `bytes`.
        checkpoint_op_checksum: Option<Digest>,
    },
    /// The commit pipeline finished aborting.
    CommitCancelled,
    /// Grid I/O finished quiescing.
    GridCancelled,
    /// The superblock write completed, for the carried `Target`. The
    /// target is required so a stale completion (for a target since
    /// superseded) can be told apart from the real one.
    SuperblockWritten(Target),
}

/// Status returned after driving the core with one [`SyncEvent`].
pub enum SyncStatus {
    /// Nothing changed.
    Nil,
    /// A target advertisement was recorded, but did not (yet) change the
    /// stage — either it hasn't crossed quorum, or the stage isn't
    /// currently able to act on a canonical target.
    Recorded,
    /// A target advertisement was rejected as stale or a duplicate.
    Stale,
    /// A trailer chunk, or a superblock-written completion, carried a
    /// target that does not match the stage's current target; discarded
    /// without being inspected.
    StaleTarget,
    /// A trailer chunk advanced a trailer, but did not complete the
    /// `request_trailers -> updating_superblock` transition.
    Progressed,
    /// A trailer failed authentication. The stage was reset to
    /// `requesting_target`; the caller should re-evaluate targets.
    AuthenticationFailed,
    /// The stage advanced to a new tag. The caller should issue whatever
    /// outbound side effect (§6) entry to that stage demands.
    Advanced(StageTag),
}

/// Owns one replica's sync state: its [`TargetQuorum`], its [`Stage`],
/// and the [`SyncConfig`] it was bootstrapped with.
///
/// The single entry point external code drives — message arrival,
/// cancellation completions, superblock-write completion all funnel
/// through [`StateSync::process`].
pub struct StateSync {
    config: SyncConfig,
    quorum: TargetQuorum,
    stage: Stage,
}

impl StateSync {
    /// Creates a new sync core, starting in `not_syncing` with an empty
    /// quorum table sized per `config`.
    pub fn new(config: SyncConfig) -> Self {
        let quorum = TargetQuorum::new(config.replica_count());
        Self {
            config,
            quorum,
            stage: Stage::NotSyncing,
        }
    }

    /// Returns the current stage.
    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    /// Returns the `Target` the core is currently pursuing, if any.
    pub fn target(&self) -> Option<Target> {
        self.stage.target()
    }

    /// Drives the core with one externally-observed event.
    #[instrument(level = "debug", skip(self, event), fields(stage = ?self.stage.tag()))]
    pub fn process(&mut self, event: SyncEvent) -> Result<SyncStatus> {
        match event {
            SyncEvent::Begin {
                commit_interruptible,
                grid_quiesced,
            } => self.handle_begin(commit_interruptible, grid_quiesced),
            SyncEvent::TargetAdvertisement {
                replica_index,
                candidate,
            } => self.handle_target_advertisement(replica_index, candidate),
            SyncEvent::TrailerChunk {
                trailer_id,
                target,
                size,
                checksum,
                chunk_offset,
                bytes,
                previous_checkpoint_id,
                checkpoint_op_checksum,
            } => self.handle_trailer_chunk(
                trailer_id,
                target,
                size,
                checksum,
                chunk_offset,
                &bytes,
                previous_checkpoint_id,
                checkpoint_op_checksum,
            ),
            SyncEvent::CommitCancelled => self.handle_commit_cancelled(),
            SyncEvent::GridCancelled => self.handle_grid_cancelled(),
            SyncEvent::SuperblockWritten(target) => self.handle_superblock_written(target),
        }
    }

    fn handle_begin(&mut self, commit_interruptible: bool, grid_quiesced: bool) -> Result<SyncStatus> {
        if self.stage.tag() != StageTag::NotSyncing {
            debug!("sync already in progress; ignoring begin request");
            return Ok(SyncStatus::Nil);
        }
        let next = if !commit_interruptible {
            Stage::CancellingCommit
        } else if !grid_quiesced {
            Stage::CancellingGrid
        } else {
            Stage::RequestingTarget
        };
        let tag = next.tag();
        self.stage.transition(next)?;
        Ok(SyncStatus::Advanced(tag))
    }

    fn handle_commit_cancelled(&mut self) -> Result<SyncStatus> {
        if self.stage.tag() != StageTag::CancellingCommit {
            debug!("commit-cancelled callback arrived outside cancelling_commit");
            return Ok(SyncStatus::Nil);
        }
        self.stage.transition(Stage::CancellingGrid)?;
        Ok(SyncStatus::Advanced(StageTag::CancellingGrid))
    }

    fn handle_grid_cancelled(&mut self) -> Result<SyncStatus> {
        if self.stage.tag() != StageTag::CancellingGrid {
            debug!("grid-cancelled callback arrived outside cancelling_grid");
            return Ok(SyncStatus::Nil);
        }
        self.stage.transition(Stage::RequestingTarget)?;
        Ok(SyncStatus::Advanced(StageTag::RequestingTarget))
    }

    fn handle_target_advertisement(
        &mut self,
        replica_index: ReplicaIndex,
        candidate: TargetCandidate,
    ) -> Result<SyncStatus> {
        if !self.quorum.replace(replica_index, candidate) {
            return Ok(SyncStatus::Stale);
        }

        if self.quorum.count(&candidate) < self.config.quorum_threshold() {
            return Ok(SyncStatus::Recorded);
        }

        match self.stage.tag() {
            StageTag::RequestingTarget => {
                let target = candidate.promote();
                self.stage.transition(Stage::fresh_request_trailers(target))?;
                Ok(SyncStatus::Advanced(StageTag::RequestTrailers))
            }
            StageTag::RequestTrailers | StageTag::UpdatingSuperblock => {
                let current = self.stage.target().expect("target present in these stages");
                let candidate_target = candidate.promote();
                if candidate_target == current {
                    return Ok(SyncStatus::Recorded);
                }
                info!(
                    old_op = ?current.checkpoint_op(),
                    new_op = ?candidate_target.checkpoint_op(),
                    "superseding in-flight sync target with a fresher one"
                );
                self.stage
                    .transition(Stage::fresh_request_trailers(candidate_target))?;
                Ok(SyncStatus::Advanced(StageTag::RequestTrailers))
            }
            _ => Ok(SyncStatus::Recorded),
        }
    }

    fn handle_trailer_chunk(
        &mut self,
        trailer_id: TrailerId,
        target: Target,
        size: usize,
        checksum: Digest,
        chunk_offset: usize,
        bytes: &[u8],
        previous_checkpoint_id: Option<Digest>,
        checkpoint_op_checksum: Option<Digest>,
    ) -> Result<SyncStatus> {
        let chunk_size_max = self.config.chunk_size_max();

        // Scoped so the mutable borrow of `self.stage` ends before we
        // need to call back into `self` (to transition the stage, or to
        // abort) below.
        enum Outcome {
            StaleTarget,
            AuthenticationFailed(Error),
            ReadyForSuperblock { current_target: Target, previous_checkpoint_id: Digest, checkpoint_op_checksum: Digest },
            Progressed,
        }

        let outcome = match &mut self.stage {
            Stage::RequestTrailers {
                target: current_target,
                manifest,
                free_set,
                client_sessions,
                previous_checkpoint_id: stage_previous_checkpoint_id,
                checkpoint_op_checksum: stage_checkpoint_op_checksum,
            } => {
                let current_target = *current_target;
                if current_target != target {
                    debug!("trailer chunk carried a superseded target; discarding");
                    Outcome::StaleTarget
                } else {
                    let write_result = match trailer_id {
                        TrailerId::Manifest => manifest.write_chunk(size, checksum, chunk_offset, bytes, chunk_size_max),
                        TrailerId::FreeSet => free_set.write_chunk(size, checksum, chunk_offset, bytes, chunk_size_max),
                        TrailerId::ClientSessions => {
                            client_sessions.write_chunk(size, checksum, chunk_offset, bytes, chunk_size_max)
                        }
                    };

                    match write_result {
                        Err(err) => Outcome::AuthenticationFailed(err),
                        Ok(assembled) => {
                            if assembled.is_some() {
                                match trailer_id {
                                    TrailerId::FreeSet => {
                                        if let Some(id) = previous_checkpoint_id {
                                            *stage_previous_checkpoint_id = Some(id);
                                        }
                                    }
                                    TrailerId::ClientSessions => {
                                        if let Some(checksum) = checkpoint_op_checksum {
                                            *stage_checkpoint_op_checksum = Some(checksum);
                                        }
                                    }
                                    TrailerId::Manifest => {}
                                }
                            }

                            if manifest.done() && free_set.done() && client_sessions.done() {
                                match (*stage_previous_checkpoint_id, *stage_checkpoint_op_checksum) {
                                    (Some(previous_checkpoint_id), Some(checkpoint_op_checksum)) => {
                                        Outcome::ReadyForSuperblock {
                                            current_target,
                                            previous_checkpoint_id,
                                            checkpoint_op_checksum,
                                        }
                                    }
                                    _ => Outcome::Progressed,
                                }
                            } else {
                                Outcome::Progressed
                            }
                        }
                    }
                }
            }
            _ => {
                warn!("trailer chunk arrived outside request_trailers");
                Outcome::StaleTarget
            }
        };

        match outcome {
            Outcome::StaleTarget => Ok(SyncStatus::StaleTarget),
            Outcome::AuthenticationFailed(err) => {
                warn!(?err, "trailer chunk authentication failure; aborting sync attempt");
                self.abort_to_requesting_target()?;
                Ok(SyncStatus::AuthenticationFailed)
            }
            Outcome::Progressed => Ok(SyncStatus::Progressed),
            Outcome::ReadyForSuperblock {
                current_target,
                previous_checkpoint_id,
                checkpoint_op_checksum,
            } => {
                self.stage.transition(Stage::UpdatingSuperblock {
                    target: current_target,
                    previous_checkpoint_id,
                    checkpoint_op_checksum,
                })?;
                Ok(SyncStatus::Advanced(StageTag::UpdatingSuperblock))
            }
        }
    }

    fn handle_superblock_written(&mut self, target: Target) -> Result<SyncStatus> {
        if self.stage.tag() != StageTag::UpdatingSuperblock {
            debug!("superblock-written callback arrived outside updating_superblock");
            return Ok(SyncStatus::Nil);
        }
        if self.stage.target() != Some(target) {
            debug!("superblock-written callback carried a superseded target; ignoring");
            return Ok(SyncStatus::StaleTarget);
        }
        self.stage.transition(Stage::NotSyncing)?;
        Ok(SyncStatus::Advanced(StageTag::NotSyncing))
    }

    fn abort_to_requesting_target(&mut self) -> Result<()> {
        match self.stage.tag() {
            StageTag::RequestTrailers | StageTag::UpdatingSuperblock => {
                self.stage.transition(Stage::RequestingTarget)
            }
            _ => Ok(()),
        }
    }
}
