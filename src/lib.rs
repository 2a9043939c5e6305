//! `waypoint` — the state-sync coordination core of a replica in a
//! Viewstamped-Replication-style consensus cluster.
//!
//! This crate answers three questions: *when* may a replica initiate a
//! state sync, *which* remote checkpoint is the correct target, and *how*
//! are the oversized auxiliary structures (checkpoint trailers) fetched
//! piece-wise, verified, and committed. It deliberately knows nothing
//! about message transport, block storage, the superblock writer, or the
//! commit/apply pipeline: those are external collaborators, driven through
//! the entry points exposed by [`vr::sync::StateSync`].

pub mod vr;

pub use vr::config::SyncConfig;
pub use vr::error::{Error, ErrorKind, Result};
pub use vr::ordering::SeqNo;
pub use vr::sync::{StateSync, SyncEvent, SyncStatus};
