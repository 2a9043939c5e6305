//! Cryptographic primitives consumed by `waypoint`.
//!
//! The core itself assumes nothing more than a 128-bit collision-resistant
//! digest over byte sequences (see [`hash::Digest`]); this module is where
//! that assumption is made concrete.

pub mod hash;
