use std::fmt;

#[cfg(feature = "serialize_serde")]
use serde::{Deserialize, Serialize};

use crate::vr::error::*;

/// A 128-bit digest over an arbitrary byte sequence.
///
/// Trailers are authenticated end-to-end by this digest: the checksum of
/// the fully assembled buffer must match the checksum latched from the
/// first chunk, or the trailer is rejected (see
/// [`crate::vr::sync::trailer::Trailer`]). Truncated to 128 bits, rather
/// than using the full 256-bit `blake3` output, to match the checksum
/// word width the on-disk checkpoint trailers are aligned to upstream.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct Digest([u8; Digest::LENGTH]);

impl Digest {
    pub const LENGTH: usize = 16;

    /// Computes the digest of `bytes`.
    pub fn sum(bytes: &[u8]) -> Self {
        let full = blake3::hash(bytes);
        let mut inner = [0; Self::LENGTH];
        inner.copy_from_slice(&full.as_bytes()[..Self::LENGTH]);
        Self(inner)
    }

    /// Reconstructs a `Digest` from its raw byte representation.
    pub fn from_bytes(raw_bytes: &[u8]) -> Result<Self> {
        if raw_bytes.len() < Self::LENGTH {
            return Err("Digest has an invalid length").wrapped(ErrorKind::Codec);
        }
        let mut inner = [0; Self::LENGTH];
        inner.copy_from_slice(&raw_bytes[..Self::LENGTH]);
        Ok(Self(inner))
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest(")?;
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}
