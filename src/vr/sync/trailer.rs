//! Chunked, authenticated assembly of one oversized checkpoint trailer.
//!
//! A [`Trailer`] reconstructs a single byte sequence (a checkpoint's
//! manifest, free-set, or client-session map) from a stream of fixed-
//! bounded chunks that may arrive out of order, duplicated, or stale. It
//! does not allocate: the destination buffer belongs to the caller and is
//! borrowed for the duration of each [`Trailer::write_chunk`] call.

use tracing::{debug, error, trace};

use crate::vr::crypto::hash::Digest;
use crate::vr::error::*;

/// The `(size, checksum)` pair latched from the first chunk delivered to
/// a [`Trailer`]. Immutable once set: every subsequent chunk must present
/// the same pair, or the trailer is correctness-fatal (see
/// [`Trailer::write_chunk`]).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Final {
    size: usize,
    checksum: Digest,
}

/// A single chunk of trailer bytes arriving off the wire.
pub struct Chunk<'c> {
    /// The trailer's total size, as the sender believes it to be.
    pub size: usize,
    /// The trailer's final checksum, as the sender believes it to be.
    pub checksum: Digest,
    /// The offset this chunk's bytes begin at.
    pub chunk_offset: usize,
    /// The chunk's payload. Must not exceed `CHUNK_SIZE_MAX`.
    pub bytes: &'c [u8],
}

/// The destination buffer a [`Trailer`] assembles its bytes into.
///
/// Borrowed, not owned: `Trailer` never allocates a buffer of its own.
pub struct Destination<'d> {
    pub buffer: &'d mut [u8],
}

/// A resumable assembler for one oversized, checksum-authenticated byte
/// sequence.
///
/// Tolerates duplicate and future chunks without corrupting the buffer or
/// completing early; the completion digest anchors authenticity
/// end-to-end, so the transport delivering chunks need not itself be
/// trusted byte-for-byte.
#[derive(Debug, Default)]
pub struct Trailer {
    next_offset: usize,
    done: bool,
    latched: Option<Final>,
}

impl Trailer {
    /// Creates a fresh, empty trailer assembler.
    pub fn new() -> Self {
        Self {
            next_offset: 0,
            done: false,
            latched: None,
        }
    }

    /// Returns the offset of the first byte not yet written.
    pub fn next_offset(&self) -> usize {
        self.next_offset
    }

    /// Returns whether this trailer has been fully assembled and
    /// authenticated.
    pub fn done(&self) -> bool {
        self.done
    }

    /// Writes one chunk into `destination`, returning the fully assembled
    /// prefix of the buffer once (and only once) the digest matches.
    ///
    /// # Panics
    ///
    /// Panics (via `debug_assert!`) if `chunk.bytes` exceeds
    /// `chunk_size_max`, if `destination.buffer` is shorter than
    /// `chunk.size`, or if a past chunk disagrees byte-for-byte with
    /// previously stored data — all programmer errors in the caller
    /// driving this trailer, not recoverable protocol conditions.
    pub fn write_chunk(
        &mut self,
        destination: &mut Destination<'_>,
        chunk: Chunk<'_>,
        chunk_size_max: usize,
    ) -> Result<Option<Vec<u8>>> {
        debug_assert!(chunk.bytes.len() <= chunk_size_max);
        debug_assert!(chunk.size <= destination.buffer.len());

        match &self.latched {
            None => {
                debug_assert_eq!(self.next_offset, 0);
                debug_assert!(!self.done);
                trace!(size = chunk.size, "latched trailer final");
                self.latched = Some(Final {
                    size: chunk.size,
                    checksum: chunk.checksum,
                });
            }
            Some(latched) => {
                if latched.size != chunk.size || latched.checksum != chunk.checksum {
                    error!(
                        latched_size = latched.size,
                        chunk_size = chunk.size,
                        "trailer final contradicted a previously latched final"
                    );
                    return Err("trailer final contradicted a previously latched final")
                        .simple(ErrorKind::ChunkAuthentication);
                }
            }
        }

        if self.done {
            return Ok(None);
        }

        let len = chunk.bytes.len();
        let size = chunk.size;

        if chunk.chunk_offset == self.next_offset {
            destination.buffer[self.next_offset..self.next_offset + len].copy_from_slice(chunk.bytes);
            self.next_offset += len;

            if self.next_offset == size {
                let digest = Digest::sum(&destination.buffer[..size]);
                if digest != chunk.checksum {
                    error!("trailer digest mismatch at completion");
                    return Err("trailer digest mismatch at completion")
                        .simple(ErrorKind::ChunkAuthentication);
                }
                self.done = true;
                debug!(size, "trailer assembly complete");
                return Ok(Some(destination.buffer[..size].to_vec()));
            }

            Ok(None)
        } else if chunk.chunk_offset > self.next_offset {
            trace!(
                chunk_offset = chunk.chunk_offset,
                next_offset = self.next_offset,
                "discarding future trailer chunk"
            );
            Ok(None)
        } else {
            let end = chunk.chunk_offset + len;
            debug_assert!(end <= self.next_offset, "duplicate chunk extends past next_offset");
            if &destination.buffer[chunk.chunk_offset..end] != chunk.bytes {
                error!(
                    chunk_offset = chunk.chunk_offset,
                    "duplicate trailer chunk disagreed with previously stored bytes"
                );
                return Err("duplicate trailer chunk disagreed with previously stored bytes")
                    .simple(ErrorKind::ChunkAuthentication);
            }
            trace!(
                chunk_offset = chunk.chunk_offset,
                "discarding duplicate trailer chunk"
            );
            Ok(None)
        }
    }
}

/// A [`Trailer`] paired with the destination buffer it assembles into.
///
/// The buffer is not pre-sized: it is allocated to `size` on the first
/// chunk delivered, the same moment the `Trailer` itself latches `final`.
/// This is what the `request_trailers` stage actually stores — three of
/// these, one per trailer — since the bare `Trailer` in isolation doesn't
/// own anywhere to write.
#[derive(Debug, Default)]
pub struct TrailerSlot {
    trailer: Trailer,
    buffer: Vec<u8>,
}

impl TrailerSlot {
    /// Creates a fresh, empty trailer slot with no backing buffer yet.
    pub fn new() -> Self {
        Self {
            trailer: Trailer::new(),
            buffer: Vec::new(),
        }
    }

    /// Returns whether this trailer has been fully assembled and
    /// authenticated.
    pub fn done(&self) -> bool {
        self.trailer.done()
    }

    /// Returns the offset of the first byte not yet written.
    pub fn next_offset(&self) -> usize {
        self.trailer.next_offset()
    }

    /// Writes one chunk, growing the backing buffer to `size` on first
    /// call.
    pub fn write_chunk(
        &mut self,
        size: usize,
        checksum: Digest,
        chunk_offset: usize,
        bytes: &[u8],
        chunk_size_max: usize,
    ) -> Result<Option<Vec<u8>>> {
        if self.buffer.len() < size {
            self.buffer.resize(size, 0);
        }
        let mut destination = Destination {
            buffer: &mut self.buffer,
        };
        let chunk = Chunk {
            size,
            checksum,
            chunk_offset,
            bytes,
        };
        self.trailer.write_chunk(&mut destination, chunk, chunk_size_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checksum_of(bytes: &[u8]) -> Digest {
        Digest::sum(bytes)
    }

    #[test]
    fn test_in_order_assembly_byte_at_a_time() {
        let bytes: Vec<u8> = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let checksum = checksum_of(&bytes);
        let mut buf = vec![0u8; bytes.len()];
        let mut trailer = Trailer::new();

        for (offset, byte) in bytes.iter().enumerate() {
            let chunk = Chunk {
                size: bytes.len(),
                checksum,
                chunk_offset: offset,
                bytes: std::slice::from_ref(byte),
            };
            let mut dest = Destination { buffer: &mut buf };
            let result = trailer.write_chunk(&mut dest, chunk, 1).unwrap();
            if offset + 1 == bytes.len() {
                assert_eq!(result, Some(bytes.clone()));
            } else {
                assert_eq!(result, None);
            }
        }
        assert!(trailer.done());
    }

    #[test]
    fn test_all_at_once() {
        let bytes: Vec<u8> = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let checksum = checksum_of(&bytes);
        let mut buf = vec![0u8; bytes.len()];
        let mut trailer = Trailer::new();

        let chunk = Chunk {
            size: bytes.len(),
            checksum,
            chunk_offset: 0,
            bytes: &bytes,
        };
        let mut dest = Destination { buffer: &mut buf };
        let result = trailer.write_chunk(&mut dest, chunk, 8).unwrap();
        assert_eq!(result, Some(bytes));
    }

    #[test]
    fn test_duplicate_prefix_is_idempotent() {
        let bytes: Vec<u8> = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let checksum = checksum_of(&bytes);
        let mut buf = vec![0u8; bytes.len()];
        let mut trailer = Trailer::new();

        let first = Chunk {
            size: bytes.len(),
            checksum,
            chunk_offset: 0,
            bytes: &bytes[0..2],
        };
        let mut dest = Destination { buffer: &mut buf };
        assert_eq!(trailer.write_chunk(&mut dest, first, 8).unwrap(), None);
        assert_eq!(trailer.next_offset(), 2);

        let duplicate = Chunk {
            size: bytes.len(),
            checksum,
            chunk_offset: 0,
            bytes: &bytes[0..2],
        };
        let mut dest = Destination { buffer: &mut buf };
        assert_eq!(trailer.write_chunk(&mut dest, duplicate, 8).unwrap(), None);
        assert_eq!(trailer.next_offset(), 2);

        let rest = Chunk {
            size: bytes.len(),
            checksum,
            chunk_offset: 2,
            bytes: &bytes[2..8],
        };
        let mut dest = Destination { buffer: &mut buf };
        let result = trailer.write_chunk(&mut dest, rest, 8).unwrap();
        assert_eq!(result, Some(bytes));
    }

    #[test]
    fn test_premature_future_chunk_is_discarded() {
        let bytes: Vec<u8> = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let checksum = checksum_of(&bytes);
        let mut buf = vec![0u8; bytes.len()];
        let mut trailer = Trailer::new();

        let future = Chunk {
            size: bytes.len(),
            checksum,
            chunk_offset: 6,
            bytes: &bytes[6..8],
        };
        let mut dest = Destination { buffer: &mut buf };
        assert_eq!(trailer.write_chunk(&mut dest, future, 8).unwrap(), None);
        assert_eq!(trailer.next_offset(), 0);

        for offset in 0..6 {
            let chunk = Chunk {
                size: bytes.len(),
                checksum,
                chunk_offset: offset,
                bytes: &bytes[offset..offset + 1],
            };
            let mut dest = Destination { buffer: &mut buf };
            assert_eq!(trailer.write_chunk(&mut dest, chunk, 8).unwrap(), None);
        }

        let tail = Chunk {
            size: bytes.len(),
            checksum,
            chunk_offset: 6,
            bytes: &bytes[6..8],
        };
        let mut dest = Destination { buffer: &mut buf };
        let result = trailer.write_chunk(&mut dest, tail, 8).unwrap();
        assert_eq!(result, Some(bytes));
    }

    #[test]
    fn test_digest_mismatch_is_authentication_failure() {
        let bytes: Vec<u8> = vec![1, 2, 3, 4];
        let wrong_checksum = checksum_of(b"not the right bytes");
        let mut buf = vec![0u8; bytes.len()];
        let mut trailer = Trailer::new();

        let chunk = Chunk {
            size: bytes.len(),
            checksum: wrong_checksum,
            chunk_offset: 0,
            bytes: &bytes,
        };
        let mut dest = Destination { buffer: &mut buf };
        let err = trailer.write_chunk(&mut dest, chunk, 8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChunkAuthentication);
    }

    #[test]
    fn test_done_trailer_ignores_further_chunks() {
        let bytes: Vec<u8> = vec![1, 2, 3, 4];
        let checksum = checksum_of(&bytes);
        let mut buf = vec![0u8; bytes.len()];
        let mut trailer = Trailer::new();

        let chunk = Chunk {
            size: bytes.len(),
            checksum,
            chunk_offset: 0,
            bytes: &bytes,
        };
        let mut dest = Destination { buffer: &mut buf };
        trailer.write_chunk(&mut dest, chunk, 8).unwrap();
        assert!(trailer.done());

        let replay = Chunk {
            size: bytes.len(),
            checksum,
            chunk_offset: 0,
            bytes: &bytes,
        };
        let mut dest = Destination { buffer: &mut buf };
        let result = trailer.write_chunk(&mut dest, replay, 8).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_contradicting_final_is_authentication_failure() {
        let bytes: Vec<u8> = vec![1, 2, 3, 4];
        let checksum = checksum_of(&bytes);
        let mut buf = vec![0u8; bytes.len()];
        let mut trailer = Trailer::new();

        let first = Chunk {
            size: bytes.len(),
            checksum,
            chunk_offset: 0,
            bytes: &bytes[0..2],
        };
        let mut dest = Destination { buffer: &mut buf };
        trailer.write_chunk(&mut dest, first, 8).unwrap();

        let contradicting = Chunk {
            size: bytes.len() + 1,
            checksum,
            chunk_offset: 2,
            bytes: &bytes[2..4],
        };
        let mut dest = Destination { buffer: &mut buf };
        let err = trailer.write_chunk(&mut dest, contradicting, 8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChunkAuthentication);
    }
}
