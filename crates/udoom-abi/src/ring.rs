//! Job ring geometry and descriptor format.
//!
//! The ring is a single page of 16-byte slots. `BATCH_GET` is the next slot the device will
//! consume and `BATCH_PUT` the next slot the driver will fill; both are byte offsets that wrap at
//! [`RING_SIZE_BYTES`]. The ring is empty when they are equal, so one slot always stays unused.

use crate::paging::PAGE_SIZE;

pub const RING_SIZE_BYTES: u32 = PAGE_SIZE;
pub const RING_SLOT_SIZE: u32 = 16;
pub const RING_SLOT_COUNT: u32 = RING_SIZE_BYTES / RING_SLOT_SIZE;

/// `BATCH_WAIT` value that never matches a slot ("no waiter pending").
pub const WAIT_NONE: u32 = RING_SIZE_BYTES;

pub const JOB_DESC_SIZE_BYTES: usize = RING_SLOT_SIZE as usize;

#[inline]
pub const fn next_slot(offset: u32) -> u32 {
    (offset + RING_SLOT_SIZE) % RING_SIZE_BYTES
}

#[inline]
pub const fn prev_slot(offset: u32) -> u32 {
    (offset + RING_SIZE_BYTES - RING_SLOT_SIZE) % RING_SIZE_BYTES
}

#[inline]
pub const fn slot_index(offset: u32) -> usize {
    (offset / RING_SLOT_SIZE) as usize
}

/// How far `offset` lies ahead of `get`, in bytes, going around the ring.
#[inline]
pub const fn distance(get: u32, offset: u32) -> u32 {
    (offset + RING_SIZE_BYTES - get) % RING_SIZE_BYTES
}

/// Whether `offset` lies in the half-open window `(get, put]`.
///
/// This is the set of positions `BATCH_GET` has yet to reach given the jobs currently queued.
#[inline]
pub const fn is_ahead(offset: u32, get: u32, put: u32) -> bool {
    let d = distance(get, offset);
    d != 0 && d <= distance(get, put)
}

/// One ring slot as the device reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobDescriptor {
    /// Page directory address of the submitting address space (`pagedir >> 12`).
    pub pdp: u32,
    /// Device VA of the first command.
    pub va: u32,
    /// Command stream length in bytes.
    pub size: u32,
}

impl JobDescriptor {
    pub fn encode(&self) -> [u8; JOB_DESC_SIZE_BYTES] {
        let mut out = [0u8; JOB_DESC_SIZE_BYTES];
        out[0..4].copy_from_slice(&self.pdp.to_le_bytes());
        out[4..8].copy_from_slice(&self.va.to_le_bytes());
        out[8..12].copy_from_slice(&self.size.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8; JOB_DESC_SIZE_BYTES]) -> Self {
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self {
            pdp: word(0),
            va: word(4),
            size: word(8),
        }
    }
}
