//! Block Headers
//!
//! Every heap block starts with a 24-byte header stored in the arena
//! itself:
//!
//! ```text
//! ┌────────┬────────┬────────┬────────┬────────┬────────┬──────────────┐
//! │  size  │ flags  │  tag   │  free  │  next  │  prev  │   payload…   │
//! └────────┴────────┴────────┴────────┴────────┴────────┴──────────────┘
//!   u32      u32      u32      u32      u32      u32
//! ```
//!
//! `next`/`prev` are arena offsets of the neighbouring headers in address
//! order, [`NIL`] at either end. The tag says whether the block is live or
//! free; a header whose tag disagrees with its free word is corrupt.

use core::mem::size_of;

/// Bytes occupied by a header.
pub const HEADER_SIZE: usize = 6 * size_of::<u32>();

/// Tag of an allocated block.
pub const LIVE_TAG: u32 = 0xDEAD_BEEF;

/// Tag of a free block.
pub const FREE_TAG: u32 = 0xFEED_FACE;

/// "No neighbour" link value.
pub const NIL: u32 = u32::MAX;

/// Decoded header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub size: u32,
    pub flags: u32,
    pub tag: u32,
    pub free: bool,
    pub next: u32,
    pub prev: u32,
}

impl Header {
    pub fn free_block(size: u32, next: u32, prev: u32) -> Self {
        Self {
            size,
            flags: 0,
            tag: FREE_TAG,
            free: true,
            next,
            prev,
        }
    }

    /// Tag agrees with the free word.
    pub fn is_consistent(&self) -> bool {
        (self.free && self.tag == FREE_TAG) || (!self.free && self.tag == LIVE_TAG)
    }

    pub fn is_live(&self) -> bool {
        !self.free && self.tag == LIVE_TAG
    }

    pub fn read(bytes: &[u8], at: usize) -> Option<Self> {
        let raw = bytes.get(at..at.checked_add(HEADER_SIZE)?)?;
        let word = |i: usize| {
            let mut w = [0; 4];
            w.copy_from_slice(&raw[i * 4..i * 4 + 4]);
            u32::from_ne_bytes(w)
        };
        Some(Self {
            size: word(0),
            flags: word(1),
            tag: word(2),
            free: word(3) != 0,
            next: word(4),
            prev: word(5),
        })
    }

    pub fn write(&self, bytes: &mut [u8], at: usize) {
        let words = [
            self.size,
            self.flags,
            self.tag,
            self.free as u32,
            self.next,
            self.prev,
        ];
        if let Some(raw) = bytes.get_mut(at..at + HEADER_SIZE) {
            for (chunk, word) in raw.chunks_exact_mut(4).zip(words) {
                chunk.copy_from_slice(&word.to_ne_bytes());
            }
        }
    }

    /// Wipe a header that has been absorbed into a neighbour.
    pub fn scrub(bytes: &mut [u8], at: usize) {
        if let Some(raw) = bytes.get_mut(at..at + HEADER_SIZE) {
            raw.fill(0);
        }
    }
}

/// Convert a link word to an offset.
pub(crate) fn link(raw: u32) -> Option<usize> {
    (raw != NIL).then_some(raw as usize)
}

/// Public view of one block, as yielded by [`super::Heap::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Arena offset of the header.
    pub offset: usize,
    /// Payload bytes.
    pub size: usize,
    pub free: bool,
}
