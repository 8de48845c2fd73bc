//! First-Fit Heap
//!
//! A fixed arena carved into a doubly linked list of blocks in address
//! order (see [`super::block`] for the header format).
//!
//! # Design
//! - Allocation walks the list from the lowest address and takes the first
//!   free block that is large enough, splitting off the tail when what is
//!   left could hold a header plus one aligned unit.
//! - Free merges the block with a free successor, then with a free
//!   predecessor, so no two free blocks are ever adjacent.
//! - Callers hold [`HeapPtr`] handles (payload offsets), never raw pointers.
//!   Machine addresses only appear at the system call boundary.
//!
//! # Accounting
//! `used` counts every header plus every live payload; `free` counts free
//! payloads. Their sum is always the arena size.
//!
//! # Security Properties
//! - Headers are tagged; frees of anything that is not a live block are
//!   rejected and leave the heap untouched.
//! - Headers swallowed by coalescing are wiped so stale pointers into them
//!   cannot pass the tag check.

use core::fmt;

use bitflags::bitflags;
use log::{debug, warn};

use super::block::{link, BlockInfo, Header, FREE_TAG, HEADER_SIZE, LIVE_TAG, NIL};
use crate::arch::Word;
use crate::error::{KernelError, KernelResult};

/// Payload alignment and size granularity.
pub const ALIGNMENT: usize = 8;

bitflags! {
    /// Allocation request modifiers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AllocFlags: u32 {
        /// Zero the payload before returning it.
        const ZERO = 1 << 0;
        /// Caller requires alignment (always satisfied at 8 bytes).
        const ALIGN = 1 << 1;
        /// Memory will be used for DMA.
        const DMA = 1 << 2;
    }
}

/// Round `size` up to [`ALIGNMENT`].
pub const fn align_up(size: usize) -> Option<usize> {
    match size.checked_add(ALIGNMENT - 1) {
        Some(s) => Some(s & !(ALIGNMENT - 1)),
        None => None,
    }
}

/// Handle to an allocation: the payload's offset inside the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct HeapPtr(u32);

impl HeapPtr {
    pub const fn offset(self) -> usize {
        self.0 as usize
    }
}

/// Why a free (or payload lookup) was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// The heap has not been initialized.
    NotInitialized,
    /// The pointer is not inside the arena or not on a payload boundary.
    OutOfRange,
    /// No live block header precedes the pointer.
    NotAllocated,
    /// The block is already free.
    DoubleFree,
    /// The block is the stack of a live process.
    InUse,
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "heap not initialized"),
            Self::OutOfRange => write!(f, "pointer outside heap"),
            Self::NotAllocated => write!(f, "pointer is not an allocation"),
            Self::DoubleFree => write!(f, "block already free"),
            Self::InUse => write!(f, "block is a process stack"),
        }
    }
}

impl From<HeapError> for KernelError {
    fn from(e: HeapError) -> Self {
        match e {
            HeapError::NotInitialized => KernelError::NotInitialized,
            HeapError::InUse => KernelError::Busy,
            _ => KernelError::InvalidParam,
        }
    }
}

/// What is wrong with a corrupt block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionKind {
    /// Header does not fit inside the arena.
    OutOfBounds,
    /// Tag disagrees with the free flag.
    BadTag,
    /// Size is not a multiple of the alignment.
    Misaligned,
    /// Back link does not name the preceding block.
    BrokenLink,
    /// Forward link does not name the block that physically follows.
    NotContiguous,
    /// Two free blocks are adjacent.
    Uncoalesced,
}

/// First corrupt block found by [`Heap::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Corruption {
    /// Arena offset of the offending header.
    pub offset: usize,
    pub kind: CorruptionKind,
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "heap corruption at offset {:#x}: {:?}", self.offset, self.kind)
    }
}

/// Snapshot of heap usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryStats {
    pub total_memory: usize,
    pub free_memory: usize,
    pub used_memory: usize,
    pub largest_free_block: usize,
    /// Successful allocations since init.
    pub num_allocations: u32,
    pub num_free_blocks: u32,
    /// Share of free memory outside the largest free block.
    pub fragmentation_percent: u32,
}

/// Arena storage, aligned so payload offsets are also aligned addresses.
#[repr(C, align(8))]
struct Arena<const N: usize>([u8; N]);

/// The kernel heap over an `N`-byte arena.
pub struct Heap<const N: usize> {
    arena: Arena<N>,
    /// Bytes under management (`<= N`).
    len: usize,
    used: usize,
    free: usize,
    allocations: u32,
    initialized: bool,
}

impl<const N: usize> Heap<N> {
    pub const fn new() -> Self {
        Self {
            arena: Arena([0; N]),
            len: 0,
            used: 0,
            free: 0,
            allocations: 0,
            initialized: false,
        }
    }

    /// Manage the first `size` bytes of the arena as one free block.
    ///
    /// Re-initializing discards every allocation.
    pub fn init(&mut self, size: usize) -> KernelResult<()> {
        let len = size & !(ALIGNMENT - 1);
        if len < HEADER_SIZE + ALIGNMENT || len > N || len > NIL as usize {
            return Err(KernelError::InvalidParam);
        }
        let payload = len - HEADER_SIZE;
        Header::free_block(payload as u32, NIL, NIL).write(&mut self.arena.0, 0);
        self.len = len;
        self.used = HEADER_SIZE;
        self.free = payload;
        self.allocations = 0;
        self.initialized = true;
        debug!("heap: {} bytes, {} usable", len, payload);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Managed arena size.
    pub fn total(&self) -> usize {
        self.len
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn free_bytes(&self) -> usize {
        self.free
    }

    /// Upper bound on the number of blocks, used to stop runaway walks.
    fn max_blocks(&self) -> usize {
        self.len / HEADER_SIZE + 1
    }

    fn header(&self, at: usize) -> Option<Header> {
        if at.checked_add(HEADER_SIZE)? > self.len {
            return None;
        }
        Header::read(&self.arena.0, at)
    }

    fn put(&mut self, at: usize, header: &Header) {
        header.write(&mut self.arena.0, at);
    }

    fn set_prev(&mut self, at: Option<usize>, prev: u32) {
        if let Some(at) = at {
            if let Some(mut h) = self.header(at) {
                h.prev = prev;
                self.put(at, &h);
            }
        }
    }

    fn find_fit(&self, size: usize) -> Option<(usize, Header)> {
        let mut cursor = Some(0);
        for _ in 0..self.max_blocks() {
            let at = cursor?;
            let h = self.header(at)?;
            if h.free && h.size as usize >= size {
                return Some((at, h));
            }
            cursor = link(h.next);
        }
        None
    }

    /// Allocate `size` bytes.
    ///
    /// # Returns
    /// `None` for a zero size, before init, or when no free block fits.
    pub fn alloc(&mut self, size: usize, flags: AllocFlags) -> Option<HeapPtr> {
        if !self.initialized || size == 0 {
            return None;
        }
        let size = align_up(size)?;
        let Some((at, mut h)) = self.find_fit(size) else {
            debug!("heap: no block for {} bytes", size);
            return None;
        };

        let block = h.size as usize;
        if block > size + HEADER_SIZE + ALIGNMENT {
            let split_at = at + HEADER_SIZE + size;
            let rest = Header::free_block((block - size - HEADER_SIZE) as u32, h.next, at as u32);
            self.put(split_at, &rest);
            self.set_prev(link(h.next), split_at as u32);
            h.next = split_at as u32;
            h.size = size as u32;
            self.used += HEADER_SIZE;
            self.free -= HEADER_SIZE;
        }

        h.free = false;
        h.tag = LIVE_TAG;
        h.flags = flags.bits();
        self.put(at, &h);
        self.used += h.size as usize;
        self.free -= h.size as usize;
        self.allocations = self.allocations.wrapping_add(1);

        let ptr = HeapPtr((at + HEADER_SIZE) as u32);
        if flags.contains(AllocFlags::ZERO) {
            if let Some(bytes) = self.payload_mut(ptr) {
                bytes.fill(0);
            }
        }
        debug!("heap: alloc {} bytes at {:#x}", h.size, ptr.offset());
        Some(ptr)
    }

    /// Find the live header for `ptr`.
    fn locate(&self, ptr: HeapPtr) -> Result<(usize, Header), HeapError> {
        if !self.initialized {
            return Err(HeapError::NotInitialized);
        }
        let offset = ptr.offset();
        if offset % ALIGNMENT != 0 || offset < HEADER_SIZE || offset > self.len {
            return Err(HeapError::OutOfRange);
        }
        let at = offset - HEADER_SIZE;
        let h = self.header(at).ok_or(HeapError::OutOfRange)?;
        if h.is_live() {
            Ok((at, h))
        } else if h.free && h.tag == FREE_TAG {
            Err(HeapError::DoubleFree)
        } else {
            Err(HeapError::NotAllocated)
        }
    }

    /// Release an allocation and merge it with free neighbours.
    pub fn free(&mut self, ptr: HeapPtr) -> Result<(), HeapError> {
        let (mut at, mut h) = self.locate(ptr).map_err(|e| {
            warn!("heap: rejected free of {:#x}: {}", ptr.offset(), e);
            e
        })?;

        h.free = true;
        h.tag = FREE_TAG;
        h.flags = 0;
        self.used -= h.size as usize;
        self.free += h.size as usize;

        if let Some(next_at) = link(h.next) {
            if let Some(next) = self.header(next_at).filter(|n| n.free) {
                h.size += HEADER_SIZE as u32 + next.size;
                h.next = next.next;
                self.set_prev(link(next.next), at as u32);
                Header::scrub(&mut self.arena.0, next_at);
                self.used -= HEADER_SIZE;
                self.free += HEADER_SIZE;
            }
        }

        if let Some(prev_at) = link(h.prev) {
            if let Some(mut prev) = self.header(prev_at).filter(|p| p.free) {
                prev.size += HEADER_SIZE as u32 + h.size;
                prev.next = h.next;
                self.set_prev(link(h.next), prev_at as u32);
                Header::scrub(&mut self.arena.0, at);
                self.used -= HEADER_SIZE;
                self.free += HEADER_SIZE;
                at = prev_at;
                h = prev;
            }
        }

        self.put(at, &h);
        debug!("heap: freed {:#x}", ptr.offset());
        Ok(())
    }

    /// Resize an allocation.
    ///
    /// A block that already fits is returned unchanged. Growing always moves
    /// the data to a new block, even when the following block is free.
    pub fn realloc(&mut self, ptr: Option<HeapPtr>, new_size: usize) -> Option<HeapPtr> {
        let Some(ptr) = ptr else {
            return self.alloc(new_size, AllocFlags::empty());
        };
        if new_size == 0 {
            let _ = self.free(ptr);
            return None;
        }
        let (_, h) = self.locate(ptr).ok()?;
        let old_size = h.size as usize;
        if new_size <= old_size {
            return Some(ptr);
        }
        let moved = self.alloc(new_size, AllocFlags::from_bits_truncate(h.flags))?;
        let src = ptr.offset();
        self.arena.0.copy_within(src..src + old_size, moved.offset());
        let _ = self.free(ptr);
        Some(moved)
    }

    /// Payload bytes of a live allocation.
    pub fn payload(&self, ptr: HeapPtr) -> Option<&[u8]> {
        let (_, h) = self.locate(ptr).ok()?;
        let start = ptr.offset();
        self.arena.0.get(start..start + h.size as usize)
    }

    pub fn payload_mut(&mut self, ptr: HeapPtr) -> Option<&mut [u8]> {
        let (_, h) = self.locate(ptr).ok()?;
        let start = ptr.offset();
        self.arena.0.get_mut(start..start + h.size as usize)
    }

    fn base(&self) -> Word {
        self.arena.0.as_ptr() as Word
    }

    /// Machine address of an allocation's payload.
    pub fn address_of(&self, ptr: HeapPtr) -> Word {
        self.base() + ptr.offset()
    }

    /// Handle for a machine address inside the arena. The block is not
    /// checked; [`Heap::free`] and the payload accessors do that.
    pub fn ptr_from_address(&self, addr: Word) -> Option<HeapPtr> {
        let offset = addr.checked_sub(self.base())?;
        if !self.initialized || offset >= self.len {
            return None;
        }
        Some(HeapPtr(offset as u32))
    }

    /// `len` bytes at machine address `addr`, provided they lie entirely
    /// within one live payload.
    pub fn live_bytes_mut(&mut self, addr: Word, len: usize) -> Option<&mut [u8]> {
        let start = addr.checked_sub(self.base())?;
        let end = start.checked_add(len)?;
        let block = self.blocks().find(|b| {
            let payload = b.offset + HEADER_SIZE;
            !b.free && start >= payload && start < payload + b.size
        })?;
        if end > block.offset + HEADER_SIZE + block.size {
            return None;
        }
        self.arena.0.get_mut(start..end)
    }

    /// Walk the block list in address order.
    pub fn blocks(&self) -> Blocks<'_, N> {
        Blocks {
            heap: self,
            cursor: self.initialized.then_some(0),
            remaining: self.max_blocks(),
        }
    }

    pub fn stats(&self) -> MemoryStats {
        let mut num_free_blocks = 0;
        let mut largest_free_block = 0;
        for block in self.blocks().filter(|b| b.free) {
            num_free_blocks += 1;
            largest_free_block = largest_free_block.max(block.size);
        }
        let fragmentation_percent = if self.free > 0 {
            (self.free.saturating_sub(largest_free_block) * 100 / self.free) as u32
        } else {
            0
        };
        MemoryStats {
            total_memory: self.len,
            free_memory: self.free,
            used_memory: self.used,
            largest_free_block,
            num_allocations: self.allocations,
            num_free_blocks,
            fragmentation_percent,
        }
    }

    /// Check every header and link.
    pub fn validate(&self) -> Result<(), Corruption> {
        if !self.initialized {
            return Ok(());
        }
        let fail = |offset, kind| Err(Corruption { offset, kind });
        let mut at = 0;
        let mut prev = NIL;
        let mut prev_free = false;
        for _ in 0..self.max_blocks() {
            let Some(h) = self.header(at) else {
                return fail(at, CorruptionKind::OutOfBounds);
            };
            if !h.is_consistent() {
                return fail(at, CorruptionKind::BadTag);
            }
            if h.size as usize % ALIGNMENT != 0 {
                return fail(at, CorruptionKind::Misaligned);
            }
            if h.prev != prev {
                return fail(at, CorruptionKind::BrokenLink);
            }
            if h.free && prev_free {
                return fail(at, CorruptionKind::Uncoalesced);
            }
            let Some(end) = (at + HEADER_SIZE).checked_add(h.size as usize) else {
                return fail(at, CorruptionKind::OutOfBounds);
            };
            match link(h.next) {
                None if end == self.len => return Ok(()),
                Some(next) if next == end => {}
                _ => return fail(at, CorruptionKind::NotContiguous),
            }
            prev = at as u32;
            prev_free = h.free;
            at = end;
        }
        fail(at, CorruptionKind::NotContiguous)
    }
}

impl<const N: usize> Default for Heap<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator returned by [`Heap::blocks`]. Stops at the first unreadable
/// header.
pub struct Blocks<'a, const N: usize> {
    heap: &'a Heap<N>,
    cursor: Option<usize>,
    remaining: usize,
}

impl<const N: usize> Iterator for Blocks<'_, N> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        let at = self.cursor.take()?;
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let h = self.heap.header(at)?;
        self.cursor = link(h.next);
        Some(BlockInfo {
            offset: at,
            size: h.size as usize,
            free: h.free,
        })
    }
}
