//! Memory Management
//!
//! The kernel heap: a first-fit block allocator over a fixed arena. It
//! backs process stacks and the `memory_alloc`/`memory_free` system calls.
//!
//! # Security Properties
//! - Block lists are only changed inside the kernel critical section
//! - Every free is checked against the block tags before anything changes
//! - Payload access is bounds-checked through [`HeapPtr`] handles

mod block;
mod guard;
mod heap;

pub use block::{BlockInfo, HEADER_SIZE};
pub use guard::{
    check_guard, fill_guard, GuardFault, STACK_GUARD_PATTERN, STACK_GUARD_SIZE, STACK_GUARD_WORDS,
};
pub use heap::{
    align_up, AllocFlags, Blocks, Corruption, CorruptionKind, Heap, HeapError, HeapPtr,
    MemoryStats, ALIGNMENT,
};

use log::{info, warn};

use crate::arch::Arch;
use crate::config::HEAP_SIZE;
use crate::error::KernelResult;
use crate::kernel::Kernel;

impl<A: Arch> Kernel<A> {
    /// Set up the heap. Calling it again once initialized does nothing.
    pub fn memory_init(&mut self) -> KernelResult<()> {
        if self.heap.is_initialized() {
            return Ok(());
        }
        self.heap.init(HEAP_SIZE)?;
        info!("memory: {} KiB heap", HEAP_SIZE / 1024);
        Ok(())
    }

    pub fn alloc(&mut self, size: usize, flags: AllocFlags) -> Option<HeapPtr> {
        let _cs = self.critical.guard(&self.arch);
        self.heap.alloc(size, flags)
    }

    /// Release an allocation. Process stacks are only released by
    /// terminating their process.
    pub fn free(&mut self, ptr: HeapPtr) -> Result<(), HeapError> {
        let _cs = self.critical.guard(&self.arch);
        if self.scheduler.owns_stack(ptr) {
            warn!("memory: refused free of stack block {:#x}", ptr.offset());
            return Err(HeapError::InUse);
        }
        self.heap.free(ptr)
    }

    /// Resize an allocation. A process stack is never resized.
    pub fn realloc(&mut self, ptr: Option<HeapPtr>, new_size: usize) -> Option<HeapPtr> {
        let _cs = self.critical.guard(&self.arch);
        if ptr.is_some_and(|p| self.scheduler.owns_stack(p)) {
            return None;
        }
        self.heap.realloc(ptr, new_size)
    }

    /// Heap usage, or `None` before [`Kernel::memory_init`].
    pub fn memory_stats(&self) -> Option<MemoryStats> {
        self.heap.is_initialized().then(|| self.heap.stats())
    }

    pub fn memory_validate(&self) -> Result<(), Corruption> {
        self.heap.validate()
    }

    pub fn heap(&self) -> &Heap<HEAP_SIZE> {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap<HEAP_SIZE> {
        &mut self.heap
    }
}
