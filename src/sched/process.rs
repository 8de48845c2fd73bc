//! Process Control Blocks
//!
//! A [`Pcb`] describes one schedulable thread of execution: identity,
//! state, priority, the stack it owns and where its context was saved.

use core::fmt;

use bitflags::bitflags;

use crate::arch::Word;
use crate::error::KernelError;
use crate::mm::HeapPtr;
use crate::name::Name;

/// Process names keep at most this many bytes.
pub const NAME_LEN: usize = 31;

/// Process identifier. Identifiers are never reused while the kernel runs.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ProcessId(u32);

impl ProcessId {
    /// The idle process.
    pub const IDLE: Self = Self(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid{}", self.0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessState {
    Ready,
    Running,
    Blocked,
    Suspended,
    Terminated,
}

impl ProcessState {
    /// May be picked by the scheduler.
    pub fn is_runnable(self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }
}

/// Scheduling priority; higher runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    Idle = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl TryFrom<Word> for Priority {
    type Error = KernelError;

    fn try_from(raw: Word) -> Result<Self, KernelError> {
        Ok(match raw {
            0 => Self::Idle,
            1 => Self::Low,
            2 => Self::Normal,
            3 => Self::High,
            4 => Self::Critical,
            _ => return Err(KernelError::InvalidParam),
        })
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ProcessFlags: u32 {
        /// Kernel-owned service.
        const SYSTEM = 1 << 0;
        /// Application process.
        const USER = 1 << 1;
        /// Latency-sensitive process.
        const REALTIME = 1 << 2;
        /// Created in the Suspended state.
        const SUSPENDED = 1 << 3;
    }
}

/// Who hands the stack memory back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOwner {
    /// Allocated from the kernel heap; freed on termination.
    Heap(HeapPtr),
    /// Reserved inside the scheduler (idle).
    Static,
}

/// Stack memory owned by one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    pub base: Word,
    pub size: usize,
    pub owner: StackOwner,
}

impl StackRegion {
    pub fn contains(&self, addr: Word) -> bool {
        addr >= self.base && addr - self.base < self.size
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Pcb {
    pub(crate) id: ProcessId,
    pub(crate) name: Name<NAME_LEN>,
    pub(crate) state: ProcessState,
    pub(crate) priority: Priority,
    pub(crate) flags: ProcessFlags,
    pub(crate) stack: StackRegion,
    /// Process stack pointer at the last context save.
    pub(crate) saved_sp: Word,
    pub(crate) entry: Word,
    pub(crate) time_slice: u32,
    pub(crate) time_remaining: u32,
    pub(crate) total_runtime: u32,
    /// Scheduler tick at which the process last started running.
    pub(crate) last_scheduled: u64,
    /// Scheduling list links (slab indices).
    pub(crate) next: Option<usize>,
    pub(crate) prev: Option<usize>,
}

impl Pcb {
    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn flags(&self) -> ProcessFlags {
        self.flags
    }

    pub fn stack(&self) -> &StackRegion {
        &self.stack
    }

    pub fn saved_sp(&self) -> Word {
        self.saved_sp
    }

    pub fn entry(&self) -> Word {
        self.entry
    }

    pub fn time_slice(&self) -> u32 {
        self.time_slice
    }

    pub fn time_remaining(&self) -> u32 {
        self.time_remaining
    }

    /// Ticks spent running.
    pub fn total_runtime(&self) -> u32 {
        self.total_runtime
    }

    pub fn last_scheduled(&self) -> u64 {
        self.last_scheduled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::Low > Priority::Idle);
        assert_eq!(Priority::try_from(3), Ok(Priority::High));
        assert_eq!(Priority::try_from(5), Err(KernelError::InvalidParam));
    }

    #[test]
    fn test_stack_contains() {
        let stack = StackRegion {
            base: 0x1000,
            size: 0x200,
            owner: StackOwner::Static,
        };
        assert!(stack.contains(0x1000));
        assert!(stack.contains(0x11FF));
        assert!(!stack.contains(0x1200));
        assert!(!stack.contains(0x0FFF));
    }

    #[test]
    fn test_runnable_states() {
        assert!(ProcessState::Ready.is_runnable());
        assert!(ProcessState::Running.is_runnable());
        assert!(!ProcessState::Blocked.is_runnable());
        assert!(!ProcessState::Suspended.is_runnable());
    }
}
