//! System call table.

use crate::arch::Word;
use crate::error::{KernelError, KernelResult};

/// Arguments as passed in r0-r3.
pub type SyscallArgs = [Word; 4];

/// A system call handler; its return value goes back in r0.
pub type SyscallHandler<C> = fn(&mut C, SyscallArgs) -> Word;

/// Slots in the table.
pub const SYSCALL_COUNT: usize = 6;

/// Result word for an unknown or unbound call.
pub const INVALID_SYSCALL: Word = Word::MAX;

/// System call numbers (the `svc` immediate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SyscallNumber {
    ProcessCreate = 0,
    ProcessTerminate = 1,
    MemoryAlloc = 2,
    MemoryFree = 3,
    SchedulerYield = 4,
    GetSystemInfo = 5,
}

impl SyscallNumber {
    pub const fn number(self) -> usize {
        self as usize
    }
}

pub struct SyscallTable<C> {
    handlers: [Option<SyscallHandler<C>>; SYSCALL_COUNT],
}

impl<C> SyscallTable<C> {
    pub const fn new() -> Self {
        Self {
            handlers: [None; SYSCALL_COUNT],
        }
    }

    pub fn reset(&mut self) {
        self.handlers = [None; SYSCALL_COUNT];
    }

    pub fn register(&mut self, number: usize, handler: SyscallHandler<C>) -> KernelResult<()> {
        let slot = self
            .handlers
            .get_mut(number)
            .ok_or(KernelError::InvalidParam)?;
        *slot = Some(handler);
        Ok(())
    }

    pub fn lookup(&self, number: usize) -> Option<SyscallHandler<C>> {
        self.handlers.get(number).copied().flatten()
    }
}

impl<C> Default for SyscallTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(_: &mut (), args: SyscallArgs) -> Word {
        args[0] + args[1]
    }

    #[test]
    fn test_register_and_lookup() {
        let mut table = SyscallTable::<()>::new();
        assert!(table.lookup(0).is_none());
        table.register(SyscallNumber::MemoryFree.number(), echo).unwrap();
        let handler = table.lookup(3).unwrap();
        assert_eq!(handler(&mut (), [2, 3, 0, 0]), 5);
        assert!(table.lookup(2).is_none());
    }

    #[test]
    fn test_out_of_range() {
        let mut table = SyscallTable::<()>::new();
        assert_eq!(table.register(SYSCALL_COUNT, echo), Err(KernelError::InvalidParam));
        assert!(table.lookup(usize::MAX).is_none());
    }
}
