//! Stack Guards
//!
//! The lowest words of every process stack hold a fixed pattern. A stack
//! pointer that reaches into those words, or a pattern that no longer
//! reads back, means the stack overflowed.

use core::fmt;

use crate::arch::Word;

pub const STACK_GUARD_WORDS: usize = 16;
pub const STACK_GUARD_SIZE: usize = STACK_GUARD_WORDS * 4;
pub const STACK_GUARD_PATTERN: u32 = 0xDEAD_C0DE;

/// How an overflow was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardFault {
    /// The stack pointer is at or below the top of the guard.
    PointerInGuard,
    /// A guard word does not hold the pattern.
    PatternDamaged,
}

impl fmt::Display for GuardFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PointerInGuard => write!(f, "stack pointer inside guard"),
            Self::PatternDamaged => write!(f, "guard pattern damaged"),
        }
    }
}

/// Write the guard pattern over the low end of `stack`. Returns `false`
/// when the stack is too small to hold it.
pub fn fill_guard(stack: &mut [u8]) -> bool {
    let Some(guard) = stack.get_mut(..STACK_GUARD_SIZE) else {
        return false;
    };
    for word in guard.chunks_exact_mut(4) {
        word.copy_from_slice(&STACK_GUARD_PATTERN.to_le_bytes());
    }
    true
}

/// Check the guard of a stack that starts at machine address `base`
/// against the stack pointer `sp`.
pub fn check_guard(stack: &[u8], base: Word, sp: Word) -> Result<(), GuardFault> {
    if sp <= base.saturating_add(STACK_GUARD_SIZE) {
        return Err(GuardFault::PointerInGuard);
    }
    let guard = stack
        .get(..STACK_GUARD_SIZE)
        .ok_or(GuardFault::PatternDamaged)?;
    let pattern = STACK_GUARD_PATTERN.to_le_bytes();
    let intact = guard.chunks_exact(4).all(|w| w == pattern.as_slice());
    if intact {
        Ok(())
    } else {
        Err(GuardFault::PatternDamaged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Word = 0x2000_4000;

    #[test]
    fn test_fresh_guard_is_intact() {
        let mut stack = [0u8; 256];
        assert!(fill_guard(&mut stack));
        assert_eq!(&stack[..4], &[0xDE, 0xC0, 0xAD, 0xDE]);
        assert_eq!(stack[STACK_GUARD_SIZE], 0);
        assert_eq!(check_guard(&stack, BASE, BASE + 200), Ok(()));
    }

    #[test]
    fn test_pointer_reaching_guard() {
        let mut stack = [0u8; 256];
        fill_guard(&mut stack);
        let top = BASE + STACK_GUARD_SIZE;
        assert_eq!(check_guard(&stack, BASE, top + 8), Ok(()));
        assert_eq!(check_guard(&stack, BASE, top), Err(GuardFault::PointerInGuard));
        assert_eq!(check_guard(&stack, BASE, BASE), Err(GuardFault::PointerInGuard));
    }

    #[test]
    fn test_damaged_pattern() {
        let mut stack = [0u8; 256];
        fill_guard(&mut stack);
        stack[STACK_GUARD_SIZE - 1] = 0;
        assert_eq!(
            check_guard(&stack, BASE, BASE + 200),
            Err(GuardFault::PatternDamaged)
        );
    }

    #[test]
    fn test_stack_smaller_than_guard() {
        let mut stack = [0u8; 32];
        assert!(!fill_guard(&mut stack));
        assert_eq!(
            check_guard(&stack, BASE, BASE + 200),
            Err(GuardFault::PatternDamaged)
        );
    }
}
