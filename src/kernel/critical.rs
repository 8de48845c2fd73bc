//! Critical sections.
//!
//! Interrupts are masked on the first `enter` and the mask state from
//! before that first `enter` is put back when nesting returns to zero.
//! A section entered with interrupts already masked (inside an exception
//! handler, or during boot) therefore leaves them masked on exit.

use crate::arch::Arch;

#[derive(Debug, Default)]
pub struct CriticalSection {
    nesting: u32,
    unmask_on_exit: bool,
}

impl CriticalSection {
    pub const fn new() -> Self {
        Self {
            nesting: 0,
            unmask_on_exit: false,
        }
    }

    pub fn enter<A: Arch>(&mut self, arch: &A) {
        let was_masked = arch.interrupts_masked();
        arch.mask_interrupts();
        if self.nesting == 0 {
            self.unmask_on_exit = !was_masked;
        }
        self.nesting += 1;
    }

    /// Leave one level. Unbalanced exits are ignored.
    pub fn exit<A: Arch>(&mut self, arch: &A) {
        if self.nesting == 0 {
            return;
        }
        self.nesting -= 1;
        if self.nesting == 0 && self.unmask_on_exit {
            arch.unmask_interrupts();
        }
    }

    pub fn nesting(&self) -> u32 {
        self.nesting
    }

    /// Enter now and exit when the guard drops.
    pub fn guard<'a, A: Arch>(&'a mut self, arch: &'a A) -> CriticalGuard<'a, A> {
        self.enter(arch);
        CriticalGuard { section: self, arch }
    }
}

pub struct CriticalGuard<'a, A: Arch> {
    section: &'a mut CriticalSection,
    arch: &'a A,
}

impl<A: Arch> Drop for CriticalGuard<'_, A> {
    fn drop(&mut self) {
        self.section.exit(self.arch);
    }
}
