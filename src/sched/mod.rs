//! Process Scheduling
//!
//! Preemptive fixed-priority scheduling with a per-process time slice.
//!
//! # Model
//! - Timer ticks charge the running process; an exhausted quantum triggers
//!   a selection pass
//! - A yield, or the running process blocking, suspending or terminating,
//!   triggers one immediately
//! - The scheduler lock defers every decision until it is released
//! - Inside an external interrupt handler a switch is only pended; PendSV
//!   performs it

mod process;
mod scheduler;

pub use process::{
    Pcb, Priority, ProcessFlags, ProcessId, ProcessState, StackOwner, StackRegion, NAME_LEN,
};
pub use scheduler::{Scheduler, SchedulerStats, StackOverflow, TieBreak};

use crate::arch::{Arch, Word};
use crate::error::KernelResult;
use crate::kernel::Kernel;

impl<A: Arch> Kernel<A> {
    pub fn scheduler_init(&mut self) -> KernelResult<()> {
        let config = self.config;
        self.scheduler.init(&self.arch, &config)
    }

    pub fn scheduler_start(&mut self) -> KernelResult<()> {
        self.scheduler.start(&self.arch)
    }

    pub fn scheduler_tick(&mut self) {
        self.scheduler.tick(&self.arch);
    }

    pub fn preempt(&mut self) {
        self.scheduler.preempt(&self.arch);
    }

    pub fn yield_now(&mut self) {
        self.scheduler.yield_now(&self.arch);
    }

    /// Ask for a reschedule from a context that must not switch itself
    /// (an interrupt handler). It runs when PendSV is taken.
    pub fn request_context_switch(&self) {
        self.arch.pend_context_switch();
    }

    pub fn process_create(
        &mut self,
        name: &str,
        entry: Word,
        stack_size: usize,
        priority: Priority,
        flags: ProcessFlags,
    ) -> KernelResult<ProcessId> {
        let _cs = self.critical.guard(&self.arch);
        self.scheduler
            .create(&mut self.heap, name, entry, stack_size, priority, flags)
    }

    pub fn process_terminate(&mut self, id: ProcessId) -> KernelResult<()> {
        let _cs = self.critical.guard(&self.arch);
        self.scheduler.terminate(&self.arch, &mut self.heap, id)
    }

    pub fn process_suspend(&mut self, id: ProcessId) -> KernelResult<()> {
        let _cs = self.critical.guard(&self.arch);
        self.scheduler.suspend(&self.arch, id)
    }

    pub fn process_resume(&mut self, id: ProcessId) -> KernelResult<()> {
        let _cs = self.critical.guard(&self.arch);
        self.scheduler.resume(id)
    }

    pub fn process_block(&mut self, id: ProcessId) -> KernelResult<()> {
        let _cs = self.critical.guard(&self.arch);
        self.scheduler.block(&self.arch, id)
    }

    pub fn process_unblock(&mut self, id: ProcessId) -> KernelResult<()> {
        let _cs = self.critical.guard(&self.arch);
        self.scheduler.unblock(id)
    }

    pub fn process_get_current(&self) -> Option<&Pcb> {
        self.scheduler.current()
    }

    pub fn process_get_by_id(&self, id: ProcessId) -> Option<&Pcb> {
        self.scheduler.get(id)
    }

    pub fn scheduler_lock(&mut self) {
        self.scheduler.lock();
    }

    pub fn scheduler_unlock(&mut self) {
        self.scheduler.unlock(&self.arch);
    }

    pub fn scheduler_is_locked(&self) -> bool {
        self.scheduler.is_locked()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Check the guard of every process stack.
    pub fn stack_check(&self) -> Result<(), StackOverflow> {
        self.scheduler.check_stacks(&self.arch, &self.heap)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Stack pointer to launch the running process from.
    pub fn running_context(&self) -> Option<Word> {
        self.scheduler.running_context()
    }
}
