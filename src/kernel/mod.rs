//! Kernel Core
//!
//! The [`Kernel`] context object owns every piece of kernel state: the heap,
//! the process table, the interrupt and system call tables, the critical
//! section counter and the system clock. The subsystems add their operations
//! to it from their own modules.
//!
//! # Lifecycle
//! 1. [`Kernel::new`] builds an inert kernel (usable in a `static`)
//! 2. [`Kernel::init`] brings the hardware and every subsystem up in order
//! 3. [`Kernel::start`] hands the processor to the scheduler
//! 4. [`Kernel::shutdown`] masks interrupts and halts

mod boot;
mod critical;
mod info;
#[cfg(test)]
mod tests;

pub use critical::{CriticalGuard, CriticalSection};
pub use info::{BootStage, SystemInfo, SystemState};

use log::error;

use crate::arch::Arch;
use crate::config::{KernelConfig, HEAP_SIZE};
use crate::irq::InterruptTable;
use crate::mm::Heap;
use crate::sched::Scheduler;
use crate::syscall::SyscallTable;

/// Progress of [`Kernel::init`].
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct BootRecord {
    pub(crate) stage: BootStage,
    pub(crate) start_tick: u64,
    pub(crate) error: bool,
    pub(crate) boot_time_ms: u32,
}

impl BootRecord {
    const fn new() -> Self {
        Self {
            stage: BootStage::Start,
            start_tick: 0,
            error: false,
            boot_time_ms: 0,
        }
    }
}

pub struct Kernel<A: Arch> {
    pub(crate) arch: A,
    pub(crate) config: KernelConfig,
    pub(crate) heap: Heap<HEAP_SIZE>,
    pub(crate) scheduler: Scheduler,
    pub(crate) interrupts: InterruptTable<Kernel<A>>,
    pub(crate) syscalls: SyscallTable<Kernel<A>>,
    pub(crate) critical: CriticalSection,
    pub(crate) state: SystemState,
    pub(crate) boot: BootRecord,
    pub(crate) ticks: u64,
}

impl<A: Arch> Kernel<A> {
    pub const fn new(arch: A, config: KernelConfig) -> Self {
        Self {
            arch,
            config,
            heap: Heap::new(),
            scheduler: Scheduler::new(),
            interrupts: InterruptTable::new(),
            syscalls: SyscallTable::new(),
            critical: CriticalSection::new(),
            state: SystemState::Boot,
            boot: BootRecord::new(),
            ticks: 0,
        }
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn arch(&self) -> &A {
        &self.arch
    }

    /// Timer ticks since boot.
    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    pub fn uptime_ms(&self) -> u32 {
        self.ticks_to_ms(self.ticks)
    }

    fn ticks_to_ms(&self, ticks: u64) -> u32 {
        ticks.wrapping_mul(u64::from(self.config.ms_per_tick())) as u32
    }

    /// System timer handler body. The running process is checked for a
    /// stack overflow before it is charged for the tick.
    pub fn tick_handler(&mut self) {
        self.ticks = self.ticks.wrapping_add(1);
        let running = self.scheduler.current().map(|p| p.id());
        if let Some(id) = running.filter(|_| self.scheduler.is_running()) {
            let sp = self.arch.save_context();
            if let Err(overflow) = self.scheduler.check_stack(&self.heap, id, sp) {
                error!("kernel: {}", overflow);
                self.state = SystemState::Error;
                self.arch.halt("stack overflow");
            }
        }
        self.scheduler_tick();
    }

    /// Mask interrupts. Nests; only the outermost exit unmasks.
    pub fn enter_critical(&mut self) {
        self.critical.enter(&self.arch);
    }

    pub fn exit_critical(&mut self) {
        self.critical.exit(&self.arch);
    }

    pub fn critical_nesting(&self) -> u32 {
        self.critical.nesting()
    }

    /// Run `f` inside a critical section.
    pub fn critical<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        struct Exit<'a, A: Arch>(&'a mut Kernel<A>);

        impl<A: Arch> Drop for Exit<'_, A> {
            fn drop(&mut self) {
                self.0.exit_critical();
            }
        }

        self.enter_critical();
        let mut guard = Exit(self);
        f(&mut *guard.0)
    }

    pub fn system_info(&self) -> SystemInfo {
        let idle = self.scheduler_stats().idle_time_percent.min(100);
        SystemInfo {
            boot_time_ms: self.boot.boot_time_ms,
            uptime_ms: self.uptime_ms(),
            state: self.state,
            boot_stage: self.boot.stage,
            free_memory: self.heap.free_bytes() as u32,
            total_memory: self.heap.total() as u32,
            cpu_usage_percent: (100 - idle) as u8,
        }
    }
}
