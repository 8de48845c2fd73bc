//! Interrupt Handling
//!
//! Registration, masking and dispatch of the STM32WB55 external interrupt
//! lines, plus routing of the system exceptions.
//!
//! # Dispatch path
//! Every external line enters [`Kernel::interrupt_dispatch`], which updates
//! the nesting and traffic counters and runs the installed handler (a no-op
//! by default). Any context switch a handler causes is deferred to PendSV.
//! SysTick and PendSV take the same accounting path; SVCall is handled by
//! the system call trap. Unrecoverable faults halt the core.
//!
//! # Security Properties
//! - Registration and mask changes happen inside the critical section
//! - Out-of-range line numbers cannot be expressed once an [`Irq`] exists
//! - Handlers are plain function pointers; there is no null handler

mod table;
mod vector;

pub use table::{
    default_handler, InterruptDescriptor, InterruptStats, InterruptTable, IrqHandler, IRQ_NAME_LEN,
};
pub use vector::{
    Exception, Irq, IrqPriority, IRQ_COUNT, PENDSV_PRIORITY, PRIORITY_SHIFT, SVCALL_PRIORITY,
    SYSTICK_PRIORITY,
};

use log::{debug, error, info, warn};

use crate::arch::Arch;
use crate::error::{KernelError, KernelResult};
use crate::kernel::{Kernel, SystemState};

/// Handler type for kernel interrupt handlers.
pub type KernelIrqHandler<A> = IrqHandler<Kernel<A>>;

impl<A: Arch> Kernel<A> {
    /// Reset every descriptor, install the vector table and program the
    /// system exception priorities.
    pub fn interrupt_init(&mut self) -> KernelResult<()> {
        let _cs = self.critical.guard(&self.arch);
        self.interrupts.reset();
        self.arch.set_vector_table(self.arch.vector_table_base());
        self.arch
            .set_system_priorities(SVCALL_PRIORITY, SYSTICK_PRIORITY, PENDSV_PRIORITY);
        info!("irq: {} lines ready", IRQ_COUNT);
        Ok(())
    }

    fn interrupts_ready(&self) -> KernelResult<()> {
        if self.interrupts.is_initialized() {
            Ok(())
        } else {
            Err(KernelError::NotInitialized)
        }
    }

    /// Install `handler` on `irq`. The line stays in its current masked or
    /// unmasked state; its hit counter restarts.
    pub fn interrupt_register(
        &mut self,
        irq: Irq,
        handler: KernelIrqHandler<A>,
        priority: IrqPriority,
        name: &str,
    ) -> KernelResult<()> {
        self.interrupts_ready()?;
        let _cs = self.critical.guard(&self.arch);
        self.interrupts.register(irq, handler, priority, name);
        self.arch.set_irq_priority(irq, priority.hardware_level());
        debug!("irq: {:?} -> '{}' at {:?}", irq, name, priority);
        Ok(())
    }

    /// Mask the line and restore its default descriptor.
    pub fn interrupt_unregister(&mut self, irq: Irq) -> KernelResult<()> {
        self.interrupts_ready()?;
        let _cs = self.critical.guard(&self.arch);
        self.arch.disable_irq(irq);
        self.interrupts.unregister(irq);
        Ok(())
    }

    pub fn interrupt_enable(&mut self, irq: Irq) -> KernelResult<()> {
        self.interrupts_ready()?;
        let _cs = self.critical.guard(&self.arch);
        self.interrupts.set_enabled(irq, true);
        self.arch.enable_irq(irq);
        Ok(())
    }

    pub fn interrupt_disable(&mut self, irq: Irq) -> KernelResult<()> {
        self.interrupts_ready()?;
        let _cs = self.critical.guard(&self.arch);
        self.arch.disable_irq(irq);
        self.interrupts.set_enabled(irq, false);
        Ok(())
    }

    pub fn interrupt_set_priority(&mut self, irq: Irq, priority: IrqPriority) -> KernelResult<()> {
        self.interrupts_ready()?;
        let _cs = self.critical.guard(&self.arch);
        self.interrupts.set_priority(irq, priority);
        self.arch.set_irq_priority(irq, priority.hardware_level());
        Ok(())
    }

    /// Common entry for every external interrupt line. A reschedule the
    /// handler causes is left pending for PendSV.
    pub fn interrupt_dispatch(&mut self, irq: Irq) {
        let handler = self.interrupts.enter(irq);
        let outer = self.scheduler.defers_switches();
        self.scheduler.set_defer_switches(true);
        handler(self);
        self.scheduler.set_defer_switches(outer);
        self.interrupts.exit();
    }

    /// Route a system exception.
    pub fn handle_exception(&mut self, exception: Exception) {
        match exception {
            Exception::SysTick => {
                self.interrupts.enter_exception();
                self.tick_handler();
                self.interrupts.exit();
            }
            Exception::PendSv => {
                self.interrupts.enter_exception();
                self.preempt();
                self.interrupts.exit();
            }
            Exception::SvCall => warn!("irq: SVCall routed without a trap frame"),
            fatal => self.fault(fatal),
        }
    }

    /// Record an unrecoverable fault and stop.
    pub fn fault(&mut self, exception: Exception) -> ! {
        error!("irq: unrecoverable {}", exception.name());
        self.state = SystemState::Error;
        self.arch.halt(exception.name())
    }

    pub fn interrupt_global_enable(&self) {
        self.arch.unmask_interrupts();
    }

    pub fn interrupt_global_disable(&self) {
        self.arch.mask_interrupts();
    }

    pub fn interrupt_is_in_isr(&self) -> bool {
        self.interrupts.in_isr()
    }

    pub fn interrupt_nesting_level(&self) -> u32 {
        self.interrupts.nesting_level()
    }

    pub fn interrupt_stats(&self) -> InterruptStats {
        self.interrupts.stats()
    }

    pub fn interrupt_descriptor(&self, irq: Irq) -> &InterruptDescriptor<Kernel<A>> {
        self.interrupts.descriptor(irq)
    }
}
