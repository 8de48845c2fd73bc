//! Host Simulator
//!
//! A software model of the pieces of the Cortex-M4 the kernel programs.
//! It records every register write so tests can check what the kernel
//! asked the hardware to do, and it can be told to misbehave (a clock
//! that never locks) to exercise boot error paths.

use core::cell::Cell;

use super::{systick_reload, Arch, Word};
use crate::config::VECTOR_TABLE_BASE;
use crate::error::{KernelError, KernelResult};
use crate::irq::{Irq, IRQ_COUNT};

fn idle_loop() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

/// Simulated core state.
pub struct Simulator {
    primask: Cell<bool>,
    /// Unmasked-to-masked transitions.
    mask_count: Cell<u32>,
    psp: Cell<Word>,
    vtor: Cell<usize>,
    system_priorities: Cell<(u8, u8, u8)>,
    nvic_enabled: Cell<u64>,
    nvic_priority: Cell<[u8; IRQ_COUNT]>,
    pendsv: Cell<bool>,
    systick_reload: Cell<Option<u32>>,
    hardware_ready: Cell<bool>,
    clock_fails: Cell<bool>,
}

impl Simulator {
    /// Reset state: interrupts masked, as after a processor reset with the
    /// boot code still running.
    pub const fn new() -> Self {
        Self {
            primask: Cell::new(true),
            mask_count: Cell::new(0),
            psp: Cell::new(0),
            vtor: Cell::new(0),
            system_priorities: Cell::new((0, 0, 0)),
            nvic_enabled: Cell::new(0),
            nvic_priority: Cell::new([0; IRQ_COUNT]),
            pendsv: Cell::new(false),
            systick_reload: Cell::new(None),
            hardware_ready: Cell::new(false),
            clock_fails: Cell::new(false),
        }
    }

    /// Make the next `init_clocks` time out waiting for the PLL.
    pub fn fail_clock_lock(&self, fail: bool) {
        self.clock_fails.set(fail);
    }

    /// How often interrupts went from unmasked to masked.
    pub fn mask_count(&self) -> u32 {
        self.mask_count.get()
    }

    pub fn psp(&self) -> Word {
        self.psp.get()
    }

    pub fn vtor(&self) -> usize {
        self.vtor.get()
    }

    /// (SVCall, SysTick, PendSV) priority bytes.
    pub fn system_priorities(&self) -> (u8, u8, u8) {
        self.system_priorities.get()
    }

    pub fn irq_enabled(&self, irq: Irq) -> bool {
        self.nvic_enabled.get() & (1 << irq.number()) != 0
    }

    pub fn irq_priority(&self, irq: Irq) -> u8 {
        self.nvic_priority.get()[irq.index()]
    }

    /// Consume a pending PendSV request.
    pub fn take_pendsv(&self) -> bool {
        self.pendsv.replace(false)
    }

    pub fn systick_reload(&self) -> Option<u32> {
        self.systick_reload.get()
    }

    pub fn hardware_ready(&self) -> bool {
        self.hardware_ready.get()
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Arch for Simulator {
    fn mask_interrupts(&self) {
        if !self.primask.replace(true) {
            self.mask_count.set(self.mask_count.get() + 1);
        }
    }

    fn unmask_interrupts(&self) {
        self.primask.set(false);
    }

    fn interrupts_masked(&self) -> bool {
        self.primask.get()
    }

    fn set_vector_table(&self, base: usize) {
        self.vtor.set(base);
    }

    fn vector_table_base(&self) -> usize {
        VECTOR_TABLE_BASE
    }

    fn set_system_priorities(&self, svcall: u8, systick: u8, pendsv: u8) {
        self.system_priorities.set((svcall, systick, pendsv));
    }

    fn enable_irq(&self, irq: Irq) {
        self.nvic_enabled
            .set(self.nvic_enabled.get() | (1 << irq.number()));
    }

    fn disable_irq(&self, irq: Irq) {
        self.nvic_enabled
            .set(self.nvic_enabled.get() & !(1 << irq.number()));
    }

    fn set_irq_priority(&self, irq: Irq, level: u8) {
        let mut table = self.nvic_priority.get();
        table[irq.index()] = level;
        self.nvic_priority.set(table);
    }

    fn pend_context_switch(&self) {
        self.pendsv.set(true);
    }

    fn save_context(&self) -> Word {
        self.psp.get()
    }

    fn restore_context(&self, sp: Word) {
        self.psp.set(sp);
    }

    fn idle_entry(&self) -> Word {
        let entry: fn() -> ! = idle_loop;
        entry as Word
    }

    fn halt(&self, reason: &str) -> ! {
        self.primask.set(true);
        panic!("processor halted: {}", reason);
    }

    fn init_hardware(&self) -> KernelResult<()> {
        self.hardware_ready.set(true);
        Ok(())
    }

    fn init_clocks(&self) -> KernelResult<()> {
        if self.clock_fails.get() {
            return Err(KernelError::Timeout);
        }
        Ok(())
    }

    fn init_timer(&self, cpu_hz: u32, tick_hz: u32) -> KernelResult<()> {
        let reload = systick_reload(cpu_hz, tick_hz).ok_or(KernelError::InvalidParam)?;
        self.systick_reload.set(Some(reload));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nvic_bits() {
        let sim = Simulator::new();
        let irq = Irq::new(40).unwrap();
        sim.enable_irq(irq);
        assert!(sim.irq_enabled(irq));
        sim.set_irq_priority(irq, 0x20);
        assert_eq!(sim.irq_priority(irq), 0x20);
        sim.disable_irq(irq);
        assert!(!sim.irq_enabled(irq));
    }

    #[test]
    fn test_clock_failure() {
        let sim = Simulator::new();
        sim.fail_clock_lock(true);
        assert_eq!(sim.init_clocks(), Err(KernelError::Timeout));
    }

    #[test]
    #[should_panic(expected = "processor halted")]
    fn test_halt() {
        Simulator::new().halt("test");
    }
}
