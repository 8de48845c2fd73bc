//! ARMv7-M (Cortex-M4) Support
//!
//! Exception entry trampolines, NVIC/SCB programming and the first jump
//! into a process.
//!
//! # Exception model
//! SVCall, SysTick and PendSV share one entry sequence. If the exception
//! interrupted a process (EXC_RETURN bit 2 set, i.e. thread mode on PSP),
//! r4-r11 are pushed onto the process stack and PSP is updated before the
//! Rust handler runs, so the handler sees a complete [`ContextFrame`] at
//! PSP. On the way out the sequence reloads PSP, which the scheduler may
//! have pointed at another process, and pops that process's r4-r11.
//!
//! Exceptions taken while the kernel itself runs on MSP skip the context
//! save.
//!
//! # Safety
//! Processes are only ever resumed through this exception return path.
//! The kernel object is only touched with PRIMASK set, so handler
//! preemption never observes it half-updated.
//!
//! [`ContextFrame`]: super::ContextFrame

use core::arch::{asm, global_asm};
use core::ptr::{read_volatile, write_volatile};

use cortex_m::peripheral::{NVIC, SCB, SYST};
use spin::Mutex;

use super::{trap_site_instruction, systick_reload, Arch, TrapFrame, Word};
use crate::config::{KernelConfig, VECTOR_TABLE_BASE};
use crate::error::{KernelError, KernelResult};
use crate::irq::{Exception, Irq};
use crate::kernel::Kernel;

/// STM32WB55 clock and power registers.
mod regs {
    pub const RCC_CR: usize = 0x5800_0000;
    pub const RCC_CFGR: usize = 0x5800_0008;
    pub const RCC_PLLCFGR: usize = 0x5800_000C;
    pub const PWR_CR1: usize = 0x5800_0400;
    pub const FLASH_ACR: usize = 0x5800_4000;
}

/// RCC_CR and RCC_CFGR bits.
mod bits {
    pub const HSEON: u32 = 1 << 16;
    pub const HSERDY: u32 = 1 << 17;
    pub const PLLON: u32 = 1 << 24;
    pub const PLLRDY: u32 = 1 << 25;
    pub const SW_PLL: u32 = 0b11;
}

/// 32 MHz HSE / M(4) * N(16) / R(2) = 64 MHz.
const PLLCFGR_64MHZ: u32 = (2 << 25) | (1 << 24) | (16 << 8) | (4 << 4) | 0b10;

/// Polling budget for each oscillator ready flag.
const READY_SPINS: u32 = 10_000;

/// Processor handle. There is only one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArmM;

/// The kernel instance the exception handlers operate on.
pub static KERNEL: Mutex<Kernel<ArmM>> = Mutex::new(Kernel::new(ArmM, KernelConfig::DEFAULT));

/// Run `f` on the kernel with interrupts masked.
pub fn with_kernel<R>(f: impl FnOnce(&mut Kernel<ArmM>) -> R) -> R {
    cortex_m::interrupt::free(|_| f(&mut KERNEL.lock()))
}

/// Console sink on ITM stimulus port 0.
#[cfg(feature = "klog-itm")]
pub fn itm_sink(s: &str) {
    // SAFETY: port 0 is only written through the console lock
    let itm = unsafe { &mut *cortex_m::peripheral::ITM::PTR.cast_mut() };
    cortex_m::itm::write_str(&mut itm.stim[0], s);
}

/// Console sink used when no trace port is configured.
#[cfg(not(feature = "klog-itm"))]
pub fn itm_sink(_s: &str) {}

fn idle_loop() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

/// Read-modify-write of a memory-mapped register.
///
/// # Safety
/// `addr` must be a valid peripheral register.
unsafe fn modify(addr: usize, f: impl FnOnce(u32) -> u32) {
    // SAFETY: caller guarantees `addr` is an MMIO register
    unsafe {
        let reg = addr as *mut u32;
        write_volatile(reg, f(read_volatile(reg)));
    }
}

/// Spin until `ready` holds for the register at `addr`.
fn wait_for(addr: usize, ready: impl Fn(u32) -> bool) -> KernelResult<()> {
    for _ in 0..READY_SPINS {
        // SAFETY: only called with RCC register addresses
        if ready(unsafe { read_volatile(addr as *const u32) }) {
            return Ok(());
        }
    }
    Err(KernelError::Timeout)
}

impl Arch for ArmM {
    fn mask_interrupts(&self) {
        cortex_m::interrupt::disable();
    }

    fn unmask_interrupts(&self) {
        // SAFETY: callers only unmask when leaving their outermost
        // critical section
        unsafe { cortex_m::interrupt::enable() }
    }

    fn interrupts_masked(&self) -> bool {
        cortex_m::register::primask::read().is_active()
    }

    fn set_vector_table(&self, base: usize) {
        // SAFETY: VTOR accepts any 128-byte aligned table address
        unsafe { (*SCB::PTR).vtor.write(base as u32) }
    }

    fn vector_table_base(&self) -> usize {
        VECTOR_TABLE_BASE
    }

    fn set_system_priorities(&self, svcall: u8, systick: u8, pendsv: u8) {
        // SAFETY: priority writes have no memory safety implications
        unsafe {
            let scb = &*SCB::PTR;
            // Usage, Bus and MemManage faults at the highest level.
            scb.shpr[0].write(0x00);
            scb.shpr[1].write(0x00);
            scb.shpr[2].write(0x00);
            scb.shpr[7].write(svcall);
            scb.shpr[10].write(pendsv);
            scb.shpr[11].write(systick);
            // Trap on divide by zero.
            scb.ccr.modify(|x| x | 1 << 4);
        }
    }

    fn enable_irq(&self, irq: Irq) {
        let n = irq.number() as usize;
        // SAFETY: ISER writes only affect the named line
        unsafe { (*NVIC::PTR).iser[n / 32].write(1 << (n % 32)) }
    }

    fn disable_irq(&self, irq: Irq) {
        let n = irq.number() as usize;
        // SAFETY: ICER writes only affect the named line
        unsafe { (*NVIC::PTR).icer[n / 32].write(1 << (n % 32)) }
    }

    fn set_irq_priority(&self, irq: Irq, level: u8) {
        // SAFETY: IPR is byte-addressable on ARMv7-M
        unsafe { (*NVIC::PTR).ipr[irq.index()].write(level) }
    }

    fn pend_context_switch(&self) {
        SCB::set_pendsv();
    }

    fn save_context(&self) -> Word {
        cortex_m::register::psp::read() as Word
    }

    fn restore_context(&self, sp: Word) {
        // SAFETY: handlers run on MSP, so changing PSP only affects where
        // the next exception return unstacks from
        #[allow(unused_unsafe)]
        unsafe {
            cortex_m::register::psp::write(sp as u32)
        }
    }

    fn fetch_instruction(&self, addr: Word) -> Option<u16> {
        if let Some(insn) = trap_site_instruction(addr) {
            return Some(insn);
        }
        if addr == 0 || addr % 2 != 0 {
            return None;
        }
        // SAFETY: `addr` is the return address of a trapping process, so
        // it points into that process's code
        Some(unsafe { read_volatile(addr as *const u16) })
    }

    fn idle_entry(&self) -> Word {
        let entry: fn() -> ! = idle_loop;
        entry as Word
    }

    fn halt(&self, reason: &str) -> ! {
        log::error!("halting: {}", reason);
        cortex_m::interrupt::disable();
        loop {
            cortex_m::asm::wfi();
        }
    }

    fn init_hardware(&self) -> KernelResult<()> {
        // SAFETY: fixed STM32WB55 register addresses
        unsafe {
            // Voltage regulator on.
            modify(regs::PWR_CR1, |v| v | 1 << 9);
            // Three wait states for 64 MHz, then prefetch and I-cache.
            modify(regs::FLASH_ACR, |v| (v & !0x7) | 0x3);
            modify(regs::FLASH_ACR, |v| v | 1 << 9 | 1 << 8);
        }
        Ok(())
    }

    fn init_clocks(&self) -> KernelResult<()> {
        // SAFETY: fixed STM32WB55 register addresses
        unsafe { modify(regs::RCC_CR, |v| v | bits::HSEON) };
        wait_for(regs::RCC_CR, |v| v & bits::HSERDY != 0)?;

        // SAFETY: as above
        unsafe {
            write_volatile(regs::RCC_PLLCFGR as *mut u32, PLLCFGR_64MHZ);
            modify(regs::RCC_CR, |v| v | bits::PLLON);
        }
        wait_for(regs::RCC_CR, |v| v & bits::PLLRDY != 0)?;

        // SAFETY: as above
        unsafe { modify(regs::RCC_CFGR, |v| (v & !0x3) | bits::SW_PLL) };
        wait_for(regs::RCC_CFGR, |v| (v >> 2) & 0x3 == bits::SW_PLL)
    }

    fn init_timer(&self, cpu_hz: u32, tick_hz: u32) -> KernelResult<()> {
        let reload = systick_reload(cpu_hz, tick_hz).ok_or(KernelError::InvalidParam)?;
        // SAFETY: SysTick is owned by the kernel
        unsafe {
            let syst = &*SYST::PTR;
            syst.rvr.write(reload);
            syst.cvr.write(0);
            // Processor clock, interrupt, enable.
            syst.csr.modify(|v| v | 0b111);
        }
        Ok(())
    }
}

// Common entry for the three kernel exceptions. The handler receives the
// hardware-stacked frame in r0 (only meaningful for SVCall).
macro_rules! kernel_exception {
    ($name:literal, $handler:literal) => {
        global_asm!(
            concat!(".section .text.", $name),
            concat!(".global ", $name),
            concat!(".type ", $name, ",%function"),
            ".thumb_func",
            concat!($name, ":"),
            "tst lr, #4",
            "beq 1f",
            // From a process: save r4-r11 below the hardware frame.
            "mrs r0, psp",
            "stmdb r0!, {{r4-r11}}",
            "msr psp, r0",
            "add r0, r0, #32",
            "push {{r4, lr}}",
            concat!("bl ", $handler),
            "pop {{r4, lr}}",
            // PSP may now belong to a different process.
            "mrs r0, psp",
            "ldmia r0!, {{r4-r11}}",
            "msr psp, r0",
            // EXC_RETURN: thread mode, PSP, basic frame.
            "mvn lr, #2",
            "bx lr",
            // From the kernel on MSP: nothing to save.
            "1:",
            "mov r0, sp",
            "push {{r4, lr}}",
            concat!("bl ", $handler),
            "pop {{r4, lr}}",
            "bx lr",
        );
    };
}

kernel_exception!("SVCall", "tng_svcall_entry");
kernel_exception!("SysTick", "tng_systick_entry");
kernel_exception!("PendSV", "tng_pendsv_entry");

#[no_mangle]
unsafe extern "C" fn tng_svcall_entry(frame: *mut TrapFrame) {
    // SAFETY: the trampoline passes the hardware-stacked frame
    let frame = unsafe { &mut *frame };
    with_kernel(|k| k.handle_trap(frame));
}

#[no_mangle]
extern "C" fn tng_systick_entry() {
    with_kernel(|k| k.handle_exception(Exception::SysTick));
}

#[no_mangle]
extern "C" fn tng_pendsv_entry() {
    with_kernel(|k| k.handle_exception(Exception::PendSv));
}

/// Entry for every external interrupt line.
pub fn irq_entry(irq: Irq) {
    with_kernel(|k| k.interrupt_dispatch(irq));
}

/// Switch thread mode onto the process stack at `sp` and run that process.
///
/// # Safety
/// `sp` must point at a context seeded by [`super::seed_initial_frame`]
/// on a stack that stays valid for the life of the process.
pub unsafe fn launch(sp: Word) -> ! {
    // SAFETY: caller guarantees the frame is valid
    unsafe {
        asm!(
            "ldmia r0!, {{r4-r11}}",
            "msr psp, r0",
            "movs r1, #2",
            "msr control, r1",
            "isb",
            // Now on PSP, pointing at the hardware-format frame.
            "ldr r1, [sp, #24]",
            "ldr lr, [sp, #20]",
            "add sp, sp, #32",
            "orr r1, r1, #1",
            "movs r0, #0",
            "cpsie i",
            "bx r1",
            in("r0") sp,
            options(noreturn),
        )
    }
}

macro_rules! svc {
    ($n:literal, $args:expr) => {{
        let [a0, a1, a2, a3] = $args;
        let ret: Word;
        // SAFETY: the SVCall handler only touches the stacked frame
        unsafe {
            asm!(
                concat!("svc #", $n),
                inout("r0") a0 => ret,
                in("r1") a1,
                in("r2") a2,
                in("r3") a3,
            )
        }
        ret
    }};
}

/// Process-side system call stub.
pub fn syscall(number: u8, args: [Word; 4]) -> Word {
    match number {
        0 => svc!("0", args),
        1 => svc!("1", args),
        2 => svc!("2", args),
        3 => svc!("3", args),
        4 => svc!("4", args),
        5 => svc!("5", args),
        _ => Word::MAX,
    }
}
