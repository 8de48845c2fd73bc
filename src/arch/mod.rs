//! Architecture Support
//!
//! The kernel never touches processor registers directly. Everything it
//! needs from the core (interrupt masking, NVIC programming, the process
//! stack pointer, timer setup) goes through the [`Arch`] trait, so the same
//! kernel logic runs on the Cortex-M4 and on the host [`simulator`].
//!
//! # Context layout
//! A suspended process is described by a single word: its saved process
//! stack pointer. The stack at that address holds the software-saved
//! registers r4-r11 followed by the frame the hardware stacks on exception
//! entry (r0-r3, r12, lr, pc, xPSR). See [`ContextFrame`].

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod arm_m;
pub mod simulator;

use core::mem::size_of;

use crate::error::KernelResult;
use crate::irq::Irq;

/// Native register width.
pub type Word = usize;

/// Bytes per register.
pub const WORD_BYTES: usize = size_of::<Word>();

/// Exception frames must start on an 8-byte boundary (AAPCS).
pub const STACK_ALIGN: usize = 8;

/// xPSR for a fresh process: only the Thumb bit set.
pub const INITIAL_XPSR: Word = 1 << 24;

/// Link register for a fresh process. Returning from the entry faults.
pub const INITIAL_LR: Word = 0xFFFF_FFFF;

/// Encoding of `svc #imm8`; the immediate is the low byte.
pub const SVC_OPCODE: u16 = 0xDF00;

/// One `svc` instruction per possible immediate.
///
/// Kernel-side callers use these as the return address of a synthesized
/// trap frame, so traps raised from inside the kernel are decoded exactly
/// like traps raised by a process.
pub static TRAP_SITES: [u16; 256] = trap_sites();

const fn trap_sites() -> [u16; 256] {
    let mut sites = [0; 256];
    let mut i = 0;
    while i < 256 {
        sites[i] = SVC_OPCODE | i as u16;
        i += 1;
    }
    sites
}

/// The registers the hardware stacks on exception entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub r0: Word,
    pub r1: Word,
    pub r2: Word,
    pub r3: Word,
    pub r12: Word,
    pub lr: Word,
    pub pc: Word,
    pub xpsr: Word,
}

impl TrapFrame {
    /// A frame as it would look right after `svc` at `site - 2`.
    pub fn call(site: Word, args: [Word; 4]) -> Self {
        Self {
            r0: args[0],
            r1: args[1],
            r2: args[2],
            r3: args[3],
            pc: site,
            xpsr: INITIAL_XPSR,
            ..Self::default()
        }
    }

    /// System call arguments (r0-r3).
    pub fn args(&self) -> [Word; 4] {
        [self.r0, self.r1, self.r2, self.r3]
    }

    /// Result register.
    pub fn set_return(&mut self, value: Word) {
        self.r0 = value;
    }

    /// Address of the instruction after the trapping one.
    pub fn return_address(&self) -> Word {
        self.pc
    }
}

/// Full saved context: software-stacked r4-r11, then the hardware frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextFrame {
    pub callee_saved: [Word; 8],
    pub trap: TrapFrame,
}

impl ContextFrame {
    pub const WORDS: usize = 16;
    pub const SIZE: usize = Self::WORDS * WORD_BYTES;

    /// Context for a process that has never run: zeroed registers,
    /// thumb-state xPSR and a faulting return address.
    pub fn initial(entry: Word) -> Self {
        Self {
            callee_saved: [0; 8],
            trap: TrapFrame {
                lr: INITIAL_LR,
                // Exception return requires bit 0 clear.
                pc: entry & !1,
                xpsr: INITIAL_XPSR,
                ..TrapFrame::default()
            },
        }
    }

    fn words(&self) -> [Word; Self::WORDS] {
        let t = &self.trap;
        let mut out = [0; Self::WORDS];
        out[..8].copy_from_slice(&self.callee_saved);
        out[8..].copy_from_slice(&[t.r0, t.r1, t.r2, t.r3, t.r12, t.lr, t.pc, t.xpsr]);
        out
    }

    /// Serialize into `bytes` at `offset`.
    pub fn write_to(&self, bytes: &mut [u8], offset: usize) -> Option<()> {
        for (i, word) in self.words().iter().enumerate() {
            write_word(bytes, offset + i * WORD_BYTES, *word)?;
        }
        Some(())
    }

    /// Deserialize from `bytes` at `offset`.
    pub fn read_from(bytes: &[u8], offset: usize) -> Option<Self> {
        let mut w = [0; Self::WORDS];
        for (i, slot) in w.iter_mut().enumerate() {
            *slot = read_word(bytes, offset + i * WORD_BYTES)?;
        }
        let mut callee_saved = [0; 8];
        callee_saved.copy_from_slice(&w[..8]);
        Some(Self {
            callee_saved,
            trap: TrapFrame {
                r0: w[8],
                r1: w[9],
                r2: w[10],
                r3: w[11],
                r12: w[12],
                lr: w[13],
                pc: w[14],
                xpsr: w[15],
            },
        })
    }
}

pub fn read_word(bytes: &[u8], offset: usize) -> Option<Word> {
    let raw = bytes.get(offset..offset.checked_add(WORD_BYTES)?)?;
    Some(Word::from_ne_bytes(raw.try_into().ok()?))
}

pub fn write_word(bytes: &mut [u8], offset: usize, value: Word) -> Option<()> {
    let raw = bytes.get_mut(offset..offset.checked_add(WORD_BYTES)?)?;
    raw.copy_from_slice(&value.to_ne_bytes());
    Some(())
}

/// Lay down an initial context at the top of a fresh stack.
///
/// `stack` is the stack memory and `base` the address it lives at. Returns
/// the stack pointer to restore, or `None` if the stack cannot hold a frame.
pub fn seed_initial_frame(stack: &mut [u8], base: Word, entry: Word) -> Option<Word> {
    let top = base.checked_add(stack.len())? & !(STACK_ALIGN - 1);
    let sp = top.checked_sub(ContextFrame::SIZE)?;
    let offset = sp.checked_sub(base)?;
    ContextFrame::initial(entry).write_to(stack, offset)?;
    Some(sp)
}

/// Decode a `svc` instruction, returning its immediate.
pub fn decode_svc(insn: u16) -> Option<u8> {
    if insn & 0xFF00 == SVC_OPCODE {
        Some((insn & 0xFF) as u8)
    } else {
        None
    }
}

/// Processor services the kernel depends on.
///
/// All methods take `&self`: the hardware is a shared resource and the
/// kernel serializes access with its own critical section.
pub trait Arch {
    /// Mask all configurable interrupts (PRIMASK).
    fn mask_interrupts(&self);

    fn unmask_interrupts(&self);

    fn interrupts_masked(&self) -> bool;

    /// Point VTOR at a vector table.
    fn set_vector_table(&self, base: usize);

    /// Address of the firmware's vector table.
    fn vector_table_base(&self) -> usize;

    /// Program the SVCall, SysTick and PendSV priority bytes.
    fn set_system_priorities(&self, svcall: u8, systick: u8, pendsv: u8);

    fn enable_irq(&self, irq: Irq);

    fn disable_irq(&self, irq: Irq);

    /// Program an NVIC priority byte (already shifted into the top bits).
    fn set_irq_priority(&self, irq: Irq, level: u8);

    /// Ask for a deferred context switch (PendSV).
    fn pend_context_switch(&self);

    /// Read the live process stack pointer.
    fn save_context(&self) -> Word;

    /// Make `sp` the process stack pointer used on exception return.
    fn restore_context(&self, sp: Word);

    /// Read the halfword instruction at `addr`.
    fn fetch_instruction(&self, addr: Word) -> Option<u16> {
        trap_site_instruction(addr)
    }

    /// Return address of a trap raised with `svc #number`.
    fn trap_site(&self, number: u8) -> Word {
        TRAP_SITES.as_ptr() as Word + (number as Word + 1) * 2
    }

    /// Entry point of the idle loop.
    fn idle_entry(&self) -> Word;

    /// Stop the processor for good.
    fn halt(&self, reason: &str) -> !;

    /// Power, flash latency and peripheral clock gating.
    fn init_hardware(&self) -> KernelResult<()>;

    /// Bring up the external oscillator and PLL.
    fn init_clocks(&self) -> KernelResult<()>;

    /// Start the system timer.
    fn init_timer(&self, cpu_hz: u32, tick_hz: u32) -> KernelResult<()>;
}

/// Look an address up in [`TRAP_SITES`].
pub fn trap_site_instruction(addr: Word) -> Option<u16> {
    let base = TRAP_SITES.as_ptr() as Word;
    let offset = addr.checked_sub(base)?;
    if offset % 2 != 0 {
        return None;
    }
    TRAP_SITES.get(offset / 2).copied()
}

/// SysTick reload value for a tick rate; the counter is 24 bits wide.
pub fn systick_reload(cpu_hz: u32, tick_hz: u32) -> Option<u32> {
    if tick_hz == 0 {
        return None;
    }
    let reload = (cpu_hz / tick_hz).checked_sub(1)?;
    (reload <= 0x00FF_FFFF).then_some(reload)
}
