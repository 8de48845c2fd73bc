//! System Call Interface
//!
//! Entry point for processes asking the kernel for service.
//!
//! # Trap path
//! A process executes `svc #n` with arguments in r0-r3. The SVCall
//! handler reads the immediate back out of the trapping instruction, looks
//! `n` up in the table and writes the result into the stacked r0.
//! [`Kernel::syscall_invoke`] builds the same frame for callers already
//! inside the kernel and goes through the same decoding path.
//!
//! # Current Syscalls
//! - 0: process_create(entry, stack_size, priority, flags) -> id | 0
//! - 1: process_terminate(id, exit_code) -> 0 | 1
//! - 2: memory_alloc(size, alignment, flags) -> address | 0
//! - 3: memory_free(address) -> 0 | 1
//! - 4: scheduler_yield() -> 0
//! - 5: get_system_info(buffer, size) -> 0 | 1 | 2

mod handler;
mod table;
mod validate;

pub use handler::status;
pub use table::{
    SyscallArgs, SyscallHandler, SyscallNumber, SyscallTable, INVALID_SYSCALL, SYSCALL_COUNT,
};
pub use validate::{validate_user_write, BufferError, UserBufferMut};

use log::warn;

use crate::arch::{decode_svc, Arch, TrapFrame, Word};
use crate::error::KernelResult;
use crate::kernel::Kernel;

impl<A: Arch> Kernel<A> {
    /// Bind `handler` to `number`, replacing any previous binding.
    pub fn syscall_register(
        &mut self,
        number: usize,
        handler: SyscallHandler<Kernel<A>>,
    ) -> KernelResult<()> {
        let _cs = self.critical.guard(&self.arch);
        self.syscalls.register(number, handler)
    }

    /// Handle a supervisor call whose stacked registers are in `frame`.
    pub fn handle_trap(&mut self, frame: &mut TrapFrame) {
        self.interrupts.enter_trap();
        let number = frame
            .return_address()
            .checked_sub(2)
            .and_then(|insn_addr| self.arch.fetch_instruction(insn_addr))
            .and_then(decode_svc);
        let result = match number.and_then(|n| self.syscalls.lookup(n as usize)) {
            Some(handler) => handler(self, frame.args()),
            None => {
                warn!("syscall: unknown call {:?}", number);
                INVALID_SYSCALL
            }
        };
        frame.set_return(result);
        self.interrupts.exit();
    }

    /// Issue system call `number` as if trapped from the current process.
    ///
    /// Returns [`INVALID_SYSCALL`] for numbers outside the table.
    pub fn syscall_invoke(&mut self, number: usize, args: SyscallArgs) -> Word {
        let Ok(imm) = u8::try_from(number) else {
            return INVALID_SYSCALL;
        };
        if number >= SYSCALL_COUNT {
            return INVALID_SYSCALL;
        }
        let mut frame = TrapFrame::call(self.arch.trap_site(imm), args);
        self.handle_trap(&mut frame);
        frame.r0
    }
}
