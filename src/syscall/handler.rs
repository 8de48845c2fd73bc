//! System Call Handlers
//!
//! The six kernel services reachable through `svc`.
//!
//! # Security Considerations
//! - Only the numbers bound in [`Kernel::syscalls_init`] are reachable
//! - Unknown numbers return [`INVALID_SYSCALL`]
//! - Every argument is range-checked before the kernel acts on it
//! - Results are plain status words; no kernel pointer is ever returned
//!   except the address of memory the caller just allocated
//!
//! [`INVALID_SYSCALL`]: super::INVALID_SYSCALL

use log::{debug, warn};

use super::table::{SyscallArgs, SyscallNumber};
use super::validate;
use crate::arch::{Arch, Word};
use crate::config::MAX_SYSCALL_ALLOC;
use crate::error::KernelResult;
use crate::kernel::{Kernel, SystemInfo, SystemState};
use crate::mm::AllocFlags;
use crate::sched::{Priority, ProcessFlags, ProcessId};

/// Result words.
pub mod status {
    use crate::arch::Word;

    pub const OK: Word = 0;
    pub const ERROR: Word = 1;
    /// The requested information does not exist yet.
    pub const UNAVAILABLE: Word = 2;
    /// Returned instead of an address or process id.
    pub const NONE: Word = 0;
}

/// Name given to processes created through the system call.
const USER_PROCESS_NAME: &str = "user";

impl<A: Arch> Kernel<A> {
    /// Bind the kernel services to their numbers.
    pub fn syscalls_init(&mut self) -> KernelResult<()> {
        self.syscalls.reset();
        let bindings: [(SyscallNumber, fn(&mut Self, SyscallArgs) -> Word); 6] = [
            (SyscallNumber::ProcessCreate, sys_process_create),
            (SyscallNumber::ProcessTerminate, sys_process_terminate),
            (SyscallNumber::MemoryAlloc, sys_memory_alloc),
            (SyscallNumber::MemoryFree, sys_memory_free),
            (SyscallNumber::SchedulerYield, sys_scheduler_yield),
            (SyscallNumber::GetSystemInfo, sys_get_system_info),
        ];
        for (number, handler) in bindings {
            self.syscalls.register(number.number(), handler)?;
        }
        Ok(())
    }
}

/// create(entry, stack_size, priority, flags) -> id, or 0 on failure
fn sys_process_create<A: Arch>(k: &mut Kernel<A>, args: SyscallArgs) -> Word {
    let [entry, stack_size, priority, flags] = args;
    let Ok(priority) = Priority::try_from(priority) else {
        warn!("syscall: create with bad priority {}", priority);
        return status::NONE;
    };
    let flags = ProcessFlags::from_bits_truncate(flags as u32);
    match k.process_create(USER_PROCESS_NAME, entry, stack_size, priority, flags) {
        Ok(id) => id.as_u32() as Word,
        Err(e) => {
            debug!("syscall: create failed: {}", e);
            status::NONE
        }
    }
}

/// terminate(id, exit_code) -> 0 ok, 1 error
fn sys_process_terminate<A: Arch>(k: &mut Kernel<A>, args: SyscallArgs) -> Word {
    let [id, exit_code, ..] = args;
    if id == 0 || id > u32::MAX as Word {
        return status::ERROR;
    }
    debug!("syscall: terminate {} (exit {})", id, exit_code as i32);
    match k.process_terminate(ProcessId::new(id as u32)) {
        Ok(()) => status::OK,
        Err(_) => status::ERROR,
    }
}

/// alloc(size, alignment, flags) -> address, or 0 on failure
fn sys_memory_alloc<A: Arch>(k: &mut Kernel<A>, args: SyscallArgs) -> Word {
    let [size, _alignment, flags, _] = args;
    if size == 0 || size > MAX_SYSCALL_ALLOC {
        return status::NONE;
    }
    let flags = AllocFlags::from_bits_truncate(flags as u32);
    match k.alloc(size, flags) {
        Some(ptr) => k.heap().address_of(ptr),
        None => status::NONE,
    }
}

/// free(address) -> 0 ok, 1 error
fn sys_memory_free<A: Arch>(k: &mut Kernel<A>, args: SyscallArgs) -> Word {
    let addr = args[0];
    if addr == 0 {
        return status::ERROR;
    }
    let Some(ptr) = k.heap().ptr_from_address(addr) else {
        return status::ERROR;
    };
    match k.free(ptr) {
        Ok(()) => status::OK,
        Err(_) => status::ERROR,
    }
}

/// yield() -> 0
fn sys_scheduler_yield<A: Arch>(k: &mut Kernel<A>, _args: SyscallArgs) -> Word {
    k.yield_now();
    status::OK
}

/// get_system_info(buffer, size) -> 0 ok, 1 bad buffer, 2 unavailable
fn sys_get_system_info<A: Arch>(k: &mut Kernel<A>, args: SyscallArgs) -> Word {
    let [buf, size, ..] = args;
    if k.state() == SystemState::Boot {
        return status::UNAVAILABLE;
    }
    let info = k.system_info();
    match validate::validate_user_write(k.heap_mut(), buf, size, SystemInfo::SIZE) {
        Ok(mut user) => {
            info.encode(user.as_bytes_mut());
            status::OK
        }
        Err(e) => {
            debug!("syscall: get_system_info: {}", e);
            status::ERROR
        }
    }
}
