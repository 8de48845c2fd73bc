//! TweaknGeek Firmware
//!
//! Boots the kernel on the STM32WB55 and hands the processor to the
//! scheduler. Built for the host, the same binary runs the kernel on the
//! simulator for a few hundred ticks and prints what happened.

#![cfg_attr(target_os = "none", no_std, no_main)]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod firmware {
    use core::panic::PanicInfo;

    use cortex_m_rt::{entry, exception, ExceptionFrame};
    use log::error;

    use tweakngeek_kernel::arch::arm_m::{self, ArmM};
    use tweakngeek_kernel::arch::Arch;
    use tweakngeek_kernel::config::{KernelConfig, VERSION};
    use tweakngeek_kernel::irq::{Exception, Irq};
    use tweakngeek_kernel::{klog, kprintln, KernelError};

    #[entry]
    fn main() -> ! {
        // Stays masked until the first process is launched.
        cortex_m::interrupt::disable();

        let _ = klog::init(arm_m::itm_sink, KernelConfig::DEFAULT.log_level);
        kprintln!();
        kprintln!("TweaknGeek v{} - STM32WB55 kernel", VERSION);
        kprintln!("==================================");

        let booted = arm_m::with_kernel(|k| {
            k.init()?;
            k.start()?;
            k.running_context().ok_or(KernelError::InvalidState)
        });
        match booted {
            // SAFETY: the scheduler seeded this context on a stack it owns
            Ok(sp) => unsafe { arm_m::launch(sp) },
            Err(e) => {
                error!("boot: {}", e);
                ArmM.halt("boot failed")
            }
        }
    }

    #[exception]
    unsafe fn DefaultHandler(irqn: i16) {
        if let Ok(n) = u16::try_from(irqn) {
            match Irq::new(n) {
                Ok(irq) => arm_m::irq_entry(irq),
                Err(_) => error!("irq: stray vector {}", irqn),
            }
            return;
        }
        match Exception::from_irqn(irqn) {
            Some(exc) if exc.is_fatal() => arm_m::with_kernel(|k| k.fault(exc)),
            Some(exc) => arm_m::with_kernel(|k| k.handle_exception(exc)),
            None => error!("irq: unknown exception {}", irqn),
        }
    }

    #[exception]
    unsafe fn HardFault(ef: &ExceptionFrame) -> ! {
        error!("HardFault at pc {:#010x}", ef.pc());
        ArmM.halt("hard fault")
    }

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        kprintln!("KERNEL PANIC: {}", info);
        ArmM.halt("panic")
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    use tweakngeek_kernel::arch::simulator::Simulator;
    use tweakngeek_kernel::config::{KernelConfig, VERSION};
    use tweakngeek_kernel::mm::AllocFlags;
    use tweakngeek_kernel::sched::{Priority, ProcessFlags};
    use tweakngeek_kernel::syscall::SyscallNumber;
    use tweakngeek_kernel::{klog, kprintln, Kernel};

    fn stdout_sink(s: &str) {
        print!("{}", s);
    }

    let config = KernelConfig::DEFAULT;
    if let Err(e) = klog::init(stdout_sink, config.log_level) {
        eprintln!("logger: {}", e);
    }
    kprintln!("TweaknGeek v{} - simulator", VERSION);

    let mut kernel = Box::new(Kernel::new(Simulator::new(), config));
    if let Err(e) = kernel.init().and_then(|()| kernel.start()) {
        kprintln!("boot failed at {} stage: {}", kernel.boot_stage(), e);
        std::process::exit(1);
    }

    let demo = [
        ("sensor", Priority::High, 768),
        ("ui", Priority::Normal, 1024),
        ("logger", Priority::Low, 512),
    ];
    for (i, (name, priority, stack)) in demo.into_iter().enumerate() {
        let entry = 0x0800_4001 + i * 0x100;
        if let Err(e) = kernel.process_create(name, entry, stack, priority, ProcessFlags::USER) {
            kprintln!("create '{}': {}", name, e);
        }
    }

    let scratch = kernel.syscall_invoke(SyscallNumber::MemoryAlloc.number(), [64, 8, 0, 0]);
    kprintln!("syscall alloc -> {:#x}", scratch);

    for tick in 0..250u32 {
        kernel.tick_handler();
        if tick % 50 == 49 {
            kernel.yield_now();
        }
    }
    if let Some(ptr) = kernel.alloc(256, AllocFlags::ZERO) {
        let _ = kernel.free(ptr);
    }
    kernel.syscall_invoke(SyscallNumber::MemoryFree.number(), [scratch, 0, 0, 0]);

    let info = kernel.system_info();
    let sched = kernel.scheduler_stats();
    let irq = kernel.interrupt_stats();
    kprintln!(
        "uptime {} ms, state {:?}, cpu {}%",
        info.uptime_ms,
        info.state,
        info.cpu_usage_percent
    );
    kprintln!(
        "heap {}/{} bytes free",
        info.free_memory,
        info.total_memory
    );
    kprintln!(
        "{} processes, {} context switches, {} system calls",
        sched.active_processes,
        sched.context_switches,
        irq.system_calls
    );
    for pcb in kernel.scheduler().processes() {
        kprintln!(
            "  {} {:<8} {:?} {:?} runtime {}",
            pcb.id(),
            pcb.name(),
            pcb.state(),
            pcb.priority(),
            pcb.total_runtime()
        );
    }
}
