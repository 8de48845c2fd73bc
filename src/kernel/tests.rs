use super::*;
use crate::arch::simulator::Simulator;
use crate::arch::{Arch, TrapFrame};
use crate::config::{CPU_FREQUENCY_HZ, HEAP_SIZE, VECTOR_TABLE_BASE};
use crate::error::{KernelError, KernelResult};
use crate::irq::{
    Exception, Irq, IrqPriority, PENDSV_PRIORITY, SVCALL_PRIORITY, SYSTICK_PRIORITY,
};
use crate::mm::{AllocFlags, GuardFault, HeapError, HeapPtr, MemoryStats, STACK_GUARD_SIZE};
use crate::sched::{
    Priority, ProcessFlags, ProcessId, ProcessState, SchedulerStats, StackOverflow, StackOwner,
};
use crate::syscall::{status, SyscallNumber, INVALID_SYSCALL};

const ENTRY: usize = 0x0800_2001;

fn kernel() -> Box<Kernel<Simulator>> {
    Box::new(Kernel::new(Simulator::new(), KernelConfig::DEFAULT))
}

fn running() -> Box<Kernel<Simulator>> {
    let mut k = kernel();
    k.init().unwrap();
    k.start().unwrap();
    k
}

fn invoke(k: &mut Kernel<Simulator>, call: SyscallNumber, args: [usize; 4]) -> usize {
    k.syscall_invoke(call.number(), args)
}

fn current(k: &Kernel<Simulator>) -> ProcessId {
    k.process_get_current().unwrap().id()
}

#[test]
fn test_boot_programs_hardware() {
    let mut k = kernel();
    k.init().unwrap();
    assert_eq!(k.state(), SystemState::Init);
    assert_eq!(k.boot_stage(), BootStage::Complete);
    assert!(!k.boot_has_errors());

    let sim = k.arch();
    assert!(sim.hardware_ready());
    assert_eq!(sim.vtor(), VECTOR_TABLE_BASE);
    assert_eq!(
        sim.system_priorities(),
        (SVCALL_PRIORITY, SYSTICK_PRIORITY, PENDSV_PRIORITY)
    );
    assert_eq!(sim.systick_reload(), Some(CPU_FREQUENCY_HZ / 1000 - 1));

    let stats = k.memory_stats().unwrap();
    assert_eq!(stats.total_memory, HEAP_SIZE);
    assert_eq!(k.process_get_current().unwrap().id(), ProcessId::IDLE);
}

#[test]
fn test_boot_stops_at_failing_stage() {
    let mut k = kernel();
    k.arch().fail_clock_lock(true);
    assert_eq!(k.init(), Err(KernelError::Timeout));
    assert_eq!(k.state(), SystemState::Error);
    assert_eq!(k.boot_stage(), BootStage::ClockInit);
    assert!(k.boot_has_errors());
    // Nothing after the clock step ran.
    assert!(k.memory_stats().is_none());
    assert_eq!(k.arch().systick_reload(), None);
    assert_eq!(k.start(), Err(KernelError::InvalidState));
}

#[test]
fn test_start_requires_init() {
    let mut k = kernel();
    assert_eq!(k.start(), Err(KernelError::InvalidState));
    k.init().unwrap();
    assert_eq!(k.init(), Err(KernelError::InvalidState));
    k.start().unwrap();
    assert_eq!(k.state(), SystemState::Running);
    assert_eq!(k.start(), Err(KernelError::InvalidState));
}

#[test]
fn test_tick_exhausts_slice_and_preempts() {
    let mut k = running();
    let worker = k
        .process_create("worker", ENTRY, 512, Priority::High, ProcessFlags::USER)
        .unwrap();

    for _ in 0..9 {
        k.handle_exception(Exception::SysTick);
    }
    assert_eq!(current(&k), ProcessId::IDLE);

    k.handle_exception(Exception::SysTick);
    assert_eq!(current(&k), worker);
    assert_eq!(k.tick_count(), 10);
    assert_eq!(k.uptime_ms(), 10);
    let pcb = k.process_get_by_id(worker).unwrap();
    assert_eq!(pcb.state(), ProcessState::Running);
    assert_eq!(k.arch().psp(), pcb.saved_sp());

    let stats = k.interrupt_stats();
    assert_eq!(stats.total_interrupts, 10);
    assert_eq!(stats.current_nesting_level, 0);
}

#[test]
fn test_scheduler_lock_defers_ticks() {
    let mut k = running();
    let _worker = k
        .process_create("worker", ENTRY, 512, Priority::High, ProcessFlags::USER)
        .unwrap();
    k.scheduler_lock();
    for _ in 0..20 {
        k.tick_handler();
    }
    assert_eq!(current(&k), ProcessId::IDLE);
    assert_eq!(k.tick_count(), 20);
    assert_eq!(k.scheduler_stats().scheduler_ticks, 0);
    k.scheduler_unlock();
    assert!(!k.scheduler_is_locked());
}

#[test]
fn test_pendsv_runs_selection() {
    let mut k = running();
    let worker = k
        .process_create("worker", ENTRY, 512, Priority::Normal, ProcessFlags::USER)
        .unwrap();
    k.request_context_switch();
    assert!(k.arch().take_pendsv());
    k.handle_exception(Exception::PendSv);
    assert_eq!(current(&k), worker);
    assert_eq!(k.scheduler_stats().context_switches, 1);
}

#[test]
fn test_cpu_usage_from_idle_share() {
    let mut k = running();
    k.process_create("busy", ENTRY, 512, Priority::High, ProcessFlags::USER)
        .unwrap();
    for _ in 0..20 {
        k.tick_handler();
    }
    let info = k.system_info();
    assert_eq!(info.cpu_usage_percent, 50);
    assert_eq!(info.uptime_ms, 20);
    assert_eq!(info.state, SystemState::Running);
    assert_eq!(info.total_memory as usize, HEAP_SIZE);
    assert_eq!(info.free_memory as usize, k.heap().free_bytes());
}

#[test]
fn test_syscall_process_lifecycle() {
    let mut k = running();
    let id = invoke(
        &mut k,
        SyscallNumber::ProcessCreate,
        [ENTRY, 1024, Priority::Normal as usize, ProcessFlags::USER.bits() as usize],
    );
    assert_ne!(id, status::NONE);
    let pid = ProcessId::new(id as u32);
    assert_eq!(k.process_get_by_id(pid).unwrap().name(), "user");

    // Yield hands the processor to the new process.
    assert_eq!(invoke(&mut k, SyscallNumber::SchedulerYield, [0; 4]), status::OK);
    assert_eq!(current(&k), pid);

    assert_eq!(
        invoke(&mut k, SyscallNumber::ProcessTerminate, [id, 0, 0, 0]),
        status::OK
    );
    assert!(k.process_get_by_id(pid).is_none());
    assert_eq!(current(&k), ProcessId::IDLE);

    assert_eq!(
        invoke(&mut k, SyscallNumber::ProcessTerminate, [id, 0, 0, 0]),
        status::ERROR
    );
    assert_eq!(
        invoke(&mut k, SyscallNumber::ProcessTerminate, [0, 0, 0, 0]),
        status::ERROR
    );
    assert_eq!(k.interrupt_stats().system_calls, 5);
}

#[test]
fn test_syscall_create_rejects_bad_arguments() {
    let mut k = running();
    let bad_priority = invoke(&mut k, SyscallNumber::ProcessCreate, [ENTRY, 1024, 9, 0]);
    assert_eq!(bad_priority, status::NONE);
    let null_entry = invoke(&mut k, SyscallNumber::ProcessCreate, [0, 1024, 2, 0]);
    assert_eq!(null_entry, status::NONE);
    let tiny_stack = invoke(&mut k, SyscallNumber::ProcessCreate, [ENTRY, 64, 2, 0]);
    assert_eq!(tiny_stack, status::NONE);
    assert_eq!(k.scheduler_stats().active_processes, 0);
}

#[test]
fn test_syscall_memory() {
    let mut k = running();
    let free_before = k.heap().free_bytes();

    let addr = invoke(&mut k, SyscallNumber::MemoryAlloc, [100, 8, 0, 0]);
    assert_ne!(addr, status::NONE);
    assert_eq!(addr % 8, 0);
    assert!(k.heap().free_bytes() < free_before);

    assert_eq!(invoke(&mut k, SyscallNumber::MemoryFree, [addr, 0, 0, 0]), status::OK);
    assert_eq!(k.heap().free_bytes(), free_before);
    assert_eq!(
        invoke(&mut k, SyscallNumber::MemoryFree, [addr, 0, 0, 0]),
        status::ERROR
    );
    assert_eq!(invoke(&mut k, SyscallNumber::MemoryFree, [0; 4]), status::ERROR);

    assert_eq!(invoke(&mut k, SyscallNumber::MemoryAlloc, [0; 4]), status::NONE);
    assert_eq!(
        invoke(&mut k, SyscallNumber::MemoryAlloc, [2 * 1024 * 1024, 8, 0, 0]),
        status::NONE
    );
    assert!(k.memory_validate().is_ok());
}

#[test]
fn test_process_stacks_cannot_be_freed() {
    let mut k = running();
    let victim = k
        .process_create("victim", ENTRY, 1024, Priority::Low, ProcessFlags::USER)
        .unwrap();
    let stack = *k.process_get_by_id(victim).unwrap().stack();
    let StackOwner::Heap(ptr) = stack.owner else {
        panic!("heap stack expected");
    };
    let free_before = k.heap().free_bytes();

    assert_eq!(
        invoke(&mut k, SyscallNumber::MemoryFree, [stack.base, 0, 0, 0]),
        status::ERROR
    );
    assert_eq!(k.free(ptr), Err(HeapError::InUse));
    assert_eq!(KernelError::from(HeapError::InUse), KernelError::Busy);
    assert!(k.realloc(Some(ptr), 4096).is_none());
    assert_eq!(k.heap().free_bytes(), free_before);

    let other = invoke(&mut k, SyscallNumber::MemoryAlloc, [1024, 8, 0, 0]);
    assert_ne!(other, status::NONE);
    assert_ne!(other, stack.base);
    assert!(!stack.contains(other));

    k.process_terminate(victim).unwrap();
    assert!(!k.scheduler().owns_stack(ptr));
    assert!(k.memory_validate().is_ok());
}

#[test]
fn test_syscall_system_info_into_user_buffer() {
    let mut k = running();
    let buf = invoke(&mut k, SyscallNumber::MemoryAlloc, [32, 8, 0, 0]);
    assert_ne!(buf, status::NONE);

    assert_eq!(
        invoke(&mut k, SyscallNumber::GetSystemInfo, [buf, 32, 0, 0]),
        status::OK
    );
    let bytes = k.heap_mut().live_bytes_mut(buf, SystemInfo::SIZE).unwrap();
    let info = SystemInfo::decode(bytes).unwrap();
    assert_eq!(info.state, SystemState::Running);
    assert_eq!(info.boot_stage, BootStage::Complete);
    assert_eq!(info.total_memory as usize, HEAP_SIZE);

    let short = invoke(&mut k, SyscallNumber::GetSystemInfo, [buf, 16, 0, 0]);
    assert_eq!(short, status::ERROR);
    let null = invoke(&mut k, SyscallNumber::GetSystemInfo, [0, 32, 0, 0]);
    assert_eq!(null, status::ERROR);
    // A buffer that runs past the end of its allocation.
    let past_end = invoke(&mut k, SyscallNumber::GetSystemInfo, [buf + 8, 32, 0, 0]);
    assert_eq!(past_end, status::ERROR);
}

#[test]
fn test_system_info_unavailable_during_boot() {
    let mut k = kernel();
    k.syscalls_init().unwrap();
    assert_eq!(
        invoke(&mut k, SyscallNumber::GetSystemInfo, [0x2000_0000, 32, 0, 0]),
        status::UNAVAILABLE
    );
}

#[test]
fn test_unknown_syscalls() {
    type Snapshot = (MemoryStats, SchedulerStats, Vec<(ProcessId, ProcessState)>);

    fn snapshot(k: &Kernel<Simulator>) -> Snapshot {
        let processes = k.scheduler().processes().map(|p| (p.id(), p.state())).collect();
        (k.memory_stats().unwrap(), k.scheduler_stats(), processes)
    }

    let mut k = running();
    k.process_create("worker", ENTRY, 1024, Priority::Normal, ProcessFlags::USER)
        .unwrap();
    assert_ne!(invoke(&mut k, SyscallNumber::MemoryAlloc, [64, 8, 0, 0]), status::NONE);
    let before = snapshot(&k);

    assert_eq!(k.syscall_invoke(6, [0; 4]), INVALID_SYSCALL);
    assert_eq!(k.syscall_invoke(usize::MAX, [0; 4]), INVALID_SYSCALL);

    // A trap with an unbound immediate is decoded and rejected.
    let traps = k.interrupt_stats().system_calls;
    let site = k.arch().trap_site(9);
    let mut frame = TrapFrame::call(site, [1, 2, 3, 4]);
    k.handle_trap(&mut frame);
    assert_eq!(frame.r0, INVALID_SYSCALL);
    assert_eq!(k.interrupt_stats().system_calls, traps + 1);
    assert_eq!(snapshot(&k), before);

    // Not an svc instruction at all.
    let mut frame = TrapFrame::call(0x1001, [0; 4]);
    k.handle_trap(&mut frame);
    assert_eq!(frame.r0, INVALID_SYSCALL);
    assert_eq!(k.interrupt_nesting_level(), 0);
    assert_eq!(snapshot(&k), before);
}

#[test]
fn test_syscall_rebinding() {
    fn answer(_k: &mut Kernel<Simulator>, args: [usize; 4]) -> usize {
        args[0] + 42
    }

    let mut k = running();
    k.syscall_register(SyscallNumber::SchedulerYield.number(), answer)
        .unwrap();
    assert_eq!(invoke(&mut k, SyscallNumber::SchedulerYield, [1, 0, 0, 0]), 43);
    assert_eq!(
        k.syscall_register(6, answer),
        Err(KernelError::InvalidParam)
    );
}

fn lock_scheduler(k: &mut Kernel<Simulator>) {
    k.scheduler_lock();
}

#[test]
fn test_irq_register_enable_dispatch() {
    let mut k = kernel();
    assert_eq!(
        k.interrupt_register(Irq::USART1, lock_scheduler, IrqPriority::High, "uart"),
        Err(KernelError::NotInitialized)
    );

    k.init().unwrap();
    k.interrupt_register(Irq::USART1, lock_scheduler, IrqPriority::High, "uart")
        .unwrap();
    assert_eq!(
        k.arch().irq_priority(Irq::USART1),
        IrqPriority::High.hardware_level()
    );
    let d = k.interrupt_descriptor(Irq::USART1);
    assert!(d.is_registered());
    assert!(!d.is_enabled());
    assert_eq!(d.name(), "uart");

    // Registered but masked: counted, not delivered.
    k.interrupt_dispatch(Irq::USART1);
    assert!(!k.scheduler_is_locked());

    k.interrupt_enable(Irq::USART1).unwrap();
    assert!(k.arch().irq_enabled(Irq::USART1));
    k.interrupt_dispatch(Irq::USART1);
    assert!(k.scheduler_is_locked());
    assert_eq!(k.interrupt_descriptor(Irq::USART1).count(), 2);
    assert_eq!(k.interrupt_stats().total_interrupts, 2);
    assert!(!k.interrupt_is_in_isr());

    k.interrupt_disable(Irq::USART1).unwrap();
    assert!(!k.arch().irq_enabled(Irq::USART1));
    let d = k.interrupt_descriptor(Irq::USART1);
    assert!(d.is_registered());
    assert_eq!(d.name(), "uart");
    assert_eq!(d.priority(), IrqPriority::High);

    k.scheduler_unlock();
    k.interrupt_dispatch(Irq::USART1);
    assert!(!k.scheduler_is_locked());
    k.interrupt_enable(Irq::USART1).unwrap();
    k.interrupt_dispatch(Irq::USART1);
    assert!(k.scheduler_is_locked());

    k.interrupt_unregister(Irq::USART1).unwrap();
    let d = k.interrupt_descriptor(Irq::USART1);
    assert!(!d.is_registered());
    assert_eq!(d.name(), "IRQ_36");
    assert_eq!(d.count(), 0);
}

#[test]
fn test_irq_out_of_range() {
    assert_eq!(Irq::new(63), Err(KernelError::InvalidParam));
    assert!(Irq::new(62).is_ok());
}

fn lock_if_nested(k: &mut Kernel<Simulator>) {
    if k.interrupt_nesting_level() == 2 {
        k.scheduler_lock();
    }
}

fn dispatch_timer(k: &mut Kernel<Simulator>) {
    k.interrupt_dispatch(Irq::TIM2);
}

#[test]
fn test_nested_dispatch() {
    let mut k = running();
    k.interrupt_register(Irq::USART1, dispatch_timer, IrqPriority::Low, "uart")
        .unwrap();
    k.interrupt_register(Irq::TIM2, lock_if_nested, IrqPriority::Highest, "tim2")
        .unwrap();
    k.interrupt_enable(Irq::USART1).unwrap();
    k.interrupt_enable(Irq::TIM2).unwrap();

    k.interrupt_dispatch(Irq::USART1);
    assert!(k.scheduler_is_locked());

    let stats = k.interrupt_stats();
    assert_eq!(stats.total_interrupts, 2);
    assert_eq!(stats.nested_interrupts, 1);
    assert_eq!(stats.max_nesting_level, 2);
    assert_eq!(stats.current_nesting_level, 0);
}

fn stop_current(k: &mut Kernel<Simulator>) {
    let id = current(k);
    k.process_terminate(id).unwrap();
}

fn wake_waiter(k: &mut Kernel<Simulator>) {
    let id = k
        .scheduler()
        .processes()
        .find(|p| p.name() == "waiter")
        .map(|p| p.id())
        .unwrap();
    k.process_unblock(id).unwrap();
    k.yield_now();
}

#[test]
fn test_irq_terminating_current_defers_switch() {
    let mut k = running();
    let worker = k
        .process_create("worker", ENTRY, 1024, Priority::High, ProcessFlags::USER)
        .unwrap();
    k.yield_now();
    assert_eq!(current(&k), worker);
    assert!(!k.arch().take_pendsv());
    let psp = k.arch().psp();

    k.interrupt_register(Irq::EXTI0, stop_current, IrqPriority::Normal, "button")
        .unwrap();
    k.interrupt_enable(Irq::EXTI0).unwrap();
    k.interrupt_dispatch(Irq::EXTI0);

    assert!(k.process_get_by_id(worker).is_none());
    assert!(k.process_get_current().is_none());
    assert_eq!(k.arch().psp(), psp);
    assert!(k.arch().take_pendsv());
    assert!(!k.scheduler().defers_switches());

    k.handle_exception(Exception::PendSv);
    assert_eq!(current(&k), ProcessId::IDLE);
    let idle = k.process_get_current().unwrap();
    assert_eq!(k.arch().psp(), idle.saved_sp());
    assert_eq!(idle.state(), ProcessState::Running);
}

#[test]
fn test_irq_wakeup_switches_on_pendsv() {
    let mut k = running();
    let waiter = k
        .process_create("waiter", ENTRY, 1024, Priority::High, ProcessFlags::USER)
        .unwrap();
    k.yield_now();
    k.process_block(waiter).unwrap();
    assert_eq!(current(&k), ProcessId::IDLE);
    let psp = k.arch().psp();
    let switches = k.scheduler_stats().context_switches;

    k.interrupt_register(Irq::USART1, wake_waiter, IrqPriority::Low, "uart")
        .unwrap();
    k.interrupt_enable(Irq::USART1).unwrap();
    k.interrupt_dispatch(Irq::USART1);

    assert_eq!(current(&k), ProcessId::IDLE);
    assert_eq!(k.arch().psp(), psp);
    assert_eq!(k.scheduler_stats().context_switches, switches);
    assert_eq!(k.process_get_by_id(waiter).unwrap().state(), ProcessState::Ready);
    assert!(k.arch().take_pendsv());

    k.handle_exception(Exception::PendSv);
    assert_eq!(current(&k), waiter);
    assert_eq!(k.arch().psp(), k.process_get_current().unwrap().saved_sp());
    assert_eq!(k.scheduler_stats().context_switches, switches + 1);

    // Outside interrupt context the switch is immediate again.
    k.process_block(waiter).unwrap();
    assert_eq!(current(&k), ProcessId::IDLE);
    assert!(!k.arch().take_pendsv());
}

fn heap_stack(k: &Kernel<Simulator>, id: ProcessId) -> HeapPtr {
    match k.process_get_by_id(id).unwrap().stack().owner {
        StackOwner::Heap(ptr) => ptr,
        StackOwner::Static => panic!("heap stack expected"),
    }
}

#[test]
fn test_stack_guard_detects_overflow() {
    let mut k = running();
    let worker = k
        .process_create("worker", ENTRY, 1024, Priority::High, ProcessFlags::USER)
        .unwrap();
    let spare = k
        .process_create("spare", ENTRY, 1024, Priority::Low, ProcessFlags::USER)
        .unwrap();
    assert_eq!(k.stack_check(), Ok(()));

    let ptr = heap_stack(&k, spare);
    k.heap_mut().payload_mut(ptr).unwrap()[8] ^= 0xFF;
    assert_eq!(
        k.stack_check(),
        Err(StackOverflow {
            id: spare,
            fault: GuardFault::PatternDamaged,
        })
    );
    k.heap_mut().payload_mut(ptr).unwrap()[8] ^= 0xFF;
    assert_eq!(k.stack_check(), Ok(()));

    k.yield_now();
    assert_eq!(current(&k), worker);
    let base = k.process_get_current().unwrap().stack().base;
    k.arch().restore_context(base + STACK_GUARD_SIZE);
    assert_eq!(
        k.stack_check(),
        Err(StackOverflow {
            id: worker,
            fault: GuardFault::PointerInGuard,
        })
    );
}

#[test]
#[should_panic(expected = "processor halted: stack overflow")]
fn test_tick_halts_on_damaged_guard() {
    let mut k = running();
    let worker = k
        .process_create("worker", ENTRY, 1024, Priority::High, ProcessFlags::USER)
        .unwrap();
    k.yield_now();
    k.tick_handler();
    assert_eq!(k.state(), SystemState::Running);

    let ptr = heap_stack(&k, worker);
    let guard = &mut k.heap_mut().payload_mut(ptr).unwrap()[..STACK_GUARD_SIZE];
    guard.fill(0x55);
    k.tick_handler();
}

#[test]
#[should_panic(expected = "processor halted: HardFault")]
fn test_fatal_exception_halts() {
    let mut k = running();
    k.handle_exception(Exception::HardFault);
}

#[test]
#[should_panic(expected = "processor halted: shutdown")]
fn test_shutdown_halts() {
    let mut k = running();
    k.shutdown();
}

#[test]
fn test_process_state_changes_are_critical() {
    let mut k = running();
    let worker = k
        .process_create("worker", ENTRY, 1024, Priority::Low, ProcessFlags::USER)
        .unwrap();
    k.interrupt_global_enable();

    let ops: [fn(&mut Kernel<Simulator>, ProcessId) -> KernelResult<()>; 4] = [
        Kernel::process_suspend,
        Kernel::process_resume,
        Kernel::process_block,
        Kernel::process_unblock,
    ];
    for op in ops {
        let masks = k.arch().mask_count();
        op(&mut k, worker).unwrap();
        assert_eq!(k.arch().mask_count(), masks + 1);
        assert!(!k.arch().interrupts_masked());
        assert_eq!(k.critical_nesting(), 0);
    }
    assert_eq!(k.process_get_by_id(worker).unwrap().state(), ProcessState::Ready);
}

#[test]
fn test_critical_nesting() {
    let mut k = running();
    k.interrupt_global_enable();
    assert!(!k.arch().interrupts_masked());

    k.enter_critical();
    k.enter_critical();
    assert_eq!(k.critical_nesting(), 2);
    k.exit_critical();
    assert!(k.arch().interrupts_masked());
    k.exit_critical();
    assert!(!k.arch().interrupts_masked());

    let nesting = k.critical(|k| {
        assert!(k.arch().interrupts_masked());
        k.critical_nesting()
    });
    assert_eq!(nesting, 1);
    assert_eq!(k.critical_nesting(), 0);
    assert!(!k.arch().interrupts_masked());

    // Kernel operations leave an already-masked state masked.
    k.interrupt_global_disable();
    k.alloc(16, AllocFlags::empty()).unwrap();
    assert!(k.arch().interrupts_masked());
}
