//! Priority Scheduler
//!
//! Fixed-priority preemptive scheduling over a slab of [`Pcb`]s.
//!
//! # Design
//! - PCBs live in a fixed table of `MAX_PROCESSES` slots; slot 0 is always
//!   the idle process. Only stacks come from the heap.
//! - Live PCBs are threaded on a doubly linked list (slab indices), newest
//!   at the head. Selection scans that list.
//! - The highest-priority Ready or Running process wins. Equal priorities
//!   are ordered by [`TieBreak`].
//! - Decisions are made on tick boundaries (quantum exhausted), on an
//!   explicit yield, or when the running process stops being runnable.
//!
//! # Invariants
//! - Exactly one PCB is Running while the scheduler runs, except for the
//!   window between terminating the running process and the reschedule
//!   that follows it.
//! - A stack is freed exactly once, when its process is terminated.
//! - Every stack starts with an intact guard at its low end.
//!
//! The scheduler records the address of its own idle stack, so it must not
//! move after [`Scheduler::init`].

use core::fmt;

use log::{debug, info, warn};

use super::process::{
    Pcb, Priority, ProcessFlags, ProcessId, ProcessState, StackOwner, StackRegion, NAME_LEN,
};
use crate::arch::{seed_initial_frame, Arch, Word};
use crate::config::{KernelConfig, DEFAULT_TIME_SLICE, IDLE_STACK_SIZE, MAX_PROCESSES, MIN_STACK_SIZE};
use crate::error::{KernelError, KernelResult};
use crate::mm::{check_guard, fill_guard, AllocFlags, GuardFault, Heap, HeapPtr};
use crate::name::Name;

const IDLE_SLOT: usize = 0;

/// Ordering among equal-priority candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// The most recently created process wins.
    #[default]
    NewestFirst,
    /// The scan starts after the current process and wraps, so equals take
    /// turns.
    RoundRobin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    /// Processes created since init (idle excluded).
    pub total_processes: u32,
    /// Processes alive now (idle excluded).
    pub active_processes: u32,
    pub context_switches: u32,
    /// Selection passes run by `preempt`.
    pub preemptions: u32,
    pub scheduler_ticks: u64,
    /// Ticks that landed while idle was running.
    pub idle_ticks: u64,
    pub idle_time_percent: u32,
}

/// A process whose stack ran into its guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackOverflow {
    pub id: ProcessId,
    pub fault: GuardFault,
}

impl fmt::Display for StackOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stack overflow in process {}: {}", self.id, self.fault)
    }
}

#[repr(C, align(8))]
struct IdleStack([u8; IDLE_STACK_SIZE]);

pub struct Scheduler {
    slots: [Option<Pcb>; MAX_PROCESSES],
    head: Option<usize>,
    current: Option<usize>,
    next_id: u32,
    time_slice: u32,
    tie_break: TieBreak,
    running: bool,
    locked: bool,
    /// Switches are handed to PendSV instead of made in place.
    defer_switches: bool,
    initialized: bool,
    stats: SchedulerStats,
    idle_stack: IdleStack,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            slots: [None; MAX_PROCESSES],
            head: None,
            current: None,
            next_id: 1,
            time_slice: DEFAULT_TIME_SLICE,
            tie_break: TieBreak::NewestFirst,
            running: false,
            locked: false,
            defer_switches: false,
            initialized: false,
            stats: SchedulerStats {
                total_processes: 0,
                active_processes: 0,
                context_switches: 0,
                preemptions: 0,
                scheduler_ticks: 0,
                idle_ticks: 0,
                idle_time_percent: 0,
            },
            idle_stack: IdleStack([0; IDLE_STACK_SIZE]),
        }
    }

    /// Reset all state and install the idle process.
    pub fn init<A: Arch>(&mut self, arch: &A, config: &KernelConfig) -> KernelResult<()> {
        self.slots = [None; MAX_PROCESSES];
        self.head = None;
        self.current = None;
        self.next_id = 1;
        self.time_slice = config.time_slice.max(1);
        self.tie_break = config.tie_break;
        self.running = false;
        self.locked = false;
        self.defer_switches = false;
        self.stats = SchedulerStats::default();

        let base = self.idle_stack.0.as_ptr() as Word;
        let entry = arch.idle_entry();
        if !fill_guard(&mut self.idle_stack.0) {
            return Err(KernelError::InvalidState);
        }
        let sp = seed_initial_frame(&mut self.idle_stack.0, base, entry)
            .ok_or(KernelError::InvalidState)?;
        self.slots[IDLE_SLOT] = Some(Pcb {
            id: ProcessId::IDLE,
            name: Name::new("idle"),
            state: ProcessState::Ready,
            priority: Priority::Idle,
            flags: ProcessFlags::SYSTEM,
            stack: StackRegion {
                base,
                size: IDLE_STACK_SIZE,
                owner: StackOwner::Static,
            },
            saved_sp: sp,
            entry,
            time_slice: self.time_slice,
            time_remaining: self.time_slice,
            total_runtime: 0,
            last_scheduled: 0,
            next: None,
            prev: None,
        });
        self.link_head(IDLE_SLOT);
        self.current = Some(IDLE_SLOT);
        self.initialized = true;
        debug!("sched: idle installed, slice {} ticks", self.time_slice);
        Ok(())
    }

    /// Begin scheduling with the idle process running.
    pub fn start<A: Arch>(&mut self, arch: &A) -> KernelResult<()> {
        if !self.initialized {
            return Err(KernelError::NotInitialized);
        }
        if let Some(idle) = self.slots[IDLE_SLOT].as_mut() {
            idle.state = ProcessState::Running;
            idle.time_remaining = idle.time_slice;
            arch.restore_context(idle.saved_sp);
        }
        self.current = Some(IDLE_SLOT);
        self.stats.scheduler_ticks = 0;
        self.running = true;
        info!("sched: started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    fn link_head(&mut self, slot: usize) {
        let old_head = self.head;
        if let Some(pcb) = self.slots[slot].as_mut() {
            pcb.next = old_head;
            pcb.prev = None;
        }
        if let Some(pcb) = old_head.and_then(|h| self.slots[h].as_mut()) {
            pcb.prev = Some(slot);
        }
        self.head = Some(slot);
    }

    fn unlink(&mut self, slot: usize) {
        let Some((next, prev)) = self.slots[slot].as_mut().map(|p| {
            let links = (p.next, p.prev);
            p.next = None;
            p.prev = None;
            links
        }) else {
            return;
        };
        match prev {
            Some(p) => {
                if let Some(pcb) = self.slots[p].as_mut() {
                    pcb.next = next;
                }
            }
            None => self.head = next,
        }
        if let Some(pcb) = next.and_then(|n| self.slots[n].as_mut()) {
            pcb.prev = prev;
        }
    }

    /// Slab indices in list order, newest first.
    fn list(&self) -> ([usize; MAX_PROCESSES], usize) {
        let mut order = [0; MAX_PROCESSES];
        let mut len = 0;
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            if len == MAX_PROCESSES {
                break;
            }
            order[len] = slot;
            len += 1;
            cursor = self.slots[slot].as_ref().and_then(|p| p.next);
        }
        (order, len)
    }

    fn slot_of(&self, id: ProcessId) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|p| p.id == id))
    }

    /// Pick the next process to run, falling back to idle.
    fn select(&self) -> usize {
        let (order, len) = self.list();
        let order = &order[..len];
        let start = match self.tie_break {
            TieBreak::NewestFirst => 0,
            TieBreak::RoundRobin => self
                .current
                .and_then(|c| order.iter().position(|&s| s == c))
                .map_or(0, |pos| pos + 1),
        };

        let mut choice: Option<(usize, Priority)> = None;
        for step in 0..len {
            let slot = order[(start + step) % len];
            let Some(pcb) = self.slots[slot].as_ref() else {
                continue;
            };
            if !pcb.state.is_runnable() {
                continue;
            }
            if let Some((_, best)) = choice {
                if pcb.priority <= best {
                    continue;
                }
            }
            choice = Some((slot, pcb.priority));
        }
        choice.map_or(IDLE_SLOT, |(slot, _)| slot)
    }

    /// Save the outgoing context (if any) and restore the incoming one.
    fn context_switch<A: Arch>(&mut self, arch: &A, from: Option<usize>, to: usize) {
        if let Some(pcb) = from.and_then(|f| self.slots[f].as_mut()) {
            pcb.saved_sp = arch.save_context();
        }
        if let Some(pcb) = self.slots[to].as_ref() {
            arch.restore_context(pcb.saved_sp);
        }
    }

    /// Run selection and switch if a different process wins. While
    /// switches are deferred this only pends PendSV.
    pub fn preempt<A: Arch>(&mut self, arch: &A) {
        if !self.running || self.locked {
            return;
        }
        if self.defer_switches {
            arch.pend_context_switch();
            return;
        }
        self.stats.preemptions = self.stats.preemptions.wrapping_add(1);

        let next = self.select();
        if self.current == Some(next) {
            if let Some(pcb) = self.slots[next].as_mut() {
                pcb.time_remaining = pcb.time_slice;
            }
            return;
        }

        let prev = self.current;
        if let Some(pcb) = prev.and_then(|p| self.slots[p].as_mut()) {
            if pcb.state == ProcessState::Running {
                pcb.state = ProcessState::Ready;
            }
        }
        let now = self.stats.scheduler_ticks;
        if let Some(pcb) = self.slots[next].as_mut() {
            pcb.state = ProcessState::Running;
            pcb.time_remaining = pcb.time_slice;
            pcb.last_scheduled = now;
            debug!("sched: switch to {} ({})", pcb.id, pcb.name);
        }
        self.current = Some(next);
        self.stats.context_switches = self.stats.context_switches.wrapping_add(1);
        self.context_switch(arch, prev, next);
    }

    /// Account one timer tick to the running process.
    pub fn tick<A: Arch>(&mut self, arch: &A) {
        if !self.running || self.locked {
            return;
        }
        self.stats.scheduler_ticks += 1;
        let Some(slot) = self.current else {
            return;
        };
        if slot == IDLE_SLOT {
            self.stats.idle_ticks += 1;
        }
        let expired = match self.slots[slot].as_mut() {
            Some(pcb) => {
                if pcb.time_remaining > 0 {
                    pcb.time_remaining -= 1;
                    pcb.total_runtime = pcb.total_runtime.wrapping_add(1);
                }
                pcb.time_remaining == 0
            }
            None => false,
        };
        if expired {
            self.preempt(arch);
        }
    }

    /// Give up the rest of the current quantum.
    pub fn yield_now<A: Arch>(&mut self, arch: &A) {
        if !self.running {
            return;
        }
        if let Some(pcb) = self.current.and_then(|c| self.slots[c].as_mut()) {
            pcb.time_remaining = 0;
        }
        self.preempt(arch);
    }

    /// Create a process with a fresh heap-allocated stack.
    ///
    /// # Arguments
    /// * `entry` - Address execution starts at
    /// * `stack_size` - Stack bytes, at least `MIN_STACK_SIZE`
    ///
    /// # Errors
    /// `InvalidParam` for a null entry or undersized stack, `OutOfMemory`
    /// when the process table or the heap is exhausted. Nothing changes on
    /// failure.
    pub fn create<const N: usize>(
        &mut self,
        heap: &mut Heap<N>,
        name: &str,
        entry: Word,
        stack_size: usize,
        priority: Priority,
        flags: ProcessFlags,
    ) -> KernelResult<ProcessId> {
        if !self.initialized {
            return Err(KernelError::NotInitialized);
        }
        if entry == 0 || stack_size < MIN_STACK_SIZE {
            warn!("sched: rejected create of '{}'", name);
            return Err(KernelError::InvalidParam);
        }
        let slot = (0..MAX_PROCESSES)
            .find(|&i| i != IDLE_SLOT && self.slots[i].is_none())
            .ok_or(KernelError::OutOfMemory)?;

        let stack = heap
            .alloc(stack_size, AllocFlags::ZERO)
            .ok_or(KernelError::OutOfMemory)?;
        let base = heap.address_of(stack);
        let seeded = heap.payload_mut(stack).and_then(|bytes| {
            if !fill_guard(bytes) {
                return None;
            }
            seed_initial_frame(bytes, base, entry)
        });
        let Some(sp) = seeded else {
            let _ = heap.free(stack);
            return Err(KernelError::InvalidState);
        };

        let id = ProcessId::new(self.next_id);
        self.next_id = self.next_id.wrapping_add(1).max(1);
        let state = if flags.contains(ProcessFlags::SUSPENDED) {
            ProcessState::Suspended
        } else {
            ProcessState::Ready
        };
        let pcb = Pcb {
            id,
            name: Name::<NAME_LEN>::new(name),
            state,
            priority,
            flags,
            stack: StackRegion {
                base,
                size: stack_size,
                owner: StackOwner::Heap(stack),
            },
            saved_sp: sp,
            entry,
            time_slice: self.time_slice,
            time_remaining: self.time_slice,
            total_runtime: 0,
            last_scheduled: 0,
            next: None,
            prev: None,
        };
        info!("sched: created {} '{}' {:?}", id, pcb.name, priority);
        self.slots[slot] = Some(pcb);
        self.link_head(slot);
        self.stats.total_processes = self.stats.total_processes.wrapping_add(1);
        self.stats.active_processes += 1;
        Ok(id)
    }

    /// Remove a process and release its stack. Terminating the running
    /// process reschedules immediately.
    pub fn terminate<A: Arch, const N: usize>(
        &mut self,
        arch: &A,
        heap: &mut Heap<N>,
        id: ProcessId,
    ) -> KernelResult<()> {
        let slot = self.slot_of(id).ok_or(KernelError::InvalidParam)?;
        if slot == IDLE_SLOT {
            warn!("sched: idle cannot be terminated");
            return Err(KernelError::InvalidParam);
        }

        self.unlink(slot);
        let mut owner = StackOwner::Static;
        if let Some(pcb) = self.slots[slot].as_mut() {
            pcb.state = ProcessState::Terminated;
            owner = pcb.stack.owner;
        }
        if let StackOwner::Heap(stack) = owner {
            if let Err(e) = heap.free(stack) {
                warn!("sched: stack of {} not released: {}", id, e);
            }
        }

        if self.current == Some(slot) {
            self.current = None;
            self.preempt(arch);
        }
        self.slots[slot] = None;
        self.stats.active_processes = self.stats.active_processes.saturating_sub(1);
        info!("sched: terminated {}", id);
        Ok(())
    }

    /// Move a non-idle process to `to`, rescheduling if it was running.
    fn park<A: Arch>(&mut self, arch: &A, id: ProcessId, to: ProcessState) -> KernelResult<()> {
        let slot = self.slot_of(id).ok_or(KernelError::InvalidParam)?;
        if slot == IDLE_SLOT {
            return Err(KernelError::InvalidParam);
        }
        if let Some(pcb) = self.slots[slot].as_mut() {
            match pcb.state {
                ProcessState::Ready | ProcessState::Running | ProcessState::Blocked => {}
                _ => return Err(KernelError::InvalidState),
            }
            if pcb.state == ProcessState::Blocked && to == ProcessState::Blocked {
                return Ok(());
            }
            pcb.state = to;
        }
        if self.current == Some(slot) {
            self.preempt(arch);
        }
        Ok(())
    }

    /// Return a parked process to Ready.
    fn unpark(&mut self, id: ProcessId, from: ProcessState) -> KernelResult<()> {
        let slot = self.slot_of(id).ok_or(KernelError::InvalidParam)?;
        match self.slots[slot].as_mut() {
            Some(pcb) if pcb.state == from => {
                pcb.state = ProcessState::Ready;
                Ok(())
            }
            _ => Err(KernelError::InvalidState),
        }
    }

    pub fn suspend<A: Arch>(&mut self, arch: &A, id: ProcessId) -> KernelResult<()> {
        self.park(arch, id, ProcessState::Suspended)
    }

    pub fn resume(&mut self, id: ProcessId) -> KernelResult<()> {
        self.unpark(id, ProcessState::Suspended)
    }

    pub fn block<A: Arch>(&mut self, arch: &A, id: ProcessId) -> KernelResult<()> {
        self.park(arch, id, ProcessState::Blocked)
    }

    pub fn unblock(&mut self, id: ProcessId) -> KernelResult<()> {
        self.unpark(id, ProcessState::Blocked)
    }

    /// Defer scheduling decisions until [`Scheduler::unlock`].
    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock<A: Arch>(&mut self, arch: &A) {
        self.locked = false;
        if self.running && self.current.is_none() {
            self.preempt(arch);
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Route switches through PendSV. Set while an external interrupt
    /// handler runs, since its entry does not save the process registers.
    pub fn set_defer_switches(&mut self, defer: bool) {
        self.defer_switches = defer;
    }

    pub fn defers_switches(&self) -> bool {
        self.defer_switches
    }

    pub fn current(&self) -> Option<&Pcb> {
        self.current.and_then(|c| self.slots[c].as_ref())
    }

    pub fn get(&self, id: ProcessId) -> Option<&Pcb> {
        self.slot_of(id).and_then(|s| self.slots[s].as_ref())
    }

    /// Whether `ptr` is the stack block of a live process.
    pub fn owns_stack(&self, ptr: HeapPtr) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|p| p.stack.owner == StackOwner::Heap(ptr))
    }

    fn stack_bytes<'a, const N: usize>(
        &'a self,
        heap: &'a Heap<N>,
        stack: &StackRegion,
    ) -> &'a [u8] {
        match stack.owner {
            StackOwner::Heap(ptr) => heap.payload(ptr).unwrap_or(&[]),
            StackOwner::Static => &self.idle_stack.0,
        }
    }

    /// Check the guard of process `id` against the stack pointer `sp`.
    /// Unknown processes pass.
    pub fn check_stack<const N: usize>(
        &self,
        heap: &Heap<N>,
        id: ProcessId,
        sp: Word,
    ) -> Result<(), StackOverflow> {
        let Some(pcb) = self.get(id) else {
            return Ok(());
        };
        check_guard(self.stack_bytes(heap, &pcb.stack), pcb.stack.base, sp)
            .map_err(|fault| StackOverflow { id, fault })
    }

    /// Check every live stack. The running process is measured against the
    /// live stack pointer, the others against their saved one.
    pub fn check_stacks<A: Arch, const N: usize>(
        &self,
        arch: &A,
        heap: &Heap<N>,
    ) -> Result<(), StackOverflow> {
        let running = if self.running {
            self.current().map(|p| p.id)
        } else {
            None
        };
        for pcb in self.processes() {
            let sp = if running == Some(pcb.id) {
                arch.save_context()
            } else {
                pcb.saved_sp
            };
            self.check_stack(heap, pcb.id, sp)?;
        }
        Ok(())
    }

    /// Live processes in scan order, newest first.
    pub fn processes(&self) -> impl Iterator<Item = &Pcb> + '_ {
        let (order, len) = self.list();
        (0..len).filter_map(move |i| self.slots[order[i]].as_ref())
    }

    /// Saved stack pointer of the running process.
    pub fn running_context(&self) -> Option<Word> {
        self.current().map(|p| p.saved_sp)
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = self.stats;
        if stats.scheduler_ticks > 0 {
            stats.idle_time_percent = (stats.idle_ticks * 100 / stats.scheduler_ticks) as u32;
        }
        stats
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
