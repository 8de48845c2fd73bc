//! Boot sequencing.

use log::{error, info};

use super::{BootRecord, BootStage, Kernel, SystemState};
use crate::arch::Arch;
use crate::config::{CPU_FREQUENCY_HZ, VERSION};
use crate::error::{KernelError, KernelResult};

impl<A: Arch> Kernel<A> {
    /// Bring the hardware and every kernel subsystem up, in order.
    ///
    /// Stops at the first failing step: the state becomes
    /// [`SystemState::Error`] and [`Kernel::boot_stage`] names the step that
    /// failed.
    pub fn init(&mut self) -> KernelResult<()> {
        if self.state != SystemState::Boot {
            return Err(KernelError::InvalidState);
        }
        self.boot = BootRecord {
            start_tick: self.ticks,
            ..BootRecord::new()
        };
        info!("kernel: TweaknGeek v{} booting", VERSION);

        if let Err(e) = self.boot_sequence() {
            self.state = SystemState::Error;
            self.boot.error = true;
            error!("kernel: boot failed at {} stage: {}", self.boot.stage, e);
            return Err(e);
        }

        self.boot.stage = BootStage::Complete;
        let elapsed = self.ticks.wrapping_sub(self.boot.start_tick);
        self.boot.boot_time_ms = self.ticks_to_ms(elapsed);
        self.state = SystemState::Init;
        info!("kernel: boot complete in {} ms", self.boot.boot_time_ms);
        Ok(())
    }

    fn boot_sequence(&mut self) -> KernelResult<()> {
        self.boot.stage = BootStage::HardwareInit;
        self.arch.init_hardware()?;

        self.boot.stage = BootStage::ClockInit;
        self.arch.init_clocks()?;
        self.arch.init_timer(CPU_FREQUENCY_HZ, self.config.tick_hz)?;

        self.boot.stage = BootStage::MemoryInit;
        self.memory_init()?;

        self.boot.stage = BootStage::InterruptInit;
        self.interrupt_init()?;
        self.syscalls_init()?;

        self.boot.stage = BootStage::SchedulerInit;
        self.scheduler_init()
    }

    /// Start scheduling. Only valid straight after a successful [`Kernel::init`].
    pub fn start(&mut self) -> KernelResult<()> {
        if self.state != SystemState::Init {
            return Err(KernelError::InvalidState);
        }
        self.scheduler_start()?;
        self.state = SystemState::Running;
        info!("kernel: running");
        Ok(())
    }

    /// Stop the system for good.
    pub fn shutdown(&mut self) -> ! {
        self.state = SystemState::Shutdown;
        info!("kernel: shutdown after {} ms", self.uptime_ms());
        self.enter_critical();
        self.arch.halt("shutdown")
    }

    pub fn boot_stage(&self) -> BootStage {
        self.boot.stage
    }

    pub fn boot_has_errors(&self) -> bool {
        self.boot.error
    }
}
