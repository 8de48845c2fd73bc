//! Firmware Configuration
//!
//! Board sizing for the TweaknGeek (STM32WB55RG) and the handful of kernel
//! knobs that can be chosen when the kernel object is built.
//!
//! Everything here is fixed at compile time. There is no persistent storage
//! the kernel could read a configuration from.

use log::LevelFilter;

use crate::sched::TieBreak;

/// Firmware version string reported in the boot banner.
pub const VERSION: &str = "1.0.0";

/// Core clock after PLL configuration.
pub const CPU_FREQUENCY_HZ: u32 = 64_000_000;

/// Total flash on the part.
pub const FLASH_SIZE: usize = 1024 * 1024;

/// Total SRAM on the part (SRAM1 + SRAM2).
pub const SRAM_SIZE: usize = 256 * 1024;

/// Bytes handed to the kernel heap.
pub const HEAP_SIZE: usize = 32 * 1024;

/// Main (handler mode) stack size.
pub const STACK_SIZE: usize = 8 * 1024;

/// Process table capacity, idle included.
pub const MAX_PROCESSES: usize = 16;

/// System timer frequency.
pub const SYSTEM_TICK_HZ: u32 = 1000;

/// Ticks a process may run before it is preempted.
pub const DEFAULT_TIME_SLICE: u32 = 10;

/// Smallest stack a process may be created with.
pub const MIN_STACK_SIZE: usize = 512;

/// Stack reserved for the idle process.
pub const IDLE_STACK_SIZE: usize = 1024;

/// Largest single allocation the `memory_alloc` system call accepts.
pub const MAX_SYSCALL_ALLOC: usize = 1024 * 1024;

/// Where the vector table sits (start of flash).
pub const VECTOR_TABLE_BASE: usize = 0x0800_0000;

/// Kernel tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Quantum handed to a process each time it is scheduled.
    pub time_slice: u32,
    /// How equal-priority candidates are ordered.
    pub tie_break: TieBreak,
    /// Frequency the system timer is programmed to.
    pub tick_hz: u32,
    /// Maximum level the kernel logger lets through.
    pub log_level: LevelFilter,
}

impl KernelConfig {
    pub const DEFAULT: Self = Self {
        time_slice: DEFAULT_TIME_SLICE,
        tie_break: TieBreak::NewestFirst,
        tick_hz: SYSTEM_TICK_HZ,
        log_level: LevelFilter::Info,
    };

    /// Milliseconds represented by one tick, never less than one.
    pub const fn ms_per_tick(&self) -> u32 {
        if self.tick_hz == 0 || self.tick_hz >= 1000 {
            1
        } else {
            1000 / self.tick_hz
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_board() {
        let config = KernelConfig::default();
        assert_eq!(config.time_slice, 10);
        assert_eq!(config.tick_hz, 1000);
        assert_eq!(config.ms_per_tick(), 1);
        assert_eq!(config.tie_break, TieBreak::NewestFirst);
    }

    #[test]
    fn test_slow_tick() {
        let config = KernelConfig {
            tick_hz: 100,
            ..KernelConfig::DEFAULT
        };
        assert_eq!(config.ms_per_tick(), 10);
    }

    #[test]
    fn test_heap_fits_in_sram() {
        assert!(HEAP_SIZE + STACK_SIZE < SRAM_SIZE);
        assert!(IDLE_STACK_SIZE >= MIN_STACK_SIZE);
    }
}
