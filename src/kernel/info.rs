use core::fmt;

use crate::error::KernelError;

/// Lifecycle of the kernel as a whole.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SystemState {
    #[default]
    Boot = 0,
    Init = 1,
    Running = 2,
    Sleep = 3,
    Error = 4,
    Shutdown = 5,
}

impl TryFrom<u32> for SystemState {
    type Error = KernelError;

    fn try_from(raw: u32) -> Result<SystemState, KernelError> {
        Ok(match raw {
            0 => SystemState::Boot,
            1 => SystemState::Init,
            2 => SystemState::Running,
            3 => SystemState::Sleep,
            4 => SystemState::Error,
            5 => SystemState::Shutdown,
            _ => return Err(KernelError::InvalidParam),
        })
    }
}

/// Last boot step reached. Stays on the failing step if boot aborts.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum BootStage {
    #[default]
    Start = 0,
    HardwareInit = 1,
    ClockInit = 2,
    MemoryInit = 3,
    InterruptInit = 4,
    SchedulerInit = 5,
    Complete = 6,
}

impl BootStage {
    pub fn name(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::HardwareInit => "hardware",
            Self::ClockInit => "clock",
            Self::MemoryInit => "memory",
            Self::InterruptInit => "interrupt",
            Self::SchedulerInit => "scheduler",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for BootStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Snapshot handed out by the `get_system_info` system call.
///
/// On the wire it is seven little-endian `u32` words in field order; the
/// CPU usage occupies the low byte of the last word.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SystemInfo {
    pub boot_time_ms: u32,
    pub uptime_ms: u32,
    pub state: SystemState,
    pub boot_stage: BootStage,
    pub free_memory: u32,
    pub total_memory: u32,
    pub cpu_usage_percent: u8,
}

impl SystemInfo {
    /// Encoded size in bytes.
    pub const SIZE: usize = 7 * 4;

    fn words(&self) -> [u32; 7] {
        [
            self.boot_time_ms,
            self.uptime_ms,
            self.state as u32,
            self.boot_stage as u32,
            self.free_memory,
            self.total_memory,
            u32::from(self.cpu_usage_percent),
        ]
    }

    /// Write the record into the front of `buf`. Returns `None` if `buf` is
    /// shorter than [`SystemInfo::SIZE`].
    pub fn encode(&self, buf: &mut [u8]) -> Option<usize> {
        let out = buf.get_mut(..Self::SIZE)?;
        for (chunk, word) in out.chunks_exact_mut(4).zip(self.words()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        Some(Self::SIZE)
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        let raw = buf.get(..Self::SIZE)?;
        let mut words = [0u32; 7];
        for (word, chunk) in words.iter_mut().zip(raw.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        let boot_stage = match words[3] {
            0 => BootStage::Start,
            1 => BootStage::HardwareInit,
            2 => BootStage::ClockInit,
            3 => BootStage::MemoryInit,
            4 => BootStage::InterruptInit,
            5 => BootStage::SchedulerInit,
            6 => BootStage::Complete,
            _ => return None,
        };
        Some(Self {
            boot_time_ms: words[0],
            uptime_ms: words[1],
            state: SystemState::try_from(words[2]).ok()?,
            boot_stage,
            free_memory: words[4],
            total_memory: words[5],
            cpu_usage_percent: u8::try_from(words[6]).ok()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_layout() {
        let info = SystemInfo {
            boot_time_ms: 3,
            uptime_ms: 0x0102_0304,
            state: SystemState::Running,
            boot_stage: BootStage::Complete,
            free_memory: 1000,
            total_memory: 32768,
            cpu_usage_percent: 42,
        };
        let mut buf = [0xAA; 32];
        assert_eq!(info.encode(&mut buf), Some(SystemInfo::SIZE));
        assert_eq!(&buf[4..8], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&buf[8..12], &[2, 0, 0, 0]);
        assert_eq!(&buf[24..28], &[42, 0, 0, 0]);
        assert_eq!(&buf[28..], &[0xAA; 4]);
        assert_eq!(SystemInfo::decode(&buf), Some(info));
    }

    #[test]
    fn test_short_buffer() {
        let mut buf = [0u8; SystemInfo::SIZE - 1];
        assert_eq!(SystemInfo::default().encode(&mut buf), None);
        assert_eq!(SystemInfo::decode(&buf), None);
    }

    #[test]
    fn test_state_from_raw() {
        assert_eq!(SystemState::try_from(4), Ok(SystemState::Error));
        assert_eq!(SystemState::try_from(6), Err(KernelError::InvalidParam));
    }

    #[test]
    fn test_stage_order() {
        assert!(BootStage::ClockInit < BootStage::MemoryInit);
        assert_eq!(BootStage::SchedulerInit.to_string(), "scheduler");
    }
}
