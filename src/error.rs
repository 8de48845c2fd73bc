//! Kernel Error Type
//!
//! Every fallible kernel operation returns [`KernelResult`]. The numeric
//! status codes are what crosses the system call boundary.

use core::fmt;

/// Failure reasons shared by all kernel subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// An argument was out of range or otherwise unusable.
    InvalidParam,
    /// The heap or a fixed-size table is exhausted.
    OutOfMemory,
    /// The subsystem has not been initialized yet.
    NotInitialized,
    /// Hardware did not become ready in time.
    Timeout,
    /// The resource is in use.
    Busy,
    /// The operation is not valid in the current state.
    InvalidState,
}

impl KernelError {
    /// Numeric status code (0 is reserved for success).
    pub const fn status(self) -> i32 {
        match self {
            Self::NotInitialized | Self::InvalidState => -1,
            Self::InvalidParam => -2,
            Self::OutOfMemory => -3,
            Self::Timeout => -4,
            Self::Busy => -5,
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParam => write!(f, "invalid parameter"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::NotInitialized => write!(f, "not initialized"),
            Self::Timeout => write!(f, "timed out"),
            Self::Busy => write!(f, "resource busy"),
            Self::InvalidState => write!(f, "invalid state"),
        }
    }
}

/// Result alias used throughout the kernel.
pub type KernelResult<T> = Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_negative() {
        for e in [
            KernelError::InvalidParam,
            KernelError::OutOfMemory,
            KernelError::NotInitialized,
            KernelError::Timeout,
            KernelError::Busy,
            KernelError::InvalidState,
        ] {
            assert!(e.status() < 0);
        }
        assert_eq!(KernelError::OutOfMemory.status(), -3);
        assert_eq!(KernelError::Busy.status(), -5);
    }
}
