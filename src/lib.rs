//! TweaknGeek Kernel
//!
//! The execution substrate of the TweaknGeek firmware for the STM32WB55
//! (Cortex-M4): a first-fit kernel heap, a fixed-priority preemptive
//! scheduler, vectored interrupt dispatch and the `svc` system call trap.
//!
//! # Architecture
//! - Target: ARMv7E-M, thumbv7em-none-eabi
//! - One [`Kernel`] object owns all kernel state
//! - Hardware access goes through [`arch::Arch`]; the host
//!   [`arch::simulator::Simulator`] runs the same kernel under test
//!
//! # Boot order
//! hardware → clocks → system timer → heap → interrupts → system calls →
//! scheduler. See [`Kernel::init`].

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod arch;
pub mod config;
pub mod error;
pub mod irq;
pub mod kernel;
pub mod klog;
pub mod mm;
pub mod name;
pub mod sched;
pub mod syscall;

pub use error::{KernelError, KernelResult};
pub use kernel::Kernel;
