//! Vector Numbering
//!
//! External interrupt lines of the STM32WB55 application core, their
//! priority levels, and the Cortex-M system exceptions the kernel handles.

use core::fmt;

use crate::error::{KernelError, KernelResult};

/// External interrupt lines on this part.
pub const IRQ_COUNT: usize = 63;

/// Implemented NVIC priority bits (upper nibble of the priority byte).
pub const PRIORITY_SHIFT: u8 = 4;

/// SVCall runs at the highest level so system calls are never delayed.
pub const SVCALL_PRIORITY: u8 = 0x00;

/// SysTick sits in the middle of the range.
pub const SYSTICK_PRIORITY: u8 = 0x80;

/// PendSV is the lowest so context switches happen after everything else.
pub const PENDSV_PRIORITY: u8 = 0xFF;

/// An external interrupt number, always below [`IRQ_COUNT`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Irq(u8);

impl Irq {
    pub const WWDG: Self = Self(0);
    pub const PVD_PVM: Self = Self(1);
    pub const TAMP_STAMP_LSECSS: Self = Self(2);
    pub const RTC_WKUP: Self = Self(3);
    pub const FLASH: Self = Self(4);
    pub const RCC: Self = Self(5);
    pub const EXTI0: Self = Self(6);
    pub const EXTI1: Self = Self(7);
    pub const EXTI2: Self = Self(8);
    pub const EXTI3: Self = Self(9);
    pub const EXTI4: Self = Self(10);
    pub const DMA1_CH1: Self = Self(11);
    pub const DMA1_CH2: Self = Self(12);
    pub const DMA1_CH3: Self = Self(13);
    pub const DMA1_CH4: Self = Self(14);
    pub const DMA1_CH5: Self = Self(15);
    pub const DMA1_CH6: Self = Self(16);
    pub const DMA1_CH7: Self = Self(17);
    pub const ADC1: Self = Self(18);
    pub const USB_HP: Self = Self(19);
    pub const USB_LP: Self = Self(20);
    pub const C2SEV_PWR_C2H: Self = Self(21);
    pub const COMP: Self = Self(22);
    pub const EXTI9_5: Self = Self(23);
    pub const TIM1_BRK: Self = Self(24);
    pub const TIM1_UP_TIM16: Self = Self(25);
    pub const TIM1_TRG_COM_TIM17: Self = Self(26);
    pub const TIM1_CC: Self = Self(27);
    pub const TIM2: Self = Self(28);
    pub const PKA: Self = Self(29);
    pub const I2C1_EV: Self = Self(30);
    pub const I2C1_ER: Self = Self(31);
    pub const I2C3_EV: Self = Self(32);
    pub const I2C3_ER: Self = Self(33);
    pub const SPI1: Self = Self(34);
    pub const SPI2: Self = Self(35);
    pub const USART1: Self = Self(36);
    pub const LPUART1: Self = Self(37);
    pub const SAI1: Self = Self(38);
    pub const TSC: Self = Self(39);
    pub const EXTI15_10: Self = Self(40);
    pub const RTC_ALARM: Self = Self(41);
    pub const CRS: Self = Self(42);
    pub const PWR_SOTF_BLEACT_802ACT_RFPHASE: Self = Self(43);
    pub const IPCC_C1_RX: Self = Self(44);
    pub const IPCC_C1_TX: Self = Self(45);
    pub const HSEM: Self = Self(46);
    pub const LPTIM1: Self = Self(47);
    pub const LPTIM2: Self = Self(48);
    pub const LCD: Self = Self(49);
    pub const QUADSPI: Self = Self(50);
    pub const AES1: Self = Self(51);
    pub const AES2: Self = Self(52);
    pub const RNG: Self = Self(53);
    pub const FPU: Self = Self(54);
    pub const DMA2_CH1: Self = Self(55);
    pub const DMA2_CH2: Self = Self(56);
    pub const DMA2_CH3: Self = Self(57);
    pub const DMA2_CH4: Self = Self(58);
    pub const DMA2_CH5: Self = Self(59);
    pub const DMA2_CH6: Self = Self(60);
    pub const DMA2_CH7: Self = Self(61);
    pub const DMAMUX1_OVR: Self = Self(62);

    /// Validate a raw line number.
    pub const fn new(n: u16) -> KernelResult<Self> {
        if (n as usize) < IRQ_COUNT {
            Ok(Self(n as u8))
        } else {
            Err(KernelError::InvalidParam)
        }
    }

    pub const fn number(self) -> u8 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Every line, lowest number first.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..IRQ_COUNT as u8).map(Self)
    }
}

impl fmt::Debug for Irq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IRQ_{}", self.0)
    }
}

/// Software priority levels; `Highest` preempts everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum IrqPriority {
    Highest = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
    Lowest = 4,
}

impl IrqPriority {
    /// Value written to the NVIC priority byte.
    pub const fn hardware_level(self) -> u8 {
        (self as u8) << PRIORITY_SHIFT
    }
}

/// System exceptions routed into the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    Nmi,
    HardFault,
    MemManage,
    BusFault,
    UsageFault,
    SvCall,
    PendSv,
    SysTick,
}

impl Exception {
    /// Map a cortex-m-rt style exception number (negative IRQn).
    pub fn from_irqn(irqn: i16) -> Option<Self> {
        Some(match irqn {
            -14 => Self::Nmi,
            -13 => Self::HardFault,
            -12 => Self::MemManage,
            -11 => Self::BusFault,
            -10 => Self::UsageFault,
            -5 => Self::SvCall,
            -2 => Self::PendSv,
            -1 => Self::SysTick,
            _ => return None,
        })
    }

    /// Faults the kernel cannot recover from in-band.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::Nmi | Self::HardFault | Self::MemManage | Self::BusFault | Self::UsageFault
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Nmi => "NMI",
            Self::HardFault => "HardFault",
            Self::MemManage => "MemManage",
            Self::BusFault => "BusFault",
            Self::UsageFault => "UsageFault",
            Self::SvCall => "SVCall",
            Self::PendSv => "PendSV",
            Self::SysTick => "SysTick",
        }
    }
}
