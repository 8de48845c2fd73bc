//! Interrupt Descriptor Table
//!
//! One descriptor per external line plus the nesting and traffic counters
//! shared by every kernel entry. The table is generic over the context its
//! handlers receive so it does not depend on the kernel type.

use super::vector::{Irq, IrqPriority, IRQ_COUNT};
use crate::name::Name;

/// Descriptor names keep at most this many bytes.
pub const IRQ_NAME_LEN: usize = 15;

/// An interrupt handler. It runs with the kernel context borrowed mutably.
pub type IrqHandler<C> = fn(&mut C);

/// Handler installed on every unregistered line.
pub fn default_handler<C>(_context: &mut C) {}

pub struct InterruptDescriptor<C> {
    irq: Irq,
    handler: IrqHandler<C>,
    priority: IrqPriority,
    enabled: bool,
    registered: bool,
    count: u32,
    name: Name<IRQ_NAME_LEN>,
}

// Manual impls: a derive would require `C: Copy`.
impl<C> Clone for InterruptDescriptor<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for InterruptDescriptor<C> {}

impl<C> InterruptDescriptor<C> {
    const BLANK: Self = Self {
        irq: Irq::WWDG,
        handler: default_handler::<C>,
        priority: IrqPriority::Normal,
        enabled: false,
        registered: false,
        count: 0,
        name: Name::EMPTY,
    };

    fn reset(irq: Irq) -> Self {
        Self {
            irq,
            name: Name::from_fmt(format_args!("IRQ_{}", irq.number())),
            ..Self::BLANK
        }
    }

    pub fn irq(&self) -> Irq {
        self.irq
    }

    pub fn handler(&self) -> IrqHandler<C> {
        self.handler
    }

    pub fn priority(&self) -> IrqPriority {
        self.priority
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Times the line was dispatched since it was last registered.
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// A handler other than the default has been installed.
    pub fn is_registered(&self) -> bool {
        self.registered
    }
}

impl<C> core::fmt::Debug for InterruptDescriptor<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InterruptDescriptor")
            .field("irq", &self.irq)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .field("registered", &self.registered)
            .field("count", &self.count)
            .field("name", &self.name)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterruptStats {
    /// Interrupts and exceptions dispatched.
    pub total_interrupts: u32,
    /// Dispatches that arrived while another was in progress.
    pub nested_interrupts: u32,
    pub max_nesting_level: u32,
    pub current_nesting_level: u32,
    /// Supervisor-call traps taken.
    pub system_calls: u32,
}

pub struct InterruptTable<C> {
    descriptors: [InterruptDescriptor<C>; IRQ_COUNT],
    nesting: u32,
    stats: InterruptStats,
    initialized: bool,
}

impl<C> InterruptTable<C> {
    pub const fn new() -> Self {
        Self {
            descriptors: [InterruptDescriptor::BLANK; IRQ_COUNT],
            nesting: 0,
            stats: InterruptStats {
                total_interrupts: 0,
                nested_interrupts: 0,
                max_nesting_level: 0,
                current_nesting_level: 0,
                system_calls: 0,
            },
            initialized: false,
        }
    }

    /// Put every line back to its default descriptor and clear the counters.
    pub fn reset(&mut self) {
        for irq in Irq::all() {
            self.descriptors[irq.index()] = InterruptDescriptor::reset(irq);
        }
        self.nesting = 0;
        self.stats = InterruptStats::default();
        self.initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn descriptor(&self, irq: Irq) -> &InterruptDescriptor<C> {
        &self.descriptors[irq.index()]
    }

    pub fn register(&mut self, irq: Irq, handler: IrqHandler<C>, priority: IrqPriority, name: &str) {
        let d = &mut self.descriptors[irq.index()];
        d.handler = handler;
        d.registered = true;
        d.priority = priority;
        d.count = 0;
        d.name = Name::new(name);
    }

    pub fn unregister(&mut self, irq: Irq) {
        self.descriptors[irq.index()] = InterruptDescriptor::reset(irq);
    }

    pub fn set_enabled(&mut self, irq: Irq, enabled: bool) {
        self.descriptors[irq.index()].enabled = enabled;
    }

    pub fn set_priority(&mut self, irq: Irq, priority: IrqPriority) {
        self.descriptors[irq.index()].priority = priority;
    }

    fn push(&mut self) {
        self.nesting += 1;
        if self.nesting > 1 {
            self.stats.nested_interrupts = self.stats.nested_interrupts.wrapping_add(1);
        }
        self.stats.max_nesting_level = self.stats.max_nesting_level.max(self.nesting);
        self.stats.current_nesting_level = self.nesting;
    }

    /// Account a dispatch of `irq` and return the handler to run.
    ///
    /// A line that is disabled is counted but gets the default handler.
    pub fn enter(&mut self, irq: Irq) -> IrqHandler<C> {
        self.push();
        self.stats.total_interrupts = self.stats.total_interrupts.wrapping_add(1);
        let d = &mut self.descriptors[irq.index()];
        d.count = d.count.wrapping_add(1);
        if d.enabled {
            d.handler
        } else {
            default_handler::<C>
        }
    }

    /// Account a system exception (SysTick, PendSV).
    pub fn enter_exception(&mut self) {
        self.push();
        self.stats.total_interrupts = self.stats.total_interrupts.wrapping_add(1);
    }

    /// Account a supervisor call.
    pub fn enter_trap(&mut self) {
        self.push();
        self.stats.system_calls = self.stats.system_calls.wrapping_add(1);
    }

    pub fn exit(&mut self) {
        self.nesting = self.nesting.saturating_sub(1);
        self.stats.current_nesting_level = self.nesting;
    }

    pub fn nesting_level(&self) -> u32 {
        self.nesting
    }

    pub fn in_isr(&self) -> bool {
        self.nesting > 0
    }

    pub fn stats(&self) -> InterruptStats {
        self.stats
    }
}

impl<C> Default for InterruptTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        hits: u32,
    }

    fn bump(c: &mut Counter) {
        c.hits += 1;
    }

    fn table() -> InterruptTable<Counter> {
        let mut t = InterruptTable::new();
        t.reset();
        t
    }

    #[test]
    fn test_defaults_after_reset() {
        let t = table();
        let d = t.descriptor(Irq::TIM2);
        assert_eq!(d.name(), "IRQ_28");
        assert_eq!(d.priority(), IrqPriority::Normal);
        assert!(!d.is_enabled());
        assert!(!d.is_registered());
    }

    #[test]
    fn test_register_and_dispatch() {
        let mut t = table();
        let mut ctx = Counter::default();
        t.register(Irq::USART1, bump, IrqPriority::High, "console");
        t.set_enabled(Irq::USART1, true);
        let handler = t.enter(Irq::USART1);
        handler(&mut ctx);
        t.exit();
        assert_eq!(ctx.hits, 1);
        assert_eq!(t.descriptor(Irq::USART1).count(), 1);
        assert_eq!(t.descriptor(Irq::USART1).name(), "console");
        assert_eq!(t.stats().total_interrupts, 1);
        assert!(!t.in_isr());
    }

    #[test]
    fn test_disabled_line_not_delivered() {
        let mut t = table();
        let mut ctx = Counter::default();
        t.register(Irq::EXTI0, bump, IrqPriority::Low, "button");
        (t.enter(Irq::EXTI0))(&mut ctx);
        t.exit();
        assert_eq!(ctx.hits, 0);
        assert_eq!(t.descriptor(Irq::EXTI0).count(), 1);
    }

    #[test]
    fn test_unregister_restores_default() {
        let mut t = table();
        t.register(Irq::SPI1, bump, IrqPriority::Highest, "spi");
        t.set_enabled(Irq::SPI1, true);
        t.unregister(Irq::SPI1);
        let d = t.descriptor(Irq::SPI1);
        assert!(!d.is_registered());
        assert!(!d.is_enabled());
        assert_eq!(d.name(), "IRQ_34");
    }

    #[test]
    fn test_nesting_stats() {
        let mut t = table();
        t.enter_exception();
        t.enter(Irq::TIM2);
        t.enter_trap();
        assert_eq!(t.nesting_level(), 3);
        t.exit();
        t.exit();
        t.exit();
        t.exit();
        let stats = t.stats();
        assert_eq!(stats.max_nesting_level, 3);
        assert_eq!(stats.nested_interrupts, 2);
        assert_eq!(stats.total_interrupts, 2);
        assert_eq!(stats.system_calls, 1);
        assert_eq!(stats.current_nesting_level, 0);
    }

    #[test]
    fn test_long_name_truncated() {
        let mut t = table();
        t.register(Irq::RNG, bump, IrqPriority::Low, "random-number-generator");
        assert_eq!(t.descriptor(Irq::RNG).name().len(), IRQ_NAME_LEN);
    }
}
