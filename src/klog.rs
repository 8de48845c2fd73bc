//! Kernel Console and Logger
//!
//! A single text sink shared by the `kprint!` macros and the `log` facade.
//! On the board the sink is ITM stimulus port 0; on the host it is whatever
//! the caller installs (usually stdout).
//!
//! # Security Considerations
//! - Output only; nothing is ever read back through the console
//! - The sink sits behind a spinlock, so lines from different contexts do
//!   not interleave mid-record

use core::fmt::{self, Write};

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

/// Destination for console text.
pub type Sink = fn(&str);

pub struct Console {
    sink: Option<Sink>,
}

impl Console {
    /// A console that drops everything until a sink is attached.
    pub const fn new() -> Self {
        Self { sink: None }
    }

    pub fn attach(&mut self, sink: Sink) {
        self.sink = Some(sink);
    }

    pub fn is_attached(&self) -> bool {
        self.sink.is_some()
    }

    pub fn write_str(&self, s: &str) {
        if let Some(sink) = self.sink {
            sink(s);
        }
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Console::write_str(self, s);
        Ok(())
    }
}

/// Global console protected by spinlock
pub static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

/// Print macro for kernel output
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let mut console = $crate::klog::CONSOLE.lock();
        let _ = write!(console, $($arg)*);
    }};
}

/// Println macro for kernel output
#[macro_export]
macro_rules! kprintln {
    () => {
        $crate::kprint!("\n")
    };
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let mut console = $crate::klog::CONSOLE.lock();
        let _ = write!(console, $($arg)*);
        let _ = console.write_str("\n");
    }};
}

/// `log` backend writing `[LEVEL] target: message` lines to the console.
pub struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // A record raised while the console is held (an interrupt landing
        // inside kprint!) is dropped.
        let Some(mut console) = CONSOLE.try_lock() else {
            return;
        };
        let _ = writeln!(
            console,
            "[{:<5}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// Attach `sink` and install the kernel logger. Fails if some logger is
/// already installed; the sink is attached either way.
pub fn init(sink: Sink, level: LevelFilter) -> Result<(), SetLoggerError> {
    CONSOLE.lock().attach(sink);
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
