// Shared Console Module
// One lock serializes every diagnostic line written by the telemetry task, the
// power task and bootstrap. A line is formatted before the lock is taken and the
// lock is released as soon as the sink returns, so it is never held across a
// delay or a non-returning call.

use core::cell::RefCell;
use core::fmt;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use log::Level;

/// Destination for complete diagnostic lines
pub trait LineSink: Send {
    fn write_line(&mut self, level: Level, line: &str);
}

/// Forwards lines to the `log` facade (EspLogger / UART on the device)
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl LineSink for LogSink {
    fn write_line(&mut self, level: Level, line: &str) {
        log::log!(target: "soil", level, "{}", line);
    }
}

pub struct Console<S: LineSink> {
    sink: Mutex<CriticalSectionRawMutex, RefCell<S>>,
}

impl<S: LineSink> Console<S> {
    pub const fn new(sink: S) -> Self {
        Self {
            sink: Mutex::new(RefCell::new(sink)),
        }
    }

    /// Write one line atomically with respect to every other console user.
    /// Waits for the lock indefinitely rather than dropping the line.
    #[cfg(feature = "diagnostics")]
    pub fn line(&self, level: Level, args: fmt::Arguments<'_>) {
        let line = std::fmt::format(args);
        self.sink
            .lock(|sink| sink.borrow_mut().write_line(level, &line));
    }

    #[cfg(not(feature = "diagnostics"))]
    #[inline(always)]
    pub fn line(&self, _level: Level, _args: fmt::Arguments<'_>) {}

    /// Run `f` with exclusive access to the sink
    pub fn with_sink<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        self.sink.lock(|sink| f(&mut sink.borrow_mut()))
    }
}

#[macro_export]
macro_rules! console_error {
    ($console:expr, $($arg:tt)+) => {
        $console.line(::log::Level::Error, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! console_warn {
    ($console:expr, $($arg:tt)+) => {
        $console.line(::log::Level::Warn, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! console_info {
    ($console:expr, $($arg:tt)+) => {
        $console.line(::log::Level::Info, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! console_debug {
    ($console:expr, $($arg:tt)+) => {
        $console.line(::log::Level::Debug, format_args!($($arg)+))
    };
}
