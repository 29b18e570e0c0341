// Agent Context Module
// The state both tasks share, created once at bootstrap and handed to each task
// behind an `Arc`:
//  - console: written by everyone, serialized by its own lock
//  - press: raised only by the PMU interrupt handler, taken only by the power task
//  - boot_count: read and advanced only by the telemetry task

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::console::{Console, LineSink};

/// Single-word occurrence flag between interrupt context and the power task
#[derive(Debug, Default)]
pub struct PressFlag(AtomicBool);

impl PressFlag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Interrupt-context side: one atomic store, no locking, no allocation
    #[inline(always)]
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Read-and-clear in one step so a press is processed exactly once
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Wake-cycle counter kept in RTC retained memory
///
/// The backing cell survives deep sleep and is reinitialized to 1 by the
/// bootloader on a cold boot. Only the telemetry task advances it.
#[derive(Debug, Clone, Copy)]
pub struct BootCounter {
    cell: &'static AtomicU32,
}

impl BootCounter {
    pub const fn new(cell: &'static AtomicU32) -> Self {
        Self { cell }
    }

    pub fn current(&self) -> u32 {
        self.cell.load(Ordering::Acquire)
    }

    /// Count one successful publish; saturates instead of wrapping so the value
    /// never decreases while the device stays powered
    pub fn advance(&self) -> u32 {
        let next = self.current().saturating_add(1);
        self.cell.store(next, Ordering::Release);
        next
    }
}

pub struct AgentContext<S: LineSink> {
    pub console: Console<S>,
    pub press: PressFlag,
    pub boot_count: BootCounter,
}

impl<S: LineSink> AgentContext<S> {
    pub fn new(sink: S, boot_count: BootCounter) -> Self {
        Self {
            console: Console::new(sink),
            press: PressFlag::new(),
            boot_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn press_flag_is_consumed_once() {
        let flag = PressFlag::new();
        assert!(!flag.take());

        flag.raise();
        flag.raise();
        assert!(flag.is_raised());
        assert!(flag.take());
        assert!(!flag.take());
        assert!(!flag.is_raised());
    }

    #[test]
    fn boot_counter_advances_by_one() {
        static CELL: AtomicU32 = AtomicU32::new(1);
        let counter = BootCounter::new(&CELL);
        assert_eq!(counter.current(), 1);
        assert_eq!(counter.advance(), 2);
        assert_eq!(counter.advance(), 3);
        assert_eq!(counter.current(), 3);
    }

    #[test]
    fn boot_counter_saturates() {
        static CELL: AtomicU32 = AtomicU32::new(u32::MAX);
        let counter = BootCounter::new(&CELL);
        assert_eq!(counter.advance(), u32::MAX);
        assert_eq!(counter.current(), u32::MAX);
    }
}
