// Power Task Module
// Watches the press flag raised by the PMU interrupt, asks the PMU what
// happened and powers the board off on a long press of the PEK button.
//
// Idle --flag--> Classifying --long press--> ShuttingDown (never returns)
//                     \--anything else--> Idle

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::config::AgentConfig;
use crate::console::LineSink;
use crate::context::AgentContext;
use crate::pmu::{IrqCause, IrqStatus};
use crate::{console_info, console_warn, Delay};

/// PMU operations the power task needs
pub trait PowerController {
    fn read_irq(&mut self) -> Result<IrqStatus>;

    /// Clear the latched PMU interrupt and re-enable the host-side edge interrupt
    fn rearm(&mut self) -> Result<()>;

    /// Cut power to the whole board. Does not return.
    fn power_off(&mut self) -> !;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Idle,
    Classifying,
    ShuttingDown,
}

/// Result of one pass over the press flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerStep {
    /// Flag was clear, nothing to do
    Idle,
    /// A press was classified and the interrupt source re-armed
    Rearmed(IrqCause),
    /// Long press: the caller must finish with `shut_down`
    ShutDown,
}

pub struct PowerTask<S, P, D>
where
    S: LineSink,
{
    ctx: Arc<AgentContext<S>>,
    controller: P,
    delay: D,
    state: PowerState,
    poll_period: Duration,
    shutdown_flush: Duration,
}

impl<S, P, D> PowerTask<S, P, D>
where
    S: LineSink,
    P: PowerController,
    D: Delay,
{
    pub fn new(ctx: Arc<AgentContext<S>>, controller: P, delay: D, config: &AgentConfig) -> Self {
        Self {
            ctx,
            controller,
            delay,
            state: PowerState::Idle,
            poll_period: config.task_period(),
            shutdown_flush: config.shutdown_flush(),
        }
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    /// One pass of the state machine. The flag is cleared before the PMU is
    /// queried and the interrupt source is re-armed whatever the outcome, so a
    /// single physical press is handled once.
    pub fn poll_once(&mut self) -> PowerStep {
        if !self.ctx.press.take() {
            return PowerStep::Idle;
        }
        self.state = PowerState::Classifying;

        let cause = match self.controller.read_irq() {
            Ok(status) => status.cause(),
            Err(e) => {
                console_warn!(self.ctx.console, "Failed to read PMU IRQ status: {:#}", e);
                IrqCause::None
            }
        };

        if let Err(e) = self.controller.rearm() {
            console_warn!(self.ctx.console, "Failed to re-arm PMU IRQ: {:#}", e);
        }

        if cause == IrqCause::LongPress {
            self.state = PowerState::ShuttingDown;
            console_info!(self.ctx.console, "Long press detected: Shutting down...");
            return PowerStep::ShutDown;
        }

        self.state = PowerState::Idle;
        PowerStep::Rearmed(cause)
    }

    /// Poll once and carry out a shutdown if one was requested
    pub fn service(&mut self) {
        if self.poll_once() == PowerStep::ShutDown {
            self.shut_down();
        }
    }

    /// Give the last console line time to drain, then cut power
    pub fn shut_down(&mut self) -> ! {
        self.delay.delay(self.shutdown_flush);
        self.controller.power_off()
    }

    pub fn run(mut self) -> ! {
        loop {
            self.service();
            self.delay.delay(self.poll_period);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use anyhow::anyhow;
    use std::collections::VecDeque;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Mutex;

    #[derive(Default)]
    struct PmuScript {
        statuses: VecDeque<Result<IrqStatus>>,
        reads: usize,
        rearms: usize,
        // Press flag state observed at the moment of each re-arm
        flag_at_rearm: Vec<bool>,
        // Delays already taken when power was cut
        power_offs: Vec<usize>,
    }

    #[derive(Clone, Default)]
    struct FakePmu {
        script: Arc<Mutex<PmuScript>>,
        flag: Option<Arc<AgentContext<MemorySink>>>,
        delay: RecordingDelay,
    }

    impl FakePmu {
        fn queue(&self, status: Result<IrqStatus>) {
            self.script.lock().unwrap().statuses.push_back(status);
        }
    }

    impl PowerController for FakePmu {
        fn read_irq(&mut self) -> Result<IrqStatus> {
            let mut script = self.script.lock().unwrap();
            script.reads += 1;
            script.statuses.pop_front().unwrap_or(Ok(IrqStatus::default()))
        }

        fn rearm(&mut self) -> Result<()> {
            let raised = self.flag.as_ref().map(|ctx| ctx.press.is_raised()).unwrap_or(false);
            let mut script = self.script.lock().unwrap();
            script.rearms += 1;
            script.flag_at_rearm.push(raised);
            Ok(())
        }

        fn power_off(&mut self) -> ! {
            let delays = self.delay.len();
            self.script.lock().unwrap().power_offs.push(delays);
            panic!("board powered off");
        }
    }

    const LONG_PRESS: IrqStatus = IrqStatus([0, 0, 0b01, 0, 0]);
    const SHORT_PRESS: IrqStatus = IrqStatus([0, 0, 0b10, 0, 0]);

    fn task() -> (
        PowerTask<MemorySink, FakePmu, RecordingDelay>,
        Arc<AgentContext<MemorySink>>,
        FakePmu,
    ) {
        let ctx = context(1);
        let pmu = FakePmu {
            flag: Some(ctx.clone()),
            ..FakePmu::default()
        };
        let task = PowerTask::new(
            ctx.clone(),
            pmu.clone(),
            pmu.delay.clone(),
            &AgentConfig::default(),
        );
        (task, ctx, pmu)
    }

    #[test]
    fn clear_flag_means_no_pmu_traffic() {
        let (mut task, _ctx, pmu) = task();
        assert_eq!(task.poll_once(), PowerStep::Idle);
        assert_eq!(pmu.script.lock().unwrap().reads, 0);
        assert_eq!(task.state(), PowerState::Idle);
    }

    #[test]
    fn long_press_requests_exactly_one_shutdown() {
        let (mut task, ctx, pmu) = task();
        pmu.queue(Ok(LONG_PRESS));
        ctx.press.raise();

        assert_eq!(task.poll_once(), PowerStep::ShutDown);
        assert_eq!(task.state(), PowerState::ShuttingDown);
        assert!(!ctx.press.is_raised());
        assert!(console_lines(&ctx).len() <= 1);
        if cfg!(feature = "diagnostics") {
            assert_eq!(console_lines(&ctx), vec!["Long press detected: Shutting down..."]);
        }

        // Same physical press is not processed twice
        assert_eq!(task.poll_once(), PowerStep::Idle);
    }

    #[test]
    fn other_causes_never_shut_down() {
        let (mut task, ctx, pmu) = task();
        pmu.queue(Ok(SHORT_PRESS));
        pmu.queue(Ok(IrqStatus([0x40, 0, 0, 0, 0])));
        pmu.queue(Ok(IrqStatus::default()));
        pmu.queue(Err(anyhow!("I2C timeout")));

        let expected = [IrqCause::ShortPress, IrqCause::Other, IrqCause::None, IrqCause::None];
        for cause in expected {
            ctx.press.raise();
            assert_eq!(task.poll_once(), PowerStep::Rearmed(cause));
            assert_eq!(task.state(), PowerState::Idle);
            assert!(!ctx.press.is_raised());
        }
        assert_eq!(pmu.script.lock().unwrap().rearms, 4);
    }

    #[test]
    fn flag_is_cleared_before_rearm() {
        let (mut task, ctx, pmu) = task();
        pmu.queue(Ok(SHORT_PRESS));
        pmu.queue(Ok(LONG_PRESS));

        ctx.press.raise();
        task.poll_once();
        ctx.press.raise();
        task.poll_once();

        let script = pmu.script.lock().unwrap();
        assert_eq!(script.rearms, 2);
        assert_eq!(script.flag_at_rearm, vec![false, false]);
    }

    #[test]
    fn press_during_classification_is_kept_for_next_pass() {
        let (mut task, ctx, pmu) = task();
        pmu.queue(Ok(SHORT_PRESS));
        ctx.press.raise();
        task.poll_once();

        // Edge arriving after the flag was taken stays pending
        ctx.press.raise();
        pmu.queue(Ok(LONG_PRESS));
        assert_eq!(task.poll_once(), PowerStep::ShutDown);
    }

    #[test]
    fn long_press_cuts_power_once_after_flush_delay() {
        let (task, ctx, pmu) = task();
        pmu.queue(Ok(LONG_PRESS));
        ctx.press.raise();

        let outcome = panic::catch_unwind(AssertUnwindSafe(move || {
            task.run();
        }));
        assert!(outcome.is_err());

        // Only the flush delay precedes power-off; no idle poll delay in between
        assert_eq!(pmu.script.lock().unwrap().power_offs, vec![1]);
        assert_eq!(pmu.delay.count_of(Duration::from_millis(100)), 1);
        assert_eq!(pmu.delay.len(), 1);
        assert_eq!(pmu.script.lock().unwrap().rearms, 1);
    }

    #[test]
    fn service_without_long_press_keeps_power_on() {
        let (mut task, ctx, pmu) = task();
        pmu.queue(Ok(SHORT_PRESS));
        ctx.press.raise();

        task.service();
        task.service();
        assert!(pmu.script.lock().unwrap().power_offs.is_empty());
        assert!(pmu.delay.is_empty());
    }
}
