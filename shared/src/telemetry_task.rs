// Telemetry Task Module
// The wake-cycle loop: keep the session up, take one reading, publish it and
// go back to deep sleep. A failed publish is dropped and the loop tries again
// on the next pass; the only way out is a successful publish.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::config::AgentConfig;
use crate::connectivity::{ConnectivityManager, Indicator, NetworkLink, SessionTransport};
use crate::console::LineSink;
use crate::context::AgentContext;
use crate::telemetry::TelemetryRecord;
use crate::update::{drain_events, UpdateService};
use crate::{console_debug, console_error, console_info, Delay};

/// Soil probe readings
pub trait SoilProbe {
    fn soil_temperature(&mut self) -> f32; // °C
    fn soil_moisture(&mut self) -> f32; // %
}

pub trait BatteryGauge {
    /// Battery voltage in volts
    fn battery_voltage(&mut self) -> Result<f32>;
}

pub trait SleepController {
    /// Arm the wake timer and enter deep sleep. Execution restarts from reset.
    fn deep_sleep(&mut self, wake_after: Duration) -> !;
}

/// How one pass of the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Association was lost and has been restored; nothing was sampled
    Reassociated,
    /// Reading was dropped, the loop goes round again
    PublishFailed,
    /// Reading delivered; the caller must finish with `deep_sleep`
    DeepSleep { wake_after: Duration },
}

pub struct TelemetryTask<S, N, T, I, D, P, B, U, Z>
where
    S: LineSink,
{
    ctx: Arc<AgentContext<S>>,
    net: ConnectivityManager<S, N, T, I, D>,
    probe: P,
    gauge: B,
    updates: U,
    sleeper: Z,
    delay: D,
    topic: String,
    sleep_duration: Duration,
    period: Duration,
}

impl<S, N, T, I, D, P, B, U, Z> TelemetryTask<S, N, T, I, D, P, B, U, Z>
where
    S: LineSink,
    N: NetworkLink,
    T: SessionTransport,
    I: Indicator,
    D: Delay,
    P: SoilProbe,
    B: BatteryGauge,
    U: UpdateService,
    Z: SleepController,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: Arc<AgentContext<S>>,
        net: ConnectivityManager<S, N, T, I, D>,
        probe: P,
        gauge: B,
        updates: U,
        sleeper: Z,
        delay: D,
        config: &AgentConfig,
    ) -> Self {
        Self {
            ctx,
            net,
            probe,
            gauge,
            updates,
            sleeper,
            delay,
            topic: config.telemetry_topic.clone(),
            sleep_duration: config.sleep_duration(),
            period: config.task_period(),
        }
    }

    pub fn connectivity(&self) -> &ConnectivityManager<S, N, T, I, D> {
        &self.net
    }

    /// One pass of the loop, up to but not including the terminal transition
    pub fn run_cycle(&mut self) -> CycleOutcome {
        drain_events(&mut self.updates, &self.ctx.console);

        if !self.net.is_session_connected() {
            self.net.retry_session_with_backoff();
        }
        self.net.poll_session();

        if !self.net.is_associated() {
            self.net.ensure_associated(&mut || {});
            return CycleOutcome::Reassociated;
        }

        match self.sample_and_publish() {
            Ok(payload) => {
                console_info!(self.ctx.console, "{}", payload);
                console_info!(self.ctx.console, "Going to sleep until next TX...");
                self.ctx.boot_count.advance();
                CycleOutcome::DeepSleep {
                    wake_after: self.sleep_duration,
                }
            }
            Err(e) => {
                console_error!(self.ctx.console, "Failed to publish data");
                console_error!(self.ctx.console, "{:#}", e);
                CycleOutcome::PublishFailed
            }
        }
    }

    pub fn run(mut self) -> ! {
        loop {
            if let CycleOutcome::DeepSleep { wake_after } = self.run_cycle() {
                console_debug!(self.ctx.console, "Deep sleep for {}s", wake_after.as_secs());
                self.sleeper.deep_sleep(wake_after);
            }
            self.delay.delay(self.period);
        }
    }

    fn sample_and_publish(&mut self) -> Result<String> {
        let soil_temperature = self.probe.soil_temperature();
        let soil_moisture = self.probe.soil_moisture();
        let battery_voltage = self.gauge.battery_voltage()?;

        let record = TelemetryRecord::new(
            self.ctx.boot_count.current(),
            soil_temperature,
            soil_moisture,
            battery_voltage,
        );
        let payload = record.to_payload()?;
        self.net.publish(&self.topic, &payload)?;
        Ok(payload)
    }
}
