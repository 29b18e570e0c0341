// Startup Module
// PMU bring-up gates the rest of the boot sequence. Nothing past this point
// (radio, update service, agent tasks) is started on a board whose PMU does
// not answer; the caller gets `StartupError::PmuAbsent` and halts.

use core::fmt;

use anyhow::Result;

use crate::console::LineSink;
use crate::context::AgentContext;
use crate::pmu::{Axp192, Irq, Rail, RegisterBus};
use crate::{console_error, console_info};

#[derive(Debug)]
pub enum StartupError {
    /// Bus could not be opened or the chip id did not match; fatal
    PmuAbsent(anyhow::Error),
    /// PMU answered but rejected its run configuration
    PmuSetup(anyhow::Error),
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupError::PmuAbsent(e) => write!(f, "AXP192 not detected: {:#}", e),
            StartupError::PmuSetup(e) => write!(f, "AXP192 setup failed: {:#}", e),
        }
    }
}

impl std::error::Error for StartupError {}

/// Probe and configure the PMU, then hand it to `launch`.
///
/// `launch` starts everything else and is only called once the PMU is in its
/// run configuration: LoRa and GPS rails off, battery ADC on, stale IRQs
/// cleared and the long-press IRQ enabled.
pub fn start_agent<S, B, F, R>(ctx: &AgentContext<S>, bus: Result<B>, launch: F) -> Result<R, StartupError>
where
    S: LineSink,
    B: RegisterBus,
    F: FnOnce(Axp192<B>) -> R,
{
    let mut pmu = match bus.and_then(Axp192::probe) {
        Ok(pmu) => pmu,
        Err(e) => {
            console_error!(ctx.console, "AXP192 not detected!");
            console_error!(ctx.console, "{:#}", e);
            return Err(StartupError::PmuAbsent(e));
        }
    };
    console_info!(ctx.console, "AXP192 detected");

    configure(ctx, &mut pmu).map_err(StartupError::PmuSetup)?;
    Ok(launch(pmu))
}

fn configure<S: LineSink, B: RegisterBus>(ctx: &AgentContext<S>, pmu: &mut Axp192<B>) -> Result<()> {
    pmu.set_rail(Rail::Ldo2, false)?;
    pmu.set_rail(Rail::Ldo3, false)?;
    console_info!(ctx.console, "GPS and LoRa powered off");
    pmu.enable_battery_voltage_adc()?;
    pmu.clear_irq()?;
    pmu.enable_irq(Irq::PekLongPress)?;
    Ok(())
}
