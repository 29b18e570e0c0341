// PMU Adapter Module
// Backs the AXP192 driver with the I2C master and hands out the two views the
// tasks need: the power button (power task) and the battery gauge (telemetry task).
// Both share one bus behind a std Mutex so each register transaction is atomic.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use esp_idf_svc::hal::delay::{FreeRtos, BLOCK};
use esp_idf_svc::hal::gpio::{Gpio21, Gpio22, Gpio35, Input, InterruptType, PinDriver};
use esp_idf_svc::hal::i2c::{I2cConfig, I2cDriver, I2C0};
use esp_idf_svc::hal::units::Hertz;
use soil_shared::console::LineSink;
use soil_shared::context::AgentContext;
use soil_shared::pmu::{Axp192, IrqStatus, RegisterBus, AXP192_ADDRESS};
use soil_shared::power_task::PowerController;
use soil_shared::telemetry_task::BatteryGauge;
use soil_shared::console_error;

use crate::system_state::DeviceContext;

const I2C_BAUDRATE: u32 = 400_000;

pub type SharedPmu = Arc<Mutex<Axp192<I2cRegisterBus>>>;

pub struct I2cRegisterBus {
    i2c: I2cDriver<'static>,
}

impl I2cRegisterBus {
    pub fn new(i2c0: I2C0, sda: Gpio21, scl: Gpio22) -> Result<Self> {
        let i2c = I2cDriver::new(i2c0, sda, scl, &I2cConfig::new().baudrate(Hertz(I2C_BAUDRATE)))
            .context("Failed to initialize I2C master")?;
        Ok(Self { i2c })
    }
}

impl RegisterBus for I2cRegisterBus {
    fn read(&mut self, reg: u8) -> Result<u8> {
        let mut value = [0u8; 1];
        self.i2c
            .write_read(AXP192_ADDRESS, &[reg], &mut value, BLOCK)
            .map_err(|e| anyhow!("I2C read of 0x{:02X} failed: {:?}", reg, e))?;
        Ok(value[0])
    }

    fn write(&mut self, reg: u8, value: u8) -> Result<()> {
        self.i2c
            .write(AXP192_ADDRESS, &[reg, value], BLOCK)
            .map_err(|e| anyhow!("I2C write of 0x{:02X} failed: {:?}", reg, e))
    }
}

fn lock(pmu: &SharedPmu) -> Result<MutexGuard<'_, Axp192<I2cRegisterBus>>> {
    pmu.lock().map_err(|_| anyhow!("PMU bus lock poisoned"))
}

/// Configure the PMU interrupt line as a falling-edge interrupt that only
/// raises the press flag
pub fn attach_press_interrupt<S>(
    pin: Gpio35,
    ctx: Arc<AgentContext<S>>,
) -> Result<PinDriver<'static, Gpio35, Input>>
where
    S: LineSink + 'static,
{
    let mut irq_pin = PinDriver::input(pin)?;
    irq_pin.set_interrupt_type(InterruptType::NegEdge)?;

    // Safety: the callback runs in ISR context and performs a single atomic store
    unsafe {
        irq_pin.subscribe(move || ctx.press.raise())?;
    }
    irq_pin.enable_interrupt()?;
    Ok(irq_pin)
}

/// Power button as seen by the power task
pub struct PmuButton {
    ctx: DeviceContext,
    pmu: SharedPmu,
    irq_pin: PinDriver<'static, Gpio35, Input>,
}

impl PmuButton {
    pub fn new(ctx: DeviceContext, pmu: SharedPmu, irq_pin: PinDriver<'static, Gpio35, Input>) -> Self {
        Self { ctx, pmu, irq_pin }
    }
}

impl PowerController for PmuButton {
    fn read_irq(&mut self) -> Result<IrqStatus> {
        lock(&self.pmu)?.read_irq()
    }

    fn rearm(&mut self) -> Result<()> {
        lock(&self.pmu)?.clear_irq()?;
        // The GPIO driver disables the interrupt each time it fires
        self.irq_pin.enable_interrupt()?;
        Ok(())
    }

    fn power_off(&mut self) -> ! {
        if let Err(e) = lock(&self.pmu).and_then(|mut pmu| pmu.shutdown()) {
            console_error!(self.ctx.console, "PMU shutdown failed: {:#}", e);
        }
        // Rails drop within a few milliseconds of the shutdown bit
        loop {
            FreeRtos::delay_ms(1000);
        }
    }
}

pub struct PmuBattery {
    pmu: SharedPmu,
}

impl PmuBattery {
    pub fn new(pmu: SharedPmu) -> Self {
        Self { pmu }
    }
}

impl BatteryGauge for PmuBattery {
    fn battery_voltage(&mut self) -> Result<f32> {
        lock(&self.pmu)?.battery_voltage()
    }
}
