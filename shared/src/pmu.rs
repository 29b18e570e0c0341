// AXP192 Power Management Module
// Register-level driver for the T-Beam's PMU: chip detection, rail control,
// battery voltage ADC, PEK button interrupts and the power-off command.
// The bus is abstracted so the firmware can back it with the I2C driver.

use anyhow::{anyhow, Context, Result};

/// 7-bit I2C address of the AXP192
pub const AXP192_ADDRESS: u8 = 0x34;
pub(crate) const AXP192_CHIP_ID: u8 = 0x03;

pub(crate) mod reg {
    pub const IC_TYPE: u8 = 0x03;
    pub const POWER_OUTPUT_CTL: u8 = 0x12; // DC-DC1/3, LDO2/3, EXTEN switches
    pub const SHUTDOWN_CTL: u8 = 0x32;
    pub const IRQ_ENABLE: [u8; 5] = [0x40, 0x41, 0x42, 0x43, 0x4A];
    pub const IRQ_STATUS: [u8; 5] = [0x44, 0x45, 0x46, 0x47, 0x4D];
    pub const BATT_VOLTAGE_H: u8 = 0x78;
    pub const BATT_VOLTAGE_L: u8 = 0x79;
    pub const ADC_ENABLE_1: u8 = 0x82;
}

const SHUTDOWN_BIT: u8 = 0x80;
const BATT_VOLTAGE_ADC_BIT: u8 = 0x80;
const BATT_VOLTAGE_STEP_MV: f32 = 1.1;
const IRQ_STATUS_CLEAR: u8 = 0xFF; // Status bits are write-1-to-clear

/// Single-register access to the PMU
pub trait RegisterBus {
    fn read(&mut self, reg: u8) -> Result<u8>;
    fn write(&mut self, reg: u8, value: u8) -> Result<()>;
}

/// Switchable output rails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rail {
    Ldo2, // LoRa radio on the T-Beam
    Ldo3, // GPS module on the T-Beam
}

impl Rail {
    fn mask(self) -> u8 {
        match self {
            Rail::Ldo2 => 1 << 2,
            Rail::Ldo3 => 1 << 3,
        }
    }
}

/// Interrupt sources this firmware cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Irq {
    PekShortPress,
    PekLongPress,
}

impl Irq {
    // (register index, bit mask) within the five IRQ enable/status registers
    fn position(self) -> (usize, u8) {
        match self {
            Irq::PekShortPress => (2, 1 << 1),
            Irq::PekLongPress => (2, 1 << 0),
        }
    }
}

/// What triggered the PMU interrupt line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqCause {
    None,
    LongPress,
    ShortPress,
    Other,
}

/// Snapshot of the five IRQ status registers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IrqStatus(pub [u8; 5]);

impl IrqStatus {
    pub fn is_set(&self, irq: Irq) -> bool {
        let (index, mask) = irq.position();
        self.0[index] & mask != 0
    }

    /// Long press wins over anything else latched at the same time
    pub fn cause(&self) -> IrqCause {
        if self.is_set(Irq::PekLongPress) {
            IrqCause::LongPress
        } else if self.is_set(Irq::PekShortPress) {
            IrqCause::ShortPress
        } else if self.0.iter().any(|bits| *bits != 0) {
            IrqCause::Other
        } else {
            IrqCause::None
        }
    }
}

pub struct Axp192<B: RegisterBus> {
    bus: B,
}

impl<B: RegisterBus> Axp192<B> {
    /// Confirm an AXP192 answers on the bus before handing out a driver
    pub fn probe(mut bus: B) -> Result<Self> {
        let chip_id = bus
            .read(reg::IC_TYPE)
            .context("AXP192 did not answer on the I2C bus")?;
        if chip_id != AXP192_CHIP_ID {
            return Err(anyhow!(
                "Unexpected PMU chip id 0x{:02X} (expected 0x{:02X})",
                chip_id,
                AXP192_CHIP_ID
            ));
        }
        Ok(Self { bus })
    }

    pub fn set_rail(&mut self, rail: Rail, on: bool) -> Result<()> {
        self.update(reg::POWER_OUTPUT_CTL, rail.mask(), on)
            .with_context(|| format!("Failed to switch {:?}", rail))
    }

    pub fn enable_battery_voltage_adc(&mut self) -> Result<()> {
        self.update(reg::ADC_ENABLE_1, BATT_VOLTAGE_ADC_BIT, true)
            .context("Failed to enable battery voltage ADC")
    }

    /// Battery voltage in volts (12-bit ADC, 1.1 mV per step)
    pub fn battery_voltage(&mut self) -> Result<f32> {
        let high = self.bus.read(reg::BATT_VOLTAGE_H)?;
        let low = self.bus.read(reg::BATT_VOLTAGE_L)?;
        let raw = (u16::from(high) << 4) | u16::from(low & 0x0F);
        Ok(f32::from(raw) * BATT_VOLTAGE_STEP_MV / 1000.0)
    }

    pub fn enable_irq(&mut self, irq: Irq) -> Result<()> {
        let (index, mask) = irq.position();
        self.update(reg::IRQ_ENABLE[index], mask, true)
            .with_context(|| format!("Failed to enable {:?} IRQ", irq))
    }

    pub fn read_irq(&mut self) -> Result<IrqStatus> {
        let mut status = IrqStatus::default();
        for (slot, register) in status.0.iter_mut().zip(reg::IRQ_STATUS) {
            *slot = self.bus.read(register)?;
        }
        Ok(status)
    }

    pub fn clear_irq(&mut self) -> Result<()> {
        for register in reg::IRQ_STATUS {
            self.bus.write(register, IRQ_STATUS_CLEAR)?;
        }
        Ok(())
    }

    /// Cut all rails. Power only returns through the PEK button.
    pub fn shutdown(&mut self) -> Result<()> {
        self.update(reg::SHUTDOWN_CTL, SHUTDOWN_BIT, true)
            .context("Failed to issue PMU shutdown")
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    fn update(&mut self, register: u8, mask: u8, set: bool) -> Result<()> {
        let current = self.bus.read(register)?;
        let next = if set { current | mask } else { current & !mask };
        self.bus.write(register, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBus;

    #[test]
    fn probe_rejects_missing_or_foreign_chip() {
        let mut absent = FakeBus::axp192();
        absent.offline = true;
        assert!(Axp192::probe(absent).is_err());

        let mut axp202 = FakeBus::axp192();
        axp202.regs[reg::IC_TYPE as usize] = 0x41;
        assert!(Axp192::probe(axp202).is_err());

        assert!(Axp192::probe(FakeBus::axp192()).is_ok());
    }

    #[test]
    fn rails_are_switched_without_touching_neighbours() {
        let mut pmu = Axp192::probe(FakeBus::axp192()).unwrap();
        pmu.set_rail(Rail::Ldo2, false).unwrap();
        pmu.set_rail(Rail::Ldo3, false).unwrap();
        assert_eq!(pmu.bus_mut().regs[reg::POWER_OUTPUT_CTL as usize], 0b0100_0011);
    }

    #[test]
    fn battery_voltage_is_scaled_to_volts() {
        let mut pmu = Axp192::probe(FakeBus::axp192()).unwrap();
        // 3727 steps * 1.1 mV = 4.0997 V
        pmu.bus_mut().regs[reg::BATT_VOLTAGE_H as usize] = 0xE8;
        pmu.bus_mut().regs[reg::BATT_VOLTAGE_L as usize] = 0x0F;
        let volts = pmu.battery_voltage().unwrap();
        assert!((volts - 4.0997).abs() < 1e-3, "got {volts}");
    }

    #[test]
    fn long_press_irq_is_classified_and_cleared() {
        let mut pmu = Axp192::probe(FakeBus::axp192()).unwrap();
        pmu.enable_irq(Irq::PekLongPress).unwrap();
        assert_eq!(pmu.bus_mut().regs[0x42], 0b01);

        pmu.bus_mut().regs[0x46] = 0b11;
        let status = pmu.read_irq().unwrap();
        assert_eq!(status.cause(), IrqCause::LongPress);

        pmu.clear_irq().unwrap();
        let cleared: Vec<u8> = pmu.bus_mut().writes.iter().rev().take(5).map(|w| w.0).collect();
        assert_eq!(cleared, vec![0x4D, 0x47, 0x46, 0x45, 0x44]);
    }

    #[test]
    fn cause_classification() {
        assert_eq!(IrqStatus([0, 0, 0b10, 0, 0]).cause(), IrqCause::ShortPress);
        assert_eq!(IrqStatus([0x04, 0, 0, 0, 0]).cause(), IrqCause::Other);
        assert_eq!(IrqStatus::default().cause(), IrqCause::None);
    }

    #[test]
    fn shutdown_sets_power_off_bit() {
        let mut pmu = Axp192::probe(FakeBus::axp192()).unwrap();
        pmu.bus_mut().regs[reg::SHUTDOWN_CTL as usize] = 0x46;
        pmu.shutdown().unwrap();
        assert_eq!(pmu.bus_mut().regs[reg::SHUTDOWN_CTL as usize], 0xC6);
    }
}
