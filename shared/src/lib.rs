// Soil Quality Sensor - shared agent logic
// Everything here is hardware-agnostic: the firmware crate plugs ESP-IDF drivers
// into the traits below, the unit tests plug in scripted fakes.

use std::time::Duration;

pub mod config;
pub mod connectivity;
pub mod console;
pub mod context;
pub mod pmu;
pub mod power_task;
pub mod startup;
pub mod telemetry;
pub mod telemetry_task;
pub mod update;

#[cfg(test)]
pub(crate) mod testing;

/// Blocking task delay (FreeRTOS `vTaskDelay` on the device)
pub trait Delay {
    fn delay(&mut self, period: Duration);
}
