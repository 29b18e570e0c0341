// System State Module
// State that outlives a wake cycle and the platform primitives both tasks block on

use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Duration;

use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::sys;

use soil_shared::console::LogSink;
use soil_shared::context::{AgentContext, BootCounter};
use soil_shared::telemetry_task::SleepController;
use soil_shared::Delay;

const USER_BUTTON_GPIO: i32 = 38; // Active low, RTC-capable pin

// Lives in RTC slow memory: kept across deep sleep, reloaded with 1 by the
// bootloader after power-on or reset
#[link_section = ".rtc.data"]
static BOOT_COUNT: AtomicU32 = AtomicU32::new(1);

pub fn boot_counter() -> BootCounter {
    BootCounter::new(&BOOT_COUNT)
}

/// Context handed to every adapter that writes diagnostics
pub type DeviceContext = Arc<AgentContext<LogSink>>;

/// FreeRTOS task delay; yields the core to the other task
#[derive(Debug, Clone, Copy, Default)]
pub struct RtosDelay;

impl Delay for RtosDelay {
    fn delay(&mut self, period: Duration) {
        FreeRtos::delay_ms(period.as_millis().min(u128::from(u32::MAX)) as u32);
    }
}

#[derive(Debug, Default)]
pub struct DeviceSleep;

impl SleepController for DeviceSleep {
    fn deep_sleep(&mut self, wake_after: Duration) -> ! {
        let micros = wake_after.as_micros().min(u128::from(u64::MAX)) as u64;
        unsafe {
            sys::esp_sleep_enable_timer_wakeup(micros);
            sys::esp_deep_sleep_start()
        }
    }
}

/// Wake from deep sleep when the user button pulls its line low
pub fn enable_button_wakeup() -> anyhow::Result<()> {
    sys::esp!(unsafe { sys::esp_sleep_enable_ext0_wakeup(USER_BUTTON_GPIO, 0) })?;
    Ok(())
}
