use esp_idf_svc::hal::gpio::{Gpio4, Output, PinDriver};
use soil_shared::connectivity::Indicator;
use soil_shared::{console_info, console_warn};

use crate::system_state::DeviceContext;

/// Liveness LED on GPIO4, toggled while the station is associating
pub struct StatusLed {
    ctx: DeviceContext,
    pin: PinDriver<'static, Gpio4, Output>,
}

impl StatusLed {
    pub fn new(ctx: DeviceContext, gpio4: Gpio4) -> anyhow::Result<Self> {
        let mut pin = PinDriver::output(gpio4)?;
        pin.set_low()?;
        console_info!(ctx.console, "Status LED initialized on GPIO4 (off)");
        Ok(Self { ctx, pin })
    }
}

impl Indicator for StatusLed {
    fn set(&mut self, on: bool) {
        let result = if on { self.pin.set_high() } else { self.pin.set_low() };
        if let Err(e) = result {
            console_warn!(self.ctx.console, "Failed to drive status LED: {:?}", e);
        }
    }
}
