// Bootstrap Module
// Brings the board up in a fixed order, hands everything to the two agent tasks
// and then parks the main task. A missing PMU is the only fatal condition.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::hal::gpio::{Gpio35, Gpio4};
use esp_idf_svc::hal::modem::Modem;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::nvs::EspDefaultNvsPartition;

use soil_shared::config::BOOTSTRAP_IDLE_MS;
use soil_shared::connectivity::ConnectivityManager;
use soil_shared::console::LogSink;
use soil_shared::context::AgentContext;
use soil_shared::pmu::Axp192;
use soil_shared::power_task::PowerTask;
use soil_shared::startup::{start_agent, StartupError};
use soil_shared::telemetry_task::TelemetryTask;
use soil_shared::{console_info, console_warn};

use crate::led_manager::StatusLed;
use crate::mqtt_client::ThingsBoardSession;
use crate::ota_service::HttpUpdateService;
use crate::power::{attach_press_interrupt, I2cRegisterBus, PmuBattery, PmuButton};
use crate::probe::PlaceholderProbe;
use crate::settings::{load_agent_config, Credentials};
use crate::system_state::{boot_counter, enable_button_wakeup, DeviceContext, DeviceSleep, RtosDelay};
use crate::tasks::{spawn_pinned, POWER_TASK, TELEMETRY_TASK};
use crate::wifi_client::WifiLink;

pub fn run() -> Result<()> {
    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let ctx: DeviceContext = Arc::new(AgentContext::new(LogSink, boot_counter()));
    console_info!(ctx.console, "Soil Quality Sensor Beta");
    console_info!(ctx.console, "Boot number: {}", ctx.boot_count.current());

    let bus = I2cRegisterBus::new(peripherals.i2c0, peripherals.pins.gpio21, peripherals.pins.gpio22);
    let launched = start_agent(&ctx, bus, |pmu| {
        launch(
            ctx.clone(),
            pmu,
            peripherals.pins.gpio35,
            peripherals.pins.gpio4,
            peripherals.modem,
            sys_loop,
            nvs,
        )
    });

    match launched {
        Ok(result) => result,
        Err(StartupError::PmuAbsent(_)) => halt(),
        Err(e) => Err(e.into()),
    }
}

/// Everything after the PMU: radio, update service and the two agent tasks
fn launch(
    ctx: DeviceContext,
    pmu: Axp192<I2cRegisterBus>,
    irq_gpio: Gpio35,
    led_gpio: Gpio4,
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs: EspDefaultNvsPartition,
) -> Result<()> {
    let pmu = Arc::new(Mutex::new(pmu));

    let irq_pin = attach_press_interrupt(irq_gpio, ctx.clone())?;
    let led = StatusLed::new(ctx.clone(), led_gpio)?;
    enable_button_wakeup()?;

    let credentials = Credentials::from_build_env();
    if let Err(e) = credentials.validate() {
        console_warn!(ctx.console, "Incomplete build credentials: {:#}", e);
    }
    let config = load_agent_config(&ctx, nvs.clone());

    let mut power = PowerTask::new(
        ctx.clone(),
        PmuButton::new(ctx.clone(), pmu.clone(), irq_pin),
        RtosDelay,
        &config,
    );

    let wifi = WifiLink::new(ctx.clone(), modem, sys_loop, nvs, &credentials)?;
    let session = ThingsBoardSession::new(ctx.clone(), &config, &credentials.root_ca)?;
    let mut net = ConnectivityManager::new(
        ctx.clone(),
        wifi,
        session,
        led,
        RtosDelay,
        &config,
        credentials.access_token.clone(),
    );

    // The power task does not exist yet; service the button between retries
    net.ensure_associated(&mut || power.service());

    let (_update_service, updates) =
        HttpUpdateService::start(&ctx, &config.update_hostname, credentials.update_password.clone())?;
    console_info!(ctx.console, "OTA service started!");

    let telemetry = TelemetryTask::new(
        ctx.clone(),
        net,
        PlaceholderProbe,
        PmuBattery::new(pmu),
        updates,
        DeviceSleep,
        RtosDelay,
        &config,
    );

    spawn_pinned(&ctx, &TELEMETRY_TASK, move || telemetry.run())?;
    spawn_pinned(&ctx, &POWER_TASK, move || power.run())?;

    // Parked for good; keeps the update server alive
    loop {
        FreeRtos::delay_ms(BOOTSTRAP_IDLE_MS as u32);
    }
}

/// "AXP192 not detected!" has already been written; nothing else starts
fn halt() -> ! {
    loop {
        FreeRtos::delay_ms(BOOTSTRAP_IDLE_MS as u32);
    }
}
