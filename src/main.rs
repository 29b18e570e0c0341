// Soil Quality Sensor firmware for the LilyGO T-Beam (ESP32 + AXP192)
// Agent logic lives in the soil-shared crate; this crate wires it to ESP-IDF.

#[cfg(target_os = "espidf")]
mod bootstrap;
#[cfg(target_os = "espidf")]
mod led_manager;
#[cfg(target_os = "espidf")]
mod mqtt_client;
#[cfg(target_os = "espidf")]
mod ota_service;
#[cfg(target_os = "espidf")]
mod power;
#[cfg(target_os = "espidf")]
mod probe;
#[cfg(target_os = "espidf")]
mod settings;
#[cfg(target_os = "espidf")]
mod system_state;
#[cfg(target_os = "espidf")]
mod tasks;
#[cfg(target_os = "espidf")]
mod wifi_client;

#[cfg(target_os = "espidf")]
fn main() {
    // It is necessary to call this function once. Otherwise some patches to the runtime
    // implemented by esp-idf-sys might not link properly. See https://github.com/esp-rs/esp-idf-template/issues/71
    esp_idf_svc::sys::link_patches();

    // Bind the log crate to the ESP Logging facilities
    esp_idf_svc::log::EspLogger::initialize_default();

    // Only returns on a peripheral setup failure
    if let Err(e) = bootstrap::run() {
        log::error!("❌ Bootstrap failed: {:#}", e);
        esp_idf_svc::hal::delay::FreeRtos::delay_ms(soil_shared::config::BOOTSTRAP_IDLE_MS as u32);
        unsafe { esp_idf_svc::sys::esp_restart() }
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("soil-sensor runs on the ESP32; build with --target xtensa-esp32-espidf");
}
