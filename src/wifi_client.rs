// Import ESP-IDF event loop for handling system events
// The event loop manages WiFi connection events, IP assignment, etc.
use esp_idf_svc::eventloop::EspSystemEventLoop;

// Import peripheral trait for hardware access
use esp_idf_svc::hal::peripheral::Peripheral;

// Import NVS partition for WiFi driver storage needs
use esp_idf_svc::nvs::EspDefaultNvsPartition;

// Import WiFi-related types from ESP-IDF
// - BlockingWifi: Synchronous WiFi operations wrapper
// - ClientConfiguration: WiFi station mode config
// - EspWifi: Low-level WiFi driver
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};

use anyhow::{anyhow, Context, Result};
use std::net::Ipv4Addr;

use soil_shared::connectivity::NetworkLink;
use soil_shared::{console_debug, console_info};

use crate::settings::Credentials;
use crate::system_state::DeviceContext;

/// Station-mode WiFi link driven by the connectivity manager.
///
/// Association is started without waiting; the manager polls `is_associated`
/// and decides when to give up on an attempt and start over.
pub struct WifiLink {
    ctx: DeviceContext,
    wifi: BlockingWifi<EspWifi<'static>>, // ESP-IDF WiFi driver wrapper
    ssid: String,
}

impl WifiLink {
    pub fn new(
        ctx: DeviceContext,
        modem: impl Peripheral<P = esp_idf_svc::hal::modem::Modem> + 'static,
        sys_loop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
        credentials: &Credentials,
    ) -> Result<Self> {
        console_info!(ctx.console, "Initializing WiFi station");

        let wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs))?;
        let mut wifi = BlockingWifi::wrap(wifi, sys_loop)?;

        let wifi_config = Configuration::Client(ClientConfiguration {
            ssid: credentials
                .wifi_ssid
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("Invalid SSID format"))?,
            password: credentials
                .wifi_password
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("Invalid password format"))?,
            channel: None,
            auth_method: determine_auth_method(&credentials.wifi_password),
            ..Default::default()
        });

        // Client mode only
        wifi.set_configuration(&wifi_config)?;
        wifi.start().context("Failed to start WiFi")?;
        console_info!(ctx.console, "WiFi started in station mode");

        Ok(Self {
            ctx,
            wifi,
            ssid: credentials.wifi_ssid.clone(),
        })
    }
}

impl NetworkLink for WifiLink {
    fn network_name(&self) -> &str {
        &self.ssid
    }

    fn drop_association(&mut self) {
        // Also aborts an attempt still in progress; "not connected" is expected here
        if let Err(e) = self.wifi.wifi_mut().disconnect() {
            console_debug!(self.ctx.console, "WiFi disconnect: {:?}", e);
        }
    }

    fn begin_association(&mut self) -> Result<()> {
        // Non-blocking: the underlying driver call returns once the request is queued
        self.wifi
            .wifi_mut()
            .connect()
            .map_err(|e| anyhow!("WiFi connect request failed: {:?}", e))
    }

    fn is_associated(&mut self) -> bool {
        // Associated is only useful once DHCP has handed out an address
        self.wifi.is_connected().unwrap_or(false) && self.local_ip().is_some()
    }

    fn local_ip(&mut self) -> Option<Ipv4Addr> {
        let ip_info = self.wifi.wifi().sta_netif().get_ip_info().ok()?;
        (!ip_info.ip.is_unspecified()).then_some(ip_info.ip)
    }
}

fn determine_auth_method(password: &str) -> AuthMethod {
    if password.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    }
}
