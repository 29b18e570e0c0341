// Settings Management Module
// Build-time secrets plus the one runtime override kept in NVS (sleep duration)

// Import ESP-IDF's NVS (Non-Volatile Storage) functionality
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

use anyhow::{anyhow, Result};

use soil_shared::config::AgentConfig;
use soil_shared::{console_info, console_warn};

use crate::system_state::DeviceContext;

// NVS storage location for agent settings
const NVS_NAMESPACE: &str = "agent_cfg";
const SLEEP_SECS_KEY: &str = "sleep_secs";

/// Secrets baked into the image from the build environment
#[derive(Clone)]
pub struct Credentials {
    pub wifi_ssid: String,
    pub wifi_password: String,
    pub access_token: String, // ThingsBoard device token, sent as MQTT username
    pub update_password: String,
    pub root_ca: String, // PEM
}

impl Credentials {
    pub fn from_build_env() -> Self {
        Self {
            wifi_ssid: option_env!("SOIL_WIFI_SSID").unwrap_or_default().to_string(),
            wifi_password: option_env!("SOIL_WIFI_PASS").unwrap_or_default().to_string(),
            access_token: option_env!("SOIL_ACCESS_TOKEN").unwrap_or_default().to_string(),
            update_password: option_env!("SOIL_OTA_PASSWORD").unwrap_or_default().to_string(),
            root_ca: option_env!("SOIL_ROOT_CA").unwrap_or_default().to_string(),
        }
    }

    /// Validate settings values are within acceptable ranges
    pub fn validate(&self) -> Result<()> {
        if self.wifi_ssid.is_empty() {
            return Err(anyhow!("SOIL_WIFI_SSID was not set at build time"));
        }
        if self.wifi_ssid.len() > 32 {
            return Err(anyhow!("WiFi SSID cannot exceed 32 bytes"));
        }
        if self.access_token.is_empty() {
            return Err(anyhow!("SOIL_ACCESS_TOKEN was not set at build time"));
        }
        if !self.root_ca.contains("-----BEGIN CERTIFICATE-----") {
            return Err(anyhow!("SOIL_ROOT_CA is not a PEM certificate"));
        }
        Ok(())
    }
}

// Never print secrets
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("wifi_ssid", &self.wifi_ssid)
            .field("access_token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// Load the agent configuration, applying the NVS sleep override when it is valid
pub fn load_agent_config(ctx: &DeviceContext, nvs_partition: EspDefaultNvsPartition) -> AgentConfig {
    let config = AgentConfig::default();

    let nvs: EspNvs<NvsDefault> = match EspNvs::new(nvs_partition, NVS_NAMESPACE, true) {
        Ok(nvs) => nvs,
        Err(e) => {
            console_warn!(ctx.console, "Settings namespace unavailable, using defaults: {:?}", e);
            return config;
        }
    };

    match nvs.get_u32(SLEEP_SECS_KEY) {
        Ok(Some(secs)) => match config.clone().with_sleep_secs(secs) {
            Ok(overridden) => {
                console_info!(ctx.console, "Sleep duration override from NVS: {}s", secs);
                overridden
            }
            Err(e) => {
                console_warn!(ctx.console, "Ignoring stored sleep duration: {:#}", e);
                config
            }
        },
        Ok(None) => config,
        Err(e) => {
            console_warn!(ctx.console, "Failed to read sleep duration from NVS: {:?}", e);
            config
        }
    }
}
