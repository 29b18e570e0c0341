// Agent configuration
// Compile-time defaults for the broker, topics and loop timings, collected into
// a validated struct so the firmware can apply the few runtime overrides it has.

use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

// ThingsBoard broker
pub const BROKER_HOST: &str = "srv-iot.diatel.upm.es";
pub const BROKER_PORT: u16 = 8883; // MQTT over TLS
pub const CLIENT_ID: &str = "soil_quaity_sensor"; // Registered id, spelling included
pub const TELEMETRY_TOPIC: &str = "v1/devices/me/telemetry";
pub const ATTRIBUTES_TOPIC: &str = "v1/devices/me/attributes";

// Firmware-update endpoint
pub const UPDATE_HOSTNAME: &str = "soil-quality-sensor";

// Loop timings
pub const DEFAULT_SLEEP_SECS: u32 = 30; // Deep sleep between transmissions
pub const MAX_SLEEP_SECS: u32 = 86_400;
pub const TASK_PERIOD_MS: u64 = 100; // Per-iteration delay of both tasks
pub const ASSOCIATION_RETRY_MS: u64 = 500; // Indicator toggles once per retry
pub const ASSOCIATION_SETTLE_MS: u64 = 100; // Between dropping and restarting association
pub const ASSOCIATION_RESTART_POLLS: u32 = 20; // Restart a silent association after ~10s
pub const SESSION_RETRY_SECS: u64 = 5;
pub const SHUTDOWN_FLUSH_MS: u64 = 100; // Lets the last console line drain before power-off
pub const BOOTSTRAP_IDLE_MS: u64 = 10_000;

/// Runtime view of the agent settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub telemetry_topic: String,
    pub attributes_topic: String,
    pub update_hostname: String,
    pub sleep_secs: u32,
    pub task_period_ms: u64,
    pub association_retry_ms: u64,
    pub session_retry_secs: u64,
    pub shutdown_flush_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            broker_host: BROKER_HOST.to_string(),
            broker_port: BROKER_PORT,
            client_id: CLIENT_ID.to_string(),
            telemetry_topic: TELEMETRY_TOPIC.to_string(),
            attributes_topic: ATTRIBUTES_TOPIC.to_string(),
            update_hostname: UPDATE_HOSTNAME.to_string(),
            sleep_secs: DEFAULT_SLEEP_SECS,
            task_period_ms: TASK_PERIOD_MS,
            association_retry_ms: ASSOCIATION_RETRY_MS,
            session_retry_secs: SESSION_RETRY_SECS,
            shutdown_flush_ms: SHUTDOWN_FLUSH_MS,
        }
    }
}

impl AgentConfig {
    /// Validate settings values are within acceptable ranges
    pub fn validate(&self) -> Result<()> {
        if self.broker_host.is_empty() {
            return Err(anyhow!("Broker host must not be empty"));
        }
        if self.broker_port == 0 {
            return Err(anyhow!("Broker port must be non-zero"));
        }
        if self.client_id.is_empty() {
            return Err(anyhow!("Client id must not be empty"));
        }
        if self.telemetry_topic.is_empty() {
            return Err(anyhow!("Telemetry topic must not be empty"));
        }
        if self.sleep_secs == 0 || self.sleep_secs > MAX_SLEEP_SECS {
            return Err(anyhow!(
                "Sleep duration must be between 1 and {} seconds, got {}",
                MAX_SLEEP_SECS,
                self.sleep_secs
            ));
        }
        if self.task_period_ms == 0 || self.association_retry_ms == 0 {
            return Err(anyhow!("Loop periods must be non-zero"));
        }
        Ok(())
    }

    /// Apply a sleep-duration override, rejecting out-of-range values
    pub fn with_sleep_secs(mut self, secs: u32) -> Result<Self> {
        self.sleep_secs = secs;
        self.validate()?;
        Ok(self)
    }

    pub fn broker_url(&self) -> String {
        format!("mqtts://{}:{}", self.broker_host, self.broker_port)
    }

    pub fn sleep_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.sleep_secs))
    }

    pub fn task_period(&self) -> Duration {
        Duration::from_millis(self.task_period_ms)
    }

    pub fn association_retry(&self) -> Duration {
        Duration::from_millis(self.association_retry_ms)
    }

    pub fn session_retry(&self) -> Duration {
        Duration::from_secs(self.session_retry_secs)
    }

    pub fn shutdown_flush(&self) -> Duration {
        Duration::from_millis(self.shutdown_flush_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.broker_url(), "mqtts://srv-iot.diatel.upm.es:8883");
        assert_eq!(config.sleep_duration(), Duration::from_secs(30));
        assert_eq!(config.session_retry(), Duration::from_secs(5));
        assert_eq!(config.task_period(), Duration::from_millis(100));
    }

    #[test]
    fn sleep_override_is_range_checked() {
        let config = AgentConfig::default().with_sleep_secs(300).unwrap();
        assert_eq!(config.sleep_duration(), Duration::from_secs(300));

        assert!(AgentConfig::default().with_sleep_secs(0).is_err());
        assert!(AgentConfig::default()
            .with_sleep_secs(MAX_SLEEP_SECS + 1)
            .is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let json = serde_json::to_string(&AgentConfig::default()).unwrap();
        let parsed: AgentConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, AgentConfig::default());
    }
}
