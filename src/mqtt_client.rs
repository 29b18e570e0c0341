// MQTT Client Module
// ThingsBoard device session over TLS: CA-pinned server verification, access
// token as username, QoS 0 telemetry. The ESP-IDF client runs its own network
// task; a receiver thread mirrors its events into a connected flag and an
// inbound queue the telemetry task drains without blocking.

// Import ESP-IDF MQTT client functionality
use embedded_svc::mqtt::client::{Details, EventPayload, QoS};
use esp_idf_svc::mqtt::client::{EspMqttClient, EspMqttConnection, MqttClientConfiguration};

// Import ESP-IDF TLS and X.509 certificate functionality
use esp_idf_svc::tls::X509;

use esp_idf_svc::hal::delay::FreeRtos;

use anyhow::{anyhow, Result};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use soil_shared::config::AgentConfig;
use soil_shared::connectivity::{Inbound, SessionRefused, SessionTransport};
use soil_shared::{console_debug, console_info, console_warn};

use crate::system_state::DeviceContext;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_POLL_MS: u32 = 100;
const KEEP_ALIVE: Duration = Duration::from_secs(60);
const RX_THREAD_STACK: usize = 6 * 1024;

pub struct ThingsBoardSession {
    ctx: DeviceContext,
    broker_url: String,
    attributes_topic: String,
    root_ca: X509<'static>,
    client: Option<EspMqttClient<'static>>,
    connected: Arc<AtomicBool>,
    inbound: Option<Receiver<Inbound>>,
}

impl ThingsBoardSession {
    /// Convert PEM certificate string to X.509 format with static lifetime
    /// Uses Box::leak() to create static lifetime CStr required by ESP-IDF
    fn convert_pem_to_x509(pem_cert: &str) -> Result<X509<'static>> {
        use std::ffi::CString;

        let c_string = CString::new(pem_cert)
            .map_err(|e| anyhow!("PEM certificate contains null bytes: {}", e))?;
        let static_cstr: &'static std::ffi::CStr = Box::leak(c_string.into_boxed_c_str());

        Ok(X509::pem(static_cstr))
    }

    /// Prepare the session; nothing touches the network until `connect`
    pub fn new(ctx: DeviceContext, config: &AgentConfig, root_ca_pem: &str) -> Result<Self> {
        let root_ca = Self::convert_pem_to_x509(root_ca_pem)?;
        console_info!(ctx.console, "MQTT session prepared for {}", config.broker_url());

        Ok(Self {
            ctx,
            broker_url: config.broker_url(),
            attributes_topic: config.attributes_topic.clone(),
            root_ca,
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
            inbound: None,
        })
    }

    fn create_client(&mut self, client_id: &str, token: &str) -> Result<(), SessionRefused> {
        let mqtt_config = MqttClientConfiguration {
            client_id: Some(client_id),
            username: Some(token),
            password: None,
            server_certificate: Some(self.root_ca),
            keep_alive_interval: Some(KEEP_ALIVE),
            use_global_ca_store: false,
            skip_cert_common_name_check: false,
            ..Default::default()
        };

        let (client, connection) = EspMqttClient::new(&self.broker_url, &mqtt_config)
            .map_err(|e| {
                console_warn!(self.ctx.console, "Failed to create MQTT client: {:?}", e);
                SessionRefused::new(SessionRefused::CONNECT_FAILED)
            })?;

        let (tx, rx) = mpsc::channel();
        spawn_receiver(self.ctx.clone(), connection, self.connected.clone(), tx).map_err(|e| {
            console_warn!(self.ctx.console, "Failed to start MQTT receiver: {:#}", e);
            SessionRefused::new(SessionRefused::CONNECT_FAILED)
        })?;

        self.client = Some(client);
        self.inbound = Some(rx);
        Ok(())
    }

    fn subscribe_attributes(&mut self) {
        if let Some(client) = self.client.as_mut() {
            match client.subscribe(&self.attributes_topic, QoS::AtMostOnce) {
                Ok(_) => console_debug!(self.ctx.console, "Subscribed to {}", self.attributes_topic),
                Err(e) => console_warn!(
                    self.ctx.console,
                    "Failed to subscribe to {}: {:?}",
                    self.attributes_topic,
                    e
                ),
            }
        }
    }
}

impl SessionTransport for ThingsBoardSession {
    fn connect(&mut self, client_id: &str, token: &str) -> Result<(), SessionRefused> {
        if self.client.is_none() {
            self.create_client(client_id, token)?;
        }

        // The ESP-IDF client connects (and reconnects) in the background;
        // one attempt here means waiting for it up to the handshake timeout
        let started = Instant::now();
        while !self.connected.load(Ordering::Acquire) {
            if started.elapsed() >= CONNECT_TIMEOUT {
                return Err(SessionRefused::new(SessionRefused::CONNECTION_TIMEOUT));
            }
            FreeRtos::delay_ms(CONNECT_POLL_MS);
        }

        self.subscribe_attributes();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn poll(&mut self) -> Option<Inbound> {
        self.inbound.as_ref()?.try_recv().ok()
    }

    fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(anyhow!("MQTT session is not connected"));
        }
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| anyhow!("MQTT client not created"))?;
        client
            .publish(topic, QoS::AtMostOnce, false, payload.as_bytes())
            .map_err(|e| anyhow!("MQTT publish failed: {:?}", e))?;
        Ok(())
    }
}

fn spawn_receiver(
    ctx: DeviceContext,
    mut connection: EspMqttConnection,
    connected: Arc<AtomicBool>,
    inbound: Sender<Inbound>,
) -> Result<()> {
    thread::Builder::new()
        .name("mqtt-rx".into())
        .stack_size(RX_THREAD_STACK)
        .spawn(move || {
            while let Ok(event) = connection.next() {
                match event.payload() {
                    EventPayload::Connected(_) => connected.store(true, Ordering::Release),
                    EventPayload::Disconnected => connected.store(false, Ordering::Release),
                    EventPayload::Received {
                        topic: Some(topic),
                        data,
                        details: Details::Complete,
                        ..
                    } => {
                        let message = Inbound {
                            topic: topic.to_string(),
                            payload: String::from_utf8_lossy(data).into_owned(),
                        };
                        // Receiver gone means the session was dropped
                        if inbound.send(message).is_err() {
                            break;
                        }
                    }
                    EventPayload::Error(e) => console_debug!(ctx.console, "MQTT event error: {:?}", e),
                    _ => {}
                }
            }
            connected.store(false, Ordering::Release);
            console_info!(ctx.console, "MQTT connection closed");
        })?;
    Ok(())
}
