// Connectivity Manager Module
// Keeps the station associated and the telemetry session open. Every wait in
// here is a fixed, unbounded retry: the device has nothing better to do than
// keep trying until it either gets through or is powered off.

use core::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::config::{AgentConfig, ASSOCIATION_RESTART_POLLS, ASSOCIATION_SETTLE_MS};
use crate::console::LineSink;
use crate::context::AgentContext;
use crate::{console_debug, console_error, console_info, console_warn, Delay};

/// Station-mode network link (Wi-Fi on the device)
pub trait NetworkLink {
    fn network_name(&self) -> &str;

    /// Forget any current or half-finished association
    fn drop_association(&mut self);

    /// Start associating; completion is observed through `is_associated`
    fn begin_association(&mut self) -> Result<()>;

    fn is_associated(&mut self) -> bool;

    fn local_ip(&mut self) -> Option<Ipv4Addr>;
}

/// Broker refused or never answered a session handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRefused {
    pub code: i32,
}

impl SessionRefused {
    pub const CONNECTION_TIMEOUT: i32 = -4;
    pub const CONNECTION_LOST: i32 = -3;
    pub const CONNECT_FAILED: i32 = -2;
    pub const DISCONNECTED: i32 = -1;

    pub const fn new(code: i32) -> Self {
        Self { code }
    }
}

impl fmt::Display for SessionRefused {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session refused, rc={}", self.code)
    }
}

impl std::error::Error for SessionRefused {}

/// Message received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub topic: String,
    pub payload: String,
}

/// Publish/subscribe session to the telemetry broker
pub trait SessionTransport {
    /// One handshake attempt with the device credential
    fn connect(&mut self, client_id: &str, token: &str) -> Result<(), SessionRefused>;

    fn is_connected(&self) -> bool;

    /// Keep-alive / dispatch step; yields at most one inbound message per call
    fn poll(&mut self) -> Option<Inbound>;

    fn publish(&mut self, topic: &str, payload: &str) -> Result<()>;
}

/// Liveness LED
pub trait Indicator {
    fn set(&mut self, on: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Associating,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
}

pub struct ConnectivityManager<S, N, T, I, D>
where
    S: LineSink,
{
    ctx: Arc<AgentContext<S>>,
    link: N,
    session: T,
    indicator: I,
    delay: D,
    client_id: String,
    token: String,
    link_state: LinkState,
    indicator_on: bool,
    association_retry: Duration,
    session_retry: Duration,
}

impl<S, N, T, I, D> ConnectivityManager<S, N, T, I, D>
where
    S: LineSink,
    N: NetworkLink,
    T: SessionTransport,
    I: Indicator,
    D: Delay,
{
    pub fn new(
        ctx: Arc<AgentContext<S>>,
        link: N,
        session: T,
        mut indicator: I,
        delay: D,
        config: &AgentConfig,
        token: String,
    ) -> Self {
        indicator.set(false);
        Self {
            ctx,
            link,
            session,
            indicator,
            delay,
            client_id: config.client_id.clone(),
            token,
            link_state: LinkState::Disconnected,
            indicator_on: false,
            association_retry: config.association_retry(),
            session_retry: config.session_retry(),
        }
    }

    pub fn link_state(&self) -> LinkState {
        self.link_state
    }

    pub fn session_state(&self) -> SessionState {
        if self.session.is_connected() {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        }
    }

    /// Query the link, noticing when an established association was lost
    pub fn is_associated(&mut self) -> bool {
        let associated = self.link.is_associated();
        if !associated && self.link_state == LinkState::Connected {
            self.link_state = LinkState::Disconnected;
        }
        associated
    }

    /// Block until the station is associated.
    ///
    /// Toggles the indicator once per retry and calls `on_retry` after each
    /// toggle; bootstrap uses the hook to service the power button before the
    /// power task exists.
    pub fn ensure_associated(&mut self, on_retry: &mut dyn FnMut()) {
        if self.is_associated() {
            self.link_state = LinkState::Connected;
            return;
        }

        console_info!(
            self.ctx.console,
            "Connecting to WIFI SSID {}",
            self.link.network_name()
        );
        self.link_state = LinkState::Associating;
        self.restart_association();

        let mut polls: u32 = 0;
        while !self.link.is_associated() {
            self.delay.delay(self.association_retry);
            polls = polls.wrapping_add(1);
            console_debug!(self.ctx.console, "Waiting for association (attempt {})", polls);

            self.indicator_on = !self.indicator_on;
            self.indicator.set(self.indicator_on);
            on_retry();

            if polls % ASSOCIATION_RESTART_POLLS == 0 {
                console_warn!(
                    self.ctx.console,
                    "No association after {} attempts, restarting",
                    polls
                );
                self.restart_association();
            }
        }

        self.link_state = LinkState::Connected;
        match self.link.local_ip() {
            Some(ip) => console_info!(self.ctx.console, "WiFi connected, IP address: {}", ip),
            None => console_info!(self.ctx.console, "WiFi connected"),
        }

        if self.indicator_on {
            self.indicator_on = false;
            self.indicator.set(false);
        }
    }

    /// Single handshake attempt; never blocks beyond the transport's own timeout
    pub fn connect_session(&mut self) -> bool {
        match self.attempt_session() {
            Ok(()) => true,
            Err(refused) => {
                console_error!(self.ctx.console, "failed, rc={}", refused.code);
                false
            }
        }
    }

    pub fn is_session_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Retry the handshake every fixed interval until the broker accepts it.
    /// There is no attempt limit. A session needs the link, so a lost
    /// association is restored first.
    pub fn retry_session_with_backoff(&mut self) {
        while !self.session.is_connected() {
            if !self.is_associated() {
                self.ensure_associated(&mut || {});
            }
            if let Err(refused) = self.attempt_session() {
                console_error!(
                    self.ctx.console,
                    "failed, rc={} try again in {} seconds",
                    refused.code,
                    self.session_retry.as_secs()
                );
                self.delay.delay(self.session_retry);
            }
        }
    }

    /// Run the session's dispatch step, logging whatever arrived
    pub fn poll_session(&mut self) -> usize {
        let mut received = 0;
        while let Some(message) = self.session.poll() {
            console_debug!(
                self.ctx.console,
                "Message on {}: {}",
                message.topic,
                message.payload
            );
            received += 1;
        }
        received
    }

    pub fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        self.session.publish(topic, payload)
    }

    fn attempt_session(&mut self) -> Result<(), SessionRefused> {
        console_info!(self.ctx.console, "Attempting MQTT connection...");
        self.session.connect(&self.client_id, &self.token)?;
        console_info!(self.ctx.console, "connected");
        Ok(())
    }

    fn restart_association(&mut self) {
        self.link.drop_association();
        self.delay.delay(Duration::from_millis(ASSOCIATION_SETTLE_MS));
        if let Err(e) = self.link.begin_association() {
            console_error!(self.ctx.console, "Failed to start association: {:#}", e);
        }
    }
}
