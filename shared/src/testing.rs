// Scripted stand-ins for the device drivers, shared by the unit tests.
// Each fake is a cheap handle over shared state so a test can keep one copy
// for inspection after moving another into the code under test.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::atomic::AtomicU32;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::Level;

use crate::connectivity::{Inbound, Indicator, NetworkLink, SessionRefused, SessionTransport};
use crate::console::LineSink;
use crate::context::{AgentContext, BootCounter};
use crate::pmu::{reg, RegisterBus, AXP192_CHIP_ID};
use crate::Delay;

pub fn context(boot_count: u32) -> Arc<AgentContext<MemorySink>> {
    let cell: &'static AtomicU32 = Box::leak(Box::new(AtomicU32::new(boot_count)));
    Arc::new(AgentContext::new(
        MemorySink::default(),
        BootCounter::new(cell),
    ))
}

pub fn console_lines(ctx: &AgentContext<MemorySink>) -> Vec<String> {
    ctx.console.with_sink(|sink| sink.lines())
}

#[derive(Debug, Default)]
pub struct MemorySink {
    pub entries: Vec<(Level, String)>,
}

impl MemorySink {
    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(|(_, line)| line.clone()).collect()
    }
}

impl LineSink for MemorySink {
    fn write_line(&mut self, level: Level, line: &str) {
        self.entries.push((level, line.to_string()));
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingDelay(Arc<Mutex<Vec<Duration>>>);

impl RecordingDelay {
    pub fn count_of(&self, period: Duration) -> usize {
        self.0.lock().unwrap().iter().filter(|d| **d == period).count()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Delay for RecordingDelay {
    fn delay(&mut self, period: Duration) {
        self.0.lock().unwrap().push(period);
    }
}

#[derive(Debug, Default)]
pub struct LinkScript {
    pub associated: bool,
    // One entry per association attempt: polls before success, None = never
    pub plan: VecDeque<Option<usize>>,
    pub pending: Option<usize>,
    pub begins: usize,
    pub drops: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FakeLink(Arc<Mutex<LinkScript>>);

impl FakeLink {
    pub fn associated() -> Self {
        let link = Self::default();
        link.script().associated = true;
        link
    }

    pub fn associating_after(polls: usize) -> Self {
        Self::with_plan(vec![Some(polls)])
    }

    pub fn with_plan(plan: Vec<Option<usize>>) -> Self {
        let link = Self::default();
        link.script().plan = plan.into();
        link
    }

    pub fn lose_association(&self) {
        self.script().associated = false;
    }

    pub fn script(&self) -> MutexGuard<'_, LinkScript> {
        self.0.lock().unwrap()
    }
}

impl NetworkLink for FakeLink {
    fn network_name(&self) -> &str {
        "garden"
    }

    fn drop_association(&mut self) {
        let mut script = self.script();
        script.associated = false;
        script.pending = None;
        script.drops += 1;
    }

    fn begin_association(&mut self) -> Result<()> {
        let mut script = self.script();
        script.begins += 1;
        script.pending = script.plan.pop_front().unwrap_or(Some(0));
        Ok(())
    }

    fn is_associated(&mut self) -> bool {
        let mut script = self.script();
        if script.associated {
            return true;
        }
        match script.pending {
            Some(0) => {
                script.associated = true;
                script.pending = None;
                true
            }
            Some(n) => {
                script.pending = Some(n - 1);
                false
            }
            None => false,
        }
    }

    fn local_ip(&mut self) -> Option<Ipv4Addr> {
        self.script().associated.then(|| Ipv4Addr::new(192, 168, 1, 42))
    }
}

#[derive(Debug, Default)]
pub struct SessionScript {
    pub connected: bool,
    pub connect_results: VecDeque<Result<(), SessionRefused>>,
    pub publish_results: VecDeque<Result<(), String>>,
    pub attempts: usize,
    pub credentials: Option<(String, String)>,
    pub published: Vec<(String, String)>,
    pub inbound: VecDeque<Inbound>,
    pub polls: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FakeSession(Arc<Mutex<SessionScript>>);

impl FakeSession {
    pub fn connected() -> Self {
        let session = Self::default();
        session.script().connected = true;
        session
    }

    pub fn refusing(times: usize) -> Self {
        let session = Self::default();
        for _ in 0..times {
            session
                .script()
                .connect_results
                .push_back(Err(SessionRefused::new(SessionRefused::CONNECT_FAILED)));
        }
        session
    }

    pub fn fail_next_publish(&self) {
        self.script()
            .publish_results
            .push_back(Err("broker rejected publish".to_string()));
    }

    pub fn push_inbound(&self, topic: &str, payload: &str) {
        self.script().inbound.push_back(Inbound {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
    }

    pub fn script(&self) -> MutexGuard<'_, SessionScript> {
        self.0.lock().unwrap()
    }
}

impl SessionTransport for FakeSession {
    fn connect(&mut self, client_id: &str, token: &str) -> Result<(), SessionRefused> {
        let mut script = self.script();
        script.attempts += 1;
        script.credentials = Some((client_id.to_string(), token.to_string()));
        let result = script.connect_results.pop_front().unwrap_or(Ok(()));
        script.connected = result.is_ok();
        result
    }

    fn is_connected(&self) -> bool {
        self.script().connected
    }

    fn poll(&mut self) -> Option<Inbound> {
        let mut script = self.script();
        script.polls += 1;
        script.inbound.pop_front()
    }

    fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        let mut script = self.script();
        script.publish_results.pop_front().unwrap_or(Ok(())).map_err(|e| anyhow!(e))?;
        script.published.push((topic.to_string(), payload.to_string()));
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeIndicator(Arc<Mutex<Vec<bool>>>);

impl FakeIndicator {
    pub fn history(&self) -> Vec<bool> {
        self.0.lock().unwrap().clone()
    }
}

impl Indicator for FakeIndicator {
    fn set(&mut self, on: bool) {
        self.0.lock().unwrap().push(on);
    }
}

/// Register file standing in for the AXP192 on the I2C bus
pub struct FakeBus {
    pub regs: [u8; 256],
    pub writes: Vec<(u8, u8)>,
    pub offline: bool,
    pub fail_writes: bool,
}

impl FakeBus {
    pub fn axp192() -> Self {
        let mut regs = [0u8; 256];
        regs[reg::IC_TYPE as usize] = AXP192_CHIP_ID;
        regs[reg::POWER_OUTPUT_CTL as usize] = 0b0100_1111;
        Self {
            regs,
            writes: Vec::new(),
            offline: false,
            fail_writes: false,
        }
    }

    pub fn absent() -> Self {
        Self {
            offline: true,
            ..Self::axp192()
        }
    }
}

impl RegisterBus for FakeBus {
    fn read(&mut self, reg: u8) -> Result<u8> {
        if self.offline {
            return Err(anyhow!("NACK"));
        }
        Ok(self.regs[reg as usize])
    }

    fn write(&mut self, reg: u8, value: u8) -> Result<()> {
        if self.offline || self.fail_writes {
            return Err(anyhow!("NACK"));
        }
        self.regs[reg as usize] = value;
        self.writes.push((reg, value));
        Ok(())
    }
}
