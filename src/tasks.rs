// Task Spawning Module
// Both agent tasks are plain std threads; the FreeRTOS attributes (name, stack,
// priority, core) are set through the spawn configuration right before each spawn.

use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Result};
use esp_idf_svc::hal::cpu::Core;
use esp_idf_svc::hal::task::thread::ThreadSpawnConfiguration;
use soil_shared::console_info;

use crate::system_state::DeviceContext;

pub struct TaskSpec {
    pub name: &'static [u8], // NUL-terminated, shown in FreeRTOS task lists
    pub stack_size: usize,
    pub priority: u8,
    pub core: Core,
}

pub const TELEMETRY_TASK: TaskSpec = TaskSpec {
    name: b"telemetry\0",
    stack_size: 10_000,
    priority: 1,
    core: Core::Core1,
};

pub const POWER_TASK: TaskSpec = TaskSpec {
    name: b"power\0",
    stack_size: 5_000,
    priority: 1,
    core: Core::Core0,
};

/// Spawn `body` as a FreeRTOS task pinned to the core in `spec`
pub fn spawn_pinned<F>(ctx: &DeviceContext, spec: &TaskSpec, body: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    ThreadSpawnConfiguration {
        name: Some(spec.name),
        stack_size: spec.stack_size,
        priority: spec.priority,
        pin_to_core: Some(spec.core),
        ..Default::default()
    }
    .set()
    .map_err(|e| anyhow!("Failed to set spawn configuration: {:?}", e))?;

    let spawned = thread::Builder::new().stack_size(spec.stack_size).spawn(body);

    // Later threads (MQTT receiver, HTTP handlers) get the defaults again
    ThreadSpawnConfiguration::default()
        .set()
        .map_err(|e| anyhow!("Failed to reset spawn configuration: {:?}", e))?;

    let handle = spawned?;
    console_info!(
        ctx.console,
        "Task {} started on {:?}",
        String::from_utf8_lossy(&spec.name[..spec.name.len() - 1]),
        spec.core
    );
    Ok(handle)
}
