// Firmware Update Service Module
// Password-protected HTTP endpoint that streams a new image into the inactive
// OTA slot, advertised over mDNS. The handler runs on the HTTP server's own task
// and only reports what happened through a channel; the telemetry task drains
// and logs those events once per cycle.

use std::sync::mpsc::{self, Receiver, Sender};

use anyhow::{Context, Result};
use embedded_svc::http::{Headers, Method};
use embedded_svc::io::{Read, Write};
use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::http::server::{Configuration as HttpConfiguration, EspHttpServer};
use esp_idf_svc::mdns::EspMdns;
use esp_idf_svc::ota::EspOta;
use sha2::{Digest, Sha256};

use soil_shared::update::{hex_digest, ProgressTracker, UpdateError, UpdateEvent, UpdateService};
use soil_shared::{console_info, console_warn};

use crate::system_state::DeviceContext;

const UPDATE_PATH: &str = "/update";
const PASSWORD_HEADER: &str = "X-Update-Password";
const CHUNK_SIZE: usize = 4096;
const HTTP_STACK_SIZE: usize = 10 * 1024;
const REBOOT_GRACE_MS: u32 = 1000; // Leaves time for the End event to be logged

/// Keeps the HTTP server and mDNS responder alive; owned by the main task
pub struct HttpUpdateService {
    _server: EspHttpServer<'static>,
    _mdns: EspMdns,
}

/// Receiving end of the update events, handed to the telemetry task
pub struct UpdateEvents(Receiver<UpdateEvent>);

impl HttpUpdateService {
    pub fn start(ctx: &DeviceContext, hostname: &str, password: String) -> Result<(Self, UpdateEvents)> {
        // An image that booted this far is good; stop the bootloader from rolling back
        match EspOta::new() {
            Ok(mut ota) => {
                if let Err(e) = ota.mark_running_slot_valid() {
                    console_warn!(ctx.console, "Failed to mark running OTA slot valid: {:?}", e);
                }
            }
            Err(e) => console_warn!(ctx.console, "OTA partitions unavailable: {:?}", e),
        }

        let mut mdns = EspMdns::take().context("Failed to take mDNS")?;
        mdns.set_hostname(hostname)?;
        mdns.set_instance_name("Soil Quality Sensor")?;
        mdns.add_service(None, "_http", "_tcp", 80, &[])?;

        let (tx, events) = mpsc::channel();
        let server = create_update_server(tx, password)?;
        console_info!(
            ctx.console,
            "Firmware update service ready at http://{}.local{}",
            hostname,
            UPDATE_PATH
        );

        let service = Self {
            _server: server,
            _mdns: mdns,
        };
        Ok((service, UpdateEvents(events)))
    }
}

impl UpdateService for UpdateEvents {
    fn next_event(&mut self) -> Option<UpdateEvent> {
        self.0.try_recv().ok()
    }
}

fn create_update_server(events: Sender<UpdateEvent>, password: String) -> Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: HTTP_STACK_SIZE,
        ..Default::default()
    };
    let mut server = EspHttpServer::new(&conf)?;

    server.fn_handler::<anyhow::Error, _>(UPDATE_PATH, Method::Post, move |mut req| {
        let authorized = !password.is_empty() && req.header(PASSWORD_HEADER) == Some(password.as_str());
        if !authorized {
            let _ = events.send(UpdateEvent::Error(UpdateError::Auth));
            req.into_response(401, Some("Unauthorized"), &[])?
                .write_all(b"Auth Failed")?;
            return Ok(());
        }

        let total_bytes = req.content_len().map(|len| len as usize);
        let _ = events.send(UpdateEvent::Start { total_bytes });

        match receive_image(&mut req, total_bytes, &events) {
            Ok((bytes, sha256)) => {
                let _ = events.send(UpdateEvent::End { bytes, sha256 });
                req.into_ok_response()?.write_all(b"OK")?;
                FreeRtos::delay_ms(REBOOT_GRACE_MS);
                unsafe { esp_idf_svc::sys::esp_restart() }
            }
            Err(error) => {
                let _ = events.send(UpdateEvent::Error(error));
                req.into_response(500, Some("Update Failed"), &[])?
                    .write_all(format!("{:?} Failed", error).as_bytes())?;
                Ok(())
            }
        }
    })?;

    Ok(server)
}

/// Stream the request body into the next OTA slot. Returns the image size and digest.
fn receive_image<R: Read>(
    body: &mut R,
    total_bytes: Option<usize>,
    events: &Sender<UpdateEvent>,
) -> std::result::Result<(usize, String), UpdateError> {
    let mut ota = EspOta::new().map_err(|_| UpdateError::Begin)?;
    let mut update = ota.initiate_update().map_err(|_| UpdateError::Begin)?;

    let mut hasher = Sha256::new();
    let mut progress = ProgressTracker::new(total_bytes);
    let mut chunk = [0u8; CHUNK_SIZE];

    loop {
        let read = match body.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(_) => {
                let _ = update.abort();
                return Err(UpdateError::Receive);
            }
        };
        if update.write(&chunk[..read]).is_err() {
            let _ = update.abort();
            return Err(UpdateError::Receive);
        }
        hasher.update(&chunk[..read]);
        if let Some(percent) = progress.advance(read) {
            let _ = events.send(UpdateEvent::Progress { percent });
        }
    }

    let received = progress.received();
    if received == 0 {
        let _ = update.abort();
        return Err(UpdateError::Connect);
    }
    if total_bytes.is_some_and(|total| total != received) {
        let _ = update.abort();
        return Err(UpdateError::Receive);
    }

    update.complete().map_err(|_| UpdateError::End)?;
    Ok((received, hex_digest(&hasher.finalize())))
}
