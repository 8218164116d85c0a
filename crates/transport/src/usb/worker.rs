//! Transport worker thread
//!
//! Owns the [`TransportContext`] on a dedicated OS thread and talks to the
//! Tokio runtime through the probe bridge. While a device is being serviced
//! the loop alternates between non-blocking command checks and bounded
//! service cycles; otherwise it blocks on the command channel.

use crate::config::UsbSettings;
use crate::usb::context::TransportContext;
use crate::usb::libusb::LibusbConnector;
use crate::usb::link::LinkConnector;
use common::{ProbeCommand, ProbeEvent, ProbeWorker};
use protocol::DeviceSummary;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct ProbeWorkerThread {
    context: TransportContext,
    connector: Box<dyn LinkConnector>,
    worker: ProbeWorker,
    /// Index of the device being serviced
    active: Option<usize>,
    poll_timeout: Duration,
}

impl ProbeWorkerThread {
    /// Initialise libusb and run discovery
    pub fn new(worker: ProbeWorker, settings: &UsbSettings) -> Result<Self, rusb::Error> {
        let mut context = TransportContext::new(settings)?;
        context.discover_devices();
        Ok(Self::with_context(
            worker,
            context,
            Box::new(LibusbConnector),
            settings.poll_timeout(),
        ))
    }

    pub fn with_context(
        worker: ProbeWorker,
        context: TransportContext,
        connector: Box<dyn LinkConnector>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            context,
            connector,
            worker,
            active: None,
            poll_timeout,
        }
    }

    /// Run until a Shutdown command arrives or every bridge is dropped
    pub fn run(mut self) {
        info!(
            "Transport worker started with {} device(s)",
            self.context.len()
        );

        loop {
            let command = if self.active.is_some() {
                if self.worker.is_closed() {
                    debug!("Command channel closed");
                    break;
                }
                self.worker.try_recv_command()
            } else {
                match self.worker.recv_command() {
                    Ok(command) => Some(command),
                    Err(e) => {
                        debug!("Command channel closed: {}", e);
                        break;
                    }
                }
            };

            match command {
                Some(ProbeCommand::Shutdown) => {
                    info!("Transport worker shutting down");
                    break;
                }
                Some(command) => self.handle_command(command),
                None => {}
            }

            self.service_active();
        }

        self.stop_active(None);
        self.context.release();
        info!("Transport worker stopped");
    }

    /// Handle a command, keeping the thread alive if a handler panics
    fn handle_command(&mut self, command: ProbeCommand) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(command)
        }));

        if let Err(e) = result {
            error!("Panic in transport command handler: {:?}", e);
        }
    }

    fn handle_command_inner(&mut self, command: ProbeCommand) {
        match command {
            ProbeCommand::ListDevices { response } => {
                let devices = self.context.summaries();
                debug!("Listing {} devices", devices.len());
                let _ = response.send(devices);
            }

            ProbeCommand::Listen { index, response } => {
                let result = self.listen(index);
                let _ = response.send(result);
            }

            ProbeCommand::SendApdu { data, response } => {
                debug!("Sending {} byte APDU", data.len());
                let result = match self.active.and_then(|i| self.context.device_mut(i)) {
                    Some(record) => record.send(&data).map_err(|e| e.to_string()),
                    None => Err("No device is being serviced".to_string()),
                };
                let _ = response.send(result);
            }

            // Handled by the run loop
            ProbeCommand::Shutdown => {}
        }
    }

    fn listen(&mut self, index: usize) -> Result<DeviceSummary, String> {
        if self.active.is_some_and(|active| active != index) {
            self.stop_active(None);
        }

        let event_tx = self.worker.event_tx.clone();
        let record = self
            .context
            .device_mut(index)
            .ok_or_else(|| format!("No PHDC device at index {}", index))?;

        record.set_receiver(move |data: &[u8]| {
            let event = ProbeEvent::ApduReceived {
                index,
                data: data.to_vec(),
            };
            if let Err(e) = event_tx.send_blocking(event) {
                warn!("Dropping received data: {}", e);
            }
        });
        record
            .open_session(self.connector.as_ref())
            .map_err(|e| e.to_string())?;

        self.active = Some(index);
        info!("Servicing device {}", index);
        Ok(record.summary(index))
    }

    fn service_active(&mut self) {
        let Some(index) = self.active else {
            return;
        };
        let Some(record) = self.context.device_mut(index) else {
            self.active = None;
            return;
        };

        if let Err(e) = record.service_timeout(Some(self.poll_timeout)) {
            warn!("Servicing device {} failed: {}", index, e);
            self.stop_active(Some(e.to_string()));
        }
    }

    fn stop_active(&mut self, reason: Option<String>) {
        let Some(index) = self.active.take() else {
            return;
        };
        if let Some(record) = self.context.device_mut(index) {
            record.close_session();
        }
        if let Err(e) = self.worker.send_event(ProbeEvent::SessionClosed { index, reason }) {
            debug!("Could not report closed session: {}", e);
        }
    }
}

/// Spawn the transport worker thread
///
/// The thread runs until a Shutdown command is received or the bridge is
/// dropped. USB initialisation failures are logged and end the thread.
pub fn spawn_probe_worker(
    worker: ProbeWorker,
    settings: UsbSettings,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("phdc-transport".to_string())
        .spawn(move || match ProbeWorkerThread::new(worker, &settings) {
            Ok(thread) => thread.run(),
            Err(e) => error!("Failed to initialise USB transport: {}", e),
        })
}
