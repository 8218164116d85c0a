//! Discovered PHDC device
//!
//! A [`DeviceRecord`] is created by discovery with every attribute read from
//! a single descriptor fetch, and is the handle the host uses to open,
//! service and release the device.

use crate::error::{OpenError, TransferError};
use crate::usb::events::PollSet;
use crate::usb::link::LinkConnector;
use crate::usb::session::{Session, SessionOptions};
use nix::poll::PollFlags;
use protocol::{DeviceSummary, Endpoints, Specialization};
use rusb::{Context, Device};
use std::fmt;
use std::os::fd::RawFd;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Callback receiving each chunk of data read from the device, in order
pub type Receiver = Box<dyn FnMut(&[u8])>;

/// Identity and strings of a device, as read during discovery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: u8,
    pub device_address: u8,
    pub name: String,
    pub manufacturer: String,
    pub serial_number: String,
}

/// One compatible health device
pub struct DeviceRecord {
    identity: DeviceIdentity,
    health_interface: u8,
    endpoints: Endpoints,
    specializations: Vec<Specialization>,
    /// Long-lived reference held from discovery until release
    device: Option<Device<Context>>,
    options: SessionOptions,
    session: Option<Session>,
    receiver: Option<Receiver>,
    released: bool,
}

impl DeviceRecord {
    pub fn new(
        identity: DeviceIdentity,
        health_interface: u8,
        endpoints: Endpoints,
        specializations: Vec<Specialization>,
    ) -> Self {
        Self {
            identity,
            health_interface,
            endpoints,
            specializations,
            device: None,
            options: SessionOptions::default(),
            session: None,
            receiver: None,
            released: false,
        }
    }

    pub(crate) fn with_device(mut self, device: Device<Context>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn vendor_id(&self) -> u16 {
        self.identity.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.identity.product_id
    }

    pub fn bus_number(&self) -> u8 {
        self.identity.bus_number
    }

    pub fn device_address(&self) -> u8 {
        self.identity.device_address
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn manufacturer(&self) -> &str {
        &self.identity.manufacturer
    }

    pub fn serial_number(&self) -> &str {
        &self.identity.serial_number
    }

    pub fn health_interface(&self) -> u8 {
        self.health_interface
    }

    pub fn endpoints(&self) -> Endpoints {
        self.endpoints
    }

    pub fn specializations(&self) -> &[Specialization] {
        &self.specializations
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    pub fn device(&self) -> Option<&Device<Context>> {
        self.device.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Transfers submitted but not yet disposed of
    pub fn in_flight(&self) -> usize {
        self.session.as_ref().map_or(0, Session::in_flight)
    }

    /// Install the callback that receives data read from the device
    pub fn set_receiver(&mut self, receiver: impl FnMut(&[u8]) + 'static) {
        self.receiver = Some(Box::new(receiver));
    }

    /// Open the device. A no-op if it is already open.
    pub fn open_session(&mut self, connector: &dyn LinkConnector) -> Result<(), OpenError> {
        if self.released {
            return Err(OpenError::Released);
        }
        if self.session.is_some() {
            debug!("{:04x}:{:04x} already open", self.vendor_id(), self.product_id());
            return Ok(());
        }

        let session = Session::open(
            connector,
            self.identity.vendor_id,
            self.identity.product_id,
            self.health_interface,
            self.options,
        )
        .inspect_err(|e| {
            warn!(
                "Failed to open {:04x}:{:04x}: {}",
                self.identity.vendor_id, self.identity.product_id, e
            )
        })?;

        self.session = Some(session);
        Ok(())
    }

    /// Close the session, keeping the record usable for a later open
    pub fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
            info!(
                "Closed {:04x}:{:04x}",
                self.identity.vendor_id, self.identity.product_id
            );
        }
    }

    /// Submit `data` on the bulk-OUT endpoint without waiting for completion
    pub fn send(&mut self, data: &[u8]) -> Result<(), TransferError> {
        if data.is_empty() {
            return Err(TransferError::EmptyPayload);
        }
        let session = self.session.as_mut().ok_or(TransferError::NotOpen)?;
        let endpoint = self
            .endpoints
            .bulk_out
            .ok_or(TransferError::MissingEndpoint("bulk-out"))?;
        session.send(endpoint, data)
    }

    /// Make sure a receive is pending, then block until the device has
    /// activity and dispatch it. Returns true once activity was handled.
    pub fn service(&mut self) -> Result<bool, TransferError> {
        self.service_timeout(None)
    }

    /// Same as [`service`](Self::service) with a bounded wait; returns false
    /// on timeout
    pub fn service_timeout(&mut self, timeout: Option<Duration>) -> Result<bool, TransferError> {
        let session = self.session.as_mut().ok_or(TransferError::NotOpen)?;
        let endpoint = self
            .endpoints
            .bulk_in
            .ok_or(TransferError::MissingEndpoint("bulk-in"))?;
        let receiver = &mut self.receiver;
        session.service(endpoint, timeout, &mut |data: &[u8]| {
            forward(receiver, data)
        })
    }

    /// One synchronous bulk read; returns the number of bytes read
    pub fn read_blocking(&mut self) -> Result<usize, TransferError> {
        let session = self.session.as_mut().ok_or(TransferError::NotOpen)?;
        let endpoint = self
            .endpoints
            .bulk_in
            .ok_or(TransferError::MissingEndpoint("bulk-in"))?;
        let receiver = &mut self.receiver;
        session.read_blocking(endpoint, &mut |data: &[u8]| forward(receiver, data))
    }

    /// Descriptors a host event loop should watch while the device is open
    pub fn poll_set(&self) -> Option<&PollSet> {
        self.session.as_ref().map(Session::poll_set)
    }

    /// Report readiness observed by a host event loop
    pub fn notify_ready(&mut self, fd: RawFd, flags: PollFlags) -> bool {
        self.session
            .as_mut()
            .is_some_and(|session| session.notify_ready(fd, flags))
    }

    /// Consume pending activity without blocking
    pub fn dispatch_events(&mut self) -> Result<usize, TransferError> {
        let session = self.session.as_mut().ok_or(TransferError::NotOpen)?;
        let receiver = &mut self.receiver;
        session.dispatch_events(&mut |data: &[u8]| forward(receiver, data))
    }

    /// Release everything the record holds, in reverse order of acquisition.
    ///
    /// Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.close_session();
        self.receiver = None;
        self.device = None;
        self.identity.name.clear();
        self.identity.manufacturer.clear();
        self.identity.serial_number.clear();
        self.specializations.clear();
        self.released = true;
        debug!(
            "Released record for {:04x}:{:04x}",
            self.identity.vendor_id, self.identity.product_id
        );
    }

    pub fn summary(&self, index: usize) -> DeviceSummary {
        DeviceSummary {
            index,
            vendor_id: self.identity.vendor_id,
            product_id: self.identity.product_id,
            bus_number: self.identity.bus_number,
            device_address: self.identity.device_address,
            name: self.identity.name.clone(),
            manufacturer: self.identity.manufacturer.clone(),
            serial_number: self.identity.serial_number.clone(),
            health_interface: self.health_interface,
            endpoints: self.endpoints,
            specializations: self.specializations.clone(),
        }
    }
}

impl Drop for DeviceRecord {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRecord")
            .field("identity", &self.identity)
            .field("health_interface", &self.health_interface)
            .field("endpoints", &self.endpoints)
            .field("specializations", &self.specializations)
            .field("open", &self.is_open())
            .field("released", &self.released)
            .finish()
    }
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:04x}:{:04x} {} ({})",
            self.identity.vendor_id,
            self.identity.product_id,
            display_or(&self.identity.name, "Unknown Device"),
            display_or(&self.identity.manufacturer, "Unknown Manufacturer"),
        )?;
        writeln!(
            f,
            "  Bus {:03} Device {:03} Interface {}",
            self.identity.bus_number, self.identity.device_address, self.health_interface
        )?;
        if !self.identity.serial_number.is_empty() {
            writeln!(f, "  Serial: {}", self.identity.serial_number)?;
        }
        writeln!(
            f,
            "  Endpoints: bulk-in {}, bulk-out {}, interrupt-in {}",
            endpoint_label(self.endpoints.bulk_in),
            endpoint_label(self.endpoints.bulk_out),
            endpoint_label(self.endpoints.interrupt_in),
        )?;
        for specialization in &self.specializations {
            writeln!(f, "  Specialization: {}", specialization)?;
        }
        Ok(())
    }
}

fn forward(receiver: &mut Option<Receiver>, data: &[u8]) {
    match receiver {
        Some(receiver) => receiver(data),
        None => debug!("No receiver installed, dropping {} bytes", data.len()),
    }
}

fn display_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() { fallback } else { value }
}

fn endpoint_label(address: Option<u8>) -> String {
    address.map_or_else(|| "none".to_string(), |a| format!("{:#04x}", a))
}
