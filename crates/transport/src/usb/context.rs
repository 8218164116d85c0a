//! Process-wide transport state
//!
//! [`TransportContext`] owns the USB context and the append-only list of
//! discovered devices. Records are only handed out by reference.

use crate::config::UsbSettings;
use crate::usb::device::DeviceRecord;
use crate::usb::discovery;
use crate::usb::session::SessionOptions;
use protocol::DeviceSummary;
use rusb::Context;
use tracing::{debug, info, warn};

pub struct TransportContext {
    devices: Vec<DeviceRecord>,
    usb: Option<Context>,
    filters: Vec<String>,
    options: SessionOptions,
}

impl TransportContext {
    /// Initialise the USB context. No devices are probed until
    /// [`discover_devices`](Self::discover_devices) runs.
    pub fn new(settings: &UsbSettings) -> Result<Self, rusb::Error> {
        let usb = Context::new()?;
        debug!("USB context initialised");
        Ok(Self {
            devices: Vec::new(),
            usb: Some(usb),
            filters: settings.filters.clone(),
            options: settings.session_options(),
        })
    }

    /// Context without a USB backend, holding records built by the caller
    pub fn from_records(records: Vec<DeviceRecord>) -> Self {
        Self {
            devices: records,
            usb: None,
            filters: Vec::new(),
            options: SessionOptions::default(),
        }
    }

    /// Enumerate the bus and append newly found compatible devices.
    ///
    /// Returns the number of records added.
    pub fn discover_devices(&mut self) -> usize {
        let Some(usb) = &self.usb else {
            warn!("Discovery requested without a USB context");
            return 0;
        };

        let known: Vec<(u8, u8)> = self
            .devices
            .iter()
            .map(|d| (d.bus_number(), d.device_address()))
            .collect();
        let found = discovery::scan(usb, &self.filters, &known, self.options);
        let added = found.len();
        self.devices.extend(found);

        info!(
            "Discovery added {} PHDC device(s), {} total",
            added,
            self.devices.len()
        );
        added
    }

    pub fn devices(&self) -> &[DeviceRecord] {
        &self.devices
    }

    pub fn device(&self, index: usize) -> Option<&DeviceRecord> {
        self.devices.get(index)
    }

    pub fn device_mut(&mut self, index: usize) -> Option<&mut DeviceRecord> {
        self.devices.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn summaries(&self) -> Vec<DeviceSummary> {
        self.devices
            .iter()
            .enumerate()
            .map(|(index, record)| record.summary(index))
            .collect()
    }

    /// Release every record, then the USB context. Safe to call repeatedly.
    pub fn release(&mut self) {
        if self.devices.is_empty() && self.usb.is_none() {
            return;
        }
        for record in &mut self.devices {
            record.release();
        }
        self.devices.clear();
        self.usb = None;
        debug!("Transport context released");
    }
}

impl Drop for TransportContext {
    fn drop(&mut self) {
        self.release();
    }
}
