//! PHDC value types
//!
//! Types shared between the descriptor parser, the USB transport and the
//! command line front-end.

use serde::{Deserialize, Serialize};
use std::fmt;

/// IEEE 11073-104xx device specialization code
///
/// Read little-endian from the 11073-PHD function descriptor. The code names
/// the device profile (pulse oximeter, scale, ...) the agent implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Specialization(pub u16);

impl Specialization {
    pub const PULSE_OXIMETER: Self = Self(0x1004);
    pub const HEART_RATE: Self = Self(0x1005);
    pub const BLOOD_PRESSURE: Self = Self(0x1007);
    pub const THERMOMETER: Self = Self(0x1008);
    pub const WEIGHING_SCALE: Self = Self(0x100F);
    pub const GLUCOSE_METER: Self = Self(0x1011);
    pub const INR_METER: Self = Self(0x1012);
    pub const BODY_COMPOSITION: Self = Self(0x1014);
    pub const PEAK_FLOW: Self = Self(0x1015);
    pub const CARDIO_FITNESS: Self = Self(0x1029);
    pub const STRENGTH_FITNESS: Self = Self(0x102A);
    pub const ACTIVITY_HUB: Self = Self(0x1047);
    pub const MEDICATION_MONITOR: Self = Self(0x1048);

    /// Raw code as carried on the wire
    pub fn code(self) -> u16 {
        self.0
    }

    /// Human readable profile name, if the code is a known 11073-104xx profile
    pub fn profile_name(self) -> Option<&'static str> {
        let name = match self {
            Self::PULSE_OXIMETER => "Pulse Oximeter",
            Self::HEART_RATE => "Heart Rate Monitor",
            Self::BLOOD_PRESSURE => "Blood Pressure Monitor",
            Self::THERMOMETER => "Thermometer",
            Self::WEIGHING_SCALE => "Weighing Scale",
            Self::GLUCOSE_METER => "Glucose Meter",
            Self::INR_METER => "INR Meter",
            Self::BODY_COMPOSITION => "Body Composition Analyzer",
            Self::PEAK_FLOW => "Peak Flow Monitor",
            Self::CARDIO_FITNESS => "Cardiovascular Fitness Monitor",
            Self::STRENGTH_FITNESS => "Strength Fitness Equipment",
            Self::ACTIVITY_HUB => "Independent Living Activity Hub",
            Self::MEDICATION_MONITOR => "Medication Monitor",
            _ => return None,
        };
        Some(name)
    }
}

impl From<u16> for Specialization {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl fmt::Display for Specialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.profile_name() {
            Some(name) => write!(f, "{:#06x} ({})", self.0, name),
            None => write!(f, "{:#06x}", self.0),
        }
    }
}

/// Data format announced by the class-function descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataCode {
    /// Vendor-specific payloads, not usable by an 11073 manager
    Vendor,
    /// IEEE 11073-20601 APDUs
    Ieee11073_20601,
}

/// Outcome of scanning an interface's class-specific descriptors
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhdcCapabilities {
    /// Final verdict: 11073 marker was the last marker seen and at least
    /// one specialization is declared
    pub compatible: bool,
    /// Last data-code marker seen, if any
    pub data_code: Option<DataCode>,
    /// Specializations in descriptor order
    pub specializations: Vec<Specialization>,
}

impl PhdcCapabilities {
    /// Verdict used for any stream that failed to parse
    pub fn incompatible() -> Self {
        Self::default()
    }
}

/// Endpoint addresses found on a health interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub bulk_in: Option<u8>,
    pub bulk_out: Option<u8>,
    pub interrupt_in: Option<u8>,
}

/// Snapshot of a discovered device, suitable for display or serialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSummary {
    /// Position in the transport's device list
    pub index: usize,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: u8,
    pub device_address: u8,
    pub name: String,
    pub manufacturer: String,
    pub serial_number: String,
    /// Interface number of the PHDC interface
    pub health_interface: u8,
    pub endpoints: Endpoints,
    pub specializations: Vec<Specialization>,
}
