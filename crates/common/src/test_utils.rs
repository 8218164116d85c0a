//! Test utilities for phdc-usb
//!
//! Builders for PHDC class-specific descriptor streams and mock device
//! summaries, shared by the tests of every crate.
//!
//! # Example
//!
//! ```
//! use common::test_utils::DescriptorBuilder;
//! use protocol::parse_class_descriptors;
//!
//! let extra = DescriptorBuilder::new()
//!     .ieee_20601()
//!     .specializations(&[0x1004])
//!     .build();
//! assert!(parse_class_descriptors(&extra).compatible);
//! ```

use protocol::{
    CLASS_FUNCTION_DESCRIPTOR, DATA_CODE_11073_20601, DATA_CODE_VENDOR, DeviceSummary, Endpoints,
    PHD_FUNCTION_DESCRIPTOR, QOS_DESCRIPTOR, Specialization,
};
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Builder for class-specific descriptor streams
#[derive(Debug, Clone, Default)]
pub struct DescriptorBuilder {
    bytes: Vec<u8>,
}

impl DescriptorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a class-function entry carrying `data_code`
    pub fn class_function(mut self, data_code: u8) -> Self {
        self.bytes
            .extend_from_slice(&[0x05, CLASS_FUNCTION_DESCRIPTOR, 0x00, data_code, 0x00]);
        self
    }

    /// Append a class-function entry announcing 11073-20601
    pub fn ieee_20601(self) -> Self {
        self.class_function(DATA_CODE_11073_20601)
    }

    /// Append a class-function entry announcing vendor-specific data
    pub fn vendor(self) -> Self {
        self.class_function(DATA_CODE_VENDOR)
    }

    /// Append a 11073-PHD function entry listing `codes`
    pub fn specializations(mut self, codes: &[u16]) -> Self {
        let length = 4 + 2 * codes.len();
        assert!(length <= usize::from(u8::MAX), "too many specializations");
        self.bytes.extend_from_slice(&[
            length as u8,
            PHD_FUNCTION_DESCRIPTOR,
            0x00,
            codes.len() as u8,
        ]);
        for code in codes {
            self.bytes.extend_from_slice(&code.to_le_bytes());
        }
        self
    }

    /// Append a QoS entry, which the parser skips
    pub fn qos(mut self) -> Self {
        self.bytes
            .extend_from_slice(&[0x04, QOS_DESCRIPTOR, 0x01, 0x01]);
        self
    }

    /// Append arbitrary bytes (for malformed streams)
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// Descriptor stream of a compatible pulse oximeter
pub fn oximeter_descriptors() -> Vec<u8> {
    DescriptorBuilder::new()
        .ieee_20601()
        .specializations(&[Specialization::PULSE_OXIMETER.code()])
        .build()
}

/// Create a mock DeviceSummary for testing
///
/// # Example
/// ```
/// use common::test_utils::create_mock_device_summary;
///
/// let device = create_mock_device_summary(0, 0x0483, 0x5750);
/// assert_eq!(device.vendor_id, 0x0483);
/// ```
pub fn create_mock_device_summary(index: usize, vendor_id: u16, product_id: u16) -> DeviceSummary {
    DeviceSummary {
        index,
        vendor_id,
        product_id,
        bus_number: 1,
        device_address: (index % 127 + 1) as u8,
        name: format!("Test Monitor {}", index),
        manufacturer: "Test Manufacturer".to_string(),
        serial_number: format!("SN{:06}", index),
        health_interface: 0,
        endpoints: Endpoints {
            bulk_in: Some(0x81),
            bulk_out: Some(0x02),
            interrupt_in: Some(0x83),
        },
        specializations: vec![Specialization::PULSE_OXIMETER],
    }
}

/// Run a future with a timeout, for tests that talk to a worker thread
pub async fn with_timeout<F, T>(
    timeout: Duration,
    future: F,
) -> Result<T, tokio::time::error::Elapsed>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(timeout, future).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::parse_class_descriptors;

    #[test]
    fn test_builder_produces_compatible_stream() {
        let caps = parse_class_descriptors(&oximeter_descriptors());
        assert!(caps.compatible);
        assert_eq!(caps.specializations, vec![Specialization::PULSE_OXIMETER]);
    }

    #[test]
    fn test_builder_vendor_stream() {
        let extra = DescriptorBuilder::new()
            .qos()
            .vendor()
            .specializations(&[0x1004, 0x1007])
            .build();
        let caps = parse_class_descriptors(&extra);
        assert!(!caps.compatible);
        assert_eq!(caps.specializations.len(), 2);
    }
}
