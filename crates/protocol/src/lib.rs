//! Protocol library for phdc-usb
//!
//! Decoding of the USB Personal Healthcare Device Class (PHDC) class-specific
//! descriptors, and the value types shared between the transport and its
//! front-ends. This crate performs no I/O.
//!
//! # Example
//!
//! ```
//! use protocol::{parse_class_descriptors, DataCode};
//!
//! // Vendor-specific device: never compatible, whatever it declares
//! let extra = [
//!     0x05, 0x14, 0x00, 0x00, 0x00,
//!     0x06, 0x10, 0x00, 0x01, 0x04, 0x10,
//! ];
//! let caps = parse_class_descriptors(&extra);
//! assert!(!caps.compatible);
//! assert_eq!(caps.data_code, Some(DataCode::Vendor));
//! ```

pub mod descriptor;
pub mod error;
pub mod types;

pub use descriptor::{
    CLASS_FUNCTION_DESCRIPTOR, DATA_CODE_11073_20601, DATA_CODE_OFFSET, DATA_CODE_VENDOR,
    DescriptorCursor, DescriptorEntry, METADATA_DESCRIPTOR, PHD_FUNCTION_DESCRIPTOR,
    PHDC_INTERFACE_CLASS, QOS_DESCRIPTOR, SPECIALIZATION_COUNT_OFFSET, SPECIALIZATIONS_OFFSET,
    parse_class_descriptors, try_parse_class_descriptors,
};
pub use error::{DescriptorError, Result};
pub use types::{DataCode, DeviceSummary, Endpoints, PhdcCapabilities, Specialization};
