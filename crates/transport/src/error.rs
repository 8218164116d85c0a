//! Transport error types

use thiserror::Error;

/// Failure while probing one device during discovery
///
/// Never fatal: the device is logged and skipped.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Failed to read device descriptor: {0}")]
    DeviceDescriptor(#[source] rusb::Error),

    #[error("Failed to read configuration descriptor: {0}")]
    ConfigDescriptor(#[source] rusb::Error),

    #[error("Failed to open device: {0}")]
    Open(#[source] rusb::Error),

    #[error("Failed to claim interface {interface}: {source}")]
    ClaimInterface { interface: u8, source: rusb::Error },
}

/// Failure while opening a device session
///
/// Every resource acquired before the failing step has been released when
/// this is returned.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("Failed to initialise USB context: {0}")]
    ContextInit(#[source] rusb::Error),

    #[error("Device {vendor_id:04x}:{product_id:04x} not found")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    #[error("Failed to claim interface {interface}: {source}")]
    ClaimInterface { interface: u8, source: rusb::Error },

    #[error("Failed to reset device: {0}")]
    Reset(#[source] rusb::Error),

    #[error("Failed to obtain pollable descriptors: {0}")]
    PollDescriptors(#[source] rusb::Error),

    #[error("Device record has been released")]
    Released,
}

/// Failure of a transfer operation
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Device is not open")]
    NotOpen,

    #[error("Device has no {0} endpoint")]
    MissingEndpoint(&'static str),

    #[error("Refusing to send an empty payload")]
    EmptyPayload,

    #[error("Failed to submit transfer: {0}")]
    Submit(#[source] rusb::Error),

    #[error("USB transfer failed: {0}")]
    Usb(#[source] rusb::Error),

    #[error("Failed to wait on pollable descriptors: {0}")]
    Poll(#[source] nix::errno::Errno),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = OpenError::DeviceNotFound {
            vendor_id: 0x0483,
            product_id: 0x5750,
        };
        assert_eq!(err.to_string(), "Device 0483:5750 not found");

        let err = TransferError::MissingEndpoint("bulk-out");
        assert_eq!(err.to_string(), "Device has no bulk-out endpoint");
    }

    #[test]
    fn test_claim_error_exposes_source() {
        use std::error::Error as _;

        let err = OpenError::ClaimInterface {
            interface: 1,
            source: rusb::Error::Busy,
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("interface 1"));
    }
}
