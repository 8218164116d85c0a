//! USB transport for IEEE 11073-20601 personal healthcare devices
//!
//! Finds PHDC devices on the bus, opens them, and moves APDU bytes in both
//! directions over their bulk endpoints. Protocol handling above the raw
//! bytes belongs to the caller, which receives data through a callback.
//!
//! ```no_run
//! use transport::config::UsbSettings;
//! use transport::usb::{LibusbConnector, TransportContext};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut context = TransportContext::new(&UsbSettings::default())?;
//! context.discover_devices();
//!
//! if let Some(device) = context.device_mut(0) {
//!     device.set_receiver(|apdu| println!("{} bytes", apdu.len()));
//!     device.open_session(&LibusbConnector)?;
//!     device.service()?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod usb;

pub use error::{DiscoveryError, OpenError, TransferError};
pub use usb::{DeviceRecord, LibusbConnector, TransportContext};
