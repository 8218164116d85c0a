//! Common utilities for phdc-usb
//!
//! This crate provides shared functionality between the transport library and
//! its front-ends: error handling, logging setup, the async channel bridge for
//! the transport thread, and test helpers.

pub mod channel;
pub mod error;
pub mod logging;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use channel::{ProbeBridge, ProbeCommand, ProbeEvent, ProbeWorker, create_probe_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
