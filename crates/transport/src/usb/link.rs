//! Seam between a device session and the USB stack
//!
//! A [`LinkConnector`] produces a [`HealthLink`]: one USB context plus one open
//! device handle, owned together. Dropping a link closes the handle and then
//! exits the context. Transfers submitted through a link are returned as
//! [`InFlightTransfer`] handles that own their buffers until completion.

use crate::error::OpenError;
use crate::usb::transfers::TransferState;
use nix::poll::PollFlags;
use std::os::fd::RawFd;
use std::time::Duration;

/// One pollable descriptor reported by the USB stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollDescriptor {
    pub fd: RawFd,
    pub events: PollFlags,
}

/// Handle to a submitted asynchronous transfer
pub trait InFlightTransfer {
    /// Current outcome. `Pending` until the completion callback has run.
    fn state(&self) -> TransferState;

    /// Request cancellation. Completion is still reported through event
    /// handling, as `Failed(Cancelled)` or as whatever outcome won the race.
    fn cancel(&mut self);
}

/// Per-device connection to the USB stack
pub trait HealthLink {
    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()>;

    fn release_interface(&mut self, interface: u8) -> rusb::Result<()>;

    fn reset(&mut self) -> rusb::Result<()>;

    /// Descriptors the host must watch for this link's activity
    fn poll_descriptors(&self) -> rusb::Result<Vec<PollDescriptor>>;

    /// Submit a bulk-OUT transfer carrying a copy of `data`
    fn submit_bulk_out(
        &mut self,
        endpoint: u8,
        data: &[u8],
    ) -> rusb::Result<Box<dyn InFlightTransfer>>;

    /// Submit a bulk-IN transfer with a buffer of `capacity` bytes
    fn submit_bulk_in(
        &mut self,
        endpoint: u8,
        capacity: usize,
    ) -> rusb::Result<Box<dyn InFlightTransfer>>;

    /// Synchronous bulk read. A zero `timeout` waits forever.
    fn read_bulk(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize>;

    /// Process pending events, running completion callbacks.
    ///
    /// Waits at most `timeout`; `Duration::ZERO` returns immediately.
    fn handle_events(&mut self, timeout: Duration) -> rusb::Result<()>;
}

/// Factory for links, one per opened session
pub trait LinkConnector {
    fn connect(&self, vendor_id: u16, product_id: u16) -> Result<Box<dyn HealthLink>, OpenError>;
}
