//! Device session
//!
//! Opening a session runs four steps, each undone automatically if a later
//! one fails:
//!
//! 1. connect: fresh USB context, device opened by vendor/product id
//! 2. claim the health interface ([`ClaimedInterface`])
//! 3. reset the device
//! 4. enumerate the pollable descriptors into a [`PollSet`]
//!
//! Dropping a session cancels and drains its transfers, then releases the
//! interface, closes the handle and exits the context, in that order.

use crate::error::{OpenError, TransferError};
use crate::usb::events::PollSet;
use crate::usb::link::{HealthLink, LinkConnector};
use crate::usb::transfers::{DEFAULT_RECEIVE_BUFFER_SIZE, TransferEngine};
use nix::poll::PollFlags;
use std::os::fd::RawFd;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tunables applied to every session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Size of each bulk-IN receive buffer
    pub receive_buffer_size: usize,
    /// Blocking read timeout, zero waits forever
    pub read_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            read_timeout: Duration::ZERO,
        }
    }
}

/// Scoped claim on an interface; released on drop, before the link closes
pub struct ClaimedInterface {
    link: Box<dyn HealthLink>,
    interface: u8,
    claimed: bool,
}

impl ClaimedInterface {
    /// Claim `interface` on `link`. On failure the link is dropped, closing
    /// its handle and context.
    pub fn claim(mut link: Box<dyn HealthLink>, interface: u8) -> Result<Self, OpenError> {
        link.claim_interface(interface)
            .map_err(|source| OpenError::ClaimInterface { interface, source })?;
        Ok(Self {
            link,
            interface,
            claimed: true,
        })
    }

    pub fn interface(&self) -> u8 {
        self.interface
    }

    pub fn link(&self) -> &dyn HealthLink {
        self.link.as_ref()
    }

    pub fn link_mut(&mut self) -> &mut dyn HealthLink {
        self.link.as_mut()
    }

    /// Release the claim; later calls are no-ops
    pub fn release(&mut self) {
        if !self.claimed {
            return;
        }
        self.claimed = false;
        if let Err(e) = self.link.release_interface(self.interface) {
            warn!("Failed to release interface {}: {}", self.interface, e);
        }
    }
}

impl Drop for ClaimedInterface {
    fn drop(&mut self) {
        self.release();
    }
}

/// An open device: link, interface claim, poll set and in-flight transfers
pub struct Session {
    engine: TransferEngine,
    poll_set: PollSet,
    claim: ClaimedInterface,
}

impl Session {
    pub fn open(
        connector: &dyn LinkConnector,
        vendor_id: u16,
        product_id: u16,
        interface: u8,
        options: SessionOptions,
    ) -> Result<Self, OpenError> {
        let link = connector.connect(vendor_id, product_id)?;
        let mut claim = ClaimedInterface::claim(link, interface)?;

        claim.link_mut().reset().map_err(OpenError::Reset)?;

        let descriptors = claim
            .link()
            .poll_descriptors()
            .map_err(OpenError::PollDescriptors)?;
        if descriptors.is_empty() {
            return Err(OpenError::PollDescriptors(rusb::Error::NotSupported));
        }
        let poll_set = PollSet::new(descriptors);

        info!(
            "Opened {:04x}:{:04x} interface {} ({} pollable descriptor(s))",
            vendor_id,
            product_id,
            interface,
            poll_set.len()
        );

        Ok(Self {
            engine: TransferEngine::new(options.receive_buffer_size, options.read_timeout),
            poll_set,
            claim,
        })
    }

    pub fn poll_set(&self) -> &PollSet {
        &self.poll_set
    }

    pub fn notify_ready(&mut self, fd: RawFd, flags: PollFlags) -> bool {
        self.poll_set.mark_ready(fd, flags)
    }

    pub fn in_flight(&self) -> usize {
        self.engine.in_flight()
    }

    pub fn send(&mut self, endpoint: u8, data: &[u8]) -> Result<(), TransferError> {
        self.engine.send(self.claim.link_mut(), endpoint, data)
    }

    /// Request a receive if none is pending, wait for readiness, dispatch.
    ///
    /// Returns false if `timeout` elapsed without activity.
    pub fn service(
        &mut self,
        endpoint: u8,
        timeout: Option<Duration>,
        deliver: &mut dyn FnMut(&[u8]),
    ) -> Result<bool, TransferError> {
        self.engine.request_receive(self.claim.link_mut(), endpoint)?;

        let ready = self.poll_set.wait(timeout).map_err(TransferError::Poll)?;
        if ready == 0 {
            return Ok(false);
        }

        self.dispatch_events(deliver)?;
        Ok(true)
    }

    /// Consume pending events without blocking, then forward completions.
    ///
    /// Returns the number of received chunks delivered.
    pub fn dispatch_events(
        &mut self,
        deliver: &mut dyn FnMut(&[u8]),
    ) -> Result<usize, TransferError> {
        let handled = self.claim.link_mut().handle_events(Duration::ZERO);
        let delivered = self.engine.dispatch(deliver);
        self.poll_set.clear_ready();

        handled.map_err(|e| {
            warn!("USB event handling failed: {}", e);
            TransferError::Usb(e)
        })?;
        Ok(delivered)
    }

    pub fn read_blocking(
        &mut self,
        endpoint: u8,
        deliver: &mut dyn FnMut(&[u8]),
    ) -> Result<usize, TransferError> {
        self.engine
            .read_blocking(self.claim.link_mut(), endpoint, deliver)
    }

    /// Tear the session down (same as dropping it)
    pub fn close(self) {}
}

impl Drop for Session {
    fn drop(&mut self) {
        self.engine.drain(self.claim.link_mut());
        self.poll_set.clear();
        self.claim.release();
        debug!("Session on interface {} closed", self.claim.interface());
    }
}
