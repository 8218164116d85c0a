//! USB transfer engine
//!
//! Owns every in-flight transfer of a session. Sends are fire-and-forget:
//! the engine disposes of them once their completion is observed. Receives
//! are requested one at a time and their data is forwarded upward as a copy.
//! Completions are collected before anything is forwarded, so a receive
//! handler never observes the engine mid-update.

use crate::error::TransferError;
use crate::usb::link::{HealthLink, InFlightTransfer};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Default size of a bulk-IN receive buffer
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 1024;

/// Event passes spent waiting for cancelled transfers at teardown
const DRAIN_PASSES: usize = 10;
const DRAIN_PASS_TIMEOUT: Duration = Duration::from_millis(100);

/// Outcome of an asynchronous transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferState {
    Pending,
    /// Bytes actually transferred (may be empty)
    Completed(Vec<u8>),
    Failed(TransferFailure),
}

impl TransferState {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Reason an asynchronous transfer did not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFailure {
    Error,
    TimedOut,
    Cancelled,
    Stall,
    NoDevice,
    Overflow,
    Unknown(i32),
}

impl TransferFailure {
    /// Map a libusb transfer status (`libusb_transfer_status`) to a failure.
    ///
    /// Status 0 (completed) is not a failure and maps to `Unknown(0)`.
    pub fn from_status(status: i32) -> Self {
        match status {
            1 => Self::Error,
            2 => Self::TimedOut,
            3 => Self::Cancelled,
            4 => Self::Stall,
            5 => Self::NoDevice,
            6 => Self::Overflow,
            other => Self::Unknown(other),
        }
    }
}

/// Direction of a pending transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Send,
    Receive,
}

struct PendingTransfer {
    kind: TransferKind,
    endpoint: u8,
    transfer: Box<dyn InFlightTransfer>,
}

/// In-flight transfer bookkeeping for one session
pub struct TransferEngine {
    pending: Vec<PendingTransfer>,
    receive_capacity: usize,
    read_timeout: Duration,
}

impl TransferEngine {
    /// `read_timeout` of zero makes blocking reads wait forever
    pub fn new(receive_capacity: usize, read_timeout: Duration) -> Self {
        Self {
            pending: Vec::new(),
            receive_capacity: receive_capacity.max(1),
            read_timeout,
        }
    }

    /// Number of transfers whose completion has not been observed yet
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn receive_pending(&self) -> bool {
        self.pending
            .iter()
            .any(|p| p.kind == TransferKind::Receive)
    }

    /// Submit a bulk-OUT transfer carrying a copy of `data`
    pub fn send(
        &mut self,
        link: &mut dyn HealthLink,
        endpoint: u8,
        data: &[u8],
    ) -> Result<(), TransferError> {
        if data.is_empty() {
            return Err(TransferError::EmptyPayload);
        }

        let transfer = link.submit_bulk_out(endpoint, data).map_err(|e| {
            warn!("Bulk-OUT submission on {:#04x} failed: {}", endpoint, e);
            TransferError::Submit(e)
        })?;

        debug!("Submitted bulk-OUT on {:#04x}: {} bytes", endpoint, data.len());
        self.pending.push(PendingTransfer {
            kind: TransferKind::Send,
            endpoint,
            transfer,
        });
        Ok(())
    }

    /// Submit a bulk-IN request unless one is already in flight.
    ///
    /// Returns true if a new request was submitted.
    pub fn request_receive(
        &mut self,
        link: &mut dyn HealthLink,
        endpoint: u8,
    ) -> Result<bool, TransferError> {
        if self.receive_pending() {
            return Ok(false);
        }

        let transfer = link
            .submit_bulk_in(endpoint, self.receive_capacity)
            .map_err(|e| {
                warn!("Bulk-IN submission on {:#04x} failed: {}", endpoint, e);
                TransferError::Submit(e)
            })?;

        trace!(
            "Submitted bulk-IN on {:#04x} ({} byte buffer)",
            endpoint, self.receive_capacity
        );
        self.pending.push(PendingTransfer {
            kind: TransferKind::Receive,
            endpoint,
            transfer,
        });
        Ok(true)
    }

    /// Dispose of every finished transfer, forwarding received data.
    ///
    /// Returns the number of chunks handed to `deliver`.
    pub fn dispatch(&mut self, deliver: &mut dyn FnMut(&[u8])) -> usize {
        let mut finished = Vec::new();
        let mut index = 0;
        while index < self.pending.len() {
            let state = self.pending[index].transfer.state();
            if state.is_pending() {
                index += 1;
            } else {
                finished.push((self.pending.remove(index), state));
            }
        }

        let mut delivered = 0;
        for (transfer, state) in finished {
            match (transfer.kind, state) {
                (TransferKind::Receive, TransferState::Completed(data)) => {
                    debug!(
                        "Bulk-IN on {:#04x} completed: {} bytes",
                        transfer.endpoint,
                        data.len()
                    );
                    deliver(&data);
                    delivered += 1;
                }
                (TransferKind::Send, TransferState::Completed(data)) => {
                    debug!(
                        "Bulk-OUT on {:#04x} completed: {} bytes",
                        transfer.endpoint,
                        data.len()
                    );
                }
                (kind, TransferState::Failed(failure)) => {
                    warn!(
                        "{:?} transfer on {:#04x} failed: {:?}",
                        kind, transfer.endpoint, failure
                    );
                }
                (_, TransferState::Pending) => {}
            }
        }
        delivered
    }

    /// One synchronous bulk read; non-empty data is forwarded to `deliver`
    pub fn read_blocking(
        &mut self,
        link: &mut dyn HealthLink,
        endpoint: u8,
        deliver: &mut dyn FnMut(&[u8]),
    ) -> Result<usize, TransferError> {
        let mut buffer = vec![0u8; self.receive_capacity];
        match link.read_bulk(endpoint, &mut buffer, self.read_timeout) {
            Ok(0) => {
                trace!("Blocking read on {:#04x} returned no data", endpoint);
                Ok(0)
            }
            Ok(len) => {
                debug!("Blocking read on {:#04x}: {} bytes", endpoint, len);
                deliver(&buffer[..len]);
                Ok(len)
            }
            Err(e) => {
                warn!("Blocking read on {:#04x} failed: {}", endpoint, e);
                Err(TransferError::Usb(e))
            }
        }
    }

    /// Cancel everything in flight and wait a bounded time for completions.
    ///
    /// Transfers still pending afterwards are dropped, which leaks them
    /// rather than freeing memory the USB stack may still write to.
    pub fn drain(&mut self, link: &mut dyn HealthLink) {
        if self.pending.is_empty() {
            return;
        }

        debug!("Cancelling {} in-flight transfer(s)", self.pending.len());
        for pending in &mut self.pending {
            pending.transfer.cancel();
        }

        for _ in 0..DRAIN_PASSES {
            if let Err(e) = link.handle_events(DRAIN_PASS_TIMEOUT) {
                warn!("Event handling failed while draining transfers: {}", e);
                break;
            }
            self.pending.retain(|p| p.transfer.state().is_pending());
            if self.pending.is_empty() {
                return;
            }
        }

        warn!(
            "{} transfer(s) still pending after cancellation",
            self.pending.len()
        );
        self.pending.clear();
    }
}
