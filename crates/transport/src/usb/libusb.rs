//! libusb-backed [`HealthLink`]
//!
//! rusb covers contexts, handles and synchronous I/O; asynchronous bulk
//! transfers go through the raw libusb bindings it re-exports.

use crate::error::OpenError;
use crate::usb::link::{HealthLink, InFlightTransfer, LinkConnector, PollDescriptor};
use crate::usb::transfers::{TransferFailure, TransferState};
use nix::poll::PollFlags;
use rusb::ffi::{self, libusb_transfer};
use rusb::{Context, DeviceHandle, UsbContext};
use std::ffi::{c_int, c_void};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

const TRANSFER_TYPE_BULK: u8 = 2;
const TRANSFER_COMPLETED: c_int = 0;

/// Opens links through libusb, one fresh context per session
#[derive(Debug, Default, Clone, Copy)]
pub struct LibusbConnector;

impl LinkConnector for LibusbConnector {
    fn connect(&self, vendor_id: u16, product_id: u16) -> Result<Box<dyn HealthLink>, OpenError> {
        let context = Context::new().map_err(OpenError::ContextInit)?;
        let handle = context
            .open_device_with_vid_pid(vendor_id, product_id)
            .ok_or(OpenError::DeviceNotFound {
                vendor_id,
                product_id,
            })?;
        debug!("Opened {:04x}:{:04x}", vendor_id, product_id);
        Ok(Box::new(LibusbLink { handle, context }))
    }
}

/// Device handle and the context it was opened in.
///
/// Field order matters: the handle is closed before the context exits.
pub struct LibusbLink {
    handle: DeviceHandle<Context>,
    context: Context,
}

impl HealthLink for LibusbLink {
    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()> {
        self.handle.claim_interface(interface)
    }

    fn release_interface(&mut self, interface: u8) -> rusb::Result<()> {
        self.handle.release_interface(interface)
    }

    fn reset(&mut self) -> rusb::Result<()> {
        self.handle.reset()
    }

    fn poll_descriptors(&self) -> rusb::Result<Vec<PollDescriptor>> {
        // SAFETY: the context pointer is valid for the lifetime of `self`
        let list = unsafe { ffi::libusb_get_pollfds(self.context.as_raw()) };
        if list.is_null() {
            return Err(rusb::Error::NotSupported);
        }

        let mut descriptors = Vec::new();
        // SAFETY: libusb returns a NULL-terminated array of valid entries,
        // released with libusb_free_pollfds once copied
        unsafe {
            let mut cursor = list;
            while !(*cursor).is_null() {
                let entry = *cursor;
                descriptors.push(PollDescriptor {
                    fd: (*entry).fd,
                    events: PollFlags::from_bits_truncate((*entry).events),
                });
                cursor = cursor.add(1);
            }
            ffi::libusb_free_pollfds(list);
        }
        Ok(descriptors)
    }

    fn submit_bulk_out(
        &mut self,
        endpoint: u8,
        data: &[u8],
    ) -> rusb::Result<Box<dyn InFlightTransfer>> {
        let buffer = data.to_vec().into_boxed_slice();
        let transfer = AsyncTransfer::submit(&self.handle, endpoint, buffer)?;
        Ok(Box::new(transfer))
    }

    fn submit_bulk_in(
        &mut self,
        endpoint: u8,
        capacity: usize,
    ) -> rusb::Result<Box<dyn InFlightTransfer>> {
        let buffer = vec![0u8; capacity].into_boxed_slice();
        let transfer = AsyncTransfer::submit(&self.handle, endpoint, buffer)?;
        Ok(Box::new(transfer))
    }

    fn read_bulk(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        self.handle.read_bulk(endpoint, buf, timeout)
    }

    fn handle_events(&mut self, timeout: Duration) -> rusb::Result<()> {
        match self.context.handle_events(Some(timeout)) {
            Err(rusb::Error::Interrupted) => {
                debug!("USB event handling interrupted");
                Ok(())
            }
            other => other,
        }
    }
}

/// Completion callback: flags the transfer as done, nothing else.
///
/// Outcome and data are read back by the owning thread after event handling
/// returns, so no user code runs on the libusb side.
extern "system" fn transfer_complete(transfer: *mut libusb_transfer) {
    // SAFETY: user_data points at the transfer's done flag, which is freed
    // only after completion has been observed (or never, if leaked)
    unsafe {
        let done = (*transfer).user_data as *const AtomicBool;
        (*done).store(true, Ordering::Release);
    }
}

/// A libusb bulk transfer that owns its buffer until completion
struct AsyncTransfer {
    raw: NonNull<libusb_transfer>,
    buffer: Box<[u8]>,
    done: NonNull<AtomicBool>,
    endpoint: u8,
    submitted: bool,
}

impl AsyncTransfer {
    fn submit(
        handle: &DeviceHandle<Context>,
        endpoint: u8,
        mut buffer: Box<[u8]>,
    ) -> rusb::Result<Self> {
        let length = c_int::try_from(buffer.len()).map_err(|_| rusb::Error::InvalidParam)?;

        // SAFETY: plain allocation, checked for NULL below
        let raw =
            NonNull::new(unsafe { ffi::libusb_alloc_transfer(0) }).ok_or(rusb::Error::NoMem)?;
        let done = NonNull::from(Box::leak(Box::new(AtomicBool::new(false))));

        // SAFETY: `raw` is a freshly allocated transfer we exclusively own;
        // buffer and flag live at least as long as the transfer
        unsafe {
            let transfer = raw.as_ptr();
            (*transfer).dev_handle = handle.as_raw();
            (*transfer).endpoint = endpoint;
            (*transfer).transfer_type = TRANSFER_TYPE_BULK;
            (*transfer).timeout = 0;
            (*transfer).buffer = buffer.as_mut_ptr();
            (*transfer).length = length;
            (*transfer).callback = transfer_complete;
            (*transfer).user_data = done.as_ptr().cast::<c_void>();
        }

        let mut transfer = Self {
            raw,
            buffer,
            done,
            endpoint,
            submitted: false,
        };

        // SAFETY: the transfer is fully initialised
        let rc = unsafe { ffi::libusb_submit_transfer(raw.as_ptr()) };
        if rc != 0 {
            return Err(error_from_code(rc));
        }
        transfer.submitted = true;
        Ok(transfer)
    }

    fn is_done(&self) -> bool {
        // SAFETY: the flag outlives `self`
        unsafe { self.done.as_ref() }.load(Ordering::Acquire)
    }
}

impl InFlightTransfer for AsyncTransfer {
    fn state(&self) -> TransferState {
        if !self.is_done() {
            return TransferState::Pending;
        }

        // SAFETY: completion has been signalled, libusb no longer touches the
        // transfer
        let (status, actual) = unsafe {
            let transfer = self.raw.as_ptr();
            ((*transfer).status, (*transfer).actual_length)
        };

        if status == TRANSFER_COMPLETED {
            let len = usize::try_from(actual).unwrap_or(0).min(self.buffer.len());
            TransferState::Completed(self.buffer[..len].to_vec())
        } else {
            TransferState::Failed(TransferFailure::from_status(status))
        }
    }

    fn cancel(&mut self) {
        if self.submitted && !self.is_done() {
            // SAFETY: the transfer is submitted and still owned by us.
            // NOT_FOUND just means it completed concurrently.
            let rc = unsafe { ffi::libusb_cancel_transfer(self.raw.as_ptr()) };
            if rc != 0 {
                debug!(
                    "Cancel on {:#04x}: {}",
                    self.endpoint,
                    error_from_code(rc)
                );
            }
        }
    }
}

impl Drop for AsyncTransfer {
    fn drop(&mut self) {
        if self.submitted && !self.is_done() {
            warn!(
                "Leaking transfer on {:#04x}: completion never observed",
                self.endpoint
            );
            std::mem::forget(std::mem::take(&mut self.buffer));
            return;
        }

        // SAFETY: the transfer was never submitted or has completed, so
        // libusb holds no reference to it, its buffer or its flag
        unsafe {
            ffi::libusb_free_transfer(self.raw.as_ptr());
            drop(Box::from_raw(self.done.as_ptr()));
        }
    }
}

/// Map a negative `libusb_error` code
fn error_from_code(code: c_int) -> rusb::Error {
    match code {
        -1 => rusb::Error::Io,
        -2 => rusb::Error::InvalidParam,
        -3 => rusb::Error::Access,
        -4 => rusb::Error::NoDevice,
        -5 => rusb::Error::NotFound,
        -6 => rusb::Error::Busy,
        -7 => rusb::Error::Timeout,
        -8 => rusb::Error::Overflow,
        -9 => rusb::Error::Pipe,
        -10 => rusb::Error::Interrupted,
        -11 => rusb::Error::NoMem,
        -12 => rusb::Error::NotSupported,
        _ => rusb::Error::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_code() {
        assert_eq!(error_from_code(-4), rusb::Error::NoDevice);
        assert_eq!(error_from_code(-6), rusb::Error::Busy);
        assert_eq!(error_from_code(-9), rusb::Error::Pipe);
        assert_eq!(error_from_code(-99), rusb::Error::Other);
    }
}
