//! Test utilities for the transport
//!
//! [`ScriptedConnector`] hands out in-memory [`HealthLink`]s. Every link
//! reports the read end of a Unix socket pair as its only pollable
//! descriptor, and activity (queued inbound data, submitted sends) writes a
//! wake byte to it, so sessions exercise the real `poll(2)` path.
//!
//! # Example
//!
//! ```
//! use transport::test_utils::{ScriptedConnector, oximeter_record};
//!
//! let (connector, probe) = ScriptedConnector::new();
//! let mut record = oximeter_record();
//! record.open_session(&connector).unwrap();
//! assert_eq!(probe.counters().claims, 1);
//!
//! record.release();
//! assert_eq!(probe.open_handles(), 0);
//! ```

use crate::error::OpenError;
use crate::usb::device::{DeviceIdentity, DeviceRecord};
use crate::usb::link::{HealthLink, InFlightTransfer, LinkConnector, PollDescriptor};
use crate::usb::transfers::{TransferFailure, TransferKind, TransferState};
use nix::poll::PollFlags;
use protocol::{Endpoints, Specialization};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::Duration;

/// Steps at which a scripted link fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailurePlan {
    pub connect: bool,
    pub claim: bool,
    pub reset: bool,
    pub poll_descriptors: bool,
    /// Report success but no descriptors
    pub empty_poll_set: bool,
    pub submit: bool,
}

/// Calls observed across every link of a connector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkCounters {
    pub opens: usize,
    pub closes: usize,
    pub claims: usize,
    pub releases: usize,
    pub resets: usize,
    pub receive_requests: usize,
}

struct Slot {
    kind: TransferKind,
    payload: Vec<u8>,
    capacity: usize,
    state: TransferState,
    cancel_requested: bool,
}

#[derive(Default)]
struct Script {
    counters: LinkCounters,
    sent: Vec<Vec<u8>>,
    inbound: VecDeque<Vec<u8>>,
    blocking: VecDeque<rusb::Result<Vec<u8>>>,
    send_failure: Option<TransferFailure>,
    ignore_cancel: bool,
    slots: Vec<Rc<RefCell<Slot>>>,
}

struct Wake {
    reader: UnixStream,
    writer: UnixStream,
}

impl Wake {
    fn new() -> Self {
        let (writer, reader) = UnixStream::pair().expect("Failed to create socket pair");
        reader
            .set_nonblocking(true)
            .expect("Failed to make socket non-blocking");
        Self { reader, writer }
    }

    fn try_clone(&self) -> std::io::Result<Self> {
        Ok(Self {
            reader: self.reader.try_clone()?,
            writer: self.writer.try_clone()?,
        })
    }

    fn signal(&self) {
        let _ = (&self.writer).write_all(&[1]);
    }

    fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            match (&self.reader).read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }
}

/// Test-side handle for scripting and inspecting links
#[derive(Clone)]
pub struct LinkProbe {
    script: Rc<RefCell<Script>>,
    wake: Rc<Wake>,
}

impl LinkProbe {
    /// Queue a chunk for the next bulk-IN request and signal activity
    pub fn push_inbound(&self, data: &[u8]) {
        self.script.borrow_mut().inbound.push_back(data.to_vec());
        self.wake.signal();
    }

    /// Queue the outcome of the next blocking read
    pub fn push_blocking_read(&self, result: rusb::Result<Vec<u8>>) {
        self.script.borrow_mut().blocking.push_back(result);
    }

    /// Make every later send complete with `failure`
    pub fn fail_sends(&self, failure: TransferFailure) {
        self.script.borrow_mut().send_failure = Some(failure);
    }

    /// Make cancellation requests go unanswered
    pub fn ignore_cancel(&self) {
        self.script.borrow_mut().ignore_cancel = true;
    }

    pub fn counters(&self) -> LinkCounters {
        self.script.borrow().counters.clone()
    }

    /// Links connected and not yet dropped
    pub fn open_handles(&self) -> usize {
        let counters = &self.script.borrow().counters;
        counters.opens - counters.closes
    }

    /// Payloads of every submitted send, in order
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.script.borrow().sent.clone()
    }

    /// Transfers the scripted stack has not completed
    pub fn pending_transfers(&self) -> usize {
        self.script.borrow().slots.len()
    }

    /// Inbound chunks not yet consumed
    pub fn queued_inbound(&self) -> usize {
        self.script.borrow().inbound.len()
    }
}

/// In-memory [`LinkConnector`]
pub struct ScriptedConnector {
    script: Rc<RefCell<Script>>,
    wake: Rc<Wake>,
    plan: FailurePlan,
}

impl ScriptedConnector {
    pub fn new() -> (Self, LinkProbe) {
        Self::with_failures(FailurePlan::default())
    }

    /// # Panics
    ///
    /// If the backing socket pair cannot be created.
    pub fn with_failures(plan: FailurePlan) -> (Self, LinkProbe) {
        let script = Rc::new(RefCell::new(Script::default()));
        let wake = Rc::new(Wake::new());
        let probe = LinkProbe {
            script: Rc::clone(&script),
            wake: Rc::clone(&wake),
        };
        (Self { script, wake, plan }, probe)
    }
}

impl LinkConnector for ScriptedConnector {
    fn connect(&self, vendor_id: u16, product_id: u16) -> Result<Box<dyn HealthLink>, OpenError> {
        if self.plan.connect {
            return Err(OpenError::DeviceNotFound {
                vendor_id,
                product_id,
            });
        }
        let wake = self
            .wake
            .try_clone()
            .map_err(|_| OpenError::ContextInit(rusb::Error::Io))?;

        self.script.borrow_mut().counters.opens += 1;
        Ok(Box::new(ScriptedLink {
            script: Rc::clone(&self.script),
            wake,
            plan: self.plan,
        }))
    }
}

struct ScriptedLink {
    script: Rc<RefCell<Script>>,
    wake: Wake,
    plan: FailurePlan,
}

impl ScriptedLink {
    fn submit(
        &mut self,
        kind: TransferKind,
        payload: Vec<u8>,
        capacity: usize,
    ) -> Box<dyn InFlightTransfer> {
        let slot = Rc::new(RefCell::new(Slot {
            kind,
            payload,
            capacity,
            state: TransferState::Pending,
            cancel_requested: false,
        }));
        self.script.borrow_mut().slots.push(Rc::clone(&slot));
        Box::new(ScriptedTransfer { slot })
    }
}

impl HealthLink for ScriptedLink {
    fn claim_interface(&mut self, _interface: u8) -> rusb::Result<()> {
        if self.plan.claim {
            return Err(rusb::Error::Busy);
        }
        self.script.borrow_mut().counters.claims += 1;
        Ok(())
    }

    fn release_interface(&mut self, _interface: u8) -> rusb::Result<()> {
        self.script.borrow_mut().counters.releases += 1;
        Ok(())
    }

    fn reset(&mut self) -> rusb::Result<()> {
        if self.plan.reset {
            return Err(rusb::Error::NoDevice);
        }
        self.script.borrow_mut().counters.resets += 1;
        Ok(())
    }

    fn poll_descriptors(&self) -> rusb::Result<Vec<PollDescriptor>> {
        if self.plan.poll_descriptors {
            return Err(rusb::Error::NotSupported);
        }
        if self.plan.empty_poll_set {
            return Ok(Vec::new());
        }
        Ok(vec![PollDescriptor {
            fd: self.wake.reader.as_raw_fd(),
            events: PollFlags::POLLIN,
        }])
    }

    fn submit_bulk_out(
        &mut self,
        _endpoint: u8,
        data: &[u8],
    ) -> rusb::Result<Box<dyn InFlightTransfer>> {
        if self.plan.submit {
            return Err(rusb::Error::Io);
        }
        self.script.borrow_mut().sent.push(data.to_vec());
        let transfer = self.submit(TransferKind::Send, data.to_vec(), data.len());
        self.wake.signal();
        Ok(transfer)
    }

    fn submit_bulk_in(
        &mut self,
        _endpoint: u8,
        capacity: usize,
    ) -> rusb::Result<Box<dyn InFlightTransfer>> {
        if self.plan.submit {
            return Err(rusb::Error::Io);
        }
        self.script.borrow_mut().counters.receive_requests += 1;
        Ok(self.submit(TransferKind::Receive, Vec::new(), capacity))
    }

    fn read_bulk(
        &mut self,
        _endpoint: u8,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> rusb::Result<usize> {
        match self.script.borrow_mut().blocking.pop_front() {
            Some(Ok(data)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok(len)
            }
            Some(Err(e)) => Err(e),
            None => Err(rusb::Error::Timeout),
        }
    }

    fn handle_events(&mut self, _timeout: Duration) -> rusb::Result<()> {
        self.wake.drain();

        let mut script = self.script.borrow_mut();
        let Script {
            inbound,
            send_failure,
            ignore_cancel,
            slots,
            ..
        } = &mut *script;

        for slot in slots.iter() {
            let mut slot = slot.borrow_mut();
            if slot.cancel_requested && !*ignore_cancel {
                slot.state = TransferState::Failed(TransferFailure::Cancelled);
                continue;
            }
            match slot.kind {
                TransferKind::Send => {
                    slot.state = match send_failure {
                        Some(failure) => TransferState::Failed(*failure),
                        None => TransferState::Completed(slot.payload.clone()),
                    };
                }
                TransferKind::Receive => {
                    if let Some(chunk) = inbound.pop_front() {
                        slot.state = if chunk.len() > slot.capacity {
                            TransferState::Failed(TransferFailure::Overflow)
                        } else {
                            TransferState::Completed(chunk)
                        };
                    }
                }
            }
        }
        slots.retain(|slot| slot.borrow().state.is_pending());

        if !inbound.is_empty() {
            self.wake.signal();
        }
        Ok(())
    }
}

impl Drop for ScriptedLink {
    fn drop(&mut self) {
        self.script.borrow_mut().counters.closes += 1;
    }
}

struct ScriptedTransfer {
    slot: Rc<RefCell<Slot>>,
}

impl InFlightTransfer for ScriptedTransfer {
    fn state(&self) -> TransferState {
        self.slot.borrow().state.clone()
    }

    fn cancel(&mut self) {
        self.slot.borrow_mut().cancel_requested = true;
    }
}

/// Record of a pulse oximeter with bulk-in 0x81, bulk-out 0x02 and
/// interrupt-in 0x83 on interface 0
pub fn oximeter_record() -> DeviceRecord {
    DeviceRecord::new(
        DeviceIdentity {
            vendor_id: 0x0483,
            product_id: 0x5750,
            bus_number: 1,
            device_address: 4,
            name: "Pulse Oximeter".to_string(),
            manufacturer: "Test Manufacturer".to_string(),
            serial_number: "SN000001".to_string(),
        },
        0,
        Endpoints {
            bulk_in: Some(0x81),
            bulk_out: Some(0x02),
            interrupt_in: Some(0x83),
        },
        vec![Specialization::PULSE_OXIMETER],
    )
}

/// Record whose interface exposes only the given endpoints
pub fn record_with_endpoints(endpoints: Endpoints) -> DeviceRecord {
    DeviceRecord::new(
        DeviceIdentity {
            vendor_id: 0x0483,
            product_id: 0x5751,
            bus_number: 1,
            device_address: 5,
            name: "Weighing Scale".to_string(),
            ..DeviceIdentity::default()
        },
        1,
        endpoints,
        vec![Specialization::WEIGHING_SCALE],
    )
}
