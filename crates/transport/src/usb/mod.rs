//! USB subsystem
//!
//! Discovery of PHDC devices, device sessions, asynchronous bulk transfers
//! and the pollable descriptors that drive them.
//!
//! Everything here is single-threaded: completion handlers run inside event
//! dispatch on the thread that owns the [`TransportContext`]. Front-ends on
//! Tokio drive it from a dedicated thread ([`worker`]).

pub mod context;
pub mod device;
pub mod discovery;
pub mod events;
pub mod libusb;
pub mod link;
pub mod session;
pub mod transfers;
pub mod worker;

pub use context::TransportContext;
pub use device::{DeviceIdentity, DeviceRecord, Receiver};
pub use events::{PollEntry, PollSet};
pub use libusb::LibusbConnector;
pub use link::{HealthLink, InFlightTransfer, LinkConnector, PollDescriptor};
pub use session::{ClaimedInterface, Session, SessionOptions};
pub use transfers::{TransferEngine, TransferFailure, TransferKind, TransferState};
pub use worker::{ProbeWorkerThread, spawn_probe_worker};
